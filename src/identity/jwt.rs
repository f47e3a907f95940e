use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, TrackerError};

/// 从 bearer token 中读取的声明
///
/// 不同登录方式签发的 token 字段不一致，三个候选字段都可选。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl TokenClaims {
    /// user_id > sub > id，数字会转成字符串
    pub fn user_id(&self) -> Option<String> {
        claim_as_string(self.user_id.as_ref())
            .or_else(|| self.sub.clone().filter(|s| !s.is_empty()))
            .or_else(|| claim_as_string(self.id.as_ref()))
    }
}

fn claim_as_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Bearer token 声明解码器
pub enum ClaimsDecoder {
    /// 只解码 payload，不校验签名（与浏览器端读取本地 token 的行为一致）
    Unverified,
    /// 校验 HS256 签名与过期时间
    Verified {
        key: DecodingKey,
        validation: Validation,
    },
}

impl ClaimsDecoder {
    pub fn unverified() -> Self {
        Self::Unverified
    }

    pub fn verified(secret: &str) -> Self {
        Self::Verified {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    pub fn decode(&self, token: &str) -> Result<TokenClaims> {
        let token = token.trim().trim_start_matches("Bearer ").trim();
        match self {
            Self::Unverified => decode_payload(token),
            Self::Verified { key, validation } => {
                Ok(decode::<TokenClaims>(token, key, validation)?.claims)
            }
        }
    }
}

fn decode_payload(token: &str) -> Result<TokenClaims> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
        _ => return Err(TrackerError::credential("token is not a three-part JWT")),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| TrackerError::credential(format!("invalid token payload encoding: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| TrackerError::credential(format!("invalid token payload: {}", e)))
}
