//! 身份解析
//!
//! 解析顺序（tracker 中显式设置的用户 ID 优先于这里的一切）：
//! 1. 凭据存储中的 bearer token，解出 user_id / sub / id 声明
//! 2. 凭据存储中的明文用户 ID
//! 3. 匿名（None）
//!
//! 步骤 1、2 的失败只记录 debug 日志，继续下一步。

pub mod jwt;
pub mod store;

pub use jwt::{ClaimsDecoder, TokenClaims};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};

use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::IdentityConfig;

/// 解析当前用户 ID
pub trait IdentityResolver: Send + Sync {
    fn resolve_user_id(&self) -> Option<String>;
}

/// 始终匿名
pub struct AnonymousResolver;

impl IdentityResolver for AnonymousResolver {
    fn resolve_user_id(&self) -> Option<String> {
        None
    }
}

/// 固定用户 ID，供宿主或测试注入确定的身份来源
pub struct StaticResolver(pub String);

impl IdentityResolver for StaticResolver {
    fn resolve_user_id(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// 基于凭据存储的解析器
pub struct StoredCredentialResolver {
    store: Arc<dyn CredentialStore>,
    decoder: ClaimsDecoder,
    token_key: String,
    user_id_key: String,
}

impl StoredCredentialResolver {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        decoder: ClaimsDecoder,
        token_key: impl Into<String>,
        user_id_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            decoder,
            token_key: token_key.into(),
            user_id_key: user_id_key.into(),
        }
    }

    /// 按配置构建：有 credential_file 时读文件，否则使用给定的内存存储
    ///
    /// 文件存储每次查询只做一次 `metadata` 调用，文件变化后才重新解析。
    pub fn from_config(config: &IdentityConfig, fallback: Arc<dyn CredentialStore>) -> Self {
        let store: Arc<dyn CredentialStore> = match &config.credential_file {
            Some(path) if !path.is_empty() => Arc::new(FileCredentialStore::new(path)),
            _ => fallback,
        };
        let decoder = match &config.jwt_secret {
            Some(secret) if !secret.is_empty() => ClaimsDecoder::verified(secret),
            _ => ClaimsDecoder::unverified(),
        };
        Self::new(store, decoder, &config.token_key, &config.user_id_key)
    }

    fn from_token(&self) -> Option<String> {
        let token = self.store.get(&self.token_key)?;
        match self.decoder.decode(&token) {
            Ok(claims) => {
                let user_id = claims.user_id();
                if user_id.is_none() {
                    debug!("Identity: token has no user_id/sub/id claim");
                }
                user_id
            }
            Err(e) => {
                debug!("Identity: failed to decode stored token: {}", e);
                None
            }
        }
    }

    fn from_plain_value(&self) -> Option<String> {
        self.store
            .get(&self.user_id_key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

impl IdentityResolver for StoredCredentialResolver {
    fn resolve_user_id(&self) -> Option<String> {
        if let Some(id) = self.from_token() {
            trace!("Identity: resolved from token");
            return Some(id);
        }
        if let Some(id) = self.from_plain_value() {
            trace!("Identity: resolved from stored user id");
            return Some(id);
        }
        None
    }
}
