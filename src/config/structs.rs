use serde::{Deserialize, Serialize};

use crate::errors::{Result, TrackerError};

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// 静态配置（从 TOML 加载，启动时使用）
///
/// 包含：
/// - tracker: 收集端地址、缓冲阈值、刷新间隔
/// - identity: 凭据存储与 JWT 解析
/// - logging: 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StaticConfig {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StaticConfig {
    /// 从 TOML 文件和环境变量加载配置
    ///
    /// 优先级：ENV > config.toml > 默认值
    /// ENV 前缀：PT，分隔符：__
    /// 示例：PT__TRACKER__BUFFER_SIZE=20
    pub fn load(path: Option<&str>) -> Self {
        let path = path.unwrap_or(DEFAULT_CONFIG_PATH);
        match Self::try_load(path) {
            Ok(config) => {
                if std::path::Path::new(path).exists() {
                    eprintln!("[INFO] Configuration loaded from: {}", path);
                }
                config
            }
            Err(e) => {
                eprintln!("[ERROR] Failed to load config: {}", e);
                Self::default()
            }
        }
    }

    /// 加载配置，失败时返回错误而不是回退到默认值
    pub fn try_load(path: &str) -> Result<Self> {
        use config::{Config, Environment, File};

        let settings = Config::builder()
            // 1. 从 TOML 文件加载（可选）
            .add_source(File::with_name(path).required(false))
            // 2. 从环境变量覆盖，前缀 PT，分隔符 __
            .add_source(
                Environment::with_prefix("PT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize::<StaticConfig>()?)
    }

    /// 生成示例 TOML 配置文件
    pub fn generate_sample_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|e| format!("Error generating sample config: {}", e))
    }

    /// 保存配置到 TOML 文件
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content).map_err(TrackerError::from)
    }
}

/// 行为追踪配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// 收集端基础地址，批量请求发往 `{url}/collect`
    #[serde(default = "default_collection_server_url")]
    pub collection_server_url: String,
    /// 输出生命周期与发送结果的诊断日志
    #[serde(default)]
    pub debug: bool,
    /// 点击累积到该数量时自动刷新
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// 周期刷新间隔（毫秒），0 表示关闭定时器
    #[serde(default = "default_flush_interval")]
    pub flush_interval: u64,
    /// 缓冲区上限；未设置时失败重试不设上限
    #[serde(default)]
    pub max_pending: Option<usize>,
    /// 单次投递请求超时（毫秒）
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// 身份解析配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// JSON 凭据文件；未设置时使用内存存储
    #[serde(default)]
    pub credential_file: Option<String>,
    /// 存放 bearer token 的键
    #[serde(default = "default_token_key")]
    pub token_key: String,
    /// 存放明文用户 ID 的键
    #[serde(default = "default_user_id_key")]
    pub user_id_key: String,
    /// 配置后校验 HS256 签名与过期时间
    #[serde(default)]
    pub jwt_secret: Option<String>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    #[serde(default = "default_enable_rotation")]
    pub enable_rotation: bool,
}

// ============================================================
// Default value functions for static config
// ============================================================

fn default_collection_server_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_buffer_size() -> usize {
    10
}

fn default_flush_interval() -> u64 {
    30_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_token_key() -> String {
    "access_token".to_string()
}

fn default_user_id_key() -> String {
    "user_id".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_max_backups() -> u32 {
    5
}

fn default_enable_rotation() -> bool {
    true
}

// ============================================================
// Default implementations
// ============================================================

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            collection_server_url: default_collection_server_url(),
            debug: false,
            buffer_size: default_buffer_size(),
            flush_interval: default_flush_interval(),
            max_pending: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            credential_file: None,
            token_key: default_token_key(),
            user_id_key: default_user_id_key(),
            jwt_secret: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            max_backups: default_max_backups(),
            enable_rotation: default_enable_rotation(),
        }
    }
}
