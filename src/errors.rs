use std::fmt;

#[derive(Debug, Clone)]
pub enum TrackerError {
    Config(String),
    Credential(String),
    Delivery(String),
    FileOperation(String),
    Serialization(String),
    Validation(String),
}

impl TrackerError {
    /// 获取错误代码
    pub fn code(&self) -> &'static str {
        match self {
            TrackerError::Config(_) => "T001",
            TrackerError::Credential(_) => "T002",
            TrackerError::Delivery(_) => "T003",
            TrackerError::FileOperation(_) => "T004",
            TrackerError::Serialization(_) => "T005",
            TrackerError::Validation(_) => "T006",
        }
    }

    /// 获取错误类型名称
    pub fn error_type(&self) -> &'static str {
        match self {
            TrackerError::Config(_) => "Configuration Error",
            TrackerError::Credential(_) => "Credential Error",
            TrackerError::Delivery(_) => "Delivery Error",
            TrackerError::FileOperation(_) => "File Operation Error",
            TrackerError::Serialization(_) => "Serialization Error",
            TrackerError::Validation(_) => "Validation Error",
        }
    }

    /// 获取错误详情
    pub fn message(&self) -> &str {
        match self {
            TrackerError::Config(msg)
            | TrackerError::Credential(msg)
            | TrackerError::Delivery(msg)
            | TrackerError::FileOperation(msg)
            | TrackerError::Serialization(msg)
            | TrackerError::Validation(msg) => msg,
        }
    }

    /// 格式化为彩色输出（用于终端）
    pub fn format_colored(&self) -> String {
        use colored::Colorize;
        format!(
            "{} {} {}\n  {}",
            "[ERROR]".red().bold(),
            self.code().yellow(),
            self.error_type().red(),
            self.message().white()
        )
    }

    /// 格式化为简洁输出
    pub fn format_simple(&self) -> String {
        format!("{}: {}", self.error_type(), self.message())
    }
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_simple())
    }
}

impl std::error::Error for TrackerError {}

// 便捷的构造函数
impl TrackerError {
    pub fn config<T: Into<String>>(msg: T) -> Self {
        TrackerError::Config(msg.into())
    }

    pub fn credential<T: Into<String>>(msg: T) -> Self {
        TrackerError::Credential(msg.into())
    }

    pub fn delivery<T: Into<String>>(msg: T) -> Self {
        TrackerError::Delivery(msg.into())
    }

    pub fn file_operation<T: Into<String>>(msg: T) -> Self {
        TrackerError::FileOperation(msg.into())
    }

    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        TrackerError::Serialization(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        TrackerError::Validation(msg.into())
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        TrackerError::FileOperation(err.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for TrackerError {
    fn from(err: config::ConfigError) -> Self {
        TrackerError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for TrackerError {
    fn from(err: toml::ser::Error) -> Self {
        TrackerError::Serialization(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for TrackerError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        TrackerError::Credential(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
