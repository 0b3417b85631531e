use std::fmt;
use std::time::Duration;

/// 会话存储的统一错误类型
#[derive(Debug)]
pub enum SessionError {
    /// 会话记录不存在
    NotFound {
        app: String,
        user: String,
        session_id: String,
    },
    /// 以相同 ID 重复创建
    AlreadyExists {
        app: String,
        user: String,
        session_id: String,
    },
    /// 持久化的 JSON 无法解析
    Encoding(String),
    /// 底层 KV 存储不可用，原样透传
    StoreUnavailable(StoreError),
    /// State 视图中不存在该 key（可预期，不记为错误日志）
    KeyNotFound(String),
    /// 操作超过配置的截止时间
    Timeout(Duration),
    /// 配置错误
    Config(ConfigError),
    /// 参数无效（如空的 app / user）
    InvalidArgument(String),
}

/// KV 存储后端错误
#[derive(Debug, Clone, PartialEq)]
pub struct StoreError {
    /// 失败的命令（如 `HSET`、`LRANGE`）
    pub command: String,
    pub message: String,
}

impl StoreError {
    pub fn new(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            message: message.into(),
        }
    }

    /// key 上的值类型与命令不匹配（对应 Redis 的 WRONGTYPE）
    pub fn wrong_type(command: &str, key: &str) -> Self {
        Self::new(
            command,
            format!("WRONGTYPE operation against key '{key}' holding the wrong kind of value"),
        )
    }
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),
    /// 配置解析失败
    ParseFailed(String),
    /// 配置值无效
    InvalidValue { field: String, message: String },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotFound {
                app,
                user,
                session_id,
            } => write!(
                f,
                "Session not found: app={}, user={}, id={}",
                app, user, session_id
            ),
            SessionError::AlreadyExists {
                app,
                user,
                session_id,
            } => write!(
                f,
                "Session already exists: app={}, user={}, id={}",
                app, user, session_id
            ),
            SessionError::Encoding(msg) => write!(f, "Encoding error: {}", msg),
            SessionError::StoreUnavailable(e) => write!(f, "Store unavailable: {}", e),
            SessionError::KeyNotFound(key) => write!(f, "State key '{}' not found", key),
            SessionError::Timeout(d) => write!(f, "Operation timed out after {:?}", d),
            SessionError::Config(e) => write!(f, "Config Error: {}", e),
            SessionError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.command, self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseFailed(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, message } => {
                write!(f, "Invalid config value for '{}': {}", field, message)
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::StoreUnavailable(e) => Some(e),
            SessionError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for StoreError {}
impl std::error::Error for ConfigError {}

impl SessionError {
    pub(crate) fn not_found(app: &str, user: &str, session_id: &str) -> Self {
        SessionError::NotFound {
            app: app.to_string(),
            user: user.to_string(),
            session_id: session_id.to_string(),
        }
    }

    pub(crate) fn already_exists(app: &str, user: &str, session_id: &str) -> Self {
        SessionError::AlreadyExists {
            app: app.to_string(),
            user: user.to_string(),
            session_id: session_id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SessionError::NotFound { .. })
    }
}

// From 转换实现
impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        SessionError::StoreUnavailable(err)
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Encoding(err.to_string())
    }
}

impl From<serde_yaml::Error> for SessionError {
    fn from(err: serde_yaml::Error) -> Self {
        SessionError::Config(ConfigError::ParseFailed(err.to_string()))
    }
}

impl From<ConfigError> for SessionError {
    fn from(err: ConfigError) -> Self {
        SessionError::Config(err)
    }
}

// 便捷的 Result 类型别名
pub type Result<T> = std::result::Result<T, SessionError>;
