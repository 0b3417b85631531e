//! 会话服务配置
//!
//! 支持三种来源：
//!
//! - YAML 文件：[`SessionConfig::load`]
//! - 环境变量（先读 `.env`）：[`SessionConfig::from_env`]
//! - 代码中链式设置：`SessionConfig::default().session_ttl(..)`
//!
//! YAML 示例（时长单位为秒，省略的层级 TTL 表示永不过期）：
//!
//! ```yaml
//! key_prefix: session
//! session_ttl: 604800
//! app_state_ttl: 2592000
//! op_timeout: 5
//! ```
//!
//! 环境变量：
//! ```text
//! ECHO_SESSION_KEY_PREFIX=session
//! ECHO_SESSION_TTL=604800
//! ECHO_SESSION_APP_STATE_TTL=0        # 0 = 永不过期
//! ECHO_SESSION_USER_STATE_TTL=86400
//! ECHO_SESSION_OP_TIMEOUT=5
//! ```

use crate::error::{ConfigError, Result};
use crate::session::keys::DEFAULT_KEY_PREFIX;
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 默认会话 TTL：7 天
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// 任一 TTL / 超时的上限：100 年
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

const ENV_PREFIX: &str = "ECHO_SESSION_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 所有存储 key 的公共前缀
    pub key_prefix: String,
    /// 会话记录、事件日志、会话索引的 TTL
    #[serde(with = "secs")]
    pub session_ttl: Duration,
    /// app 层 hash 的 TTL，`None` 表示永不过期
    #[serde(with = "opt_secs")]
    pub app_state_ttl: Option<Duration>,
    /// user 层 hash 的 TTL，`None` 表示永不过期
    #[serde(with = "opt_secs")]
    pub user_state_ttl: Option<Duration>,
    /// 单个公开操作的截止时间，`None` 表示不限制
    #[serde(with = "opt_secs")]
    pub op_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            session_ttl: DEFAULT_SESSION_TTL,
            app_state_ttl: None,
            user_state_ttl: None,
            op_timeout: None,
        }
    }
}

impl SessionConfig {
    pub fn load(path: &str) -> Result<Self> {
        let file =
            std::fs::File::open(path).map_err(|_| ConfigError::FileNotFound(path.to_string()))?;
        let config: SessionConfig = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let mut config = Self::default();
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "KEY_PREFIX" => config.key_prefix = value,
                "TTL" => config.session_ttl = Duration::from_secs(parse_secs(&key, &value)?),
                "APP_STATE_TTL" => config.app_state_ttl = non_zero(parse_secs(&key, &value)?),
                "USER_STATE_TTL" => config.user_state_ttl = non_zero(parse_secs(&key, &value)?),
                "OP_TIMEOUT" => config.op_timeout = non_zero(parse_secs(&key, &value)?),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: key.clone(),
                        message: "unknown setting".to_string(),
                    }
                    .into());
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "session_ttl".to_string(),
                message: "must be positive".to_string(),
            }
            .into());
        }
        if self.key_prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "key_prefix".to_string(),
                message: "must not be empty".to_string(),
            }
            .into());
        }
        let bounded = [
            ("session_ttl", Some(self.session_ttl)),
            ("app_state_ttl", self.app_state_ttl),
            ("user_state_ttl", self.user_state_ttl),
            ("op_timeout", self.op_timeout),
        ];
        for (field, value) in bounded {
            if value.is_some_and(|d| d > MAX_TTL) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("must not exceed {} seconds", MAX_TTL.as_secs()),
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn app_state_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.app_state_ttl = ttl;
        self
    }

    pub fn user_state_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.user_state_ttl = ttl;
        self
    }

    pub fn op_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.op_timeout = timeout;
        self
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|e| {
        ConfigError::InvalidValue {
            field: key.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

fn non_zero(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    /// 缺省、`null` 和 `0` 都视为未配置
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?
            .filter(|s| *s > 0)
            .map(Duration::from_secs))
    }
}
