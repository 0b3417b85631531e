//! 存储 key 命名
//!
//! 所有 key 都挂在同一个可配置前缀下，冒号分隔：
//!
//! | 用途 | key |
//! |------|-----|
//! | 会话记录 | `<prefix>:session:<app>:<user>:<id>` |
//! | 会话索引 | `<prefix>:index:<app>:<user>` |
//! | 事件日志 | `<prefix>:events:<app>:<user>:<id>` |
//! | app 级状态 | `<prefix>:app_state:<app>` |
//! | user 级状态 | `<prefix>:user_state:<app>:<user>` |

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

pub const DEFAULT_KEY_PREFIX: &str = "session";

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn session(&self, app: &str, user: &str, session_id: &str) -> String {
        format!("{}:session:{}:{}:{}", self.prefix, app, user, session_id)
    }

    pub fn index(&self, app: &str, user: &str) -> String {
        format!("{}:index:{}:{}", self.prefix, app, user)
    }

    pub fn events(&self, app: &str, user: &str, session_id: &str) -> String {
        format!("{}:events:{}:{}:{}", self.prefix, app, user, session_id)
    }

    pub fn app_state(&self, app: &str) -> String {
        format!("{}:app_state:{}", self.prefix, app)
    }

    pub fn user_state(&self, app: &str, user: &str) -> String {
        format!("{}:user_state:{}:{}", self.prefix, app, user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_families_are_distinct() {
        let ks = KeySpace::default();
        let keys = [
            ks.session("app", "alice", "s1"),
            ks.index("app", "alice"),
            ks.events("app", "alice", "s1"),
            ks.app_state("app"),
            ks.user_state("app", "alice"),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert_eq!(keys[0], "session:session:app:alice:s1");
        assert_eq!(keys[3], "session:app_state:app");
    }

    #[test]
    fn test_custom_prefix() {
        let ks = KeySpace::new("prod");
        assert_eq!(ks.user_state("a", "u"), "prod:user_state:a:u");
    }
}
