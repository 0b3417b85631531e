//! 会话对象及其 state 视图

use crate::error::{Result, SessionError};
use crate::session::backend::Backend;
use crate::session::event::Events;
use crate::session::state::{StateMap, Tier, session_only};
use serde_json::Value;
use tracing::debug;

/// 一个活跃会话：身份 + 合并后的 state 视图 + 事件视图
#[derive(Debug)]
pub struct Session {
    pub(crate) id: String,
    pub(crate) app_name: String,
    pub(crate) user_id: String,
    pub(crate) state: State,
    pub(crate) events: Events,
    pub(crate) last_update_time: f64,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    pub fn events(&self) -> &Events {
        &self.events
    }

    /// 最后一次追加事件的 Unix 时间戳（秒）
    pub fn last_update_time(&self) -> f64 {
        self.last_update_time
    }
}

/// 合并后的 state 视图
///
/// 读操作只看内存；[`State::set`] 会先同步写存储，成功后再更新内存。
pub struct State {
    data: StateMap,
    backend: Backend,
    app_name: String,
    user_id: String,
    session_id: String,
}

impl State {
    pub(crate) fn new(
        data: StateMap,
        backend: Backend,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Self {
        Self {
            data,
            backend,
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
        }
    }

    /// 不存在时返回 [`SessionError::KeyNotFound`]
    pub fn get(&self, key: &str) -> Result<&Value> {
        self.data
            .get(key)
            .ok_or_else(|| SessionError::KeyNotFound(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// 按 key 顺序遍历当前已知的全部条目（内存快照，可重复迭代）
    pub fn all(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.data.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn as_map(&self) -> &StateMap {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 直接写入一个 key，绕过事件管道，按前缀同步落盘：
    ///
    /// - `app:` / `user:`：写对应层的 hash，并应用该层的过期策略
    /// - `temp:`：只进内存
    /// - 无前缀：读-改-写会话记录，用内存中全部 session 层条目替换记录状态
    ///
    /// 最后一种路径与并发的 `append_event` 竞争同一条记录，后写者覆盖先写者。
    pub async fn set(&mut self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        let tier = Tier::of(&key);
        let (app, user, id) = (&self.app_name, &self.user_id, &self.session_id);
        match tier {
            Tier::App | Tier::User => {
                let mut delta = StateMap::new();
                delta.insert(tier.strip(&key).to_string(), value.clone());
                if tier == Tier::App {
                    self.backend
                        .app_tier
                        .upsert(&self.backend.keys.app_state(app), &delta)
                        .await?;
                } else {
                    self.backend
                        .user_tier
                        .upsert(&self.backend.keys.user_state(app, user), &delta)
                        .await?;
                }
            }
            Tier::Temp => {}
            Tier::Session => {
                let mut session_state = session_only(&self.data);
                session_state.insert(key.clone(), value.clone());
                self.backend
                    .rewrite_session_state(app, user, id, session_state)
                    .await?;
            }
        }
        debug!(session_id = %self.session_id, key = %key, tier = ?tier, "state 已写入");
        self.data.insert(key, value);
        Ok(())
    }

    /// 将已落盘的事件增量同步到内存视图（key 保留前缀，`temp:` 跳过）
    pub(crate) fn apply_delta(&mut self, delta: &StateMap) {
        for (k, v) in delta {
            if Tier::of(k).is_persisted() {
                self.data.insert(k.clone(), v.clone());
            }
        }
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.data.iter()).finish()
    }
}
