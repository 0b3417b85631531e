//! 事件日志
//!
//! 每个会话一条追加式 list，元素为 JSON 编码的 [`Event`]，按插入顺序排列。
//! 事件写入后不可修改，也不会单独删除；会话删除时整条日志一起删除。
//!
//! ## 两种读取视图
//!
//! | 视图 | 来源 | `all()` / `len()` / `at()` |
//! |------|------|----------------------------|
//! | [`Events::Live`] | 未过滤的 `get` / `list` | 每次调用都重新从存储读取 |
//! | [`Events::Frozen`] | 带过滤条件的 `get` | 只返回读取时的快照，之后的追加不可见 |

use crate::error::Result;
use crate::kv::KvStore;
use crate::session::state::StateMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

// ── Event ─────────────────────────────────────────────────────────────────────

/// 事件附带的副作用
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventActions {
    /// 状态增量，key 规则与 state 视图相同（`app:` / `user:` / `temp:` / 无前缀）
    #[serde(default, skip_serializing_if = "StateMap::is_empty")]
    pub state_delta: StateMap,
    #[serde(default)]
    pub skip_summarization: bool,
}

/// 会话中的单条事件
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// 为空时在追加时分配 UUID v4
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub invocation_id: String,
    /// 产生事件的一方（`user` 或 agent 名）
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// 服务端追加时写入的 Unix 时间戳（秒）
    #[serde(default)]
    pub timestamp: f64,
    /// 流式输出中的中间片段，永不落盘
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
    #[serde(default)]
    pub turn_complete: bool,
    /// 任意负载（消息内容、工具调用等）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default)]
    pub actions: EventActions,
}

impl Event {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_invocation_id(mut self, invocation_id: impl Into<String>) -> Self {
        self.invocation_id = invocation_id.into();
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_content(mut self, content: Value) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_state_delta(mut self, delta: StateMap) -> Self {
        self.actions.state_delta = delta;
        self
    }

    pub fn partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    pub fn turn_complete(mut self, done: bool) -> Self {
        self.turn_complete = done;
        self
    }
}

pub(crate) fn now_secs_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// 读取时的过滤：先保留最后 `num_recent` 条，再保留 `timestamp >= after` 的事件
pub fn filter_events(events: Vec<Event>, num_recent: Option<usize>, after: Option<f64>) -> Vec<Event> {
    let mut events = events;
    if let Some(n) = num_recent {
        let skip = events.len().saturating_sub(n);
        events.drain(..skip);
    }
    if let Some(cutoff) = after {
        events.retain(|e| e.timestamp >= cutoff);
    }
    events
}

// ── EventLog ──────────────────────────────────────────────────────────────────

/// 事件 list 的读写
#[derive(Clone)]
pub struct EventLog {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl EventLog {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// 追加一条已定稿的事件，并把整条日志的 TTL 刷新为会话 TTL
    pub async fn push(&self, key: &str, event: &Event) -> Result<u64> {
        let encoded = serde_json::to_string(event)?;
        let len = self.store.rpush(key, vec![encoded]).await?;
        self.store.expire(key, self.ttl).await?;
        Ok(len)
    }

    /// 按插入顺序读出全部事件；单条 JSON 损坏时跳过该条
    pub async fn load(&self, key: &str) -> Result<Vec<Event>> {
        let raw = self.store.lrange(key, 0, -1).await?;
        let mut events = Vec::with_capacity(raw.len());
        for (index, item) in raw.iter().enumerate() {
            match serde_json::from_str::<Event>(item) {
                Ok(event) => events.push(event),
                Err(e) => warn!(key = %key, index, error = %e, "跳过无法解析的事件"),
            }
        }
        Ok(events)
    }
}

// ── Events 视图 ───────────────────────────────────────────────────────────────

/// 会话的事件视图
#[derive(Clone)]
pub enum Events {
    /// 实时视图：访问器每次都重新读取存储；`cached` 是读取会话时物化的副本
    Live {
        log: EventLog,
        key: String,
        cached: Vec<Event>,
    },
    /// 过滤后的冻结快照
    Frozen(Vec<Event>),
}

impl Events {
    pub fn is_frozen(&self) -> bool {
        matches!(self, Events::Frozen(_))
    }

    /// 内存中已物化的事件，不产生 I/O
    pub fn snapshot(&self) -> &[Event] {
        match self {
            Events::Live { cached, .. } => cached,
            Events::Frozen(events) => events,
        }
    }

    pub async fn all(&self) -> Result<Vec<Event>> {
        match self {
            Events::Live { log, key, .. } => log.load(key).await,
            Events::Frozen(events) => Ok(events.clone()),
        }
    }

    pub async fn len(&self) -> Result<usize> {
        match self {
            Events::Live { .. } => Ok(self.all().await?.len()),
            Events::Frozen(events) => Ok(events.len()),
        }
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// 越界时返回 `None`
    pub async fn at(&self, index: usize) -> Result<Option<Event>> {
        match self {
            Events::Live { .. } => Ok(self.all().await?.into_iter().nth(index)),
            Events::Frozen(events) => Ok(events.get(index).cloned()),
        }
    }

    /// 追加成功后同步内存副本；冻结视图不反映之后的追加
    pub(crate) fn record_appended(&mut self, event: Event) {
        if let Events::Live { cached, .. } = self {
            cached.push(event);
        }
    }
}

impl std::fmt::Debug for Events {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Events::Live { key, cached, .. } => f
                .debug_struct("Live")
                .field("key", key)
                .field("cached", &cached.len())
                .finish(),
            Events::Frozen(events) => f.debug_tuple("Frozen").field(&events.len()).finish(),
        }
    }
}
