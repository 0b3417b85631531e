//! 会话记录与会话索引
//!
//! 记录只保存 session 层状态（app / user / temp 条目不会进入记录），
//! 每次改动都带着会话 TTL 整条重写。索引是每个 (app, user) 一个 set，
//! 只作为列举的线索：成员可能比它指向的记录活得更久。

use crate::error::{Result, SessionError};
use crate::kv::{BatchOp, KvStore};
use crate::session::keys::KeySpace;
use crate::session::state::StateMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 落盘的最小会话表示
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorableSession {
    pub id: String,
    #[serde(rename = "appName")]
    pub app_name: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    /// 仅 session 层状态
    #[serde(default)]
    pub state: StateMap,
    #[serde(rename = "lastUpdateTime", default)]
    pub last_update_time: f64,
}

#[derive(Clone)]
pub struct RecordStore {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
    ttl: Duration,
}

impl RecordStore {
    pub fn new(store: Arc<dyn KvStore>, keys: KeySpace, ttl: Duration) -> Self {
        Self { store, keys, ttl }
    }

    pub async fn exists(&self, app: &str, user: &str, session_id: &str) -> Result<bool> {
        Ok(self
            .store
            .exists(&self.keys.session(app, user, session_id))
            .await?)
    }

    /// 读取记录；不存在返回 `None`，JSON 损坏返回 [`SessionError::Encoding`]
    pub async fn load(&self, app: &str, user: &str, session_id: &str) -> Result<Option<StorableSession>> {
        let key = self.keys.session(app, user, session_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let record = serde_json::from_str(&raw)
            .map_err(|e| SessionError::Encoding(format!("会话记录 {key} 无法解析: {e}")))?;
        Ok(Some(record))
    }

    /// 整条重写记录并刷新 TTL
    pub async fn save(&self, record: &StorableSession) -> Result<()> {
        let key = self
            .keys
            .session(&record.app_name, &record.user_id, &record.id);
        let encoded = serde_json::to_string(record)?;
        self.store.set(&key, encoded, Some(self.ttl)).await?;
        debug!(key = %key, fields = record.state.len(), "会话记录已写入");
        Ok(())
    }

    /// 把会话 ID 加入索引，并刷新索引 TTL
    pub async fn index_add(&self, app: &str, user: &str, session_id: &str) -> Result<()> {
        let key = self.keys.index(app, user);
        self.store.sadd(&key, vec![session_id.to_string()]).await?;
        self.store.expire(&key, self.ttl).await?;
        Ok(())
    }

    /// 刷新索引 TTL；索引不存在时不做任何事
    pub async fn touch_index(&self, app: &str, user: &str) -> Result<()> {
        self.store
            .expire(&self.keys.index(app, user), self.ttl)
            .await?;
        Ok(())
    }

    pub async fn index_members(&self, app: &str, user: &str) -> Result<Vec<String>> {
        Ok(self.store.smembers(&self.keys.index(app, user)).await?)
    }

    pub async fn index_remove(&self, app: &str, user: &str, session_ids: Vec<String>) -> Result<u64> {
        if session_ids.is_empty() {
            return Ok(0);
        }
        Ok(self
            .store
            .srem(&self.keys.index(app, user), session_ids)
            .await?)
    }

    /// 在一个批次里删除记录、事件日志和索引项；批次不保证原子性
    pub async fn delete(&self, app: &str, user: &str, session_id: &str) -> Result<()> {
        self.store
            .batch(vec![
                BatchOp::Del(self.keys.session(app, user, session_id)),
                BatchOp::Del(self.keys.events(app, user, session_id)),
                BatchOp::SRem(self.keys.index(app, user), vec![session_id.to_string()]),
            ])
            .await?;
        Ok(())
    }
}
