//! app / user 层状态的 hash 存储
//!
//! 每一层一个 hash（field = 去前缀的 key，value = JSON 编码），过期策略按整张
//! hash 生效而不是按 field。

use crate::error::Result;
use crate::kv::KvStore;
use crate::session::state::StateMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct TierStore {
    store: Arc<dyn KvStore>,
    /// `None` 表示永不过期
    ttl: Option<Duration>,
}

impl TierStore {
    pub fn new(store: Arc<dyn KvStore>, ttl: Option<Duration>) -> Self {
        // 零时长等同于未配置
        let ttl = ttl.filter(|d| !d.is_zero());
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// 写入一批 field，并在每次写入后重新应用过期策略
    ///
    /// 配置了 TTL 则刷新；否则显式 PERSIST，清掉先前配置留下的 TTL。
    /// 空 delta 不产生任何写操作。
    pub async fn upsert(&self, scope_key: &str, delta: &StateMap) -> Result<()> {
        if delta.is_empty() {
            return Ok(());
        }
        let fields = delta
            .iter()
            .map(|(k, v)| -> Result<(String, String)> { Ok((k.clone(), serde_json::to_string(v)?)) })
            .collect::<Result<Vec<_>>>()?;
        self.store.hset(scope_key, fields).await?;
        match self.ttl {
            Some(ttl) => {
                self.store.expire(scope_key, ttl).await?;
            }
            None => {
                self.store.persist(scope_key).await?;
            }
        }
        debug!(key = %scope_key, fields = delta.len(), ttl = ?self.ttl, "层级状态已写入");
        Ok(())
    }

    /// 读取整张 hash；key 不存在时返回空 map
    ///
    /// 单个 field 的 JSON 损坏时以原始字符串返回该 field，不影响其它 field。
    pub async fn load(&self, scope_key: &str) -> Result<StateMap> {
        let raw = self.store.hgetall(scope_key).await?;
        Ok(raw
            .into_iter()
            .map(|(k, v)| {
                let value = serde_json::from_str(&v).unwrap_or(Value::String(v));
                (k, value)
            })
            .collect())
    }
}
