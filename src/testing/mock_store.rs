//! 可脚本化的 KV 存储包装器，用于测试故障路径。
//!
//! 包装任意 [`KvStore`]，在转发前记录命令名，并按预设规则注入故障或延迟：
//!
//! - [`fail_command`](MockKvStore::fail_command)：某个命令总是失败
//! - [`fail_after`](MockKvStore::fail_after)：前 N 次调用成功，之后全部失败
//! - [`with_delay`](MockKvStore::with_delay)：每次调用前等待，用于测试超时
//!
//! ```rust
//! use echo_session::testing::MockKvStore;
//! use echo_session::kv::KvStore;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = MockKvStore::in_memory().fail_command("HSET");
//! assert!(store.hset("h", vec![("a".into(), "1".into())]).await.is_err());
//! assert!(store.set("k", "v".into(), None).await.is_ok());
//! assert_eq!(store.calls(), vec!["HSET", "SET"]);
//! # }
//! ```

use crate::error::StoreError;
use crate::kv::{InMemoryKvStore, KvStore, StoreResult};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct MockKvStore {
    inner: Arc<dyn KvStore>,
    failing: Mutex<HashSet<String>>,
    /// 剩余可成功的调用次数，`None` = 不限制
    budget: Mutex<Option<usize>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl MockKvStore {
    pub fn new(inner: Arc<dyn KvStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
            budget: Mutex::new(None),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 包装一个全新的 [`InMemoryKvStore`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryKvStore::new()))
    }

    /// 让指定命令（如 `"HSET"`）此后一律失败
    pub fn fail_command(self, command: &str) -> Self {
        self.failing.lock().unwrap().insert(command.to_uppercase());
        self
    }

    /// 前 `n` 次调用正常转发，之后全部失败
    pub fn fail_after(self, n: usize) -> Self {
        *self.budget.lock().unwrap() = Some(n);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 运行中切换：清除所有故障规则
    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
        *self.budget.lock().unwrap() = None;
    }

    /// 运行中切换：让指定命令失败
    pub fn break_command(&self, command: &str) {
        self.failing.lock().unwrap().insert(command.to_uppercase());
    }

    /// 按顺序记录的全部命令名
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// 某个命令被调用的次数
    pub fn count_of(&self, command: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }

    pub fn inner(&self) -> &Arc<dyn KvStore> {
        &self.inner
    }

    async fn gate(&self, command: &str) -> StoreResult<()> {
        self.calls.lock().unwrap().push(command.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(command) {
            return Err(StoreError::new(command, "injected failure"));
        }
        let mut budget = self.budget.lock().unwrap();
        match budget.as_mut() {
            Some(0) => Err(StoreError::new(command, "connection lost")),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl KvStore for MockKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.gate("GET").await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        self.gate("SET").await?;
        self.inner.set(key, value, ttl).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.gate("EXISTS").await?;
        self.inner.exists(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.gate("EXPIRE").await?;
        self.inner.expire(key, ttl).await
    }

    async fn persist(&self, key: &str) -> StoreResult<bool> {
        self.gate("PERSIST").await?;
        self.inner.persist(key).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.gate("TTL").await?;
        self.inner.ttl(key).await
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        self.gate("DEL").await?;
        self.inner.del(keys).await
    }

    async fn hset(&self, key: &str, fields: Vec<(String, String)>) -> StoreResult<()> {
        self.gate("HSET").await?;
        self.inner.hset(key, fields).await
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.gate("HGET").await?;
        self.inner.hget(key, field).await
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.gate("HGETALL").await?;
        self.inner.hgetall(key).await
    }

    async fn rpush(&self, key: &str, values: Vec<String>) -> StoreResult<u64> {
        self.gate("RPUSH").await?;
        self.inner.rpush(key, values).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        self.gate("LRANGE").await?;
        self.inner.lrange(key, start, stop).await
    }

    async fn sadd(&self, key: &str, members: Vec<String>) -> StoreResult<u64> {
        self.gate("SADD").await?;
        self.inner.sadd(key, members).await
    }

    async fn srem(&self, key: &str, members: Vec<String>) -> StoreResult<u64> {
        self.gate("SREM").await?;
        self.inner.srem(key, members).await
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.gate("SMEMBERS").await?;
        self.inner.smembers(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::BatchOp;

    #[tokio::test]
    async fn test_fail_after_budget() {
        let store = MockKvStore::in_memory().fail_after(2);
        assert!(store.set("a", "1".into(), None).await.is_ok());
        assert!(store.exists("a").await.unwrap());
        let err = store.get("a").await.unwrap_err();
        assert_eq!(err.command, "GET");
        assert_eq!(err.message, "connection lost");

        store.heal();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_batch_stops_at_first_failure() {
        let store = MockKvStore::in_memory().fail_after(1);
        let err = store
            .batch(vec![
                BatchOp::Set {
                    key: "a".into(),
                    value: "1".into(),
                    ttl: None,
                },
                BatchOp::SAdd("s".into(), vec!["x".into()]),
                BatchOp::Del("a".into()),
            ])
            .await
            .unwrap_err();
        assert_eq!(err.command, BatchOp::SAdd(String::new(), Vec::new()).command());
        assert_eq!(store.calls(), vec!["SET", "SADD"], "失败后不再执行后续命令");
        assert!(store.inner().exists("a").await.unwrap(), "已执行的命令不回滚");
    }

    #[test]
    fn test_batch_op_command_names() {
        assert_eq!(BatchOp::Persist("k".into()).command(), "PERSIST");
        assert_eq!(BatchOp::Expire("k".into(), Duration::from_secs(1)).command(), "EXPIRE");
        assert_eq!(BatchOp::RPush("k".into(), vec![]).command(), "RPUSH");
    }
}
