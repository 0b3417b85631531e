//! KV 存储抽象
//!
//! 会话系统只依赖一组 Redis 风格的原语：字符串 get/set（可带过期）、hash、
//! 追加式 list、set，以及 exists / expire / persist / del。具体后端实现
//! [`KvStore`] 即可接入。
//!
//! | 实现 | 说明 |
//! |------|------|
//! | [`InMemoryKvStore`] | 进程内存，带真实 TTL 语义，适合测试和本地 CLI |
//!
//! [`KvStore::batch`] 是尽力而为的多命令提交：按顺序执行、遇错即停，
//! **不提供跨 key 原子性**，已执行的命令不会回滚。

pub mod memory;

pub use memory::InMemoryKvStore;

use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// 批量提交中的单条命令
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Del(String),
    Expire(String, Duration),
    Persist(String),
    HSet(String, Vec<(String, String)>),
    RPush(String, Vec<String>),
    SAdd(String, Vec<String>),
    SRem(String, Vec<String>),
}

impl BatchOp {
    /// 命令名，用于日志
    pub fn command(&self) -> &'static str {
        match self {
            BatchOp::Set { .. } => "SET",
            BatchOp::Del(_) => "DEL",
            BatchOp::Expire(..) => "EXPIRE",
            BatchOp::Persist(_) => "PERSIST",
            BatchOp::HSet(..) => "HSET",
            BatchOp::RPush(..) => "RPUSH",
            BatchOp::SAdd(..) => "SADD",
            BatchOp::SRem(..) => "SREM",
        }
    }
}

/// 外部 KV 存储的统一接口
///
/// 语义对齐 Redis：不存在的 key 读出为空（`None` / 空集合），而不是错误；
/// 错误只表示后端故障。
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// 写入字符串值；`ttl = None` 时清除已有的过期时间
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// 设置过期时间，key 不存在时返回 `false`
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// 清除过期时间，key 不存在或本就没有 TTL 时返回 `false`
    async fn persist(&self, key: &str) -> StoreResult<bool>;

    /// 剩余存活时间；key 不存在或没有 TTL 时返回 `None`
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// 删除若干 key，返回实际删除的数量
    async fn del(&self, keys: &[String]) -> StoreResult<u64>;

    async fn hset(&self, key: &str, fields: Vec<(String, String)>) -> StoreResult<()>;

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// 追加到 list 尾部，返回追加后的长度
    async fn rpush(&self, key: &str, values: Vec<String>) -> StoreResult<u64>;

    /// 闭区间取 list 片段，支持负数下标（`-1` 表示最后一个）
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>>;

    async fn sadd(&self, key: &str, members: Vec<String>) -> StoreResult<u64>;

    async fn srem(&self, key: &str, members: Vec<String>) -> StoreResult<u64>;

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    /// 尽力而为地顺序执行一批命令，遇到第一个错误即返回
    async fn batch(&self, ops: Vec<BatchOp>) -> StoreResult<()> {
        let total = ops.len();
        for (i, op) in ops.into_iter().enumerate() {
            let command = op.command();
            if let Err(e) = apply_op(self, op).await {
                warn!(
                    "⚠️ 批量提交中断于第 {}/{} 条命令 {}，此前的命令已生效",
                    i + 1,
                    total,
                    command
                );
                return Err(e);
            }
        }
        Ok(())
    }
}

/// 将单条 [`BatchOp`] 分派到对应的 [`KvStore`] 方法
pub async fn apply_op<S: KvStore + ?Sized>(store: &S, op: BatchOp) -> StoreResult<()> {
    match op {
        BatchOp::Set { key, value, ttl } => store.set(&key, value, ttl).await,
        BatchOp::Del(key) => store.del(&[key]).await.map(|_| ()),
        BatchOp::Expire(key, ttl) => store.expire(&key, ttl).await.map(|_| ()),
        BatchOp::Persist(key) => store.persist(&key).await.map(|_| ()),
        BatchOp::HSet(key, fields) => store.hset(&key, fields).await,
        BatchOp::RPush(key, values) => store.rpush(&key, values).await.map(|_| ()),
        BatchOp::SAdd(key, members) => store.sadd(&key, members).await.map(|_| ()),
        BatchOp::SRem(key, members) => store.srem(&key, members).await.map(|_| ()),
    }
}
