//! 进程内存 KV 存储
//!
//! 模拟 Redis 的数据类型和过期语义，时间基于 [`tokio::time::Instant`]，
//! 测试中可以用 `tokio::time::pause()` / `advance()` 精确推进时钟。
//! 过期的 key 在下一次访问时惰性清除；此外每累计 [`SWEEP_INTERVAL`] 次写入
//! 做一次全表清扫，避免再也不被访问的 key 一直驻留。

use super::{KvStore, StoreResult};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tokio::time::Instant;

/// 两次全表过期清扫之间的写操作次数
pub const SWEEP_INTERVAL: usize = 256;

#[derive(Debug, Clone)]
enum Data {
    Str(String),
    Hash(HashMap<String, String>),
    List(Vec<String>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(data: Data) -> Self {
        Self {
            data,
            expires_at: None,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|t| t > now)
    }
}

/// 进程内存 KV 存储，重启后数据丢失
#[derive(Default)]
pub struct InMemoryKvStore {
    data: RwLock<HashMap<String, Entry>>,
    writes: AtomicUsize,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前未过期的 key 数量
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.data
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 实际驻留的条目数，包含尚未清除的过期条目
    pub async fn resident(&self) -> usize {
        self.data.read().await.len()
    }

    /// 立即清除所有已过期的条目，返回清除数量
    pub async fn purge_expired(&self) -> usize {
        let mut data = self.data.write().await;
        sweep(&mut data)
    }

    /// 写路径入口：取写锁，并按写入次数周期性清扫
    async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, HashMap<String, Entry>> {
        let mut data = self.data.write().await;
        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_INTERVAL == 0 {
            let purged = sweep(&mut data);
            if purged > 0 {
                tracing::debug!("🧹 清除 {} 个过期 key", purged);
            }
        }
        data
    }
}

fn sweep(data: &mut HashMap<String, Entry>) -> usize {
    let now = Instant::now();
    let before = data.len();
    data.retain(|_, e| e.is_live(now));
    before - data.len()
}

/// `now + ttl`，溢出时按 Redis 的方式报错
fn deadline(command: &str, ttl: Duration) -> StoreResult<Instant> {
    Instant::now().checked_add(ttl).ok_or_else(|| {
        StoreError::new(
            command,
            format!("invalid expire time in '{}' command", command.to_lowercase()),
        )
    })
}

/// 读路径：取出未过期的条目
fn live<'a>(data: &'a HashMap<String, Entry>, key: &str) -> Option<&'a Entry> {
    data.get(key).filter(|e| e.is_live(Instant::now()))
}

/// 写路径：先清掉已过期的条目，再返回可变引用
fn live_mut<'a>(data: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    if data.get(key).is_some_and(|e| !e.is_live(Instant::now())) {
        data.remove(key);
    }
    data.get_mut(key)
}

fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let data = self.data.read().await;
        match live(&data, key).map(|e| &e.data) {
            None => Ok(None),
            Some(Data::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::wrong_type("GET", key)),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        let expires_at = ttl.map(|d| deadline("SET", d)).transpose()?;
        let mut data = self.write().await;
        let mut entry = Entry::new(Data::Str(value));
        entry.expires_at = expires_at;
        data.insert(key.to_string(), entry);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let data = self.data.read().await;
        Ok(live(&data, key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let expires_at = deadline("EXPIRE", ttl)?;
        let mut data = self.write().await;
        Ok(match live_mut(&mut data, key) {
            Some(entry) => {
                entry.expires_at = Some(expires_at);
                true
            }
            None => false,
        })
    }

    async fn persist(&self, key: &str) -> StoreResult<bool> {
        let mut data = self.write().await;
        Ok(live_mut(&mut data, key)
            .map(|entry| entry.expires_at.take().is_some())
            .unwrap_or(false))
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let data = self.data.read().await;
        let now = Instant::now();
        Ok(live(&data, key)
            .and_then(|e| e.expires_at)
            .map(|t| t.saturating_duration_since(now)))
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        let mut data = self.write().await;
        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = data.remove(key)
                && entry.is_live(now)
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn hset(&self, key: &str, fields: Vec<(String, String)>) -> StoreResult<()> {
        let mut data = self.write().await;
        if live_mut(&mut data, key).is_none() {
            data.insert(key.to_string(), Entry::new(Data::Hash(HashMap::new())));
        }
        match data.get_mut(key).map(|e| &mut e.data) {
            Some(Data::Hash(map)) => {
                map.extend(fields);
                Ok(())
            }
            _ => Err(StoreError::wrong_type("HSET", key)),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let data = self.data.read().await;
        match live(&data, key).map(|e| &e.data) {
            None => Ok(None),
            Some(Data::Hash(map)) => Ok(map.get(field).cloned()),
            Some(_) => Err(StoreError::wrong_type("HGET", key)),
        }
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let data = self.data.read().await;
        match live(&data, key).map(|e| &e.data) {
            None => Ok(HashMap::new()),
            Some(Data::Hash(map)) => Ok(map.clone()),
            Some(_) => Err(StoreError::wrong_type("HGETALL", key)),
        }
    }

    async fn rpush(&self, key: &str, values: Vec<String>) -> StoreResult<u64> {
        let mut data = self.write().await;
        if live_mut(&mut data, key).is_none() {
            data.insert(key.to_string(), Entry::new(Data::List(Vec::new())));
        }
        match data.get_mut(key).map(|e| &mut e.data) {
            Some(Data::List(list)) => {
                list.extend(values);
                Ok(list.len() as u64)
            }
            _ => Err(StoreError::wrong_type("RPUSH", key)),
        }
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        let data = self.data.read().await;
        match live(&data, key).map(|e| &e.data) {
            None => Ok(Vec::new()),
            Some(Data::List(list)) => Ok(resolve_range(list.len(), start, stop)
                .map(|(s, e)| list[s..=e].to_vec())
                .unwrap_or_default()),
            Some(_) => Err(StoreError::wrong_type("LRANGE", key)),
        }
    }

    async fn sadd(&self, key: &str, members: Vec<String>) -> StoreResult<u64> {
        let mut data = self.write().await;
        if live_mut(&mut data, key).is_none() {
            data.insert(key.to_string(), Entry::new(Data::Set(HashSet::new())));
        }
        match data.get_mut(key).map(|e| &mut e.data) {
            Some(Data::Set(set)) => Ok(members.into_iter().filter(|m| set.insert(m.clone())).count() as u64),
            _ => Err(StoreError::wrong_type("SADD", key)),
        }
    }

    async fn srem(&self, key: &str, members: Vec<String>) -> StoreResult<u64> {
        let mut data = self.write().await;
        let (removed, now_empty) = match live_mut(&mut data, key).map(|e| &mut e.data) {
            None => return Ok(0),
            Some(Data::Set(set)) => {
                let removed = members.iter().filter(|m| set.remove(*m)).count() as u64;
                (removed, set.is_empty())
            }
            Some(_) => return Err(StoreError::wrong_type("SREM", key)),
        };
        // 与 Redis 一致：集合清空后 key 一并消失
        if now_empty {
            data.remove(key);
        }
        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let data = self.data.read().await;
        match live(&data, key).map(|e| &e.data) {
            None => Ok(Vec::new()),
            Some(Data::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(StoreError::wrong_type("SMEMBERS", key)),
        }
    }
}
