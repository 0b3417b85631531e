//! 会话服务：组合 key 命名、层级分类、层级存储、记录存储和事件日志
//!
//! ## 一致性
//!
//! 所有操作都是对 KV 存储的一小串往返，没有锁，也没有跨 key 事务：
//!
//! - `append_event` 分两步：先追加日志，再读-改-写会话记录。两步之间崩溃会留下
//!   一条增量未生效的事件。
//! - `append_event` 与 [`State::set`](crate::session::State::set) 都整条重写会话记录，
//!   并发时后写者覆盖先写者的 session 层改动。
//! - `delete` 用一个批次删除记录、日志和索引项，批次中途失败会留下部分删除。
//!
//! 以上都属于"重试整个操作即可最终正确"，不会产生损坏的单条记录。
//! 存储错误一律原样上抛，内部不做重试。

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::kv::KvStore;
use crate::session::backend::Backend;
use crate::session::event::{Event, Events, filter_events, now_secs_f64};
use crate::session::keys::KeySpace;
use crate::session::model::{Session, State};
use crate::session::record::StorableSession;
use crate::session::state::{StateMap, classify_delta, session_only, strip_temp};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// `get` 的读取过滤条件；任一条件生效时返回冻结的事件视图
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetConfig {
    /// 只保留最后 N 条事件（先于 `after` 生效）
    pub num_recent_events: Option<usize>,
    /// 只保留 `timestamp >= after` 的事件
    pub after: Option<f64>,
}

impl GetConfig {
    pub fn num_recent_events(mut self, n: usize) -> Self {
        self.num_recent_events = Some(n);
        self
    }

    pub fn after(mut self, timestamp: f64) -> Self {
        self.after = Some(timestamp);
        self
    }

    pub fn is_filtered(&self) -> bool {
        self.num_recent_events.is_some() || self.after.is_some()
    }
}

/// 会话服务句柄
///
/// 显式构造、显式关闭，不存在进程级单例。
pub struct SessionService {
    backend: Backend,
    config: SessionConfig,
}

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionService {
    pub fn new(store: Arc<dyn KvStore>, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let backend = Backend::new(
            store,
            KeySpace::new(config.key_prefix.clone()),
            config.session_ttl,
            config.app_state_ttl,
            config.user_state_ttl,
        );
        info!(
            prefix = %config.key_prefix,
            session_ttl = ?config.session_ttl,
            app_state_ttl = ?config.app_state_ttl,
            user_state_ttl = ?config.user_state_ttl,
            "🗂️ SessionService 初始化"
        );
        Ok(Self { backend, config })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// 关闭服务句柄；已取出的 `Session` 仍持有自己的存储引用
    pub fn close(self) {
        debug!(prefix = %self.config.key_prefix, "SessionService 已关闭");
    }

    /// 创建会话
    ///
    /// `session_id` 为空时生成纳秒时间戳 ID。已存在同 ID 记录时返回
    /// [`SessionError::AlreadyExists`]；存在性检查与写入之间不是原子的。
    pub async fn create(
        &self,
        app: &str,
        user: &str,
        session_id: Option<&str>,
        initial_state: StateMap,
    ) -> Result<Session> {
        self.with_deadline(self.create_inner(app, user, session_id, initial_state))
            .await
    }

    /// 读取会话；不存在时返回 [`SessionError::NotFound`]
    pub async fn get(&self, app: &str, user: &str, session_id: &str, config: GetConfig) -> Result<Session> {
        self.with_deadline(self.load_session(app, user, session_id, &config))
            .await
    }

    /// 列出某用户的全部会话
    ///
    /// 索引只是线索：单个会话读取失败时跳过，记录已不存在的索引项会被顺手清理。
    pub async fn list(&self, app: &str, user: &str) -> Result<Vec<Session>> {
        self.with_deadline(self.list_inner(app, user)).await
    }

    /// 删除会话记录、事件日志和索引项
    pub async fn delete(&self, app: &str, user: &str, session_id: &str) -> Result<()> {
        self.with_deadline(async {
            check_identity(app, user)?;
            self.backend.records.delete(app, user, session_id).await?;
            info!(app = %app, user = %user, session_id = %session_id, "🗑️ 会话已删除");
            Ok::<(), SessionError>(())
        })
        .await
    }

    /// 追加事件
    ///
    /// `partial` 事件直接返回成功，不落盘。其余事件：补齐 ID 和服务端时间戳、
    /// 去掉增量中的 `temp:` 条目、追加到日志并刷新日志 TTL；随后读-改-写会话
    /// 记录，把增量按层级路由，并叠加调用方内存中的 session 层状态。
    /// 传入的 `session` 只在远端写入全部成功后才更新。
    pub async fn append_event(&self, session: &mut Session, event: Event) -> Result<()> {
        if event.partial {
            return Ok(());
        }
        self.with_deadline(self.append_inner(session, event)).await
    }

    async fn with_deadline<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.config.op_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| SessionError::Timeout(limit))?,
            None => fut.await,
        }
    }

    async fn create_inner(
        &self,
        app: &str,
        user: &str,
        session_id: Option<&str>,
        initial_state: StateMap,
    ) -> Result<Session> {
        check_identity(app, user)?;
        let session_id = match session_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => new_session_id(),
        };
        let records = &self.backend.records;
        if records.exists(app, user, &session_id).await? {
            return Err(SessionError::already_exists(app, user, &session_id));
        }

        let deltas = classify_delta(&initial_state);
        self.backend.write_tiers(app, user, &deltas).await?;

        let record = StorableSession {
            id: session_id.clone(),
            app_name: app.to_string(),
            user_id: user.to_string(),
            state: deltas.session,
            last_update_time: now_secs_f64(),
        };
        records.save(&record).await?;
        records.index_add(app, user, &session_id).await?;

        let merged = self
            .backend
            .merged_state(app, user, &record.state)
            .await?;
        info!(app = %app, user = %user, session_id = %session_id, "✨ 会话已创建");
        Ok(self.assemble(record, merged, Events::Live {
            log: self.backend.events.clone(),
            key: self.backend.keys.events(app, user, &session_id),
            cached: Vec::new(),
        }))
    }

    async fn load_session(&self, app: &str, user: &str, session_id: &str, config: &GetConfig) -> Result<Session> {
        check_identity(app, user)?;
        let record = self
            .backend
            .records
            .load(app, user, session_id)
            .await?
            .ok_or_else(|| SessionError::not_found(app, user, session_id))?;

        let events_key = self.backend.keys.events(app, user, session_id);
        let (events, merged) = tokio::try_join!(
            self.backend.events.load(&events_key),
            self.backend.merged_state(app, user, &record.state)
        )?;

        let events = if config.is_filtered() {
            Events::Frozen(filter_events(events, config.num_recent_events, config.after))
        } else {
            Events::Live {
                log: self.backend.events.clone(),
                key: events_key,
                cached: events,
            }
        };
        Ok(self.assemble(record, merged, events))
    }

    async fn list_inner(&self, app: &str, user: &str) -> Result<Vec<Session>> {
        check_identity(app, user)?;
        let ids = self.backend.records.index_members(app, user).await?;
        let default_config = GetConfig::default();
        let results = join_all(
            ids.iter()
                .map(|id| self.load_session(app, user, id, &default_config)),
        )
        .await;

        let mut sessions = Vec::with_capacity(results.len());
        let mut stale = Vec::new();
        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(session) => sessions.push(session),
                Err(e) if e.is_not_found() => stale.push(id),
                Err(e) => warn!(app = %app, user = %user, session_id = %id, error = %e, "列举时跳过无法读取的会话"),
            }
        }
        if !stale.is_empty() {
            debug!(app = %app, user = %user, stale = ?stale, "清理失效的索引项");
            // 清理失败不影响本次列举结果
            if let Err(e) = self.backend.records.index_remove(app, user, stale).await {
                warn!(app = %app, user = %user, error = %e, "索引清理失败");
            }
        }
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sessions)
    }

    async fn append_inner(&self, session: &mut Session, mut event: Event) -> Result<()> {
        let (app, user, id) = (
            session.app_name.clone(),
            session.user_id.clone(),
            session.id.clone(),
        );
        if event.id.is_empty() {
            event.id = uuid::Uuid::new_v4().to_string();
        }
        event.timestamp = now_secs_f64();
        event.actions.state_delta = strip_temp(&event.actions.state_delta);

        // 第一步：追加日志
        let events_key = self.backend.keys.events(&app, &user, &id);
        self.backend.events.push(&events_key, &event).await?;

        // 第二步：应用增量并重写会话记录
        let mut record = self
            .backend
            .records
            .load(&app, &user, &id)
            .await?
            .ok_or_else(|| SessionError::not_found(&app, &user, &id))?;
        let deltas = classify_delta(&event.actions.state_delta);
        self.backend.write_tiers(&app, &user, &deltas).await?;

        record.state.extend(session_only(session.state.as_map()));
        record.state.extend(deltas.session);
        record.last_update_time = event.timestamp;
        self.backend.records.save(&record).await?;
        self.backend.records.touch_index(&app, &user).await?;

        debug!(
            session_id = %id,
            event_id = %event.id,
            delta = event.actions.state_delta.len(),
            "📝 事件已追加"
        );
        session.state.apply_delta(&event.actions.state_delta);
        session.last_update_time = event.timestamp;
        session.events.record_appended(event);
        Ok(())
    }

    fn assemble(&self, record: StorableSession, merged: StateMap, events: Events) -> Session {
        let state = State::new(
            merged,
            self.backend.clone(),
            &record.app_name,
            &record.user_id,
            &record.id,
        );
        Session {
            id: record.id,
            app_name: record.app_name,
            user_id: record.user_id,
            state,
            events,
            last_update_time: record.last_update_time,
        }
    }
}

fn check_identity(app: &str, user: &str) -> Result<()> {
    if app.is_empty() {
        return Err(SessionError::InvalidArgument("app name is empty".to_string()));
    }
    if user.is_empty() {
        return Err(SessionError::InvalidArgument("user id is empty".to_string()));
    }
    Ok(())
}

/// 纳秒精度的时间戳 ID
fn new_session_id() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKvStore;
    use serde_json::json;
    use std::time::Duration;

    fn service() -> SessionService {
        SessionService::new(Arc::new(InMemoryKvStore::new()), SessionConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_generated_ids_are_unique() {
        let svc = service();
        let a = svc.create("app", "u", None, StateMap::new()).await.unwrap();
        let b = svc.create("app", "u", Some(""), StateMap::new()).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert!(a.id().parse::<u128>().is_ok());
    }

    #[tokio::test]
    async fn test_caller_id_kept_verbatim() {
        let svc = service();
        let padded = svc
            .create("app", "u", Some(" fixed-id "), StateMap::new())
            .await
            .unwrap();
        assert_eq!(padded.id(), " fixed-id ");

        let plain = svc.create("app", "u", Some("fixed-id"), StateMap::new()).await;
        assert!(plain.is_ok(), "带空白的 ID 不应与去空白后的 ID 冲突");
        assert_eq!(svc.list("app", "u").await.unwrap().len(), 2);
    }

    #[test]
    fn test_oversized_ttl_rejected_at_construction() {
        let config = SessionConfig::default().session_ttl(Duration::MAX);
        let err = SessionService::new(Arc::new(InMemoryKvStore::new()), config).unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
    }

    #[tokio::test]
    async fn test_empty_identity_rejected() {
        let svc = service();
        let err = svc.create("", "u", None, StateMap::new()).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));
        let err = svc.list("app", "").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_append_overlays_in_memory_session_state() {
        let svc = service();
        let mut session = svc.create("app", "u", Some("s"), StateMap::new()).await.unwrap();
        session.state_mut().set("temp:draft", json!("x")).await.unwrap();

        let mut delta = StateMap::new();
        delta.insert("step".to_string(), json!(2));
        svc.append_event(&mut session, Event::new("agent").with_state_delta(delta))
            .await
            .unwrap();

        assert_eq!(session.state().get("step").unwrap(), &json!(2));
        assert_eq!(session.events().snapshot().len(), 1);
        let stored = &session.events().snapshot()[0];
        assert!(!stored.id.is_empty());
        assert!(stored.timestamp > 0.0);
        assert_eq!(session.last_update_time(), stored.timestamp);

        let reloaded = svc.get("app", "u", "s", GetConfig::default()).await.unwrap();
        assert_eq!(reloaded.state().get("step").unwrap(), &json!(2));
        assert!(!reloaded.state().contains("temp:draft"));
    }

    #[tokio::test]
    async fn test_append_to_deleted_session_fails_after_log_write() {
        let svc = service();
        let mut session = svc.create("app", "u", Some("s"), StateMap::new()).await.unwrap();
        svc.delete("app", "u", "s").await.unwrap();
        let err = svc
            .append_event(&mut session, Event::new("agent"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(session.events().snapshot().is_empty(), "失败时不更新内存会话");
    }
}
