//! 服务与会话对象共享的存储句柄集合
//!
//! [`SessionService`](crate::session::SessionService) 持有一份，每个
//! [`State`](crate::session::State) 视图也克隆一份，以便 `set` 能直接落盘。
//! 所有成员都只是 `Arc<dyn KvStore>` 加配置，克隆代价很低，也不缓存任何数据。

use crate::error::{Result, SessionError};
use crate::kv::KvStore;
use crate::session::event::EventLog;
use crate::session::keys::KeySpace;
use crate::session::record::RecordStore;
use crate::session::state::{StateDeltas, StateMap, merge};
use crate::session::tier::TierStore;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub(crate) struct Backend {
    pub(crate) keys: KeySpace,
    pub(crate) records: RecordStore,
    pub(crate) app_tier: TierStore,
    pub(crate) user_tier: TierStore,
    pub(crate) events: EventLog,
}

impl Backend {
    pub(crate) fn new(
        store: Arc<dyn KvStore>,
        keys: KeySpace,
        session_ttl: Duration,
        app_ttl: Option<Duration>,
        user_ttl: Option<Duration>,
    ) -> Self {
        Self {
            records: RecordStore::new(store.clone(), keys.clone(), session_ttl),
            app_tier: TierStore::new(store.clone(), app_ttl),
            user_tier: TierStore::new(store.clone(), user_ttl),
            events: EventLog::new(store, session_ttl),
            keys,
        }
    }

    /// 把 app / user 增量写入各自的 hash；session 部分由调用方处理
    pub(crate) async fn write_tiers(&self, app: &str, user: &str, deltas: &StateDeltas) -> Result<()> {
        self.app_tier
            .upsert(&self.keys.app_state(app), &deltas.app)
            .await?;
        self.user_tier
            .upsert(&self.keys.user_state(app, user), &deltas.user)
            .await?;
        Ok(())
    }

    /// 读取两层 hash，并与 session 层状态合并成对外视图
    pub(crate) async fn merged_state(&self, app: &str, user: &str, session_state: &StateMap) -> Result<StateMap> {
        let app_key = self.keys.app_state(app);
        let user_key = self.keys.user_state(app, user);
        let (app_state, user_state) = tokio::try_join!(
            self.app_tier.load(&app_key),
            self.user_tier.load(&user_key)
        )?;
        Ok(merge(&app_state, &user_state, session_state))
    }

    /// 读-改-写会话记录：用 `session_state` 整体替换记录中的 session 层状态
    ///
    /// 没有锁也没有版本号，并发写同一条记录时后写者覆盖先写者。
    pub(crate) async fn rewrite_session_state(
        &self,
        app: &str,
        user: &str,
        session_id: &str,
        session_state: StateMap,
    ) -> Result<()> {
        let mut record = self
            .records
            .load(app, user, session_id)
            .await?
            .ok_or_else(|| SessionError::not_found(app, user, session_id))?;
        record.state = session_state;
        self.records.save(&record).await?;
        self.records.touch_index(app, user).await
    }
}
