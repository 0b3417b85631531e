//! 会话持久化
//!
//! 每个会话 = 可变的 key/value 状态 + 追加式事件日志，全部存放在外部 KV 存储中。
//! 状态按 key 前缀分为 app / user / session / temp 四层，各自独立持久化，
//! 读取时再合并成一个扁平视图，见 [`state`]。
//!
//! ```rust,no_run
//! use echo_session::config::SessionConfig;
//! use echo_session::kv::InMemoryKvStore;
//! use echo_session::session::{Event, GetConfig, SessionService, StateMap};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> echo_session::error::Result<()> {
//! let svc = SessionService::new(Arc::new(InMemoryKvStore::new()), SessionConfig::default())?;
//!
//! let mut initial = StateMap::new();
//! initial.insert("counter".to_string(), json!(1));
//! let mut session = svc.create("chat", "alice", None, initial).await?;
//!
//! let mut delta = StateMap::new();
//! delta.insert("app:theme".to_string(), json!("dark"));
//! svc.append_event(&mut session, Event::new("agent").with_state_delta(delta)).await?;
//!
//! let other = svc.create("chat", "bob", None, StateMap::new()).await?;
//! assert_eq!(other.state().get("app:theme")?, &json!("dark"));
//!
//! let recent = svc
//!     .get("chat", "alice", session.id(), GetConfig::default().num_recent_events(1))
//!     .await?;
//! assert!(recent.events().is_frozen());
//! svc.close();
//! # Ok(())
//! # }
//! ```

mod backend;
pub mod event;
pub mod keys;
pub mod model;
pub mod record;
pub mod service;
pub mod state;
pub mod tier;

pub use event::{Event, EventActions, EventLog, Events};
pub use keys::KeySpace;
pub use model::{Session, State};
pub use record::{RecordStore, StorableSession};
pub use service::{GetConfig, SessionService};
pub use state::{StateDeltas, StateMap, Tier, classify_delta, classify_key, merge, session_only};
pub use tier::TierStore;
