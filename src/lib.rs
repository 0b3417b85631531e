pub mod config;
pub mod error;
pub mod kv;
pub mod session;
pub mod testing;

pub mod prelude {
    pub use crate::config::SessionConfig;
    pub use crate::error::{Result, SessionError};
    pub use crate::kv::{InMemoryKvStore, KvStore};
    pub use crate::session::{Event, GetConfig, Session, SessionService, StateMap};
}
