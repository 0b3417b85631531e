//! 测试基础设施
//!
//! 在不依赖真实 KV 服务的情况下测试会话服务的故障路径。
//!
//! | 类型 | 用途 |
//! |------|------|
//! | [`MockKvStore`] | 包装任意 `KvStore`，记录调用并注入故障 / 延迟 |
//!
//! 正常路径直接使用 [`InMemoryKvStore`](crate::kv::InMemoryKvStore) 即可。

pub mod mock_store;

pub use mock_store::MockKvStore;
