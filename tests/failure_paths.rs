use echo_session::config::SessionConfig;
use echo_session::error::SessionError;
use echo_session::kv::KvStore;
use echo_session::session::{Event, GetConfig, KeySpace, SessionService, StateMap};
use echo_session::testing::MockKvStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn setup(mock: MockKvStore) -> (Arc<MockKvStore>, SessionService) {
    let store = Arc::new(mock);
    let svc = SessionService::new(store.clone(), SessionConfig::default()).unwrap();
    (store, svc)
}

#[tokio::test]
async fn test_store_errors_propagate_verbatim() {
    let (_, svc) = setup(MockKvStore::in_memory().fail_command("EXISTS"));
    let err = svc
        .create("chat", "alice", None, StateMap::new())
        .await
        .unwrap_err();
    match err {
        SessionError::StoreUnavailable(e) => {
            assert_eq!(e.command, "EXISTS");
            assert_eq!(e.message, "injected failure");
        }
        other => panic!("应为 StoreUnavailable，实际 {other:?}"),
    }
}

#[tokio::test]
async fn test_no_internal_retry() {
    let (store, svc) = setup(MockKvStore::in_memory().fail_command("GET"));
    assert!(
        svc.get("chat", "alice", "s", GetConfig::default())
            .await
            .is_err()
    );
    assert_eq!(store.count_of("GET"), 1, "失败后不应重试");
}

#[tokio::test]
async fn test_append_two_step_is_not_atomic() {
    let (store, svc) = setup(MockKvStore::in_memory());
    let mut session = svc
        .create("chat", "alice", Some("s"), StateMap::new())
        .await
        .unwrap();

    // 日志追加成功，随后读取记录时后端故障
    store.break_command("GET");
    let mut delta = StateMap::new();
    delta.insert("step".to_string(), json!(1));
    let err = svc
        .append_event(&mut session, Event::new("agent").with_state_delta(delta))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::StoreUnavailable(_)));
    assert!(!session.state().contains("step"), "失败时内存会话保持不变");
    assert!(session.events().snapshot().is_empty());

    store.heal();
    let fetched = svc
        .get("chat", "alice", "s", GetConfig::default())
        .await
        .unwrap();
    assert_eq!(fetched.events().len().await.unwrap(), 1, "事件已落盘");
    assert!(!fetched.state().contains("step"), "增量未生效");
}

#[tokio::test]
async fn test_partial_event_touches_nothing() {
    let (store, svc) = setup(MockKvStore::in_memory());
    let mut session = svc
        .create("chat", "alice", Some("s"), StateMap::new())
        .await
        .unwrap();
    let before = store.call_count();
    svc.append_event(&mut session, Event::new("agent").partial(true))
        .await
        .unwrap();
    assert_eq!(store.call_count(), before);
}

#[tokio::test]
async fn test_delete_batch_partial_failure() {
    let (store, svc) = setup(MockKvStore::in_memory());
    svc.create("chat", "alice", Some("s"), StateMap::new())
        .await
        .unwrap();

    store.break_command("SREM");
    assert!(svc.delete("chat", "alice", "s").await.is_err());

    // 记录已删除，但索引项残留
    let keys = KeySpace::default();
    assert!(
        !store
            .inner()
            .exists(&keys.session("chat", "alice", "s"))
            .await
            .unwrap()
    );
    assert_eq!(
        store
            .inner()
            .smembers(&keys.index("chat", "alice"))
            .await
            .unwrap(),
        vec!["s"]
    );

    // 重试整个操作后最终一致
    store.heal();
    svc.delete("chat", "alice", "s").await.unwrap();
    assert!(svc.list("chat", "alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_skips_unreadable_sessions() {
    let (store, svc) = setup(MockKvStore::in_memory());
    svc.create("chat", "alice", Some("s1"), StateMap::new())
        .await
        .unwrap();
    let keys = KeySpace::default();
    store
        .inner()
        .set(&keys.session("chat", "alice", "s2"), "{corrupt".to_string(), None)
        .await
        .unwrap();
    store
        .inner()
        .sadd(&keys.index("chat", "alice"), vec!["s2".to_string()])
        .await
        .unwrap();

    let listed = svc.list("chat", "alice").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id(), "s1");

    // 损坏的记录在 get 时是致命错误
    let err = svc
        .get("chat", "alice", "s2", GetConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Encoding(_)));
}

#[tokio::test]
async fn test_tier_write_policy_commands() {
    let (store, svc) = setup(MockKvStore::in_memory());
    let mut initial = StateMap::new();
    initial.insert("app:a".to_string(), json!(1));
    svc.create("chat", "alice", Some("s"), initial).await.unwrap();
    assert_eq!(store.count_of("HSET"), 1, "空的 user 增量不写入");
    assert_eq!(store.count_of("PERSIST"), 1, "未配置 TTL 时显式清除");
}

#[tokio::test(start_paused = true)]
async fn test_operation_timeout() {
    let store = Arc::new(MockKvStore::in_memory().with_delay(Duration::from_secs(2)));
    let config = SessionConfig::default().op_timeout(Some(Duration::from_secs(1)));
    let svc = SessionService::new(store, config).unwrap();

    let err = svc
        .create("chat", "alice", None, StateMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Timeout(d) if d == Duration::from_secs(1)));
}
