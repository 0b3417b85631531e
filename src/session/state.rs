//! 分层状态模型
//!
//! 一张扁平的 state map 按 key 前缀拆成三个独立持久化的作用域：
//!
//! | 前缀 | 层级 | 存放位置 |
//! |------|------|----------|
//! | `app:` | [`Tier::App`] | 每个 app 一个 hash，key 去掉前缀 |
//! | `user:` | [`Tier::User`] | 每个 (app, user) 一个 hash，key 去掉前缀 |
//! | `temp:` | [`Tier::Temp`] | 不持久化 |
//! | 无前缀 | [`Tier::Session`] | 嵌在会话记录里 |
//!
//! 层级只由前缀决定，与值的类型无关。读出时 [`merge`] 会把前缀补回去，
//! 因此把读到的 state 原样写回，路由结果不变。

use serde_json::Value;
use std::collections::BTreeMap;

pub const APP_PREFIX: &str = "app:";
pub const USER_PREFIX: &str = "user:";
pub const TEMP_PREFIX: &str = "temp:";

/// 扁平 state map（key 有序，便于稳定迭代和序列化）
pub type StateMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    App,
    User,
    Session,
    Temp,
}

impl Tier {
    /// 根据 key 前缀判定层级
    pub fn of(key: &str) -> Tier {
        if key.starts_with(APP_PREFIX) {
            Tier::App
        } else if key.starts_with(USER_PREFIX) {
            Tier::User
        } else if key.starts_with(TEMP_PREFIX) {
            Tier::Temp
        } else {
            Tier::Session
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Tier::App => APP_PREFIX,
            Tier::User => USER_PREFIX,
            Tier::Temp => TEMP_PREFIX,
            Tier::Session => "",
        }
    }

    /// 去掉本层前缀后的 key
    pub fn strip(self, key: &str) -> &str {
        key.strip_prefix(self.prefix()).unwrap_or(key)
    }

    /// 为去前缀的 key 补回本层前缀
    pub fn qualify(self, stripped: &str) -> String {
        format!("{}{}", self.prefix(), stripped)
    }

    /// 是否落盘
    pub fn is_persisted(self) -> bool {
        self != Tier::Temp
    }
}

/// 单个 key 的层级判定，见 [`Tier::of`]
pub fn classify_key(key: &str) -> Tier {
    Tier::of(key)
}

/// [`classify_delta`] 的结果，key 均已去掉前缀
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDeltas {
    pub app: StateMap,
    pub user: StateMap,
    pub session: StateMap,
}

impl StateDeltas {
    pub fn is_empty(&self) -> bool {
        self.app.is_empty() && self.user.is_empty() && self.session.is_empty()
    }
}

/// 按前缀拆分 delta；`temp:` 条目直接丢弃，不会出现在任何输出中
pub fn classify_delta(delta: &StateMap) -> StateDeltas {
    let mut out = StateDeltas::default();
    for (key, value) in delta {
        let tier = Tier::of(key);
        let target = match tier {
            Tier::App => &mut out.app,
            Tier::User => &mut out.user,
            Tier::Session => &mut out.session,
            Tier::Temp => continue,
        };
        target.insert(tier.strip(key).to_string(), value.clone());
    }
    out
}

/// 去掉 delta 中所有 `temp:` 条目，其余原样保留（仍带前缀）
pub fn strip_temp(delta: &StateMap) -> StateMap {
    delta
        .iter()
        .filter(|(k, _)| Tier::of(k) != Tier::Temp)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// 从合并视图中取出只属于 session 层的部分，用于回写会话记录
pub fn session_only(state: &StateMap) -> StateMap {
    state
        .iter()
        .filter(|(k, _)| classify_key(k) == Tier::Session)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// 合并三层状态为一个扁平视图
///
/// 写入顺序固定为 session → app → user，跨层同名 key 以后写者为准，
/// 即优先级 user > app > session。
pub fn merge(app: &StateMap, user: &StateMap, session: &StateMap) -> StateMap {
    let mut merged = StateMap::new();
    for (k, v) in session {
        merged.insert(k.clone(), v.clone());
    }
    for (k, v) in app {
        merged.insert(Tier::App.qualify(k), v.clone());
    }
    for (k, v) in user {
        merged.insert(Tier::User.qualify(k), v.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(entries: &[(&str, Value)]) -> StateMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_classify_delta_partitions_by_prefix() {
        let delta = map(&[
            ("app:theme", json!("dark")),
            ("user:lang", json!("zh")),
            ("temp:scratch", json!({"x": 1})),
            ("counter", json!(1)),
            ("nested:key", json!([1, 2])),
        ]);
        let out = classify_delta(&delta);

        assert_eq!(out.app, map(&[("theme", json!("dark"))]));
        assert_eq!(out.user, map(&[("lang", json!("zh"))]));
        assert_eq!(
            out.session,
            map(&[("counter", json!(1)), ("nested:key", json!([1, 2]))])
        );

        let covered = out.app.len() + out.user.len() + out.session.len() + 1;
        assert_eq!(covered, delta.len(), "每个 key 恰好落入一个层级");
        for key in out.app.keys().chain(out.user.keys()).chain(out.session.keys()) {
            assert!(!key.starts_with(APP_PREFIX) && !key.starts_with(USER_PREFIX));
        }
    }

    #[test]
    fn test_tier_ignores_value_type() {
        for value in [json!(null), json!(true), json!(3.5), json!("s"), json!([]), json!({})] {
            let out = classify_delta(&map(&[("app:k", value.clone())]));
            assert_eq!(out.app.get("k"), Some(&value));
        }
    }

    #[test]
    fn test_merge_then_classify_round_trips() {
        let app = map(&[("theme", json!("dark")), ("version", json!(2))]);
        let user = map(&[("lang", json!("zh"))]);
        let session = map(&[("counter", json!(1)), ("history", json!(["a"]))]);

        let merged = merge(&app, &user, &session);
        assert_eq!(merged.get("app:theme"), Some(&json!("dark")));
        assert_eq!(merged.get("user:lang"), Some(&json!("zh")));
        assert_eq!(merged.get("counter"), Some(&json!(1)));

        let back = classify_delta(&merged);
        assert_eq!(back.app, app);
        assert_eq!(back.user, user);
        assert_eq!(back.session, session);
    }

    #[test]
    fn test_merge_precedence_user_over_app_over_session() {
        // 会话记录里残留了带前缀的 key 时才会发生跨层冲突
        let session = map(&[("app:x", json!("session")), ("user:y", json!("session"))]);
        let app = map(&[("x", json!("app"))]);
        let user = map(&[("y", json!("user"))]);
        let merged = merge(&app, &user, &session);
        assert_eq!(merged.get("app:x"), Some(&json!("app")));
        assert_eq!(merged.get("user:y"), Some(&json!("user")));
    }

    #[test]
    fn test_session_only_excludes_other_tiers() {
        let state = map(&[
            ("app:a", json!(1)),
            ("user:b", json!(2)),
            ("temp:c", json!(3)),
            ("d", json!(4)),
        ]);
        assert_eq!(session_only(&state), map(&[("d", json!(4))]));
        assert_eq!(classify_key("temp:c"), Tier::Temp);
        assert_eq!(classify_key("d"), Tier::Session);
    }

    #[test]
    fn test_strip_temp_keeps_prefixes() {
        let delta = map(&[("temp:a", json!(1)), ("app:b", json!(2)), ("c", json!(3))]);
        let stripped = strip_temp(&delta);
        assert_eq!(stripped, map(&[("app:b", json!(2)), ("c", json!(3))]));
    }

    mod properties {
        use super::super::*;
        use proptest::prelude::*;

        fn key_strategy() -> impl Strategy<Value = String> {
            let prefix = prop_oneof![
                Just("app:"),
                Just("user:"),
                Just("temp:"),
                Just(""),
                Just("ap"),
                Just("x:"),
            ];
            (prefix, "[a-z:]{0,8}").prop_map(|(p, rest)| format!("{p}{rest}"))
        }

        fn value_strategy() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::from),
                any::<i64>().prop_map(Value::from),
                "[a-z ]{0,6}".prop_map(Value::from),
                prop::collection::vec(any::<i32>(), 0..3).prop_map(Value::from),
            ]
        }

        fn delta_strategy() -> impl Strategy<Value = StateMap> {
            prop::collection::btree_map(key_strategy(), value_strategy(), 0..12)
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            /// 每个非 temp 条目恰好落入一个层级，temp 条目全部丢弃
            #[test]
            fn prop_classify_partitions_delta(delta in delta_strategy()) {
                let out = classify_delta(&delta);
                let persisted = delta.keys().filter(|k| Tier::of(k) != Tier::Temp).count();
                prop_assert_eq!(out.app.len() + out.user.len() + out.session.len(), persisted);

                for (key, value) in &delta {
                    let tier = Tier::of(key);
                    let target = match tier {
                        Tier::App => &out.app,
                        Tier::User => &out.user,
                        Tier::Session => &out.session,
                        Tier::Temp => continue,
                    };
                    prop_assert_eq!(target.get(tier.strip(key)), Some(value));
                }
                prop_assert!(out.session.keys().all(|k| Tier::of(k) == Tier::Session));
            }

            /// 拆分后再合并，得到去掉 temp 的原始 delta
            #[test]
            fn prop_merge_inverts_classify(delta in delta_strategy()) {
                let out = classify_delta(&delta);
                let merged = merge(&out.app, &out.user, &out.session);
                prop_assert_eq!(&merged, &strip_temp(&delta));
                prop_assert_eq!(session_only(&merged), out.session);
            }
        }
    }
}
