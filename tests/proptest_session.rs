use oxide_chat::session::{Role, SessionStore};
use proptest::prelude::*;
use std::time::Duration;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("tokio runtime")
}

proptest! {
    /// After N appends the window holds the last min(N, 10) turns in order.
    #[test]
    fn window_keeps_latest_turns(n in 0usize..40) {
        let turns = runtime().block_on(async {
            let store = SessionStore::with_limits(10, Duration::from_secs(300));
            for i in 0..n {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                store.append(&1_i64, role, format!("turn {i}")).await;
            }
            store.get_or_reset(&1_i64).await
        });

        prop_assert_eq!(turns.len(), n.min(10));
        let expected: Vec<String> = (n.saturating_sub(10)..n).map(|i| format!("turn {i}")).collect();
        let actual: Vec<String> = turns.into_iter().map(|t| t.content).collect();
        prop_assert_eq!(actual, expected);
    }

    /// Sessions are independent per user.
    #[test]
    fn users_do_not_share_history(a in 1usize..15, b in 1usize..15) {
        let (left, right) = runtime().block_on(async {
            let store = SessionStore::new();
            for i in 0..a {
                store.append(&1_i64, Role::User, format!("a{i}")).await;
            }
            for i in 0..b {
                store.append(&2_i64, Role::User, format!("b{i}")).await;
            }
            (store.get_or_reset(&1_i64).await, store.get_or_reset(&2_i64).await)
        });
        prop_assert_eq!(left.len(), a.min(10));
        prop_assert_eq!(right.len(), b.min(10));
        prop_assert!(left.iter().all(|t| t.content.starts_with('a')));
    }
}
