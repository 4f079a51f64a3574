//! Property-based tests using proptest
//!
//! Invariants that must hold for ALL inputs:
//! - Progress: completed iff cumulative delta >= goal, never un-completes
//! - Wallet: balance >= 0, add then subtract restores the balance
//! - Level: experience stays below the next threshold after a gain
//! - Reset boundaries: always a UTC midnight strictly after `now`

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use proptest::prelude::*;
use std::sync::Arc;

use playhub_server::error::ProgressError;
use playhub_server::missions::next_reset;
use playhub_server::model::*;
use playhub_server::storage::{MemoryStore, Store};
use playhub_server::WalletLedger;

// ============================================================
// Progress Properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_completed_iff_goal_reached(
        goal in 1i64..=500,
        deltas in prop::collection::vec(1i64..=50, 1..40),
    ) {
        let mut p = Progress::new(Track::Mission, 1, 1);
        let mut total = 0i64;
        let mut crossings = 0;
        for delta in deltas {
            let was = p.completed;
            if p.advance(delta, goal) {
                crossings += 1;
            }
            total += delta;
            prop_assert_eq!(p.progress, total);
            prop_assert_eq!(p.completed, total >= goal);
            prop_assert!(!was || p.completed, "never un-completes");
        }
        prop_assert!(crossings <= 1, "goal crossed at most once");
    }

    #[test]
    fn prop_completion_guard_flips_once(attempts in 1usize..10) {
        let now = Utc::now();
        let mut c = Completion::new(Track::Title, 1, 1);
        let ok = (0..attempts).filter(|_| c.mark_completed(now).is_ok()).count();
        prop_assert_eq!(ok, 1);
    }
}

// ============================================================
// Wallet Properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_add_subtract_inverse(start in 0i64..1_000_000, x in 0i64..1_000_000) {
        let mut w = Wallet::new(1);
        w.credit(start).unwrap();
        w.credit(x).unwrap();
        w.debit(x).unwrap();
        prop_assert_eq!(w.amount, start);
    }

    #[test]
    fn prop_overdraw_rejected_and_balance_kept(balance in 0i64..10_000, extra in 1i64..10_000) {
        let mut w = Wallet::new(1);
        w.credit(balance).unwrap();
        let err = w.debit(balance + extra).unwrap_err();
        let is_insufficient = matches!(err, ProgressError::InsufficientFunds { .. });
        prop_assert!(is_insufficient);
        prop_assert_eq!(w.amount, balance);
    }

    #[test]
    fn prop_balance_never_negative(ops in prop::collection::vec((any::<bool>(), 0i64..1_000), 0..60)) {
        let mut w = Wallet::new(1);
        for (credit, amount) in ops {
            let _ = if credit { w.credit(amount) } else { w.debit(amount) };
            prop_assert!(w.amount >= 0);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_ledger_add_subtract_inverse(start in 0i64..100_000, x in 0i64..100_000) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (before, after) = rt.block_on(async {
            let store = Arc::new(MemoryStore::new());
            let mut tx = store.begin().await.unwrap();
            let user = tx.create_user("ada").await.unwrap();
            tx.commit().await.unwrap();
            drop(tx);

            let ledger = WalletLedger::new(store);
            ledger.add(user, start).await.unwrap();
            let before = ledger.balance(user).await.unwrap();
            ledger.add(user, x).await.unwrap();
            ledger.subtract(user, x).await.unwrap();
            (before, ledger.balance(user).await.unwrap())
        });
        prop_assert_eq!(before, after);
    }
}

// ============================================================
// Level Properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_level_monotonic(base in 1i64..1_000, gains in prop::collection::vec(0i64..5_000, 1..20)) {
        let curve = LevelCurve { base_experience: base };
        let mut level = Level::new(1);
        for xp in gains {
            let before = level.level;
            let gained = level.gain_experience(xp, &curve);
            prop_assert_eq!(level.level, before + gained as i32);
            prop_assert!(level.experience >= 0);
            prop_assert!(level.experience < curve.threshold(level.level));
        }
    }
}

// ============================================================
// Reset Boundary Properties
// ============================================================

fn frequency() -> impl Strategy<Value = Frequency> {
    prop_oneof![
        Just(Frequency::Daily),
        Just(Frequency::Weekly),
        Just(Frequency::Monthly),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_next_reset_is_future_midnight(secs in 0i64..4_000_000_000, freq in frequency()) {
        let now: DateTime<Utc> = Utc.timestamp_opt(secs, 0).unwrap();
        let next = next_reset(freq, now).unwrap();
        prop_assert!(next > now);
        prop_assert_eq!((next.hour(), next.minute(), next.second()), (0, 0, 0));
        let days = (next.date_naive() - now.date_naive()).num_days();
        match freq {
            Frequency::Daily => prop_assert_eq!(days, 1),
            Frequency::Weekly => prop_assert_eq!(days, 7),
            Frequency::Monthly => {
                prop_assert!((28..=31).contains(&days));
                prop_assert!(next.day() <= now.day());
            }
            Frequency::OneTime => unreachable!(),
        }
    }
}
