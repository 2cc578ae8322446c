//! Concurrency stress tests
//!
//! These tests hammer the shared store from many threads to verify no lost
//! updates, no limit overshoot and a total audit order.

use dcm_core::*;
use proptest::prelude::*;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::thread;

const THREADS: usize = 8;

fn store() -> Arc<LedgerStore> {
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_760_000_000_000)));
    Arc::new(LedgerStore::new(ComplianceConfig::default(), clock))
}

fn verified(store: &LedgerStore, email: &str, funds: Usd) -> UserId {
    let ctx = RequestContext::system();
    let user = store.create_user(email, &ctx).unwrap();
    store.apply_kyc_decision(user.id, true, "ok", &ctx).unwrap();
    store.deposit(user.id, funds, None, &ctx).unwrap();
    user.id
}

/// Wallet operations from many threads.
mod wallet_tests {
    use super::*;

    #[test]
    fn concurrent_deposits_are_not_lost() {
        let store = store();
        let user = verified(&store, "dep@example.com", Usd::new(dec!(1)));

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for _ in 0..100 {
                        store
                            .deposit(user, Usd::new(dec!(0.25)), None, &RequestContext::system())
                            .unwrap();
                    }
                });
            }
        });

        let wallet = store.get_wallet(user).unwrap();
        assert_eq!(wallet.available, Usd::new(dec!(201)));
        assert_eq!(wallet.total_deposited, Usd::new(dec!(201)));
        assert_eq!(store.get_transactions(user, usize::MAX).len(), 1 + THREADS * 100);
    }

    #[test]
    fn concurrent_lock_unlock_pairs_balance_out() {
        let store = store();
        let user = verified(&store, "pairs@example.com", Usd::new(dec!(100)));

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    let ctx = RequestContext::system();
                    for _ in 0..200 {
                        if store.lock_funds(user, Usd::new(dec!(7)), &ctx).is_ok() {
                            store.unlock_funds(user, Usd::new(dec!(7)), &ctx).unwrap();
                        }
                    }
                });
            }
        });

        let wallet = store.get_wallet(user).unwrap();
        assert_eq!(wallet.available, Usd::new(dec!(100)));
        assert_eq!(wallet.locked, Usd::zero());
    }

    #[test]
    fn concurrent_locks_never_overdraw() {
        let store = store();
        let user = verified(&store, "over@example.com", Usd::new(dec!(100)));

        let successes: usize = thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        (0..10)
                            .filter(|_| {
                                store
                                    .lock_funds(user, Usd::new(dec!(3)), &RequestContext::system())
                                    .is_ok()
                            })
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        // 80 attempts at $3 against $100: exactly 33 fit
        assert_eq!(successes, 33);
        let wallet = store.get_wallet(user).unwrap();
        assert_eq!(wallet.locked, Usd::new(dec!(99)));
        assert_eq!(wallet.available, Usd::new(dec!(1)));
    }
}

/// The order gate under contention.
mod order_tests {
    use super::*;

    #[test]
    fn concurrent_orders_cannot_jointly_exceed_limit() {
        let store = store();
        let user = verified(&store, "limit@example.com", Usd::new(dec!(10000)));
        store
            .set_position_limit(user, Usd::new(dec!(100)), &RequestContext::system())
            .unwrap();

        // each order locks $10, so only ten fit under the limit
        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for _ in 0..5 {
                        let _ = store.create_order(
                            &OrderRequest::limit(user, "RACE", Side::Yes, 20, 50),
                            &RequestContext::system(),
                        );
                    }
                });
            }
        });

        assert_eq!(store.get_user_exposure(user).unwrap(), Usd::new(dec!(100)));
        assert_eq!(store.order_count(), 10);
        let alerts = store.registry().alerts(&AlertFilter::default());
        assert_eq!(alerts.len(), THREADS * 5 - 10);
        assert!(alerts.iter().all(|a| a.kind == AlertType::PositionLimit));
    }

    #[test]
    fn halt_is_visible_to_every_thread() {
        let store = store();
        let user = verified(&store, "halt@example.com", Usd::new(dec!(10000)));
        store
            .registry()
            .halt(HaltKey::from_ticker(""), "outage", &RequestContext::new("ops"));

        thread::scope(|s| {
            for i in 0..THREADS {
                let store = &store;
                s.spawn(move || {
                    let market = format!("MKT-{i}");
                    let err = store
                        .create_order(&OrderRequest::limit(user, market, Side::No, 1, 50), &RequestContext::system())
                        .unwrap_err();
                    assert_eq!(err.code(), "TRADING_HALTED");
                });
            }
        });
        assert_eq!(store.order_count(), 0);
    }

    #[test]
    fn concurrent_fills_merge_into_one_position() {
        let store = store();
        let user = verified(&store, "fill@example.com", Usd::new(dec!(10000)));
        let orders: Vec<Order> = (0..THREADS * 4)
            .map(|_| {
                store
                    .create_order(&OrderRequest::limit(user, "MERGE", Side::Yes, 10, 30), &RequestContext::system())
                    .unwrap()
            })
            .collect();

        thread::scope(|s| {
            for chunk in orders.chunks(4) {
                let store = &store;
                s.spawn(move || {
                    for order in chunk {
                        store
                            .fill_order(order.id, order.price, &RequestContext::system())
                            .unwrap();
                    }
                });
            }
        });

        let positions = store.open_positions(user);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, (THREADS * 4 * 10) as u64);
        assert_eq!(positions[0].cost_basis, Usd::new(dec!(96)));
    }
}

/// Audit ordering.
mod audit_tests {
    use super::*;

    #[test]
    fn sequences_are_unique_and_gapless() {
        let store = store();
        let users: Vec<UserId> = (0..THREADS)
            .map(|i| verified(&store, &format!("u{i}@example.com"), Usd::new(dec!(100))))
            .collect();

        thread::scope(|s| {
            for &user in &users {
                let store = &store;
                s.spawn(move || {
                    for _ in 0..50 {
                        store
                            .deposit(user, Usd::new(dec!(1)), None, &RequestContext::system())
                            .unwrap();
                    }
                });
            }
        });

        let entries = store.audit().entries();
        let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
        let expected: Vec<u64> = (1..=entries.len() as u64).collect();
        assert_eq!(sequences, expected);
        assert_eq!(store.audit().last_sequence(), entries.len() as u64);
    }
}

/// Snapshots under load.
mod snapshot_tests {
    use super::*;

    #[test]
    fn concurrent_snapshots_while_wallets_are_created() {
        let store = store();
        for i in 0..16 {
            verified(&store, &format!("seed{i}@example.com"), Usd::new(dec!(10)));
        }

        thread::scope(|s| {
            for t in 0..THREADS {
                let store = &store;
                s.spawn(move || {
                    for i in 0..25 {
                        if t % 2 == 0 {
                            let snapshot = store.snapshot();
                            let ids: Vec<UserId> = snapshot.wallets.iter().map(|w| w.user_id).collect();
                            let mut sorted = ids.clone();
                            sorted.sort();
                            assert_eq!(ids, sorted);
                        } else {
                            verified(store, &format!("t{t}-{i}@example.com"), Usd::new(dec!(1)));
                        }
                    }
                });
            }
        });

        let snapshot = store.snapshot();
        assert_eq!(snapshot.wallets.len(), 16 + (THREADS / 2) * 25);
        assert_eq!(snapshot.users.len(), snapshot.wallets.len());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Concurrent deposits, locks and unlocks end where some serial order would
    #[test]
    fn concurrent_ops_match_a_serial_order(
        deposits in proptest::collection::vec(1i64..10_000i64, THREADS),
        locks in proptest::collection::vec(1i64..10_000i64, THREADS),
    ) {
        let store = store();
        let user = verified(&store, "serial@example.com", Usd::from_cents(50_000));

        thread::scope(|s| {
            for i in 0..THREADS {
                let store = &store;
                let (deposit, lock) = (deposits[i], locks[i]);
                s.spawn(move || {
                    let ctx = RequestContext::system();
                    store.deposit(user, Usd::from_cents(deposit), None, &ctx).unwrap();
                    if store.lock_funds(user, Usd::from_cents(lock), &ctx).is_ok() {
                        store.unlock_funds(user, Usd::from_cents(lock), &ctx).unwrap();
                    }
                });
            }
        });

        // every lock was undone, so any serial order leaves only the deposits
        let total: i64 = 50_000 + deposits.iter().sum::<i64>();
        let wallet = store.get_wallet(user).unwrap();
        prop_assert_eq!(wallet.available, Usd::from_cents(total));
        prop_assert_eq!(wallet.locked, Usd::zero());
        prop_assert!(!wallet.available.is_negative());
    }
}
