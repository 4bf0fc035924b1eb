//! Lifecycle tests
//!
//! End-to-end flows across the ledger and every order kind, driven through the
//! engine the way an API layer would.

use ledger_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);
// 2024-03-10T12:00:00Z
const NOON: i64 = 1_710_072_000_000;

fn admin() -> Operator {
    Operator::new(10, Role::Admin)
}

fn price(v: Decimal) -> Price {
    Price::new(v).unwrap()
}

fn engine_with_usd(users: &[(UserId, Decimal)]) -> Engine {
    let mut engine = Engine::new(EngineConfig::default());
    engine.set_time(Timestamp::from_millis(NOON));
    for (user, amount) in users {
        engine
            .ledger_adjust(
                &admin(),
                *user,
                &[CurrencyAmount::new(Currency::usd(), Amount::new(*amount))],
                "deposit",
                None,
            )
            .unwrap();
    }
    engine
}

mod block_trade_tests {
    use super::*;

    fn item(now: Timestamp) -> BlockTradeItem {
        BlockTradeItem {
            id: InstrumentId(0),
            market: Market::Us,
            symbol: "TSLA".into(),
            price: price(dec!(200)),
            min_qty: dec!(10),
            start_at: now,
            end_at: now.plus_millis(MILLIS_PER_DAY),
            lock_until: now.plus_millis(3 * MILLIS_PER_DAY),
            subscribe_key: "BLK123".into(),
        }
    }

    #[test]
    fn submit_approve_sell() {
        let mut engine = engine_with_usd(&[(ALICE, dec!(5000))]);
        let item_id = engine.list_block_trade(&admin(), item(engine.time())).unwrap();

        let wrong_key = SubmitRequest::new(item_id, dec!(10)).with_key("nope12");
        let err = engine.order_submit(OrderKind::Block, ALICE, &wrong_key).unwrap_err();
        assert_eq!(err.code(), "SUBSCRIBE_KEY_MISMATCH");

        let too_small = SubmitRequest::new(item_id, dec!(5)).with_key("BLK123");
        assert_eq!(
            engine.order_submit(OrderKind::Block, ALICE, &too_small).unwrap_err().code(),
            "BELOW_MINIMUM"
        );

        let req = SubmitRequest::new(item_id, dec!(20)).with_key("BLK123");
        let order_id = engine.order_submit(OrderKind::Block, ALICE, &req).unwrap();
        let approved = engine.order_approve(&admin(), OrderKind::Block, order_id, None).unwrap();
        assert_eq!(approved.debit.value(), dec!(4004));
        assert_eq!(engine.balance(ALICE, &Currency::usd()).value(), dec!(996));

        let early = engine
            .order_redeem(OrderKind::Block, ALICE, order_id, Some(price(dec!(210))))
            .unwrap_err();
        assert_eq!(early.code(), "ORDER_LOCKED");

        engine.advance_time(3 * MILLIS_PER_DAY);
        let missing = engine.order_redeem(OrderKind::Block, ALICE, order_id, None).unwrap_err();
        assert_eq!(missing.code(), "MISSING_PRICE");

        let sold = engine
            .order_redeem(OrderKind::Block, ALICE, order_id, Some(price(dec!(210))))
            .unwrap();
        assert_eq!(sold.credit.value(), dec!(4200));
        assert_eq!(sold.profit.value(), dec!(200));
        assert_eq!(engine.balance(ALICE, &Currency::usd()).value(), dec!(5196));

        let order = engine.order(OrderKind::Block, order_id).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(engine
            .order_redeem(OrderKind::Block, ALICE, order_id, Some(price(dec!(210))))
            .is_err());
    }

    #[test]
    fn window_closed_after_end() {
        let mut engine = engine_with_usd(&[(ALICE, dec!(5000))]);
        let item_id = engine.list_block_trade(&admin(), item(engine.time())).unwrap();
        engine.advance_time(MILLIS_PER_DAY + 1);
        let req = SubmitRequest::new(item_id, dec!(10)).with_key("BLK123");
        assert_eq!(
            engine.order_submit(OrderKind::Block, ALICE, &req).unwrap_err().code(),
            "WINDOW_CLOSED"
        );
    }

    #[test]
    fn only_owner_redeems() {
        let mut engine = engine_with_usd(&[(ALICE, dec!(5000))]);
        let item_id = engine.list_block_trade(&admin(), item(engine.time())).unwrap();
        let req = SubmitRequest::new(item_id, dec!(10)).with_key("BLK123");
        let order_id = engine.order_submit(OrderKind::Block, ALICE, &req).unwrap();
        engine.order_approve(&admin(), OrderKind::Block, order_id, None).unwrap();
        engine.advance_time(4 * MILLIS_PER_DAY);

        let err = engine
            .order_redeem(OrderKind::Block, BOB, order_id, Some(price(dec!(250))))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }
}

mod ipo_tests {
    use super::*;

    fn listing(now: Timestamp, same_day: bool) -> IpoListing {
        IpoListing {
            id: InstrumentId(0),
            kind: IpoKind::Rwa,
            code: "GOLDRWA".into(),
            name: "Gold Vault".into(),
            currency: Currency::usd(),
            subscribe_price: price(dec!(50)),
            list_price: Some(price(dec!(55))),
            subscribe_at: now,
            subscribe_end_at: Some(now.plus_millis(MILLIS_PER_DAY)),
            list_at: now.plus_millis(2 * MILLIS_PER_DAY),
            can_sell_on_listing_day: same_day,
        }
    }

    #[test]
    fn partial_allotment_and_next_day_sale() {
        let mut engine = engine_with_usd(&[(ALICE, dec!(10000))]);
        let start = engine.time();
        let ipo_id = engine.list_ipo(&admin(), listing(start, false)).unwrap();
        let order_id = engine
            .order_submit(OrderKind::Ipo, ALICE, &SubmitRequest::new(ipo_id, dec!(100)))
            .unwrap();

        let over = engine
            .order_approve(&admin(), OrderKind::Ipo, order_id, Some(dec!(101)))
            .unwrap_err();
        assert_eq!(over.code(), "QUANTITY_EXCEEDS_REQUEST");

        let approved = engine
            .order_approve(&admin(), OrderKind::Ipo, order_id, Some(dec!(40)))
            .unwrap();
        assert_eq!(approved.debit.value(), dec!(2002));
        let list_at = start.plus_millis(2 * MILLIS_PER_DAY);
        assert_eq!(approved.lock_until, Some(start_of_next_utc_day(list_at)));

        // listed at noon, selling opens at the next UTC midnight
        engine.set_time(list_at.plus_millis(MILLIS_PER_HOUR));
        assert!(engine.order_redeem(OrderKind::Ipo, ALICE, order_id, None).is_err());
        engine.set_time(start_of_next_utc_day(list_at));
        let sold = engine.order_redeem(OrderKind::Ipo, ALICE, order_id, None).unwrap();
        assert_eq!(sold.credit.value(), dec!(2200));
        assert_eq!(sold.profit.value(), dec!(200));
    }

    #[test]
    fn same_day_listing_sells_at_list_time() {
        let mut engine = engine_with_usd(&[(ALICE, dec!(10000))]);
        let start = engine.time();
        let ipo_id = engine.list_ipo(&admin(), listing(start, true)).unwrap();
        let order_id = engine
            .order_submit(OrderKind::Ipo, ALICE, &SubmitRequest::new(ipo_id, dec!(10)))
            .unwrap();
        engine.order_approve(&admin(), OrderKind::Ipo, order_id, None).unwrap();

        engine.set_time(start.plus_millis(2 * MILLIS_PER_DAY));
        let sold = engine
            .order_redeem(OrderKind::Ipo, ALICE, order_id, Some(price(dec!(60))))
            .unwrap();
        assert_eq!(sold.credit.value(), dec!(600));
    }

    #[test]
    fn rejected_order_moves_no_money() {
        let mut engine = engine_with_usd(&[(ALICE, dec!(10000))]);
        let ipo_id = engine.list_ipo(&admin(), listing(engine.time(), true)).unwrap();
        let order_id = engine
            .order_submit(OrderKind::Ipo, ALICE, &SubmitRequest::new(ipo_id, dec!(10)))
            .unwrap();
        engine
            .order_reject(&Operator::new(3, Role::Operator), OrderKind::Ipo, order_id, Some("quota"))
            .unwrap();

        let order = engine.order(OrderKind::Ipo, order_id).unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
        assert_eq!(order.notes.as_deref(), Some("quota"));
        assert_eq!(engine.balance(ALICE, &Currency::usd()).value(), dec!(10000));
        assert!(engine.order_approve(&admin(), OrderKind::Ipo, order_id, None).is_err());
    }
}

mod referral_tests {
    use super::*;

    #[test]
    fn approval_credits_frozen_commission() {
        let mut engine = engine_with_usd(&[(BOB, dec!(2002))]);
        engine.set_referrer(BOB, ALICE).unwrap();
        assert!(engine.set_referrer(ALICE, BOB).is_err());

        let start = engine.time();
        let ipo_id = engine
            .list_ipo(
                &admin(),
                IpoListing {
                    id: InstrumentId(0),
                    kind: IpoKind::Ipo,
                    code: "NEWCO".into(),
                    name: "NewCo".into(),
                    currency: Currency::usd(),
                    subscribe_price: price(dec!(20)),
                    list_price: None,
                    subscribe_at: start,
                    subscribe_end_at: None,
                    list_at: start.plus_millis(MILLIS_PER_DAY),
                    can_sell_on_listing_day: true,
                },
            )
            .unwrap();
        let order_id = engine
            .order_submit(OrderKind::Ipo, BOB, &SubmitRequest::new(ipo_id, dec!(100)))
            .unwrap();
        let approved = engine.order_approve(&admin(), OrderKind::Ipo, order_id, None).unwrap();
        let commission_id = approved.commission.unwrap();

        let record = engine.commission(commission_id).unwrap();
        assert_eq!(record.amount.value(), dec!(100));
        assert_eq!(record.source, "ipo");
        assert_eq!(engine.balance(ALICE, &Currency::usd()), Amount::zero());

        engine.advance_time(3 * MILLIS_PER_DAY);
        let records = engine.commissions_for_inviter(ALICE).unwrap();
        assert_eq!(records[0].status, CommissionStatus::Released);
        assert_eq!(engine.balance(ALICE, &Currency::usd()).value(), dec!(100));
    }
}

mod event_tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct Recorder {
        names: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Notifier for Recorder {
        fn notify(&mut self, event: &Event) -> Result<(), NotifyError> {
            self.names.lock().unwrap().push(event.payload.name());
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Broken;

    impl Notifier for Broken {
        fn notify(&mut self, _event: &Event) -> Result<(), NotifyError> {
            Err(NotifyError::Unavailable("smtp down".into()))
        }
    }

    #[test]
    fn notifier_sees_every_transition() {
        let names = Arc::new(Mutex::new(Vec::new()));
        let mut engine = Engine::new(EngineConfig::default()).with_notifier(Box::new(Recorder {
            names: Arc::clone(&names),
        }));
        engine
            .ledger_adjust(
                &admin(),
                ALICE,
                &[CurrencyAmount::new(Currency::usd(), Amount::new(dec!(50)))],
                "deposit",
                None,
            )
            .unwrap();
        let id = engine
            .withdraw_create(
                ALICE,
                WithdrawRequest {
                    currency: Currency::usd(),
                    amount: Amount::new(dec!(20)),
                    method: WithdrawMethod::BankCard,
                    destination: "4000".into(),
                },
            )
            .unwrap();
        engine.withdraw_cancel(ALICE, id).unwrap();

        let names = names.lock().unwrap();
        assert_eq!(
            *names,
            vec!["funds_adjusted", "withdrawal_status_changed", "withdrawal_status_changed"]
        );
        assert_eq!(engine.events().len(), 3);
    }

    #[test]
    fn failing_notifier_never_fails_the_operation() {
        let mut engine = Engine::new(EngineConfig::default()).with_notifier(Box::new(Broken));
        engine
            .ledger_adjust(
                &admin(),
                ALICE,
                &[CurrencyAmount::new(Currency::usd(), Amount::new(dec!(50)))],
                "deposit",
                Some("dep-x"),
            )
            .unwrap();
        assert_eq!(engine.balance(ALICE, &Currency::usd()).value(), dec!(50));
        assert_eq!(engine.events().len(), 1);
    }

    #[test]
    fn event_log_is_bounded() {
        let config = EngineConfig {
            max_events: 5,
            ..EngineConfig::default()
        };
        let mut engine = Engine::new(config);
        for _ in 0..12 {
            engine
                .ledger_adjust(
                    &admin(),
                    ALICE,
                    &[CurrencyAmount::new(Currency::usd(), Amount::new(dec!(1)))],
                    "drip",
                    None,
                )
                .unwrap();
        }
        assert_eq!(engine.events().len(), 5);
        assert_eq!(engine.events()[0].id, EventId(8));
        assert_eq!(engine.recent_events(2).len(), 2);
        assert_eq!(engine.ledger().audit_records().len(), 12);
    }
}

mod multi_currency_tests {
    use super::*;

    #[test]
    fn one_audit_row_per_call() {
        let mut engine = Engine::new(EngineConfig::default());
        let ops = [
            CurrencyAmount::new(Currency::usd(), Amount::new(dec!(100))),
            CurrencyAmount::new(Currency::new("eur").unwrap(), Amount::new(dec!(-30))),
        ];
        engine.ledger_adjust(&admin(), ALICE, &ops, "fx", Some("fx-1")).unwrap();

        let trail = engine.audit_trail(ALICE);
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].deltas.len(), 2);
        let balances = engine.ledger_read(ALICE);
        assert_eq!(balances[&Currency::new("EUR").unwrap()].value(), dec!(-30));
    }

    #[test]
    fn failing_call_leaves_no_trace() {
        let mut engine = Engine::new(EngineConfig::default());
        let ops = [
            CurrencyAmount::new(Currency::usd(), Amount::new(dec!(100))),
            CurrencyAmount::new(Currency::mxn(), Amount::zero()),
        ];
        let err = engine.ledger_adjust(&admin(), ALICE, &ops, "bad", Some("bad-1")).unwrap_err();
        assert_eq!(err.code(), "ZERO_AMOUNT");
        assert!(engine.ledger_read(ALICE).is_empty());
        assert!(engine.audit_trail(ALICE).is_empty());

        // the failed request id was never witnessed
        let ops = [CurrencyAmount::new(Currency::usd(), Amount::new(dec!(100)))];
        assert!(engine
            .ledger_adjust(&admin(), ALICE, &ops, "retry", Some("bad-1"))
            .unwrap()
            .is_applied());
    }
}
