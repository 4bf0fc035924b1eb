//! Ledger and settlement simulation.
//!
//! Walks the engine through every workflow against a simulated clock: funds
//! adjustments with replay, block trades, fund payouts, IPO selling, referral
//! commissions, withdrawals, credit lines and position force-close, then
//! snapshots and restores the result.
//!
//! Usage: `ledger-sim [--env dev]`

use ledger_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::error::Error;
use tracing::{info, warn};

type SimResult = Result<(), Box<dyn Error>>;

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);
// 2024-03-01T00:00:00Z
const START: i64 = 1_709_251_200_000;

fn parse_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn main() -> SimResult {
    let env = parse_env();
    let (app_config, load_error) = match AppConfig::load_env(&env) {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    let _log_guard = init_logging(&app_config);
    if let Some(e) = load_error {
        warn!(env = %env, error = %e, "config not loaded, running with defaults");
    }
    info!(env = %env, "ledger simulation starting");

    println!("Ledger & Settlement Simulation");
    println!("Multi-currency balances, instrument orders, escrow, withdrawals\n");

    let mut engine = Engine::new(app_config.engine.clone()).with_notifier(Box::new(EventCollector::new()));
    engine.set_time(Timestamp::from_millis(START));

    scenario_1_funds_and_replay(&mut engine)?;
    scenario_2_block_trade(&mut engine)?;
    scenario_3_fund_payouts(&mut engine)?;
    scenario_4_ipo_listing(&mut engine)?;
    scenario_5_withdrawal(&mut engine)?;
    scenario_6_credit_line(&mut engine)?;
    scenario_7_force_close(&mut engine)?;
    scenario_8_snapshot(&engine, app_config.snapshot_path.as_deref())?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

fn admin() -> Operator {
    Operator::new(100, Role::Admin)
}

fn price(value: Decimal) -> Result<Price, Box<dyn Error>> {
    Price::new(value).ok_or_else(|| format!("price {} must be positive", value).into())
}

/// Deposits, a replayed request id, and a multi-currency adjustment.
fn scenario_1_funds_and_replay(engine: &mut Engine) -> SimResult {
    println!("Scenario 1: Funds and Replay\n");

    let deposit = [
        CurrencyAmount::new(Currency::usd(), Amount::new(dec!(50000))),
        CurrencyAmount::new(Currency::usdt(), Amount::new(dec!(10000))),
    ];
    let first = engine.ledger_adjust(&admin(), ALICE, &deposit, "opening deposit", Some("dep-alice-1"))?;
    let again = engine.ledger_adjust(&admin(), ALICE, &deposit, "opening deposit", Some("dep-alice-1"))?;
    engine.ledger_adjust(
        &admin(),
        BOB,
        &[CurrencyAmount::new(Currency::usd(), Amount::new(dec!(20000)))],
        "opening deposit",
        Some("dep-bob-1"),
    )?;
    engine.set_referrer(BOB, ALICE)?;

    println!("  First call applied: {}, replay applied: {}", first.is_applied(), again.is_applied());
    for (currency, amount) in engine.ledger_read(ALICE) {
        println!("  Alice {}: {}", currency, amount);
    }
    println!("  Audit rows for Alice: {}\n", engine.audit_trail(ALICE).len());
    Ok(())
}

/// Keyed block trade, absolute lock, sell at market.
fn scenario_2_block_trade(engine: &mut Engine) -> SimResult {
    println!("Scenario 2: Block Trade\n");

    let now = engine.time();
    let item_id = engine.list_block_trade(
        &admin(),
        BlockTradeItem {
            id: InstrumentId(0),
            market: Market::Us,
            symbol: "NVDA".into(),
            price: price(dec!(800))?,
            min_qty: dec!(5),
            start_at: now,
            end_at: now.plus_millis(MILLIS_PER_DAY),
            lock_until: now.plus_millis(7 * MILLIS_PER_DAY),
            subscribe_key: "NVDA2024".into(),
        },
    )?;

    let req = SubmitRequest::new(item_id, dec!(10)).with_key("NVDA2024");
    let order_id = engine.order_submit(OrderKind::Block, ALICE, &req)?;
    let approved = engine.order_approve(&admin(), OrderKind::Block, order_id, None)?;
    println!("  Alice buys 10 NVDA @ $800, debit {} (fee {})", approved.debit, approved.fee);

    if let Err(e) = engine.order_redeem(OrderKind::Block, ALICE, order_id, Some(price(dec!(820))?)) {
        println!("  Early sell refused: {}", e);
    }

    engine.advance_time(7 * MILLIS_PER_DAY);
    let sold = engine.order_redeem(OrderKind::Block, ALICE, order_id, Some(price(dec!(860))?))?;
    println!("  Sold @ $860 after lock: credit {}, profit {} ({}%)\n", sold.credit, sold.profit, sold.profit_pct.round_dp(2));
    Ok(())
}

/// Tiered fund with daily payouts, catch-up sweep and redemption.
fn scenario_3_fund_payouts(engine: &mut Engine) -> SimResult {
    println!("Scenario 3: Fund Payouts\n");

    let mut tiers = Vec::new();
    for (p, pct) in [(dec!(1000), dec!(0.8)), (dec!(5000), dec!(1)), (dec!(10000), dec!(1.2)), (dec!(20000), dec!(1.5))] {
        tiers.push(FundTier {
            price: price(p)?,
            percent: pct,
        });
    }
    let fund_id = engine.list_fund(
        &admin(),
        FundProduct {
            id: InstrumentId(0),
            code: "DAILY1".into(),
            name: "Daily Income".into(),
            currency: Currency::usd(),
            tiers,
            dividend: IntervalUnit::Day,
            redeem_days: 10,
            active: true,
        },
    )?;

    let req = SubmitRequest::new(fund_id, dec!(1)).with_price(price(dec!(10000))?);
    let order_id = engine.order_submit(OrderKind::Fund, BOB, &req)?;
    let approved = engine.order_approve(&admin(), OrderKind::Fund, order_id, None)?;
    println!("  Bob subscribes $10,000 at 1.2%/day, referral commission: {:?}", approved.commission);

    // nobody ran the sweep for four days
    engine.advance_time(4 * MILLIS_PER_DAY + 1);
    let sweep = engine.run_sweep(&Operator::system())?;
    println!(
        "  Sweep: {} payouts, {} commissions released",
        sweep.payouts.payouts,
        sweep.commissions.released.len()
    );
    println!("  Alice commission summary: {:?}", engine.commission_summary(ALICE).released);

    engine.advance_time(6 * MILLIS_PER_DAY);
    let out = engine.order_redeem(OrderKind::Fund, BOB, order_id, None)?;
    let order = engine.order(OrderKind::Fund, order_id).ok_or("fund order vanished")?;
    println!(
        "  Redeemed principal {}, {} payouts totalling {}\n",
        out.credit, order.payouts_made, order.total_paid
    );
    Ok(())
}

/// IPO allotment below request, sale after listing.
fn scenario_4_ipo_listing(engine: &mut Engine) -> SimResult {
    println!("Scenario 4: IPO Listing\n");

    let now = engine.time();
    let list_at = now.plus_millis(2 * MILLIS_PER_DAY);
    let ipo_id = engine.list_ipo(
        &admin(),
        IpoListing {
            id: InstrumentId(0),
            kind: IpoKind::Ipo,
            code: "ACME".into(),
            name: "Acme Robotics".into(),
            currency: Currency::usd(),
            subscribe_price: price(dec!(20))?,
            list_price: Some(price(dec!(26))?),
            subscribe_at: now,
            subscribe_end_at: Some(now.plus_millis(MILLIS_PER_DAY)),
            list_at,
            can_sell_on_listing_day: false,
        },
    )?;

    let order_id = engine.order_submit(OrderKind::Ipo, ALICE, &SubmitRequest::new(ipo_id, dec!(500)))?;
    let approved = engine.order_approve(&admin(), OrderKind::Ipo, order_id, Some(dec!(300)))?;
    println!("  Alice asked for 500 ACME, allotted 300, debit {}", approved.debit);

    engine.set_time(list_at.plus_millis(MILLIS_PER_HOUR));
    if let Err(e) = engine.order_redeem(OrderKind::Ipo, ALICE, order_id, None) {
        println!("  Listing-day sell refused: {}", e);
    }
    engine.set_time(start_of_next_utc_day(list_at));
    let sold = engine.order_redeem(OrderKind::Ipo, ALICE, order_id, None)?;
    println!("  Sold at list price next day: profit {}\n", sold.profit);
    Ok(())
}

/// Hold, approve, complete.
fn scenario_5_withdrawal(engine: &mut Engine) -> SimResult {
    println!("Scenario 5: Withdrawal\n");

    let request = WithdrawRequest {
        currency: Currency::usdt(),
        amount: Amount::new(dec!(4000)),
        method: WithdrawMethod::CryptoWallet,
        destination: "TQx7mbH3a1".into(),
    };
    let id = engine.withdraw_create(ALICE, request)?;
    println!(
        "  Requested 4000 USDT, available now {}",
        engine.available_balance(ALICE, &Currency::usdt())
    );

    let ops = Operator::new(7, Role::Operator);
    engine.withdraw_approve(&ops, id)?;
    engine.withdraw_complete(&ops, id)?;
    println!("  Completed, balance {}\n", engine.balance(ALICE, &Currency::usdt()));
    Ok(())
}

fn scenario_6_credit_line(engine: &mut Engine) -> SimResult {
    println!("Scenario 6: Credit Line\n");

    let app = engine.credit_apply(
        BOB,
        CreditRequest {
            amount: Amount::new(dec!(2500)),
            currency: Currency::mxn(),
            score: 710,
            period_value: 1,
            period_unit: CreditPeriodUnit::Month,
        },
    )?;
    let debt_id = engine.credit_approve(&Operator::new(1, Role::SuperAdmin), app)?;
    let due_at = engine.credit_debt(debt_id).map(|d| d.due_at).ok_or("debt missing")?;
    println!("  Bob approved for 2500 MXN, due {}", due_at);

    engine.set_time(due_at);
    println!("  Overdue debts at due time: {}", engine.credit_overdue().len());
    engine.credit_settle(BOB, debt_id)?;
    println!("  Settled, MXN balance {}\n", engine.balance(BOB, &Currency::mxn()));
    Ok(())
}

fn scenario_7_force_close(engine: &mut Engine) -> SimResult {
    println!("Scenario 7: Position Force Close\n");

    let id = engine.position_open_or_increase(ALICE, "btc", Market::Crypto, Side::Long, dec!(0.5), price(dec!(60000))?)?;
    engine.position_open_or_increase(ALICE, "BTC", Market::Crypto, Side::Long, dec!(0.5), price(dec!(62000))?)?;
    let avg = engine.position(id).map(|p| p.long_avg).unwrap_or_default();
    println!("  Alice long 1 BTC, average {}", avg);

    engine.position_lock(&admin(), id)?;
    let closed = engine.position_force_close(&admin(), id, price(dec!(58000))?, Some("risk-fc-1"))?;
    let replay = engine.position_force_close(&admin(), id, price(dec!(58000))?, Some("risk-fc-1"))?;
    println!(
        "  Force closed at 58000: pnl {} {}, replay outcome {:?}\n",
        closed.realized_pnl, closed.currency, replay.outcome
    );
    Ok(())
}

fn scenario_8_snapshot(engine: &Engine, path: Option<&str>) -> SimResult {
    println!("Scenario 8: Snapshot and Restore\n");

    let snapshot = engine.snapshot();
    let restored = match path {
        Some(path) => {
            snapshot.save(path)?;
            Engine::restore(EngineSnapshot::load(path)?)?
        }
        None => Engine::restore(EngineSnapshot::from_json(&snapshot.to_json()?)?)?,
    };

    let currencies = [Currency::usd(), Currency::usdt(), Currency::mxn()];
    for currency in &currencies {
        println!(
            "  {} total: live {}, restored {}",
            currency,
            engine.ledger().total(currency),
            restored.ledger().total(currency)
        );
    }
    println!("  Audit rows: {}, events recorded: {}", engine.ledger().audit_records().len(), engine.events().len());
    Ok(())
}
