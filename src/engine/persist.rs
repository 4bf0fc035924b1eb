//! Capture and restore of the full engine state.

use super::core::Engine;
use crate::commission::CommissionEscrow;
use crate::credit::CreditDesk;
use crate::ledger::BalanceLedger;
use crate::position::PositionBook;
use crate::snapshot::{EngineSnapshot, IdCounters, ReferralRow, SnapshotError, SNAPSHOT_FORMAT_VERSION};
use crate::trade::{BlockPolicy, FundPolicy, IpoPolicy, OrderBook};
use crate::withdraw::WithdrawalBook;
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

fn corrupt(e: impl fmt::Display) -> SnapshotError {
    SnapshotError::Corrupt(e.to_string())
}

impl Engine {
    pub fn snapshot(&self) -> EngineSnapshot {
        let (block_items, block_orders) = self.block_trades.rows();
        let (fund_products, fund_orders) = self.funds.rows();
        let (ipo_listings, ipo_orders) = self.ipos.rows();
        let (credit_applications, credit_debts) = self.credit.rows();
        let (block_next_item, block_next_order) = self.block_trades.next_ids();
        let (fund_next_product, fund_next_order) = self.funds.next_ids();
        let (ipo_next_listing, ipo_next_order) = self.ipos.next_ids();
        let (credit_next_app, credit_next_debt) = self.credit.next_ids();

        EngineSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            clock: self.current_time,
            next_event_id: self.next_event_id,
            counters: IdCounters {
                block_items: block_next_item,
                block_orders: block_next_order,
                fund_products: fund_next_product,
                fund_orders: fund_next_order,
                ipo_listings: ipo_next_listing,
                ipo_orders: ipo_next_order,
                positions: self.positions.next_id(),
                commissions: self.commissions.next_id(),
                withdrawals: self.withdrawals.next_id(),
                credit_applications: credit_next_app,
                credit_debts: credit_next_debt,
            },
            config: self.config.clone(),
            balances: self.ledger.rows(),
            audit: self.ledger.audit_records().to_vec(),
            positions: self.positions.rows(),
            block_items,
            block_orders,
            fund_products,
            fund_orders,
            ipo_listings,
            ipo_orders,
            commissions: self.commissions.rows(),
            withdrawals: self.withdrawals.rows(),
            credit_applications,
            credit_debts,
            referrals: self
                .referrals
                .iter()
                .map(|(&user_id, &inviter_id)| ReferralRow { user_id, inviter_id })
                .collect(),
        }
    }

    /// Rebuilds an engine from a snapshot. The event log starts empty and
    /// no notifier is attached.
    pub fn restore(snapshot: EngineSnapshot) -> Result<Engine, SnapshotError> {
        snapshot.config.validate().map_err(corrupt)?;
        let ledger = BalanceLedger::from_rows(snapshot.balances, snapshot.audit).map_err(corrupt)?;
        let counters = snapshot.counters;
        let mut positions = PositionBook::from_rows(snapshot.positions).map_err(corrupt)?;
        positions.resume_from(counters.positions);
        let mut block_trades =
            OrderBook::<BlockPolicy>::from_rows(snapshot.block_items, snapshot.block_orders).map_err(corrupt)?;
        block_trades.resume_from(counters.block_items, counters.block_orders);
        let mut funds = OrderBook::<FundPolicy>::from_rows(snapshot.fund_products, snapshot.fund_orders).map_err(corrupt)?;
        funds.resume_from(counters.fund_products, counters.fund_orders);
        let mut ipos = OrderBook::<IpoPolicy>::from_rows(snapshot.ipo_listings, snapshot.ipo_orders).map_err(corrupt)?;
        ipos.resume_from(counters.ipo_listings, counters.ipo_orders);

        let mut referrals = BTreeMap::new();
        for row in snapshot.referrals {
            if referrals.insert(row.user_id, row.inviter_id).is_some() {
                return Err(SnapshotError::Corrupt(format!(
                    "user {} has more than one referrer",
                    row.user_id.0
                )));
            }
        }

        let mut engine = Engine::new(snapshot.config);
        engine.ledger = ledger;
        engine.positions = positions;
        engine.block_trades = block_trades;
        engine.funds = funds;
        engine.ipos = ipos;
        engine.commissions = CommissionEscrow::from_rows(snapshot.commissions);
        engine.commissions.resume_from(counters.commissions);
        engine.withdrawals = WithdrawalBook::from_rows(snapshot.withdrawals);
        engine.withdrawals.resume_from(counters.withdrawals);
        engine.credit = CreditDesk::from_rows(snapshot.credit_applications, snapshot.credit_debts);
        engine.credit.resume_from(counters.credit_applications, counters.credit_debts);
        engine.referrals = referrals;
        engine.next_event_id = snapshot.next_event_id.max(1);
        engine.current_time = snapshot.clock;

        info!(
            clock = %engine.current_time,
            audit = engine.ledger.audit_records().len(),
            positions = engine.positions.rows().len(),
            "engine restored"
        );
        Ok(engine)
    }
}
