//! Instrument order lifecycle: catalogue, submit, approve, reject, payout,
//! redeem and admin overrides.
//!
//! Each step is written once, generic over the instrument policy, and the
//! public methods dispatch on [`OrderKind`]. The money always moves first
//! (through the idempotent ledger, keyed by a request id derived from the
//! order id and step) and the book transition is committed after, so a
//! retried step never moves money twice.

use super::core::Engine;
use super::results::{ApprovalResult, EngineError, PayoutReport, RedeemResult};
use crate::access::{Operator, Permission};
use crate::events::{
    EventPayload, OrderDeletedEvent, OrderLockEvent, OrderPayoutEvent, OrderStatusEvent, OrderSubmittedEvent,
};
use crate::trade::{
    BlockPolicy, BlockTradeItem, FundPolicy, FundProduct, InstrumentPolicy, IpoListing, IpoPolicy, Order,
    OrderBook, OrderError, OrderKind, OrderStatus, SubmitRequest,
};
use crate::types::{Amount, InstrumentId, OrderId, Price, RequestId, UserId};
use rust_decimal::Decimal;
use tracing::{info, warn};

/// Picks the engine's book for a policy.
pub(super) trait KindBook: InstrumentPolicy + Sized {
    fn book(engine: &Engine) -> &OrderBook<Self>;
    fn book_mut(engine: &mut Engine) -> &mut OrderBook<Self>;
}

impl KindBook for BlockPolicy {
    fn book(engine: &Engine) -> &OrderBook<Self> {
        &engine.block_trades
    }
    fn book_mut(engine: &mut Engine) -> &mut OrderBook<Self> {
        &mut engine.block_trades
    }
}

impl KindBook for FundPolicy {
    fn book(engine: &Engine) -> &OrderBook<Self> {
        &engine.funds
    }
    fn book_mut(engine: &mut Engine) -> &mut OrderBook<Self> {
        &mut engine.funds
    }
}

impl KindBook for IpoPolicy {
    fn book(engine: &Engine) -> &OrderBook<Self> {
        &engine.ipos
    }
    fn book_mut(engine: &mut Engine) -> &mut OrderBook<Self> {
        &mut engine.ipos
    }
}

macro_rules! by_kind {
    ($kind:expr, $p:ident => $body:expr) => {
        match $kind {
            OrderKind::Block => {
                type $p = BlockPolicy;
                $body
            }
            OrderKind::Fund => {
                type $p = FundPolicy;
                $body
            }
            OrderKind::Ipo => {
                type $p = IpoPolicy;
                $body
            }
        }
    };
}

pub(super) fn step_request_id(kind: OrderKind, id: OrderId, step: &str) -> RequestId {
    RequestId::new(format!("{}-order-{}-{}", kind, id.0, step))
}

impl Engine {
    // --- catalogue ---

    pub fn list_block_trade(&mut self, operator: &Operator, item: BlockTradeItem) -> Result<InstrumentId, EngineError> {
        if item.end_at <= self.current_time {
            return Err(OrderError::InvalidInstrument("subscription window already over".into()).into());
        }
        self.add_instrument::<BlockPolicy>(operator, item)
    }

    pub fn list_fund(&mut self, operator: &Operator, product: FundProduct) -> Result<InstrumentId, EngineError> {
        self.add_instrument::<FundPolicy>(operator, product)
    }

    pub fn list_ipo(&mut self, operator: &Operator, listing: IpoListing) -> Result<InstrumentId, EngineError> {
        self.add_instrument::<IpoPolicy>(operator, listing)
    }

    pub fn update_block_trade(
        &mut self,
        operator: &Operator,
        id: InstrumentId,
        item: BlockTradeItem,
    ) -> Result<(), EngineError> {
        operator.require(Permission::ManageInstruments)?;
        Ok(self.block_trades.update_instrument(id, item)?)
    }

    pub fn update_fund(&mut self, operator: &Operator, id: InstrumentId, product: FundProduct) -> Result<(), EngineError> {
        operator.require(Permission::ManageInstruments)?;
        Ok(self.funds.update_instrument(id, product)?)
    }

    pub fn update_ipo(&mut self, operator: &Operator, id: InstrumentId, listing: IpoListing) -> Result<(), EngineError> {
        operator.require(Permission::ManageInstruments)?;
        Ok(self.ipos.update_instrument(id, listing)?)
    }

    pub fn delist(&mut self, operator: &Operator, kind: OrderKind, id: InstrumentId) -> Result<(), EngineError> {
        operator.require(Permission::ManageInstruments)?;
        by_kind!(kind, P => {
            P::book_mut(self).remove_instrument(id)?;
        });
        info!(%kind, instrument_id = id.0, operator_id = operator.id, "instrument delisted");
        Ok(())
    }

    pub fn block_trade(&self, id: InstrumentId) -> Option<&BlockTradeItem> {
        self.block_trades.instrument(id)
    }

    pub fn fund(&self, id: InstrumentId) -> Option<&FundProduct> {
        self.funds.instrument(id)
    }

    pub fn ipo(&self, id: InstrumentId) -> Option<&IpoListing> {
        self.ipos.instrument(id)
    }

    // --- lifecycle ---

    pub fn order_submit(&mut self, kind: OrderKind, user_id: UserId, req: &SubmitRequest) -> Result<OrderId, EngineError> {
        by_kind!(kind, P => self.submit_kind::<P>(user_id, req))
    }

    /// Debits principal plus fee, locks the order and starts its payout
    /// schedule. `qty` may allot less than requested, never more.
    pub fn order_approve(
        &mut self,
        operator: &Operator,
        kind: OrderKind,
        id: OrderId,
        qty: Option<Decimal>,
    ) -> Result<ApprovalResult, EngineError> {
        operator.require(Permission::ReviewOrders)?;
        by_kind!(kind, P => self.approve_kind::<P>(operator, id, qty))
    }

    pub fn order_reject(
        &mut self,
        operator: &Operator,
        kind: OrderKind,
        id: OrderId,
        notes: Option<&str>,
    ) -> Result<(), EngineError> {
        operator.require(Permission::ReviewOrders)?;
        let now = self.current_time;
        let notes = notes.map(str::trim).filter(|n| !n.is_empty()).map(String::from);
        let order = by_kind!(kind, P => P::book_mut(self).reject(id, operator.id, notes, now)?.clone());
        info!(%kind, order_id = id.0, operator_id = operator.id, "order rejected");
        self.emit_status_change(&order, OrderStatus::Submitted, None);
        Ok(())
    }

    /// Credits every payout boundary already passed for approved orders of one kind.
    pub fn order_payout(&mut self, operator: &Operator, kind: OrderKind) -> Result<PayoutReport, EngineError> {
        operator.require(Permission::RunSweeps)?;
        by_kind!(kind, P => {
            let ids = P::book(self).payable();
            self.accrue_kind::<P>(&ids)
        })
    }

    /// User exit once the lock is clear. `price` is the market price for
    /// kinds that sell; funds ignore it and return principal.
    pub fn order_redeem(
        &mut self,
        kind: OrderKind,
        user_id: UserId,
        id: OrderId,
        price: Option<Price>,
    ) -> Result<RedeemResult, EngineError> {
        by_kind!(kind, P => self.redeem_kind::<P>(user_id, id, price))
    }

    pub fn order_lock(&mut self, operator: &Operator, kind: OrderKind, id: OrderId) -> Result<(), EngineError> {
        self.set_order_lock(operator, kind, id, true)
    }

    pub fn order_unlock(&mut self, operator: &Operator, kind: OrderKind, id: OrderId) -> Result<(), EngineError> {
        self.set_order_lock(operator, kind, id, false)
    }

    /// Removes the order. Principal already debited is not refunded.
    pub fn order_delete(&mut self, operator: &Operator, kind: OrderKind, id: OrderId) -> Result<Order, EngineError> {
        operator.require(Permission::OverrideOrders)?;
        let removed = by_kind!(kind, P => P::book_mut(self).delete(id)?);
        let forfeited = if removed.status == OrderStatus::Approved {
            removed.amount
        } else {
            Amount::zero()
        };
        if forfeited.is_positive() {
            warn!(%kind, order_id = id.0, user_id = removed.user_id.0, %forfeited, "approved order deleted, principal forfeited");
        }
        self.emit_event(EventPayload::OrderDeleted(OrderDeletedEvent {
            kind,
            order_id: id,
            user_id: removed.user_id,
            operator_id: operator.id,
            status: removed.status,
            forfeited,
        }));
        Ok(removed)
    }

    // --- reads ---

    pub fn order(&self, kind: OrderKind, id: OrderId) -> Option<&Order> {
        by_kind!(kind, P => P::book(self).get(id))
    }

    /// A user's orders of one kind, with due payouts credited first.
    pub fn orders_for_user(&mut self, kind: OrderKind, user_id: UserId) -> Result<Vec<Order>, EngineError> {
        by_kind!(kind, P => {
            let ids = P::book(self).ids_for_user(user_id);
            self.accrue_kind::<P>(&ids)?;
            let now = self.current_time;
            P::book_mut(self).refresh_locks(now);
            Ok(P::book(self).for_user(user_id).into_iter().cloned().collect())
        })
    }

    // --- generic steps ---

    fn add_instrument<P: KindBook>(&mut self, operator: &Operator, item: P::Instrument) -> Result<InstrumentId, EngineError> {
        operator.require(Permission::ManageInstruments)?;
        let id = P::book_mut(self).add_instrument(item)?;
        info!(kind = %P::KIND, instrument_id = id.0, operator_id = operator.id, "instrument listed");
        Ok(id)
    }

    fn submit_kind<P: KindBook>(&mut self, user_id: UserId, req: &SubmitRequest) -> Result<OrderId, EngineError> {
        let now = self.current_time;
        let id = P::book_mut(self).submit(user_id, req, now)?;
        let (qty, price) = P::book(self)
            .get(id)
            .map(|o| (o.requested_qty, o.price))
            .ok_or(OrderError::OrderNotFound(id))?;
        info!(kind = %P::KIND, order_id = id.0, user_id = user_id.0, %qty, %price, "order submitted");
        self.emit_event(EventPayload::OrderSubmitted(OrderSubmittedEvent {
            kind: P::KIND,
            order_id: id,
            user_id,
            qty,
            price,
        }));
        Ok(id)
    }

    fn approve_kind<P: KindBook>(
        &mut self,
        operator: &Operator,
        id: OrderId,
        qty: Option<Decimal>,
    ) -> Result<ApprovalResult, EngineError> {
        let now = self.current_time;
        let approval = P::book(self).prepare_approval(id, qty, self.config.fee_rate, now)?;
        let debit = approval.debit();
        let request_id = step_request_id(P::KIND, id, "approve");

        // a witnessed debit means a previous attempt already paid; only the transition is left
        if !self.ledger.is_witnessed(&request_id) {
            self.ensure_available(approval.user_id, &approval.currency, debit)?;
        }
        let outcome = self.post(
            approval.user_id,
            &approval.currency,
            debit.negate(),
            "order approval",
            request_id,
            operator,
        )?;
        let order = P::book_mut(self).commit_approval(&approval, operator.id, now)?.clone();
        let commission = self.credit_referral(&order);

        info!(
            kind = %P::KIND,
            order_id = id.0,
            user_id = order.user_id.0,
            %debit,
            operator_id = operator.id,
            "order approved"
        );
        self.emit_status_change(&order, OrderStatus::Submitted, Some(debit.negate()));

        Ok(ApprovalResult {
            kind: P::KIND,
            order_id: id,
            currency: approval.currency,
            debit,
            fee: approval.fee,
            lock_until: approval.lock_until,
            next_payout_at: approval.next_payout_at,
            commission,
            outcome,
        })
    }

    pub(super) fn accrue_kind<P: KindBook>(&mut self, ids: &[OrderId]) -> Result<PayoutReport, EngineError> {
        let now = self.current_time;
        let system = Operator::system();
        let mut report = PayoutReport::default();

        for &id in ids {
            let due = P::book(self).due_payouts(id, now);
            if due.is_empty() {
                continue;
            }
            let Some(order) = P::book(self).get(id) else {
                continue;
            };
            let user_id = order.user_id;
            let currency = order.currency.clone();
            let Some(per_payout) = order.payout_amount().filter(Amount::is_positive) else {
                continue;
            };

            for boundary in due {
                let request_id = step_request_id(P::KIND, id, &format!("payout-{}", boundary.as_millis()));
                self.post(user_id, &currency, per_payout, "order payout", request_id, &system)?;
                P::book_mut(self).record_payout(id, boundary, per_payout, now)?;
                report.record(&currency, per_payout);
                self.emit_event(EventPayload::OrderPayout(OrderPayoutEvent {
                    kind: P::KIND,
                    order_id: id,
                    user_id,
                    amount: per_payout,
                    currency: currency.clone(),
                    boundary,
                }));
            }
            report.orders_paid += 1;
        }

        if report.payouts > 0 {
            info!(kind = %P::KIND, orders = report.orders_paid, payouts = report.payouts, "payouts credited");
        }
        Ok(report)
    }

    fn redeem_kind<P: KindBook>(&mut self, user_id: UserId, id: OrderId, price: Option<Price>) -> Result<RedeemResult, EngineError> {
        // anything that fell due before the exit is paid first
        self.accrue_kind::<P>(&[id])?;

        let now = self.current_time;
        let redemption = P::book(self).prepare_redeem(id, user_id, price, now)?;
        if redemption.credit.is_positive() {
            self.post(
                user_id,
                &redemption.currency,
                redemption.credit,
                "order redemption",
                step_request_id(P::KIND, id, "redeem"),
                &Operator::system(),
            )?;
        }
        let order = P::book_mut(self).commit_redeem(&redemption, now)?.clone();

        info!(
            kind = %P::KIND,
            order_id = id.0,
            user_id = user_id.0,
            credit = %redemption.credit,
            profit = %redemption.profit,
            "order closed out"
        );
        self.emit_status_change(&order, OrderStatus::Approved, Some(redemption.credit));

        Ok(RedeemResult {
            kind: P::KIND,
            order_id: id,
            currency: redemption.currency,
            sell_price: redemption.sell_price,
            credit: redemption.credit,
            profit: redemption.profit,
            profit_pct: redemption.profit_pct,
        })
    }

    fn set_order_lock(&mut self, operator: &Operator, kind: OrderKind, id: OrderId, locked: bool) -> Result<(), EngineError> {
        operator.require(Permission::OverrideOrders)?;
        let now = self.current_time;
        let user_id = by_kind!(kind, P => P::book_mut(self).set_manual_lock(id, locked, now)?.user_id);
        self.emit_event(EventPayload::OrderLockChanged(OrderLockEvent {
            kind,
            order_id: id,
            user_id,
            operator_id: operator.id,
            locked,
        }));
        Ok(())
    }

    fn emit_status_change(&mut self, order: &Order, from: OrderStatus, amount: Option<Amount>) {
        self.emit_event(EventPayload::OrderStatusChanged(OrderStatusEvent {
            kind: order.kind,
            order_id: order.id,
            user_id: order.user_id,
            from,
            to: order.status,
            amount,
            currency: order.currency.clone(),
        }));
    }
}
