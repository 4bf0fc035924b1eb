use super::{
    Approval, Exit, InstrumentPolicy, Order, OrderError, OrderStatus, Redemption, SubmitRequest,
};
use crate::timer::{add_interval, elapsed_boundaries, period_millis};
use crate::types::{Amount, InstrumentId, OrderId, Price, Timestamp, UserId};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::marker::PhantomData;

/// Instruments and orders of one kind. Only state transitions happen here;
/// the engine moves the money and then commits the transition.
#[derive(Debug, Clone)]
pub struct OrderBook<P: InstrumentPolicy> {
    instruments: BTreeMap<InstrumentId, P::Instrument>,
    orders: BTreeMap<OrderId, Order>,
    next_instrument_id: u64,
    next_order_id: u64,
    _policy: PhantomData<P>,
}

impl<P: InstrumentPolicy> Default for OrderBook<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: InstrumentPolicy> OrderBook<P> {
    pub fn new() -> Self {
        Self {
            instruments: BTreeMap::new(),
            orders: BTreeMap::new(),
            next_instrument_id: 1,
            next_order_id: 1,
            _policy: PhantomData,
        }
    }

    // --- catalogue ---

    pub fn add_instrument(&mut self, mut item: P::Instrument) -> Result<InstrumentId, OrderError> {
        P::validate(&item)?;
        let id = InstrumentId(self.next_instrument_id);
        self.next_instrument_id += 1;
        P::set_id(&mut item, id);
        self.instruments.insert(id, item);
        Ok(id)
    }

    pub fn update_instrument(&mut self, id: InstrumentId, mut item: P::Instrument) -> Result<(), OrderError> {
        if !self.instruments.contains_key(&id) {
            return Err(OrderError::InstrumentNotFound(id));
        }
        P::validate(&item)?;
        P::set_id(&mut item, id);
        self.instruments.insert(id, item);
        Ok(())
    }

    /// Refused while any submitted or approved order still points at it.
    pub fn remove_instrument(&mut self, id: InstrumentId) -> Result<P::Instrument, OrderError> {
        let in_use = self
            .orders
            .values()
            .any(|o| o.instrument_id == id && !o.status.is_terminal());
        if in_use {
            return Err(OrderError::InstrumentInUse(id));
        }
        self.instruments
            .remove(&id)
            .ok_or(OrderError::InstrumentNotFound(id))
    }

    pub fn instrument(&self, id: InstrumentId) -> Option<&P::Instrument> {
        self.instruments.get(&id)
    }

    pub fn instruments(&self) -> impl Iterator<Item = &P::Instrument> {
        self.instruments.values()
    }

    // --- lifecycle ---

    pub fn submit(&mut self, user_id: UserId, req: &SubmitRequest, now: Timestamp) -> Result<OrderId, OrderError> {
        let item = self
            .instruments
            .get(&req.instrument_id)
            .ok_or(OrderError::InstrumentNotFound(req.instrument_id))?;
        if req.qty <= Decimal::ZERO {
            return Err(OrderError::InvalidQuantity(req.qty));
        }
        let pricing = P::admit(item, req, now)?;

        let id = OrderId(self.next_order_id);
        self.next_order_id += 1;
        let order = Order {
            id,
            kind: P::KIND,
            user_id,
            instrument_id: req.instrument_id,
            currency: P::currency(item),
            requested_qty: req.qty,
            qty: req.qty,
            price: pricing.price,
            amount: Amount::new(req.qty * pricing.price.value()),
            fee: Amount::zero(),
            status: OrderStatus::Submitted,
            locked: false,
            manual_lock: false,
            lock_until: None,
            payout: pricing.payout,
            last_payout_at: None,
            next_payout_at: None,
            payouts_made: 0,
            total_paid: Amount::zero(),
            sell_price: None,
            sell_amount: None,
            profit: None,
            profit_pct: None,
            notes: None,
            reviewed_by: None,
            submitted_at: now,
            approved_at: None,
            rejected_at: None,
            closed_at: None,
            updated_at: now,
        };
        self.orders.insert(id, order);
        Ok(id)
    }

    pub fn prepare_approval(
        &self,
        id: OrderId,
        qty: Option<Decimal>,
        fee_rate: Decimal,
        now: Timestamp,
    ) -> Result<Approval, OrderError> {
        let order = self.orders.get(&id).ok_or(OrderError::OrderNotFound(id))?;
        if order.status != OrderStatus::Submitted {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                action: "approve",
            });
        }
        let qty = qty.unwrap_or(order.requested_qty);
        if qty <= Decimal::ZERO {
            return Err(OrderError::InvalidQuantity(qty));
        }
        if qty > order.requested_qty {
            return Err(OrderError::QuantityExceedsRequest {
                qty,
                requested: order.requested_qty,
            });
        }
        let item = self
            .instruments
            .get(&order.instrument_id)
            .ok_or(OrderError::InstrumentNotFound(order.instrument_id))?;

        let amount = Amount::new(qty * order.price.value());
        Ok(Approval {
            order_id: id,
            user_id: order.user_id,
            currency: order.currency.clone(),
            qty,
            price: order.price,
            amount,
            fee: amount.mul(fee_rate),
            lock_until: P::lock_until(item, now),
            next_payout_at: order.payout.map(|terms| add_interval(now, terms.unit, 1)),
        })
    }

    pub fn commit_approval(
        &mut self,
        approval: &Approval,
        operator_id: u64,
        now: Timestamp,
    ) -> Result<&Order, OrderError> {
        let order = self.order_mut(approval.order_id)?;
        if order.status != OrderStatus::Submitted {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                action: "approve",
            });
        }
        order.status = OrderStatus::Approved;
        order.qty = approval.qty;
        order.amount = approval.amount;
        order.fee = approval.fee;
        order.locked = true;
        order.lock_until = approval.lock_until;
        order.next_payout_at = approval.next_payout_at;
        order.reviewed_by = Some(operator_id);
        order.approved_at = Some(now);
        order.updated_at = now;
        Ok(order)
    }

    pub fn reject(
        &mut self,
        id: OrderId,
        operator_id: u64,
        notes: Option<String>,
        now: Timestamp,
    ) -> Result<&Order, OrderError> {
        let order = self.order_mut(id)?;
        if order.status != OrderStatus::Submitted {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                action: "reject",
            });
        }
        order.status = OrderStatus::Rejected;
        order.notes = notes;
        order.reviewed_by = Some(operator_id);
        order.rejected_at = Some(now);
        order.updated_at = now;
        Ok(order)
    }

    // --- payouts ---

    /// Approved orders that earn periodic payouts.
    pub fn payable(&self) -> Vec<OrderId> {
        self.orders
            .values()
            .filter(|o| o.status == OrderStatus::Approved && o.payout.is_some())
            .map(|o| o.id)
            .collect()
    }

    pub fn due_payouts(&self, id: OrderId, now: Timestamp) -> Vec<Timestamp> {
        let Some(order) = self.orders.get(&id) else {
            return Vec::new();
        };
        match (order.status, order.payout, order.next_payout_at) {
            (OrderStatus::Approved, Some(terms), Some(next)) => {
                elapsed_boundaries(next, period_millis(terms.unit, 1), now)
            }
            _ => Vec::new(),
        }
    }

    /// Advances the schedule by one boundary. `boundary` must be the current
    /// `next_payout_at`, so boundaries are consumed strictly in order.
    pub fn record_payout(
        &mut self,
        id: OrderId,
        boundary: Timestamp,
        paid: Amount,
        now: Timestamp,
    ) -> Result<&Order, OrderError> {
        let order = self.order_mut(id)?;
        let (Some(terms), Some(next)) = (order.payout, order.next_payout_at) else {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                action: "pay out",
            });
        };
        if order.status != OrderStatus::Approved || next != boundary {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                action: "pay out",
            });
        }
        order.last_payout_at = Some(next);
        order.next_payout_at = Some(add_interval(next, terms.unit, 1));
        order.total_paid = order.total_paid.add(paid);
        order.payouts_made += 1;
        order.updated_at = now;
        Ok(order)
    }

    // --- exit ---

    pub fn prepare_redeem(
        &self,
        id: OrderId,
        user_id: UserId,
        price: Option<Price>,
        now: Timestamp,
    ) -> Result<Redemption, OrderError> {
        let order = self.orders.get(&id).ok_or(OrderError::OrderNotFound(id))?;
        if order.user_id != user_id {
            return Err(OrderError::NotOwner { order_id: id, user_id });
        }
        if order.status != OrderStatus::Approved {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                action: "redeem",
            });
        }
        let lock = order.lock_state(now);
        if lock.is_locked() {
            return Err(OrderError::Locked { order_id: id, state: lock });
        }
        let item = self
            .instruments
            .get(&order.instrument_id)
            .ok_or(OrderError::InstrumentNotFound(order.instrument_id))?;

        let (sell_price, credit, profit, final_status) = match P::exit(item, order, price, now)? {
            Exit::Sell(p) => {
                let credit = Amount::new(order.qty * p.value());
                (Some(p), credit, credit.sub(order.amount), OrderStatus::Completed)
            }
            Exit::Principal => (None, order.amount, order.total_paid, OrderStatus::Redeemed),
        };
        let profit_pct = if order.amount.is_zero() {
            Decimal::ZERO
        } else {
            (profit.value() / order.amount.value() * Decimal::ONE_HUNDRED).round_dp(4)
        };

        Ok(Redemption {
            order_id: id,
            user_id,
            currency: order.currency.clone(),
            sell_price,
            credit,
            profit,
            profit_pct,
            final_status,
        })
    }

    pub fn commit_redeem(&mut self, redemption: &Redemption, now: Timestamp) -> Result<&Order, OrderError> {
        let order = self.order_mut(redemption.order_id)?;
        if order.status != OrderStatus::Approved {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                action: "redeem",
            });
        }
        order.status = redemption.final_status;
        order.locked = false;
        order.sell_price = redemption.sell_price;
        order.sell_amount = Some(redemption.credit);
        order.profit = Some(redemption.profit);
        order.profit_pct = Some(redemption.profit_pct);
        order.closed_at = Some(now);
        order.updated_at = now;
        Ok(order)
    }

    // --- admin overrides ---

    pub fn set_manual_lock(&mut self, id: OrderId, locked: bool, now: Timestamp) -> Result<&Order, OrderError> {
        let order = self.order_mut(id)?;
        if order.status.is_terminal() {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                action: if locked { "lock" } else { "unlock" },
            });
        }
        order.manual_lock = locked;
        order.refresh_lock(now);
        order.updated_at = now;
        Ok(order)
    }

    /// Removes the row outright. Nothing is refunded.
    pub fn delete(&mut self, id: OrderId) -> Result<Order, OrderError> {
        self.orders.remove(&id).ok_or(OrderError::OrderNotFound(id))
    }

    // --- reads ---

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn for_user(&self, user_id: UserId) -> Vec<&Order> {
        self.orders.values().filter(|o| o.user_id == user_id).collect()
    }

    pub fn ids_for_user(&self, user_id: UserId) -> Vec<OrderId> {
        self.orders
            .values()
            .filter(|o| o.user_id == user_id)
            .map(|o| o.id)
            .collect()
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    pub fn refresh_locks(&mut self, now: Timestamp) {
        for order in self.orders.values_mut() {
            order.refresh_lock(now);
        }
    }

    /// (next instrument id, next order id). Order ids key the ledger
    /// request ids of every step, so they must never be reissued.
    pub fn next_ids(&self) -> (u64, u64) {
        (self.next_instrument_id, self.next_order_id)
    }

    pub fn resume_from(&mut self, next_instrument_id: u64, next_order_id: u64) {
        self.next_instrument_id = self.next_instrument_id.max(next_instrument_id);
        self.next_order_id = self.next_order_id.max(next_order_id);
    }

    pub fn rows(&self) -> (Vec<P::Instrument>, Vec<Order>) {
        (
            self.instruments.values().cloned().collect(),
            self.orders.values().cloned().collect(),
        )
    }

    pub fn from_rows(instruments: Vec<P::Instrument>, orders: Vec<Order>) -> Result<Self, OrderError> {
        let mut book = Self::new();
        for item in instruments {
            P::validate(&item)?;
            let id = P::id(&item);
            book.next_instrument_id = book.next_instrument_id.max(id.0 + 1);
            book.instruments.insert(id, item);
        }
        for order in orders {
            if order.kind != P::KIND {
                return Err(OrderError::InvalidInstrument(format!(
                    "{} order {:?} filed under {}",
                    order.kind,
                    order.id,
                    P::KIND
                )));
            }
            book.next_order_id = book.next_order_id.max(order.id.0 + 1);
            book.orders.insert(order.id, order);
        }
        Ok(book)
    }

    fn order_mut(&mut self, id: OrderId) -> Result<&mut Order, OrderError> {
        self.orders.get_mut(&id).ok_or(OrderError::OrderNotFound(id))
    }
}
