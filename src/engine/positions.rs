//! Position maintenance: user-side open/reduce plus admin overrides.

use super::core::Engine;
use super::results::{EngineError, ForceCloseResult};
use crate::access::{AccessError, Operator, Permission};
use crate::events::{
    EventPayload, PositionClosedEvent, PositionDeletedEvent, PositionLockEvent, PositionUpdatedEvent,
};
use crate::ledger::{AdjustOutcome, CurrencyAmount};
use crate::position::{Position, PositionError};
use crate::types::{Amount, Market, PositionId, Price, RequestId, Side, UserId};
use rust_decimal::Decimal;
use tracing::{info, warn};

impl Engine {
    pub fn position_open_or_increase(
        &mut self,
        user_id: UserId,
        symbol: &str,
        market: Market,
        side: Side,
        qty: Decimal,
        price: Price,
    ) -> Result<PositionId, EngineError> {
        let id = self
            .positions
            .open_or_increase(user_id, symbol, market, side, qty, price, self.current_time)?;
        self.emit_position_updated(id);
        Ok(id)
    }

    /// User reduce of one leg at `price`. Realized pnl settles through the
    /// ledger in the market's quote currency. Refused while locked.
    pub fn position_reduce(
        &mut self,
        user_id: UserId,
        id: PositionId,
        side: Side,
        qty: Decimal,
        price: Price,
        request_id: Option<&str>,
    ) -> Result<Amount, EngineError> {
        let currency = self.owned_position(user_id, id)?.settlement_currency();
        let request_id = RequestId::parse(request_id);
        let now = self.current_time;

        // a retried reduce hands back what the first call settled
        if let Some(rid) = &request_id {
            if let Some(prior) = self.ledger.replay_of(user_id, rid)? {
                info!(position_id = id.0, request_id = %rid, audit_id = prior.id.0, "position reduce already applied");
                return Ok(prior.delta(&currency));
            }
        }

        let pnl = self.positions.preview_reduce(id, side, qty, price)?;
        if !pnl.is_zero() {
            let ops = [CurrencyAmount::new(currency, pnl)];
            self.ledger
                .adjust(user_id, &ops, "position reduce", request_id.as_ref(), &Operator::system(), now)?;
        } else if let Some(rid) = &request_id {
            self.ledger.mark(user_id, "position reduce", rid, &Operator::system(), now)?;
        }

        let realized = self.positions.reduce(id, side, qty, price, self.current_time)?;
        self.emit_position_updated(id);
        Ok(realized)
    }

    pub fn position_lock(&mut self, operator: &Operator, id: PositionId) -> Result<(), EngineError> {
        self.set_position_lock(operator, id, true)
    }

    pub fn position_unlock(&mut self, operator: &Operator, id: PositionId) -> Result<(), EngineError> {
        self.set_position_lock(operator, id, false)
    }

    /// Closes both legs at `price` whatever the lock state, settling realized pnl.
    pub fn position_force_close(
        &mut self,
        operator: &Operator,
        id: PositionId,
        price: Price,
        request_id: Option<&str>,
    ) -> Result<ForceCloseResult, EngineError> {
        operator.require(Permission::ManagePositions)?;
        let position = self.positions.get(id).ok_or(PositionError::NotFound(id))?;
        let user_id = position.user_id;
        let currency = position.settlement_currency();
        let pnl = position.unrealized_pnl(price);
        let request_id = RequestId::parse(request_id).unwrap_or_else(|| {
            RequestId::new(format!(
                "position-{}-force-close-{}",
                id.0,
                position.updated_at.as_millis()
            ))
        });

        if let Some(prior) = self.ledger.replay_of(user_id, &request_id)? {
            let (audit_id, settled) = (prior.id, prior.delta(&currency));
            info!(position_id = id.0, request_id = %request_id, "force close already applied");
            return Ok(ForceCloseResult {
                realized_pnl: settled,
                currency,
                outcome: AdjustOutcome::Replayed(audit_id),
            });
        }

        let outcome = if pnl.is_zero() {
            let now = self.current_time;
            self.ledger.mark(user_id, "position force close", &request_id, operator, now)?
        } else {
            self.post(user_id, &currency, pnl, "position force close", request_id, operator)?
        };
        let realized = self.positions.close_all(id, price, self.current_time)?;

        if realized.is_negative() && self.ledger.balance(user_id, &currency).is_negative() {
            warn!(user_id = user_id.0, position_id = id.0, %realized, "force close left a negative balance");
        }
        info!(position_id = id.0, operator_id = operator.id, %price, %realized, "position force closed");
        self.emit_event(EventPayload::PositionForceClosed(PositionClosedEvent {
            position_id: id,
            user_id,
            operator_id: operator.id,
            price,
            realized_pnl: realized,
            currency: currency.clone(),
        }));

        Ok(ForceCloseResult {
            realized_pnl: realized,
            currency,
            outcome,
        })
    }

    /// Hard delete. Open legs are dropped without settlement.
    pub fn position_delete(&mut self, operator: &Operator, id: PositionId) -> Result<Position, EngineError> {
        operator.require(Permission::ManagePositions)?;
        let removed = self.positions.remove(id)?;
        if !removed.is_flat() {
            warn!(position_id = id.0, long = %removed.long_qty, short = %removed.short_qty, "deleted position with open legs");
        }
        self.emit_event(EventPayload::PositionDeleted(PositionDeletedEvent {
            position_id: id,
            user_id: removed.user_id,
            operator_id: operator.id,
        }));
        Ok(removed)
    }

    pub fn position(&self, id: PositionId) -> Option<&Position> {
        self.positions.get(id)
    }

    pub fn positions_for(&self, user_id: UserId) -> Vec<&Position> {
        self.positions.for_user(user_id)
    }

    fn owned_position(&self, user_id: UserId, id: PositionId) -> Result<&Position, EngineError> {
        let position = self.positions.get(id).ok_or(PositionError::NotFound(id))?;
        if position.user_id != user_id {
            return Err(AccessError::NotOwner {
                user: user_id.0,
                resource: format!("position {}", id.0),
            }
            .into());
        }
        Ok(position)
    }

    fn set_position_lock(&mut self, operator: &Operator, id: PositionId, locked: bool) -> Result<(), EngineError> {
        operator.require(Permission::ManagePositions)?;
        let user_id = self.positions.set_locked(id, locked, self.current_time)?.user_id;
        self.emit_event(EventPayload::PositionLockChanged(PositionLockEvent {
            position_id: id,
            user_id,
            operator_id: operator.id,
            locked,
        }));
        Ok(())
    }

    fn emit_position_updated(&mut self, id: PositionId) {
        if let Some(p) = self.positions.get(id) {
            let payload = EventPayload::PositionUpdated(PositionUpdatedEvent {
                position_id: id,
                user_id: p.user_id,
                symbol: p.symbol.clone(),
                market: p.market,
                long_qty: p.long_qty,
                short_qty: p.short_qty,
                realized_pnl: p.realized_pnl,
            });
            self.emit_event(payload);
        }
    }
}
