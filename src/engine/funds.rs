//! Administrative balance adjustments and balance reads.

use super::core::Engine;
use super::results::EngineError;
use crate::access::{Operator, Permission};
use crate::events::{EventPayload, FundsAdjustedEvent};
use crate::ledger::{AdjustOutcome, CurrencyAmount, FundAuditRecord};
use crate::types::{Amount, Currency, RequestId, UserId};
use std::collections::BTreeMap;
use tracing::info;

impl Engine {
    /// Signed multi-currency adjustment. One audit row per applied call; a
    /// repeated `request_id` returns the first call's audit id untouched.
    pub fn ledger_adjust(
        &mut self,
        operator: &Operator,
        user_id: UserId,
        ops: &[CurrencyAmount],
        reason: &str,
        request_id: Option<&str>,
    ) -> Result<AdjustOutcome, EngineError> {
        operator.require(Permission::AdjustFunds)?;
        if reason.trim().is_empty() {
            return Err(EngineError::InvalidRequest("adjustment reason is required".into()));
        }
        let request_id = RequestId::parse(request_id);
        let outcome = self.ledger.adjust(
            user_id,
            ops,
            reason.trim(),
            request_id.as_ref(),
            operator,
            self.current_time,
        )?;

        if let AdjustOutcome::Applied(audit_id) = outcome {
            info!(
                user_id = user_id.0,
                operator_id = operator.id,
                audit_id = audit_id.0,
                deltas = ops.len(),
                "funds adjusted"
            );
            self.emit_event(EventPayload::FundsAdjusted(FundsAdjustedEvent {
                user_id,
                operator_id: operator.id,
                request_id,
                reason: reason.trim().to_string(),
                deltas: ops.to_vec(),
            }));
        }
        Ok(outcome)
    }

    pub fn ledger_read(&self, user_id: UserId) -> BTreeMap<Currency, Amount> {
        self.ledger.read(user_id)
    }

    pub fn balance(&self, user_id: UserId, currency: &Currency) -> Amount {
        self.ledger.balance(user_id, currency)
    }

    pub fn audit_trail(&self, user_id: UserId) -> Vec<&FundAuditRecord> {
        self.ledger.audit_for_user(user_id)
    }
}
