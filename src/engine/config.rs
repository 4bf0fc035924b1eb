//! Engine configuration options.

use crate::types::Currency;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of events to retain in memory.
    pub max_events: usize,
    /// Log every emitted event at info instead of debug.
    pub verbose: bool,
    /// Fee charged on approval, as a fraction of principal.
    pub fee_rate: Decimal,
    /// Referrer's cut of an approved order's principal.
    pub commission_rate: Decimal,
    /// Days a referral commission stays frozen.
    pub commission_freeze_days: u32,
    pub default_currency: Currency,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
            verbose: false,
            fee_rate: dec!(0.001),
            commission_rate: dec!(0.05),
            commission_freeze_days: 3,
            default_currency: Currency::usd(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.fee_rate < Decimal::ZERO || self.fee_rate >= Decimal::ONE {
            return Err(format!("fee_rate {} must be in [0, 1)", self.fee_rate));
        }
        if self.commission_rate < Decimal::ZERO || self.commission_rate >= Decimal::ONE {
            return Err(format!("commission_rate {} must be in [0, 1)", self.commission_rate));
        }
        if self.max_events == 0 {
            return Err("max_events must be positive".into());
        }
        Ok(())
    }
}
