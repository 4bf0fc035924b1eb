// 5.4: funds. four subscription tiers, each a (price, percent) pair. the chosen tier's
// percent is paid on the principal every dividend interval while the order is approved.
// redemption hands back the principal once redeem_days have passed since approval.

use super::{require_whole_qty, Exit, InstrumentPolicy, Order, OrderError, OrderKind, PayoutTerms, Pricing, SubmitRequest};
use crate::timer::{add_days, IntervalUnit};
use crate::types::{Currency, InstrumentId, Price, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const FUND_TIER_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundTier {
    pub price: Price,
    // payout percent per dividend interval, 1.5 means 1.5%
    pub percent: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundProduct {
    pub id: InstrumentId,
    pub code: String,
    pub name: String,
    pub currency: Currency,
    pub tiers: Vec<FundTier>,
    pub dividend: IntervalUnit,
    pub redeem_days: u32,
    pub active: bool,
}

impl FundProduct {
    pub fn tier_for(&self, price: Price) -> Option<&FundTier> {
        self.tiers.iter().find(|t| t.price == price)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FundPolicy;

impl InstrumentPolicy for FundPolicy {
    type Instrument = FundProduct;

    const KIND: OrderKind = OrderKind::Fund;

    fn id(item: &FundProduct) -> InstrumentId {
        item.id
    }

    fn set_id(item: &mut FundProduct, id: InstrumentId) {
        item.id = id;
    }

    fn validate(item: &FundProduct) -> Result<(), OrderError> {
        if item.name.trim().is_empty() || item.code.trim().is_empty() {
            return Err(OrderError::InvalidInstrument("fund needs a name and code".into()));
        }
        if item.tiers.len() != FUND_TIER_COUNT {
            return Err(OrderError::InvalidInstrument(format!(
                "fund needs exactly {} tiers, got {}",
                FUND_TIER_COUNT,
                item.tiers.len()
            )));
        }
        for (i, tier) in item.tiers.iter().enumerate() {
            if tier.percent <= Decimal::ZERO || tier.percent > Decimal::ONE_HUNDRED {
                return Err(OrderError::InvalidInstrument(format!(
                    "tier {} percent {} out of range",
                    i + 1,
                    tier.percent
                )));
            }
            if item.tiers[..i].iter().any(|t| t.price == tier.price) {
                return Err(OrderError::InvalidInstrument(format!("duplicate tier price {}", tier.price)));
            }
        }
        Ok(())
    }

    fn currency(item: &FundProduct) -> Currency {
        item.currency.clone()
    }

    fn admit(item: &FundProduct, req: &SubmitRequest, _now: Timestamp) -> Result<Pricing, OrderError> {
        if !item.active {
            return Err(OrderError::WindowClosed(format!("fund {} is not accepting subscriptions", item.code)));
        }
        require_whole_qty(req.qty)?;
        let price = req.price.ok_or(OrderError::MissingPrice)?;
        let tier = item.tier_for(price).ok_or_else(|| OrderError::PriceMismatch {
            requested: price.value(),
            expected: item
                .tiers
                .iter()
                .map(|t| t.price.to_string())
                .collect::<Vec<_>>()
                .join("/"),
        })?;
        Ok(Pricing {
            price: tier.price,
            payout: Some(PayoutTerms {
                unit: item.dividend,
                rate: tier.percent / Decimal::ONE_HUNDRED,
            }),
        })
    }

    fn lock_until(item: &FundProduct, approved_at: Timestamp) -> Option<Timestamp> {
        Some(add_days(approved_at, item.redeem_days))
    }

    fn exit(_item: &FundProduct, _order: &Order, _price: Option<Price>, _now: Timestamp) -> Result<Exit, OrderError> {
        Ok(Exit::Principal)
    }
}
