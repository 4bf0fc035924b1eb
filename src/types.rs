// 1.0: all the primitives live here. ids, money, currencies, request ids, timestamps.
// each is a newtype so the compiler catches type mixups between users, orders and positions.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommissionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WithdrawalId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CreditAppId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DebtId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuditId(pub u64);

// Long profits when price goes up, short when it goes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

// 1.1: currency code. 2..=10 ascii alphanumerics, stored upper-case ("USD", "USDT", "MXN").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, CurrencyError> {
        let code = code.trim();
        if code.len() < 2 || code.len() > 10 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CurrencyError::Malformed(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    pub fn usdt() -> Self {
        Self("USDT".to_string())
    }

    pub fn mxn() -> Self {
        Self("MXN".to_string())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Currency {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::new(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CurrencyError {
    #[error("Malformed currency code: {0:?}")]
    Malformed(String),
}

// 1.2: venue a position or block trade belongs to. decides the settlement currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    Us,
    Crypto,
    Mx,
}

impl Market {
    pub fn quote_currency(&self) -> Currency {
        match self {
            Market::Us => Currency::usd(),
            Market::Crypto => Currency::usdt(),
            Market::Mx => Currency::mxn(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Us => "us",
            Market::Crypto => "crypto",
            Market::Mx => "mx",
        }
    }
}

impl FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "us" => Ok(Market::Us),
            "crypto" => Ok(Market::Crypto),
            "mx" => Ok(Market::Mx),
            other => Err(format!("Unknown market: {}", other)),
        }
    }
}

// 1.3: unit price. must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!(value > Decimal::ZERO);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.4: signed money amount in some currency. balances, deltas, fees, payouts, pnl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    pub fn add(&self, other: Amount) -> Self {
        Self(self.0 + other.0)
    }

    pub fn sub(&self, other: Amount) -> Self {
        Self(self.0 - other.0)
    }

    pub fn mul(&self, factor: Decimal) -> Self {
        Self(self.0 * factor)
    }

    pub fn negate(&self) -> Self {
        Self(-self.0)
    }

    pub fn checked_add(&self, other: Amount) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for Amount {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Amount {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, a| acc.add(a))
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, a| acc.add(*a))
    }
}

// 1.5: idempotency token. engine flows derive theirs from row ids; caller tokens
// live under EXTERNAL_PREFIX so they can never claim an engine-derived id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

pub const EXTERNAL_PREFIX: &str = "ext:";

impl RequestId {
    /// Engine-derived id, taken verbatim.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Caller token. Trims, maps missing/blank tokens to None and namespaces
    /// the rest.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Self(format!("{}{}", EXTERNAL_PREFIX, s)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_external(&self) -> bool {
        self.0.starts_with(EXTERNAL_PREFIX)
    }

    /// The token as the caller sent it.
    pub fn caller_token(&self) -> &str {
        self.0.strip_prefix(EXTERNAL_PREFIX).unwrap_or(&self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// 1.6: millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn plus_millis(&self, ms: i64) -> Self {
        Self(self.0.saturating_add(ms))
    }

    pub fn millis_until(&self, later: Timestamp) -> i64 {
        later.0 - self.0
    }

    pub fn to_datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp_millis(self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
            None => write!(f, "{}ms", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn currency_normalizes_and_validates() {
        assert_eq!(Currency::new(" usdt ").unwrap().as_str(), "USDT");
        assert!(Currency::new("U").is_err());
        assert!(Currency::new("US-D").is_err());
        assert!(Currency::new("ABCDEFGHIJK").is_err());
    }

    #[test]
    fn request_id_blank_is_none() {
        assert_eq!(RequestId::parse(None), None);
        assert_eq!(RequestId::parse(Some("   ")), None);
        let parsed = RequestId::parse(Some(" r-1 ")).unwrap();
        assert_eq!(parsed.caller_token(), "r-1");
        assert!(parsed.is_external());
    }

    #[test]
    fn caller_tokens_never_match_engine_ids() {
        let engine_id = RequestId::new("withdraw-1-complete");
        let caller = RequestId::parse(Some("withdraw-1-complete")).unwrap();
        assert_ne!(caller, engine_id);
        assert!(!engine_id.is_external());
    }

    #[test]
    fn amount_arithmetic() {
        let a = Amount::new(dec!(10.5));
        let b = Amount::new(dec!(3));
        assert_eq!(a.sub(b).value(), dec!(7.5));
        assert_eq!(b.sub(a).abs().value(), dec!(7.5));
        assert!(b.sub(a).is_negative());
        let total: Amount = [a, b].iter().sum();
        assert_eq!(total.value(), dec!(13.5));
    }

    #[test]
    fn market_quote_currency() {
        assert_eq!(Market::Us.quote_currency(), Currency::usd());
        assert_eq!("crypto".parse::<Market>().unwrap(), Market::Crypto);
        assert!("moon".parse::<Market>().is_err());
    }

    #[test]
    fn price_must_be_positive() {
        assert!(Price::new(dec!(0)).is_none());
        assert!(Price::new(dec!(-1)).is_none());
        assert_eq!(Price::new(dec!(2.5)).unwrap().value(), dec!(2.5));
    }
}
