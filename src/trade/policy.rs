use super::{Order, OrderError, OrderKind, PayoutTerms, SubmitRequest};
use crate::types::{Currency, InstrumentId, Price, Timestamp};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Price and payout an admitted subscription will carry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub price: Price,
    pub payout: Option<PayoutTerms>,
}

/// How an approved order is closed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    // sold at a price, order completes
    Sell(Price),
    // principal handed back, order is redeemed
    Principal,
}

/// Per-kind hooks for the shared order state machine. Implementors are
/// zero-sized markers; all the state lives in the book.
pub trait InstrumentPolicy {
    type Instrument: Clone + Debug + PartialEq + Serialize + DeserializeOwned;

    const KIND: OrderKind;

    fn id(item: &Self::Instrument) -> InstrumentId;

    fn set_id(item: &mut Self::Instrument, id: InstrumentId);

    fn validate(item: &Self::Instrument) -> Result<(), OrderError>;

    fn currency(item: &Self::Instrument) -> Currency;

    /// Window, minimum and key checks, then the price the order will carry.
    fn admit(item: &Self::Instrument, req: &SubmitRequest, now: Timestamp) -> Result<Pricing, OrderError>;

    fn lock_until(item: &Self::Instrument, approved_at: Timestamp) -> Option<Timestamp>;

    /// Exit terms once the lock is clear. `price` is the caller's market price.
    fn exit(
        item: &Self::Instrument,
        order: &Order,
        price: Option<Price>,
        now: Timestamp,
    ) -> Result<Exit, OrderError>;
}
