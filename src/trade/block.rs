// 5.3: block trades. a fixed-price lot, open for subscription between start_at and end_at,
// gated by a subscribe key. approved holdings stay locked until an absolute lock_until,
// after which the holder sells at the prevailing market price.

use super::{check_requested_price, Exit, InstrumentPolicy, Order, OrderError, OrderKind, Pricing, SubmitRequest};
use crate::types::{Currency, InstrumentId, Market, Price, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const MIN_SUBSCRIBE_KEY_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockTradeItem {
    pub id: InstrumentId,
    pub market: Market,
    pub symbol: String,
    pub price: Price,
    pub min_qty: Decimal,
    pub start_at: Timestamp,
    pub end_at: Timestamp,
    pub lock_until: Timestamp,
    pub subscribe_key: String,
}

impl BlockTradeItem {
    pub fn is_open(&self, now: Timestamp) -> bool {
        now >= self.start_at && now <= self.end_at
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockPolicy;

impl InstrumentPolicy for BlockPolicy {
    type Instrument = BlockTradeItem;

    const KIND: OrderKind = OrderKind::Block;

    fn id(item: &BlockTradeItem) -> InstrumentId {
        item.id
    }

    fn set_id(item: &mut BlockTradeItem, id: InstrumentId) {
        item.id = id;
    }

    fn validate(item: &BlockTradeItem) -> Result<(), OrderError> {
        if item.symbol.trim().is_empty() {
            return Err(OrderError::InvalidInstrument("symbol is empty".into()));
        }
        if item.min_qty <= Decimal::ZERO {
            return Err(OrderError::InvalidInstrument(format!("min qty {} must be positive", item.min_qty)));
        }
        if item.start_at >= item.end_at {
            return Err(OrderError::InvalidInstrument("start must precede end".into()));
        }
        if item.lock_until <= item.end_at {
            return Err(OrderError::InvalidInstrument("lock must outlast the subscription window".into()));
        }
        let key = item.subscribe_key.trim();
        if key.len() < MIN_SUBSCRIBE_KEY_LEN || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(OrderError::InvalidInstrument(format!(
                "subscribe key needs at least {} alphanumerics",
                MIN_SUBSCRIBE_KEY_LEN
            )));
        }
        Ok(())
    }

    fn currency(item: &BlockTradeItem) -> Currency {
        item.market.quote_currency()
    }

    fn admit(item: &BlockTradeItem, req: &SubmitRequest, now: Timestamp) -> Result<Pricing, OrderError> {
        if !item.is_open(now) {
            return Err(OrderError::WindowClosed(format!(
                "block trade {} open {} to {}",
                item.symbol, item.start_at, item.end_at
            )));
        }
        if req.qty < item.min_qty {
            return Err(OrderError::BelowMinimum {
                qty: req.qty,
                min: item.min_qty,
            });
        }
        let key = req.subscribe_key.as_deref().map(str::trim).unwrap_or_default();
        if key != item.subscribe_key.trim() {
            return Err(OrderError::SubscribeKeyMismatch);
        }
        check_requested_price(req.price, item.price)?;
        Ok(Pricing {
            price: item.price,
            payout: None,
        })
    }

    fn lock_until(item: &BlockTradeItem, _approved_at: Timestamp) -> Option<Timestamp> {
        Some(item.lock_until)
    }

    fn exit(
        _item: &BlockTradeItem,
        _order: &Order,
        price: Option<Price>,
        _now: Timestamp,
    ) -> Result<Exit, OrderError> {
        price.map(Exit::Sell).ok_or(OrderError::MissingPrice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::{OrderBook, OrderStatus};
    use crate::types::{OrderId, UserId};
    use rust_decimal_macros::dec;

    fn item() -> BlockTradeItem {
        BlockTradeItem {
            id: InstrumentId(0),
            market: Market::Us,
            symbol: "NVDA".into(),
            price: Price::new(dec!(100)).unwrap(),
            min_qty: dec!(10),
            start_at: Timestamp::from_millis(1_000),
            end_at: Timestamp::from_millis(2_000),
            lock_until: Timestamp::from_millis(5_000),
            subscribe_key: "KEY123".into(),
        }
    }

    #[test]
    fn rejects_bad_catalogue_entries() {
        let mut short_key = item();
        short_key.subscribe_key = "abc".into();
        assert!(BlockPolicy::validate(&short_key).is_err());

        let mut early_lock = item();
        early_lock.lock_until = Timestamp::from_millis(1_500);
        assert!(BlockPolicy::validate(&early_lock).is_err());

        assert!(BlockPolicy::validate(&item()).is_ok());
    }

    #[test]
    fn submit_checks_window_min_and_key() {
        let mut book: OrderBook<BlockPolicy> = OrderBook::new();
        let id = book.add_instrument(item()).unwrap();
        let inside = Timestamp::from_millis(1_500);

        let req = SubmitRequest::new(id, dec!(10)).with_key("KEY123");
        assert!(matches!(
            book.submit(UserId(1), &req, Timestamp::from_millis(2_001)),
            Err(OrderError::WindowClosed(_))
        ));
        assert!(matches!(
            book.submit(UserId(1), &SubmitRequest::new(id, dec!(5)).with_key("KEY123"), inside),
            Err(OrderError::BelowMinimum { .. })
        ));
        assert_eq!(
            book.submit(UserId(1), &SubmitRequest::new(id, dec!(10)).with_key("nope00"), inside),
            Err(OrderError::SubscribeKeyMismatch)
        );

        let order_id = book.submit(UserId(1), &req, inside).unwrap();
        let order = book.get(order_id).unwrap();
        assert_eq!(order.status, OrderStatus::Submitted);
        assert_eq!(order.amount.value(), dec!(1000));
        assert_eq!(order.currency, Currency::usd());
    }

    #[test]
    fn sell_requires_price_and_expired_lock() {
        let mut book: OrderBook<BlockPolicy> = OrderBook::new();
        let id = book.add_instrument(item()).unwrap();
        let order_id = book
            .submit(UserId(1), &SubmitRequest::new(id, dec!(10)).with_key("KEY123"), Timestamp::from_millis(1_500))
            .unwrap();
        let approval = book
            .prepare_approval(order_id, None, dec!(0.001), Timestamp::from_millis(1_600))
            .unwrap();
        assert_eq!(approval.fee.value(), dec!(1.000));
        book.commit_approval(&approval, 9, Timestamp::from_millis(1_600)).unwrap();

        let sell = Price::new(dec!(120)).unwrap();
        assert!(matches!(
            book.prepare_redeem(order_id, UserId(1), Some(sell), Timestamp::from_millis(4_999)),
            Err(OrderError::Locked { .. })
        ));
        assert_eq!(
            book.prepare_redeem(order_id, UserId(1), None, Timestamp::from_millis(5_000)),
            Err(OrderError::MissingPrice)
        );
        assert!(matches!(
            book.prepare_redeem(order_id, UserId(2), Some(sell), Timestamp::from_millis(5_000)),
            Err(OrderError::NotOwner { .. })
        ));

        let redemption = book
            .prepare_redeem(order_id, UserId(1), Some(sell), Timestamp::from_millis(5_000))
            .unwrap();
        assert_eq!(redemption.credit.value(), dec!(1200));
        assert_eq!(redemption.profit.value(), dec!(200));
        assert_eq!(redemption.profit_pct, dec!(20));
        assert_eq!(redemption.final_status, OrderStatus::Completed);

        book.commit_redeem(&redemption, Timestamp::from_millis(5_000)).unwrap();
        assert!(book.get(order_id).unwrap().status.is_terminal());
        assert!(book.get(OrderId(99)).is_none());
    }
}
