// 5.5: IPO and RWA subscriptions. users subscribe at a fixed price during the window,
// an operator allots some or all of the requested qty, and the holding can be sold once
// the listing date arrives (the next UTC day when same-day selling is off).

use super::{check_requested_price, require_whole_qty, Exit, InstrumentPolicy, Order, OrderError, OrderKind, Pricing, SubmitRequest};
use crate::timer::start_of_next_utc_day;
use crate::types::{Currency, InstrumentId, Price, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpoKind {
    Ipo,
    Rwa,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpoListing {
    pub id: InstrumentId,
    pub kind: IpoKind,
    pub code: String,
    pub name: String,
    pub currency: Currency,
    pub subscribe_price: Price,
    pub list_price: Option<Price>,
    pub subscribe_at: Timestamp,
    // open ended when absent
    pub subscribe_end_at: Option<Timestamp>,
    pub list_at: Timestamp,
    pub can_sell_on_listing_day: bool,
}

impl IpoListing {
    pub fn is_subscribable(&self, now: Timestamp) -> bool {
        now >= self.subscribe_at && self.subscribe_end_at.map_or(true, |end| now <= end)
    }

    /// First instant a holder may sell.
    pub fn sellable_from(&self) -> Timestamp {
        if self.can_sell_on_listing_day {
            self.list_at
        } else {
            start_of_next_utc_day(self.list_at)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpoPolicy;

impl InstrumentPolicy for IpoPolicy {
    type Instrument = IpoListing;

    const KIND: OrderKind = OrderKind::Ipo;

    fn id(item: &IpoListing) -> InstrumentId {
        item.id
    }

    fn set_id(item: &mut IpoListing, id: InstrumentId) {
        item.id = id;
    }

    fn validate(item: &IpoListing) -> Result<(), OrderError> {
        if item.code.trim().is_empty() {
            return Err(OrderError::InvalidInstrument("listing code is empty".into()));
        }
        if let Some(end) = item.subscribe_end_at {
            if end <= item.subscribe_at {
                return Err(OrderError::InvalidInstrument("subscription must end after it starts".into()));
            }
        }
        if item.list_at < item.subscribe_at {
            return Err(OrderError::InvalidInstrument("listing precedes subscription".into()));
        }
        Ok(())
    }

    fn currency(item: &IpoListing) -> Currency {
        item.currency.clone()
    }

    fn admit(item: &IpoListing, req: &SubmitRequest, now: Timestamp) -> Result<Pricing, OrderError> {
        if !item.is_subscribable(now) {
            return Err(OrderError::WindowClosed(format!("{} subscription is not open", item.code)));
        }
        require_whole_qty(req.qty)?;
        check_requested_price(req.price, item.subscribe_price)?;
        Ok(Pricing {
            price: item.subscribe_price,
            payout: None,
        })
    }

    fn lock_until(item: &IpoListing, _approved_at: Timestamp) -> Option<Timestamp> {
        Some(item.sellable_from())
    }

    fn exit(item: &IpoListing, _order: &Order, price: Option<Price>, now: Timestamp) -> Result<Exit, OrderError> {
        if now < item.list_at {
            return Err(OrderError::NotListed(item.list_at));
        }
        price
            .or(item.list_price)
            .map(Exit::Sell)
            .ok_or(OrderError::MissingPrice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::MILLIS_PER_DAY;
    use crate::trade::OrderBook;
    use crate::types::UserId;
    use rust_decimal_macros::dec;

    // 2024-03-10T12:00:00Z
    const LIST_AT: i64 = 1_710_072_000_000;

    fn listing(same_day: bool) -> IpoListing {
        IpoListing {
            id: InstrumentId(0),
            kind: IpoKind::Ipo,
            code: "ACME".into(),
            name: "Acme".into(),
            currency: Currency::usd(),
            subscribe_price: Price::new(dec!(10)).unwrap(),
            list_price: Some(Price::new(dec!(14)).unwrap()),
            subscribe_at: Timestamp::from_millis(LIST_AT - 10 * MILLIS_PER_DAY),
            subscribe_end_at: Some(Timestamp::from_millis(LIST_AT - MILLIS_PER_DAY)),
            list_at: Timestamp::from_millis(LIST_AT),
            can_sell_on_listing_day: same_day,
        }
    }

    #[test]
    fn listing_day_sale_waits_for_next_utc_day() {
        assert_eq!(listing(true).sellable_from().as_millis(), LIST_AT);
        // 2024-03-11T00:00:00Z
        assert_eq!(listing(false).sellable_from().as_millis(), 1_710_115_200_000);
    }

    #[test]
    fn allotment_and_sale_at_list_price() {
        let mut book: OrderBook<IpoPolicy> = OrderBook::new();
        let id = book.add_instrument(listing(false)).unwrap();
        let during = Timestamp::from_millis(LIST_AT - 5 * MILLIS_PER_DAY);

        assert!(matches!(
            book.submit(UserId(3), &SubmitRequest::new(id, dec!(100)), Timestamp::from_millis(LIST_AT)),
            Err(OrderError::WindowClosed(_))
        ));
        let order_id = book.submit(UserId(3), &SubmitRequest::new(id, dec!(100)), during).unwrap();

        assert!(matches!(
            book.prepare_approval(order_id, Some(dec!(101)), dec!(0), during),
            Err(OrderError::QuantityExceedsRequest { .. })
        ));
        let approval = book.prepare_approval(order_id, Some(dec!(40)), dec!(0.001), during).unwrap();
        assert_eq!(approval.amount.value(), dec!(400));
        book.commit_approval(&approval, 2, during).unwrap();

        // listing day itself is still locked
        let listing_noon = Timestamp::from_millis(LIST_AT + 1);
        assert!(matches!(
            book.prepare_redeem(order_id, UserId(3), None, listing_noon),
            Err(OrderError::Locked { .. })
        ));
        let next_day = Timestamp::from_millis(1_710_115_200_000);
        let redemption = book.prepare_redeem(order_id, UserId(3), None, next_day).unwrap();
        assert_eq!(redemption.credit.value(), dec!(560));
        assert_eq!(redemption.profit.value(), dec!(160));
    }
}
