// 4.0: position book. one row per (user, symbol, market), long and short legs tracked apart.
// pnl per leg: long = qty * (exit - avg), short = qty * (avg - exit).
// 4.1 has the averaging and close helpers at the bottom.

use crate::types::{Amount, Currency, Market, PositionId, Price, Side, Timestamp, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub user_id: UserId,
    pub symbol: String,
    pub market: Market,
    pub long_qty: Decimal,
    pub short_qty: Decimal,
    pub long_avg: Decimal,
    pub short_avg: Decimal,
    pub locked: bool,
    pub realized_pnl: Amount,
    pub opened_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Position {
    fn new(id: PositionId, user_id: UserId, symbol: String, market: Market, now: Timestamp) -> Self {
        Self {
            id,
            user_id,
            symbol,
            market,
            long_qty: Decimal::ZERO,
            short_qty: Decimal::ZERO,
            long_avg: Decimal::ZERO,
            short_avg: Decimal::ZERO,
            locked: false,
            realized_pnl: Amount::zero(),
            opened_at: now,
            updated_at: now,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.long_qty.is_zero() && self.short_qty.is_zero()
    }

    pub fn quantity(&self, side: Side) -> Decimal {
        match side {
            Side::Long => self.long_qty,
            Side::Short => self.short_qty,
        }
    }

    pub fn average(&self, side: Side) -> Decimal {
        match side {
            Side::Long => self.long_avg,
            Side::Short => self.short_avg,
        }
    }

    pub fn settlement_currency(&self) -> Currency {
        self.market.quote_currency()
    }

    // 4.2: paper pnl across both legs at a mark price
    pub fn unrealized_pnl(&self, mark: Price) -> Amount {
        leg_pnl(Side::Long, self.long_qty, self.long_avg, mark)
            .add(leg_pnl(Side::Short, self.short_qty, self.short_avg, mark))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PositionBook {
    positions: BTreeMap<PositionId, Position>,
    by_key: HashMap<(UserId, String, Market), PositionId>,
    next_id: u64,
}

impl PositionBook {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    /// Creates the row if missing, otherwise grows one leg and re-averages it.
    pub fn open_or_increase(
        &mut self,
        user_id: UserId,
        symbol: &str,
        market: Market,
        side: Side,
        qty: Decimal,
        price: Price,
        now: Timestamp,
    ) -> Result<PositionId, PositionError> {
        let symbol = normalize_symbol(symbol)?;
        if qty <= Decimal::ZERO {
            return Err(PositionError::InvalidQuantity(qty));
        }

        let key = (user_id, symbol.clone(), market);
        let id = match self.by_key.get(&key) {
            Some(id) => *id,
            None => {
                let id = PositionId(self.next_id);
                self.next_id += 1;
                self.positions
                    .insert(id, Position::new(id, user_id, symbol, market, now));
                self.by_key.insert(key, id);
                id
            }
        };

        let position = self
            .positions
            .get_mut(&id)
            .ok_or(PositionError::NotFound(id))?;
        match side {
            Side::Long => {
                position.long_avg = weighted_average(position.long_avg, position.long_qty, price, qty);
                position.long_qty += qty;
            }
            Side::Short => {
                position.short_avg = weighted_average(position.short_avg, position.short_qty, price, qty);
                position.short_qty += qty;
            }
        }
        position.updated_at = now;
        Ok(id)
    }

    /// User-side reduce of one leg. Refused while the row is locked.
    pub fn reduce(
        &mut self,
        id: PositionId,
        side: Side,
        qty: Decimal,
        price: Price,
        now: Timestamp,
    ) -> Result<Amount, PositionError> {
        let pnl = self.preview_reduce(id, side, qty, price)?;
        let position = self.positions.get_mut(&id).ok_or(PositionError::NotFound(id))?;
        match side {
            Side::Long => {
                position.long_qty -= qty;
                if position.long_qty.is_zero() {
                    position.long_avg = Decimal::ZERO;
                }
            }
            Side::Short => {
                position.short_qty -= qty;
                if position.short_qty.is_zero() {
                    position.short_avg = Decimal::ZERO;
                }
            }
        }
        position.realized_pnl = position.realized_pnl.add(pnl);
        position.updated_at = now;
        Ok(pnl)
    }

    /// Realized pnl a reduce would produce, without touching the row.
    pub fn preview_reduce(
        &self,
        id: PositionId,
        side: Side,
        qty: Decimal,
        price: Price,
    ) -> Result<Amount, PositionError> {
        let position = self.get(id).ok_or(PositionError::NotFound(id))?;
        if position.locked {
            return Err(PositionError::Locked(id));
        }
        if qty <= Decimal::ZERO {
            return Err(PositionError::InvalidQuantity(qty));
        }
        let held = position.quantity(side);
        if qty > held {
            return Err(PositionError::InsufficientQuantity {
                requested: qty,
                held,
            });
        }
        Ok(leg_pnl(side, qty, position.average(side), price))
    }

    pub fn set_locked(&mut self, id: PositionId, locked: bool, now: Timestamp) -> Result<&Position, PositionError> {
        let position = self.positions.get_mut(&id).ok_or(PositionError::NotFound(id))?;
        position.locked = locked;
        position.updated_at = now;
        Ok(position)
    }

    /// Zeroes both legs at `price` regardless of lock state. Returns realized pnl.
    pub fn close_all(&mut self, id: PositionId, price: Price, now: Timestamp) -> Result<Amount, PositionError> {
        let position = self.positions.get_mut(&id).ok_or(PositionError::NotFound(id))?;
        let pnl = position.unrealized_pnl(price);
        position.long_qty = Decimal::ZERO;
        position.short_qty = Decimal::ZERO;
        position.long_avg = Decimal::ZERO;
        position.short_avg = Decimal::ZERO;
        position.realized_pnl = position.realized_pnl.add(pnl);
        position.updated_at = now;
        Ok(pnl)
    }

    pub fn remove(&mut self, id: PositionId) -> Result<Position, PositionError> {
        let position = self.positions.remove(&id).ok_or(PositionError::NotFound(id))?;
        self.by_key
            .remove(&(position.user_id, position.symbol.clone(), position.market));
        Ok(position)
    }

    pub fn get(&self, id: PositionId) -> Option<&Position> {
        self.positions.get(&id)
    }

    pub fn find(&self, user_id: UserId, symbol: &str, market: Market) -> Option<&Position> {
        let symbol = normalize_symbol(symbol).ok()?;
        self.by_key
            .get(&(user_id, symbol, market))
            .and_then(|id| self.positions.get(id))
    }

    pub fn for_user(&self, user_id: UserId) -> Vec<&Position> {
        self.positions.values().filter(|p| p.user_id == user_id).collect()
    }

    /// Next id to be issued. Persisted so a restore never reissues an id
    /// whose row was deleted.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn resume_from(&mut self, next_id: u64) {
        self.next_id = self.next_id.max(next_id);
    }

    pub fn rows(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    pub fn from_rows(rows: Vec<Position>) -> Result<Self, PositionError> {
        let mut book = Self::new();
        for row in rows {
            let key = (row.user_id, row.symbol.clone(), row.market);
            if book.by_key.insert(key, row.id).is_some() {
                return Err(PositionError::DuplicateKey {
                    user_id: row.user_id,
                    symbol: row.symbol,
                });
            }
            book.next_id = book.next_id.max(row.id.0 + 1);
            book.positions.insert(row.id, row);
        }
        Ok(book)
    }
}

// 4.1: weighted average entry. (avg*qty + price*add) / (qty + add)
pub fn weighted_average(old_avg: Decimal, old_qty: Decimal, price: Price, add_qty: Decimal) -> Decimal {
    let total = old_qty + add_qty;
    if total.is_zero() {
        return Decimal::ZERO;
    }
    (old_avg * old_qty + price.value() * add_qty) / total
}

pub fn leg_pnl(side: Side, qty: Decimal, avg: Decimal, exit: Price) -> Amount {
    let pnl = match side {
        Side::Long => qty * (exit.value() - avg),
        Side::Short => qty * (avg - exit.value()),
    };
    Amount::new(pnl)
}

fn normalize_symbol(symbol: &str) -> Result<String, PositionError> {
    let symbol = symbol.trim();
    if symbol.is_empty() || symbol.len() > 32 {
        return Err(PositionError::InvalidSymbol(symbol.to_string()));
    }
    Ok(symbol.to_ascii_uppercase())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PositionError {
    #[error("Position not found: {0:?}")]
    NotFound(PositionId),

    #[error("Position {0:?} is locked")]
    Locked(PositionId),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(Decimal),

    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("Insufficient quantity: requested {requested}, held {held}")]
    InsufficientQuantity { requested: Decimal, held: Decimal },

    #[error("Duplicate position for user {user_id:?} on {symbol}")]
    DuplicateKey { user_id: UserId, symbol: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn price(v: Decimal) -> Price {
        Price::new(v).unwrap()
    }

    fn t(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn increase_reaverages_the_leg() {
        let mut book = PositionBook::new();
        let id = book
            .open_or_increase(UserId(1), "aapl", Market::Us, Side::Long, dec!(10), price(dec!(100)), t(0))
            .unwrap();
        let again = book
            .open_or_increase(UserId(1), "AAPL", Market::Us, Side::Long, dec!(10), price(dec!(110)), t(1))
            .unwrap();

        assert_eq!(id, again);
        let p = book.get(id).unwrap();
        assert_eq!(p.long_qty, dec!(20));
        assert_eq!(p.long_avg, dec!(105));
        assert_eq!(p.symbol, "AAPL");
    }

    #[test]
    fn short_leg_is_independent() {
        let mut book = PositionBook::new();
        let id = book
            .open_or_increase(UserId(1), "BTC", Market::Crypto, Side::Long, dec!(1), price(dec!(100)), t(0))
            .unwrap();
        book.open_or_increase(UserId(1), "BTC", Market::Crypto, Side::Short, dec!(2), price(dec!(120)), t(0))
            .unwrap();

        let p = book.get(id).unwrap();
        assert_eq!(p.long_avg, dec!(100));
        assert_eq!(p.short_avg, dec!(120));
        // long +10, short +2*(120-110)=+20
        assert_eq!(p.unrealized_pnl(price(dec!(110))).value(), dec!(30));
    }

    #[test]
    fn locked_position_refuses_reduce() {
        let mut book = PositionBook::new();
        let id = book
            .open_or_increase(UserId(1), "X", Market::Mx, Side::Long, dec!(5), price(dec!(10)), t(0))
            .unwrap();
        book.set_locked(id, true, t(1)).unwrap();

        let err = book.reduce(id, Side::Long, dec!(1), price(dec!(12)), t(2)).unwrap_err();
        assert_eq!(err, PositionError::Locked(id));

        book.set_locked(id, false, t(3)).unwrap();
        let pnl = book.reduce(id, Side::Long, dec!(2), price(dec!(12)), t(4)).unwrap();
        assert_eq!(pnl.value(), dec!(4));
        assert_eq!(book.get(id).unwrap().long_qty, dec!(3));
    }

    #[test]
    fn reduce_cannot_exceed_leg() {
        let mut book = PositionBook::new();
        let id = book
            .open_or_increase(UserId(1), "X", Market::Us, Side::Short, dec!(1), price(dec!(10)), t(0))
            .unwrap();
        assert!(matches!(
            book.reduce(id, Side::Short, dec!(2), price(dec!(9)), t(1)),
            Err(PositionError::InsufficientQuantity { .. })
        ));
    }

    #[test]
    fn close_all_ignores_lock_and_zeroes_legs() {
        let mut book = PositionBook::new();
        let id = book
            .open_or_increase(UserId(1), "X", Market::Us, Side::Long, dec!(2), price(dec!(50)), t(0))
            .unwrap();
        book.set_locked(id, true, t(0)).unwrap();

        let pnl = book.close_all(id, price(dec!(40)), t(1)).unwrap();
        assert_eq!(pnl.value(), dec!(-20));
        assert!(book.get(id).unwrap().is_flat());
    }

    #[test]
    fn remove_frees_the_key() {
        let mut book = PositionBook::new();
        let id = book
            .open_or_increase(UserId(1), "X", Market::Us, Side::Long, dec!(1), price(dec!(1)), t(0))
            .unwrap();
        book.remove(id).unwrap();
        assert!(book.find(UserId(1), "x", Market::Us).is_none());
        let fresh = book
            .open_or_increase(UserId(1), "X", Market::Us, Side::Long, dec!(1), price(dec!(1)), t(0))
            .unwrap();
        assert_ne!(id, fresh);
    }
}
