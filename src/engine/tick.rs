use chrono::{DateTime, Utc};

use crate::errors::{Error, Result};

/// A single trade tick. Immutable once constructed.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    id: u64,
    price: f64,
    quantity: f64,
    time: DateTime<Utc>,
}

impl Tick {
    /// Validates and constructs a tick.
    ///
    /// ### Arguments
    /// * `id` - Feed-assigned trade id.
    /// * `price` - Trade price; must be positive and finite.
    /// * `quantity` - Trade quantity; must be positive and finite.
    /// * `timestamp_millis` - Trade time as epoch milliseconds.
    ///
    /// ### Returns
    /// The tick, or the validation error a feed should log before dropping
    /// the record.
    pub fn new(id: u64, price: f64, quantity: f64, timestamp_millis: i64) -> Result<Self> {
        if !price.is_finite() || price <= 0.0 {
            return Err(Error::TickPrice(price));
        }
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(Error::TickQuantity(quantity));
        }
        let time = DateTime::from_timestamp_millis(timestamp_millis)
            .ok_or(Error::TickTimestamp(timestamp_millis))?;

        Ok(Self {
            id,
            price,
            quantity,
            time,
        })
    }

    /// Returns the feed-assigned trade id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the trade price.
    pub fn price(&self) -> f64 {
        self.price
    }

    /// Returns the trade quantity.
    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    /// Returns the trade time.
    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// Returns the trade time as epoch milliseconds.
    pub fn timestamp_millis(&self) -> i64 {
        self.time.timestamp_millis()
    }

    /// Returns the quote-currency value of the trade (price × quantity).
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

#[cfg(test)]
#[test]
fn create_tick() {
    let tick = Tick::new(7, 100.0, 0.5, 60_000).unwrap();
    assert_eq!(tick.id(), 7);
    assert_eq!(tick.price(), 100.0);
    assert_eq!(tick.quantity(), 0.5);
    assert_eq!(tick.timestamp_millis(), 60_000);
    assert_eq!(tick.notional(), 50.0);
}

#[cfg(test)]
#[test]
fn reject_bad_price() {
    assert!(matches!(
        Tick::new(1, 0.0, 1.0, 0),
        Err(Error::TickPrice(_))
    ));
    assert!(matches!(
        Tick::new(1, f64::NAN, 1.0, 0),
        Err(Error::TickPrice(_))
    ));
    assert!(matches!(
        Tick::new(1, -3.0, 1.0, 0),
        Err(Error::TickPrice(_))
    ));
}

#[cfg(test)]
#[test]
fn reject_bad_quantity() {
    assert!(matches!(
        Tick::new(1, 100.0, 0.0, 0),
        Err(Error::TickQuantity(_))
    ));
    assert!(matches!(
        Tick::new(1, 100.0, f64::INFINITY, 0),
        Err(Error::TickQuantity(_))
    ));
}

#[cfg(test)]
#[test]
fn reject_out_of_range_timestamp() {
    assert!(matches!(
        Tick::new(1, 100.0, 1.0, i64::MAX),
        Err(Error::TickTimestamp(_))
    ));
}
