use chrono::{DateTime, Utc};

use crate::RatioCalculus;
use crate::engine::SellReason;
use crate::utils::minutes_between;

/// Represents the side of an order (buy or sell).
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Represents how an order is priced at the gateway.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

/// An open position: the metadata of one in-flight round trip.
///
/// At most one position is open per (strategy, pair) at any time; the position
/// is owned exclusively by that pair's lifecycle and never shared.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pair: String,
    strategy: String,
    order_type: OrderType,
    start_time: DateTime<Utc>,
    start_price: f64,
    quantity: f64,
    fee: f64,
}

impl Position {
    /// Creates a position at entry time.
    pub fn new(
        pair: &str,
        strategy: &str,
        order_type: OrderType,
        start_time: DateTime<Utc>,
        start_price: f64,
        quantity: f64,
        fee: f64,
    ) -> Self {
        Self {
            pair: pair.to_owned(),
            strategy: strategy.to_owned(),
            order_type,
            start_time,
            start_price,
            quantity,
            fee,
        }
    }

    /// Overwrites price, quantity and fee from a confirmed entry fill.
    pub(crate) fn apply_entry_fill(&mut self, price: f64, quantity: f64, fee: f64) {
        self.start_price = price;
        self.quantity = quantity;
        self.fee = fee;
    }

    /// Snapshots the position into an immutable closed trade.
    ///
    /// ### Arguments
    /// * `end_price` - The exit fill price.
    /// * `end_time` - The exit fill time.
    /// * `exit_fee` - Fee charged on the exit leg, added to the entry fee.
    /// * `sell_reason` - Why the position was closed.
    pub fn close(
        &self,
        end_price: f64,
        end_time: DateTime<Utc>,
        exit_fee: f64,
        sell_reason: SellReason,
    ) -> ClosedTrade {
        ClosedTrade {
            pair: self.pair.clone(),
            strategy: self.strategy.clone(),
            order_type: self.order_type,
            start_time: self.start_time,
            end_time,
            start_price: self.start_price,
            end_price,
            quantity: self.quantity,
            fee: self.fee + exit_fee,
            sell_reason,
        }
    }

    pub fn pair(&self) -> &str {
        &self.pair
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn start_price(&self) -> f64 {
        self.start_price
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn fee(&self) -> f64 {
        self.fee
    }
}

/// The immutable record of one completed entry+exit round trip.
///
/// Produced exactly once per round trip by the lifecycle, consumed once by the
/// statistics aggregator, then persisted or discarded.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedTrade {
    pair: String,
    strategy: String,
    order_type: OrderType,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    start_price: f64,
    end_price: f64,
    quantity: f64,
    fee: f64,
    sell_reason: SellReason,
}

impl ClosedTrade {
    pub fn pair(&self) -> &str {
        &self.pair
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn start_price(&self) -> f64 {
        self.start_price
    }

    pub fn end_price(&self) -> f64 {
        self.end_price
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    /// Total fee over both legs.
    pub fn fee(&self) -> f64 {
        self.fee
    }

    pub fn sell_reason(&self) -> SellReason {
        self.sell_reason
    }

    /// Absolute income of the round trip: (end − start) × quantity − fee.
    pub fn income(&self) -> f64 {
        (self.end_price - self.start_price) * self.quantity - self.fee
    }

    /// Holding time in fractional minutes.
    pub fn duration_minutes(&self) -> f64 {
        minutes_between(self.start_time, self.end_time)
    }

    /// Exit-to-entry price ratio.
    pub fn ratio(&self) -> f64 {
        self.end_price / self.start_price
    }

    /// Realized return of the exit price against the entry price.
    pub fn realized_return(&self) -> f64 {
        self.end_price.return_against(self.start_price)
    }

    /// Quote value committed at entry (start price × quantity).
    pub fn stake_amount(&self) -> f64 {
        self.start_price * self.quantity
    }
}

#[cfg(test)]
fn closed(start_price: f64, end_price: f64, quantity: f64, fee: f64) -> ClosedTrade {
    let position = Position::new(
        "ETHUSDT",
        "test",
        OrderType::Market,
        DateTime::from_timestamp_millis(0).unwrap(),
        start_price,
        quantity,
        0.0,
    );
    position.close(
        end_price,
        DateTime::from_timestamp_millis(150_000).unwrap(),
        fee,
        SellReason::Roi,
    )
}

#[cfg(test)]
#[test]
fn trade_income() {
    let trade = closed(100.0, 104.0, 0.5, 0.15);
    assert_eq!(trade.income(), 4.0 * 0.5 - 0.15);
}

#[cfg(test)]
#[test]
fn trade_duration() {
    let trade = closed(100.0, 104.0, 0.5, 0.0);
    assert_eq!(trade.duration_minutes(), 2.5);
}

#[cfg(test)]
#[test]
fn trade_ratio_and_stake() {
    let trade = closed(100.0, 104.0, 0.5, 0.0);
    assert_eq!(trade.ratio(), 1.04);
    assert_eq!(trade.stake_amount(), 50.0);
    assert!((trade.realized_return() - 0.04).abs() < 1e-12);
}

#[cfg(test)]
#[test]
fn entry_fill_overwrites_provisional_values() {
    let mut position = Position::new(
        "ETHUSDT",
        "test",
        OrderType::Limit,
        DateTime::from_timestamp_millis(0).unwrap(),
        100.0,
        0.1,
        0.0,
    );
    position.apply_entry_fill(100.2, 0.0998, 0.0075);
    assert_eq!(position.start_price(), 100.2);
    assert_eq!(position.quantity(), 0.0998);
    assert_eq!(position.fee(), 0.0075);
}

#[cfg(test)]
#[test]
fn fees_accumulate_across_both_legs() {
    let position = Position::new(
        "ETHUSDT",
        "test",
        OrderType::Market,
        DateTime::from_timestamp_millis(0).unwrap(),
        100.0,
        1.0,
        0.075,
    );
    let trade = position.close(
        101.0,
        DateTime::from_timestamp_millis(60_000).unwrap(),
        0.076,
        SellReason::SellSignal,
    );
    assert!((trade.fee() - 0.151).abs() < 1e-12);
    assert_eq!(trade.sell_reason(), SellReason::SellSignal);
}
