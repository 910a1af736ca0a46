//! Seams for the engine's external collaborators.
//!
//! The core never talks to an exchange or a data source directly. Ticks arrive
//! through a [`TickFeed`] and orders leave through an [`OrderGateway`]; both are
//! narrow traits so live connectivity, replay and test doubles plug in the same
//! way. The engine is transport-agnostic: no wire format is defined here.

use crate::engine::{OrderSide, OrderType, Tick};
use crate::errors::{Error, Result};
use crate::utils::random_id;

/// An ordered, lazy sequence of ticks.
///
/// Live feeds are unbounded; backtest feeds are finite and restartable. A feed
/// error means one malformed record — callers log it, drop the record and keep
/// pulling. The stream itself must never die on a bad record.
pub trait TickFeed {
    /// Pulls the next tick, `Ok(None)` when the (finite) feed is exhausted.
    fn next_tick(&mut self) -> Result<Option<Tick>>;
}

/// A finite, restartable feed over an in-memory tick series.
#[derive(Debug, Clone)]
pub struct VecFeed {
    ticks: Vec<Tick>,
    cursor: usize,
}

impl VecFeed {
    /// Creates a feed over the given series.
    pub fn new(ticks: Vec<Tick>) -> Self {
        Self { ticks, cursor: 0 }
    }

    /// Restarts the feed from the first tick.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

impl TickFeed for VecFeed {
    fn next_tick(&mut self) -> Result<Option<Tick>> {
        let tick = self.ticks.get(self.cursor).copied();
        if tick.is_some() {
            self.cursor += 1;
        }
        Ok(tick)
    }
}

/// An order as handed to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest<'a> {
    /// Client-assigned order id.
    pub id: u32,
    /// Instrument to trade.
    pub pair: &'a str,
    /// Buy or sell.
    pub side: OrderSide,
    /// Base quantity to trade.
    pub quantity: f64,
    /// Market or limit execution.
    pub order_type: OrderType,
    /// Reference price: the limit price, or the price the caller observed when
    /// requesting a market order.
    pub price: f64,
}

impl<'a> OrderRequest<'a> {
    /// Creates a request with a fresh random id.
    pub fn new(pair: &'a str, side: OrderSide, quantity: f64, order_type: OrderType, price: f64) -> Self {
        Self {
            id: random_id(),
            pair,
            side,
            quantity,
            order_type,
            price,
        }
    }
}

/// A confirmed execution: what the exchange actually filled.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    /// Average fill price.
    pub price: f64,
    /// Filled base quantity.
    pub quantity: f64,
    /// Fee charged for this leg, in quote currency.
    pub fee: f64,
}

/// Outcome of an order placement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderAck {
    /// The order filled synchronously (simulated gateways).
    Filled(Fill),
    /// The order was accepted; the fill arrives later through the runner's
    /// fill-confirmation path (live gateways).
    Pending,
}

/// Places orders with an exchange, real or simulated.
///
/// The engine's state transitions complete or fail atomically around this
/// call: an `Err` moves the calling lifecycle into its terminal error state,
/// since a partial fill may already exist on the exchange side.
pub trait OrderGateway {
    /// Places an order.
    fn place_order(&mut self, request: &OrderRequest<'_>) -> Result<OrderAck>;
}

/// Instant-fill gateway for backtests.
///
/// Fills every order at the request's reference price and charges a flat
/// commission rate on the traded notional, on both legs.
#[derive(Debug, Clone, Copy)]
pub struct SimGateway {
    fee_rate: f64,
}

impl SimGateway {
    /// Flat taker commission most venues charge with fee discounts enabled.
    pub const DEFAULT_FEE_RATE: f64 = 0.00075;

    /// Creates a simulated gateway.
    ///
    /// ### Arguments
    /// * `fee_rate` - Commission charged per leg on price × quantity; must be
    ///   finite and non-negative.
    pub fn new(fee_rate: f64) -> Result<Self> {
        if !fee_rate.is_finite() || fee_rate < 0.0 {
            return Err(Error::FeeRate(fee_rate));
        }
        Ok(Self { fee_rate })
    }

    /// Returns the commission rate.
    pub fn fee_rate(&self) -> f64 {
        self.fee_rate
    }
}

impl OrderGateway for SimGateway {
    fn place_order(&mut self, request: &OrderRequest<'_>) -> Result<OrderAck> {
        let notional = request.price * request.quantity;
        Ok(OrderAck::Filled(Fill {
            price: request.price,
            quantity: request.quantity,
            fee: notional * self.fee_rate,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(id: u64, price: f64) -> Tick {
        Tick::new(id, price, 1.0, id as i64 * 1_000).unwrap()
    }

    #[test]
    fn vec_feed_is_restartable() {
        let mut feed = VecFeed::new(vec![tick(1, 100.0), tick(2, 101.0)]);
        assert_eq!(feed.next_tick().unwrap().map(|t| t.id()), Some(1));
        assert_eq!(feed.next_tick().unwrap().map(|t| t.id()), Some(2));
        assert_eq!(feed.next_tick().unwrap(), None);

        feed.rewind();
        assert_eq!(feed.next_tick().unwrap().map(|t| t.id()), Some(1));
    }

    #[test]
    fn sim_gateway_fills_at_reference_price() {
        let mut gateway = SimGateway::new(0.001).unwrap();
        let request = OrderRequest::new("BTCUSDT", OrderSide::Buy, 0.5, OrderType::Market, 200.0);
        let ack = gateway.place_order(&request).unwrap();

        match ack {
            OrderAck::Filled(fill) => {
                assert_eq!(fill.price, 200.0);
                assert_eq!(fill.quantity, 0.5);
                assert_eq!(fill.fee, 0.1);
            }
            OrderAck::Pending => panic!("sim gateway never defers"),
        }
    }

    #[test]
    fn negative_fee_rate_is_rejected() {
        assert!(matches!(SimGateway::new(-0.1), Err(Error::FeeRate(_))));
        assert!(matches!(SimGateway::new(f64::NAN), Err(Error::FeeRate(_))));
    }
}
