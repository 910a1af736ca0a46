use chrono::{DateTime, Utc};
use log::{debug, error, info};

use crate::engine::{ClosedTrade, OrderSide, OrderType, Position, SellReason};
use crate::errors::{Error, Result};
use crate::gateway::{Fill, OrderAck, OrderGateway, OrderRequest};

/// The lifecycle state of a (strategy, pair)'s single position slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeState {
    /// No position and no order in flight.
    Flat,
    /// A buy order was placed; awaiting the fill confirmation.
    Entering,
    /// The position is open; the exit evaluator runs on every tick.
    Open,
    /// A sell order was placed; awaiting the fill confirmation.
    Exiting,
    /// A gateway failure occurred mid-transition. Terminal until the operator
    /// reconciles with the exchange and acknowledges — a partial fill may
    /// exist, so nothing is retried.
    Error,
}

impl TradeState {
    /// Returns the state name as the operator-facing string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "FLAT",
            Self::Entering => "ENTERING",
            Self::Open => "OPEN",
            Self::Exiting => "EXITING",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for TradeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State machine turning strategy signals and exit verdicts into entry/exit
/// transitions, producing one [`ClosedTrade`] per completed round trip.
///
/// Owns the single position slot for one (strategy, pair). Signals that do not
/// fit the current state are ignored, so a BUY while a position is open or any
/// signal while an order is in flight can never double-enter.
#[derive(Debug)]
pub struct PositionLifecycle {
    pair: String,
    strategy: String,
    order_type: OrderType,
    stake_amount: f64,
    state: TradeState,
    position: Option<Position>,
    pending_exit: Option<SellReason>,
}

impl PositionLifecycle {
    /// Creates a lifecycle in the flat state.
    ///
    /// ### Arguments
    /// * `pair` - Instrument this lifecycle trades.
    /// * `strategy` - Name of the strategy driving it.
    /// * `order_type` - Execution style for both legs.
    /// * `stake_amount` - Quote value committed per entry; quantity is sized
    ///   as `stake_amount / price`. Must be positive.
    pub fn new(pair: &str, strategy: &str, order_type: OrderType, stake_amount: f64) -> Result<Self> {
        if !stake_amount.is_finite() || stake_amount <= 0.0 {
            return Err(Error::NegZeroStake(stake_amount));
        }
        Ok(Self {
            pair: pair.to_owned(),
            strategy: strategy.to_owned(),
            order_type,
            stake_amount,
            state: TradeState::Flat,
            position: None,
            pending_exit: None,
        })
    }

    /// Returns the current state.
    pub fn state(&self) -> TradeState {
        self.state
    }

    /// Returns the instrument.
    pub fn pair(&self) -> &str {
        &self.pair
    }

    /// Returns the position slot, whatever the state.
    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Returns the position only when it is open (entry fill applied).
    pub fn open_position(&self) -> Option<&Position> {
        match self.state {
            TradeState::Open => self.position.as_ref(),
            _ => None,
        }
    }

    /// True when the exit evaluator should run.
    pub fn is_open(&self) -> bool {
        self.state == TradeState::Open
    }

    /// Requests an entry in response to a BUY signal.
    ///
    /// Ignored unless the state is `Flat`. On a synchronous fill the position
    /// opens immediately; on a pending ack the state parks in `Entering` until
    /// [`confirm_fill`](Self::confirm_fill). A gateway error is terminal.
    ///
    /// ### Arguments
    /// * `price` - The price the signal was computed at; sizes the order.
    /// * `now` - Signal time; becomes the position's start time.
    /// * `gateway` - Order placement collaborator.
    pub fn request_entry(
        &mut self,
        price: f64,
        now: DateTime<Utc>,
        gateway: &mut dyn OrderGateway,
    ) -> Result<()> {
        if self.state != TradeState::Flat {
            debug!(
                "{}/{}: BUY ignored in state {}",
                self.strategy, self.pair, self.state
            );
            return Ok(());
        }

        let quantity = self.stake_amount / price;
        let request = OrderRequest::new(&self.pair, OrderSide::Buy, quantity, self.order_type, price);
        // The position exists from the moment the order leaves, so a fill
        // confirmation always has a slot to land in.
        let mut position = Position::new(
            &self.pair,
            &self.strategy,
            self.order_type,
            now,
            price,
            quantity,
            0.0,
        );

        match gateway.place_order(&request) {
            Ok(OrderAck::Filled(fill)) => {
                position.apply_entry_fill(fill.price, fill.quantity, fill.fee);
                self.position = Some(position);
                self.state = TradeState::Open;
                info!(
                    "{}/{}: entered at {} (qty {})",
                    self.strategy, self.pair, fill.price, fill.quantity
                );
                Ok(())
            }
            Ok(OrderAck::Pending) => {
                self.position = Some(position);
                self.state = TradeState::Entering;
                Ok(())
            }
            Err(err) => {
                self.state = TradeState::Error;
                error!(
                    "{}/{}: entry order failed, lifecycle halted: {err}",
                    self.strategy, self.pair
                );
                Err(err)
            }
        }
    }

    /// Requests an exit for the open position.
    ///
    /// Ignored unless the state is `Open`. On a synchronous fill the closed
    /// trade is returned immediately; on a pending ack the state parks in
    /// `Exiting` and the trade is produced by
    /// [`confirm_fill`](Self::confirm_fill). A gateway error is terminal.
    ///
    /// ### Arguments
    /// * `reason` - Why the position is closing (ROI, stoploss or signal).
    /// * `price` - The exit reference price handed to the gateway.
    /// * `now` - Exit time; becomes the trade's end time on synchronous fills.
    /// * `gateway` - Order placement collaborator.
    ///
    /// ### Returns
    /// The closed trade when the exit filled synchronously.
    pub fn request_exit(
        &mut self,
        reason: SellReason,
        price: f64,
        now: DateTime<Utc>,
        gateway: &mut dyn OrderGateway,
    ) -> Result<Option<ClosedTrade>> {
        if self.state != TradeState::Open {
            debug!(
                "{}/{}: SELL ({reason}) ignored in state {}",
                self.strategy, self.pair, self.state
            );
            return Ok(None);
        }
        let Some(position) = self.position.as_ref() else {
            return Ok(None);
        };

        let request = OrderRequest::new(
            &self.pair,
            OrderSide::Sell,
            position.quantity(),
            self.order_type,
            price,
        );
        self.pending_exit = Some(reason);

        match gateway.place_order(&request) {
            Ok(OrderAck::Filled(fill)) => Ok(Some(self.finalize(&fill, now))),
            Ok(OrderAck::Pending) => {
                self.state = TradeState::Exiting;
                Ok(None)
            }
            Err(err) => {
                self.state = TradeState::Error;
                error!(
                    "{}/{}: exit order failed, lifecycle halted: {err}",
                    self.strategy, self.pair
                );
                Err(err)
            }
        }
    }

    /// Applies an asynchronous fill confirmation.
    ///
    /// Drives `Entering → Open` and `Exiting → Flat`. All position fields are
    /// updated before this method returns, so a confirmation interleaving with
    /// tick handling never observes a half-updated position.
    ///
    /// ### Arguments
    /// * `fill` - The confirmed execution.
    /// * `now` - Confirmation time; becomes the trade's end time on exits.
    ///
    /// ### Returns
    /// The closed trade when this confirmation completed an exit.
    pub fn confirm_fill(&mut self, fill: &Fill, now: DateTime<Utc>) -> Result<Option<ClosedTrade>> {
        match self.state {
            TradeState::Entering => {
                if let Some(position) = self.position.as_mut() {
                    position.apply_entry_fill(fill.price, fill.quantity, fill.fee);
                }
                self.state = TradeState::Open;
                info!(
                    "{}/{}: entry fill confirmed at {}",
                    self.strategy, self.pair, fill.price
                );
                Ok(None)
            }
            TradeState::Exiting => Ok(Some(self.finalize(fill, now))),
            state => Err(Error::UnexpectedFill(state.as_str())),
        }
    }

    /// Halts the lifecycle, e.g. when a backtest task is aborted with a
    /// position still open. Terminal like any other entry into `Error`.
    pub fn halt(&mut self) {
        if self.state != TradeState::Error {
            error!("{}/{}: lifecycle halted by operator", self.strategy, self.pair);
            self.state = TradeState::Error;
        }
    }

    /// Clears the terminal error state after external reconciliation. The
    /// position slot empties and the lifecycle returns to `Flat`.
    pub fn acknowledge_error(&mut self) {
        if self.state == TradeState::Error {
            self.position = None;
            self.pending_exit = None;
            self.state = TradeState::Flat;
            info!("{}/{}: error acknowledged, back to FLAT", self.strategy, self.pair);
        }
    }

    // The Exiting/Open → Flat edge: snapshot the trade, clear the slot.
    fn finalize(&mut self, fill: &Fill, now: DateTime<Utc>) -> ClosedTrade {
        let reason = self.pending_exit.take().unwrap_or(SellReason::SellSignal);
        let trade = match self.position.take() {
            Some(position) => position.close(fill.price, now, fill.fee, reason),
            // Unreachable by construction: Open/Exiting always hold a position.
            None => Position::new(&self.pair, &self.strategy, self.order_type, now, fill.price, 0.0, 0.0)
                .close(fill.price, now, fill.fee, reason),
        };
        self.state = TradeState::Flat;
        info!(
            "{}/{}: closed at {} ({}), income {:.6}",
            self.strategy,
            self.pair,
            trade.end_price(),
            trade.sell_reason(),
            trade.income()
        );
        trade
    }
}
