//! # Tickbot: tick-to-bar trading engine
//!
//! **Tickbot** turns a raw stream of trade ticks into closed OHLCV bars, feeds each
//! closed bar to a pluggable strategy, and manages the resulting position through a
//! strict lifecycle with ROI-ladder and stoploss exits. Every completed round trip is
//! folded into incrementally-updated performance statistics.
//!
//! The same engine runs unmodified in two modes:
//! - **live**: a push feed of real-time ticks plus asynchronous order-fill
//!   confirmations drives a single [`LiveRunner`](crate::live::LiveRunner);
//! - **backtest**: stored tick series are replayed deterministically, one isolated
//!   task per (strategy, instrument) pair, on a bounded worker pool.
//!
//! ## Core Components
//! | Component       | Description                                                                    |
//! |-----------------|--------------------------------------------------------------------------------|
//! | **`Tick`**      | A single trade: id, price, quantity, epoch-millisecond timestamp.              |
//! | **`BarAggregator`** | Folds ticks into closed bars under a count/volume/notional/interval rule.  |
//! | **`ExitPolicy`** | Pure ROI-ladder + stoploss evaluator, invoked on every tick while a position is open. |
//! | **`PositionLifecycle`** | FLAT → ENTERING → OPEN → EXITING state machine producing one `ClosedTrade` per round trip. |
//! | **`StatsAggregator`** | O(1) online per-pair and per-strategy performance summaries.              |
//! | **`LiveRunner` / `BacktestRunner`** | Orchestration for the two modes.                             |
//!
//! Data flows one direction only: ticks → bars → strategy signal → lifecycle
//! transition → closed trade → statistics.
//!
//! ## Getting Started
//! ```rust
//! use std::sync::Arc;
//!
//! use tickbot::prelude::*;
//!
//! fn main() -> Result<()> {
//!     // Close a bar every 3 ticks; take profit at +2% within the first five
//!     // minutes of a position, cut losses at -2%.
//!     let ladder = RoiLadder::new([(5.0, 0.02)])?;
//!     let exit = ExitPolicy::new(ladder, -0.02)?;
//!     let strategy = Momentum::new(2, 0.001, BarRule::Ticks(3), exit)?;
//!
//!     let ticks = (0..60)
//!         .map(|i| Tick::new(i, 100.0 + i as f64, 1.0, 60_000 * i as i64))
//!         .collect::<Result<Vec<_>>>()?;
//!
//!     let stats = Arc::new(StatsAggregator::new());
//!     let runner = BacktestRunner::new(10.0, SimGateway::DEFAULT_FEE_RATE, Arc::clone(&stats))?;
//!     let task = BacktestTask::new("BTCUSDT", Box::new(strategy), Arc::from(ticks));
//!     let reports = runner.run(vec![task])?;
//!
//!     assert_eq!(reports.len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! ## External collaborators
//! Exchange connectivity, storage and the strategy itself stay behind narrow seams:
//!
//! | Seam            | Contract                                                                        |
//! |-----------------|---------------------------------------------------------------------------------|
//! | **`TickFeed`**  | Ordered sequence of ticks; unbounded (live) or finite and restartable (backtest). |
//! | **`OrderGateway`** | Places orders; fills either immediately or through a later confirmation.     |
//! | **`Strategy`**  | Computes a BUY/SELL signal per closed bar; carries its own exit policy and bar rule. |
//! | **`TradeStore`** | Persists closed trades and upserts running stats; schema is its concern.       |
//!
//! ## Error Handling
//! Configuration mistakes (empty ROI ladder, non-monotonic thresholds, positive
//! stoploss) fail fast at construction. Malformed ticks are dropped by the runners
//! and never crash the stream. Gateway failures halt the affected lifecycle in a
//! terminal error state awaiting operator reconciliation — a partial fill may
//! already exist, so nothing is retried silently.
//!
//! ## License
//! MIT
#![warn(missing_docs)]

/// Core engine components: ticks, bars, the exit evaluator and the position lifecycle.
pub mod engine;

/// Error types for the library.
pub mod errors;

/// Utility functions and helpers.
pub mod utils;

/// External collaborator seams: tick feeds and order gateways.
pub mod gateway;

/// The strategy capability interface and the bundled strategies.
pub mod strategy;

/// Incremental per-pair and per-strategy performance statistics.
pub mod stats;

/// Live runner: push-driven, single logical stream.
pub mod live;

/// Backtest runner: deterministic replay over a worker pool.
pub mod backtest;

/// Re-exports of commonly used types and traits for convenience.
pub mod prelude {
    pub use super::*;
    pub use crate::backtest::*;
    pub use crate::engine::*;
    pub use crate::errors::*;
    pub use crate::gateway::*;
    pub use crate::live::*;
    pub use crate::stats::*;
    pub use crate::strategy::*;
}

use std::ops::{Add, Div, Mul, Sub};

/// Trait for return-ratio calculations.
///
/// This trait provides the two ratio operations the engine leans on: projecting a
/// price from an entry price and a required return, and measuring the realized
/// return of a price against an entry price.
pub trait RatioCalculus<Rhs = Self> {
    /// Applies a return ratio to the value.
    ///
    /// ### Arguments
    /// * `ratio` - The return to apply (e.g., 0.02 for +2%, -0.02 for -2%).
    ///
    /// ### Returns
    /// The value scaled by `1 + ratio`.
    fn with_return(self, ratio: Rhs) -> Self;

    /// Measures the return of the value against an entry value.
    ///
    /// ### Arguments
    /// * `entry` - The entry value to measure from.
    ///
    /// ### Returns
    /// The realized return ratio, e.g. 0.03 for a 3% gain.
    fn return_against(self, entry: Self) -> Self;
}

impl RatioCalculus for f64 {
    fn with_return(self, ratio: Self) -> Self {
        self.mul(ratio.add(1.0))
    }

    fn return_against(self, entry: Self) -> Self {
        self.sub(entry).div(entry)
    }
}
