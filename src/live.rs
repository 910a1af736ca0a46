//! Live runner: a single logical stream of ticks plus asynchronous fill
//! confirmations.
//!
//! Each tick drives, in order: the exit evaluator (tick granularity, only
//! while a position is open), then the bar aggregator, then — if a bar closed
//! — the strategy signal (bar granularity). The tick-level ROI/stoploss check
//! therefore always wins over a SELL signal that would fire in the same
//! processing step.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::engine::{BarAggregator, ClosedTrade, PositionLifecycle, SellReason, Tick, TradeState};
use crate::errors::Result;
use crate::gateway::{Fill, OrderGateway, TickFeed};
use crate::stats::{StatKey, StatsAggregator, TradeStore};
use crate::strategy::{Signal, Strategy};

/// Orchestrates one (strategy, pair) over a live push feed.
pub struct LiveRunner<S, G, T>
where
    S: Strategy,
    G: OrderGateway,
    T: TradeStore,
{
    strategy: S,
    gateway: G,
    store: T,
    aggregator: BarAggregator,
    lifecycle: PositionLifecycle,
    stats: Arc<StatsAggregator>,
}

impl<S, G, T> LiveRunner<S, G, T>
where
    S: Strategy,
    G: OrderGateway,
    T: TradeStore,
{
    /// Wires a runner from a strategy and its collaborators.
    ///
    /// ### Arguments
    /// * `pair` - Instrument to trade.
    /// * `stake_amount` - Quote value committed per entry.
    /// * `strategy` - Signal source; also supplies the bar rule, exit policy
    ///   and order type.
    /// * `gateway` - Order placement collaborator.
    /// * `store` - Durable sink for trades and stat snapshots.
    /// * `stats` - Shared statistics aggregator.
    pub fn new(
        pair: &str,
        stake_amount: f64,
        strategy: S,
        gateway: G,
        store: T,
        stats: Arc<StatsAggregator>,
    ) -> Result<Self> {
        let aggregator = BarAggregator::new(strategy.bar_rule())?;
        let lifecycle =
            PositionLifecycle::new(pair, strategy.name(), strategy.order_type(), stake_amount)?;
        info!("{}/{pair}: live runner ready", strategy.name());
        Ok(Self {
            strategy,
            gateway,
            store,
            aggregator,
            lifecycle,
            stats,
        })
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> TradeState {
        self.lifecycle.state()
    }

    /// Returns the shared statistics aggregator.
    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    /// Processes one tick in arrival order.
    ///
    /// Runs the tick-level exit check first, then folds the tick into the
    /// working bar and, on bar close, routes the strategy signal through the
    /// lifecycle.
    pub fn on_tick(&mut self, tick: &Tick) -> Result<()> {
        let verdict = self
            .lifecycle
            .open_position()
            .and_then(|position| {
                self.strategy
                    .exit_policy()
                    .evaluate(position, tick.price(), tick.time())
            });
        if let Some(reason) = verdict {
            let trade =
                self.lifecycle
                    .request_exit(reason, tick.price(), tick.time(), &mut self.gateway)?;
            if let Some(trade) = trade {
                self.commit(&trade)?;
            }
        }

        if let Some(bar) = self.aggregator.accumulate(tick) {
            match self.strategy.compute_signal(&bar) {
                Some(Signal::Buy) => {
                    self.lifecycle
                        .request_entry(bar.close(), bar.close_time(), &mut self.gateway)?;
                }
                Some(Signal::Sell) => {
                    let trade = self.lifecycle.request_exit(
                        SellReason::SellSignal,
                        bar.close(),
                        bar.close_time(),
                        &mut self.gateway,
                    )?;
                    if let Some(trade) = trade {
                        self.commit(&trade)?;
                    }
                }
                None => {}
            }
        }

        Ok(())
    }

    /// Applies an asynchronous fill confirmation from the gateway.
    ///
    /// May interleave with tick handling for the same pair at any point; the
    /// lifecycle applies the position update atomically before returning.
    pub fn on_fill_confirmed(&mut self, fill: &Fill, now: DateTime<Utc>) -> Result<()> {
        if let Some(trade) = self.lifecycle.confirm_fill(fill, now)? {
            self.commit(&trade)?;
        }
        Ok(())
    }

    /// Pulls the feed to exhaustion.
    ///
    /// Malformed records are logged and dropped; the stream never dies on one.
    /// Gateway failures propagate after halting the lifecycle.
    pub fn run(&mut self, feed: &mut dyn TickFeed) -> Result<()> {
        loop {
            match feed.next_tick() {
                Ok(Some(tick)) => self.on_tick(&tick)?,
                Ok(None) => break,
                Err(err) => {
                    warn!("{}: dropping malformed tick: {err}", self.lifecycle.pair());
                    continue;
                }
            }
        }
        Ok(())
    }

    // One closed trade: statistics first, then the durable store.
    fn commit(&mut self, trade: &ClosedTrade) -> Result<()> {
        let (pair_stat, strategy_stat) = self.stats.record(trade)?;
        self.store.persist(trade)?;
        self.store
            .upsert(&StatKey::Pair(trade.pair().to_owned()), &pair_stat)?;
        self.store
            .upsert(&StatKey::Strategy(trade.strategy().to_owned()), &strategy_stat)?;
        Ok(())
    }
}
