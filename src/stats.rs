//! Incremental per-pair and per-strategy performance statistics.
//!
//! Every closed trade updates two running summaries, keyed by the instrument
//! and by the strategy name, with O(1) online updates — the aggregator never
//! recomputes from trade history. Concurrent backtest tasks share a single
//! aggregator; updates to the same key are serialized by a per-key lock.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use crate::engine::ClosedTrade;
use crate::errors::{Error, Result};

/// Incrementally maintained performance summary for one key.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningStat {
    num_wins: u64,
    num_losses: u64,
    cumulative_profit: f64,
    cumulative_loss: f64,
    average_duration: f64,
}

impl RunningStat {
    /// Folds one trade outcome into the summary.
    ///
    /// ### Arguments
    /// * `income` - Absolute income of the trade; positive counts as a win.
    /// * `duration_minutes` - Holding time of the trade.
    pub fn record(&mut self, income: f64, duration_minutes: f64) {
        if income > 0.0 {
            self.num_wins += 1;
        } else {
            self.num_losses += 1;
        }
        self.cumulative_profit += income.max(0.0);
        self.cumulative_loss += (-income).max(0.0);
        let total = (self.num_wins + self.num_losses) as f64;
        self.average_duration = ((total - 1.0) * self.average_duration + duration_minutes) / total;
    }

    /// Returns the number of winning trades.
    pub fn num_wins(&self) -> u64 {
        self.num_wins
    }

    /// Returns the number of losing trades.
    pub fn num_losses(&self) -> u64 {
        self.num_losses
    }

    /// Returns the total number of trades.
    pub fn total(&self) -> u64 {
        self.num_wins + self.num_losses
    }

    /// Returns the sum of positive incomes.
    pub fn cumulative_profit(&self) -> f64 {
        self.cumulative_profit
    }

    /// Returns the sum of loss magnitudes.
    pub fn cumulative_loss(&self) -> f64 {
        self.cumulative_loss
    }

    /// Returns the average holding time in minutes.
    pub fn average_duration_minutes(&self) -> f64 {
        self.average_duration
    }

    /// Fraction of trades that won; 0.0 before the first trade.
    pub fn win_ratio(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.num_wins as f64 / self.total() as f64
    }

    /// Net result: cumulative profit minus cumulative loss.
    pub fn net(&self) -> f64 {
        self.cumulative_profit - self.cumulative_loss
    }

    /// Profit share of the traded magnitude; 0.0 before the first trade.
    pub fn profit_ratio(&self) -> f64 {
        let magnitude = self.cumulative_profit + self.cumulative_loss;
        if magnitude == 0.0 {
            return 0.0;
        }
        self.cumulative_profit / magnitude
    }
}

impl std::fmt::Display for RunningStat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} trades, win ratio {:.2}, net {:.6}, avg duration {:.2}m",
            self.total(),
            self.win_ratio(),
            self.net(),
            self.average_duration
        )
    }
}

/// Statistics key: an instrument or a strategy name.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatKey {
    /// Keyed by instrument.
    Pair(String),
    /// Keyed by strategy name.
    Strategy(String),
}

/// Durable sink for closed trades and stat snapshots.
///
/// Durability and schema are the store's concern, not the engine's.
pub trait TradeStore: Send {
    /// Persists one closed trade.
    fn persist(&mut self, trade: &ClosedTrade) -> Result<()>;

    /// Inserts or replaces the stat snapshot for a key.
    fn upsert(&mut self, key: &StatKey, stat: &RunningStat) -> Result<()>;
}

/// In-memory store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    trades: Vec<ClosedTrade>,
    stats: HashMap<StatKey, RunningStat>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the persisted trades in arrival order.
    pub fn trades(&self) -> &[ClosedTrade] {
        &self.trades
    }

    /// Returns the last upserted snapshot for a key.
    pub fn stat(&self, key: &StatKey) -> Option<&RunningStat> {
        self.stats.get(key)
    }
}

impl TradeStore for MemoryStore {
    fn persist(&mut self, trade: &ClosedTrade) -> Result<()> {
        self.trades.push(trade.clone());
        Ok(())
    }

    fn upsert(&mut self, key: &StatKey, stat: &RunningStat) -> Result<()> {
        self.stats.insert(key.clone(), stat.clone());
        Ok(())
    }
}

type StatMap = RwLock<HashMap<String, Mutex<RunningStat>>>;

/// Consumes closed trades and maintains the running summaries.
///
/// Shared across runners and backtest tasks behind an `Arc`. Two trades for
/// the same key can never race: each `RunningStat` sits behind its own lock,
/// taken for the duration of the read-modify-write.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    pairs: StatMap,
    strategies: StatMap,
}

impl StatsAggregator {
    /// Creates an aggregator with no keys.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one closed trade under both of its keys.
    ///
    /// ### Arguments
    /// * `trade` - The trade to fold in.
    ///
    /// ### Returns
    /// Snapshots of the updated (pair, strategy) stats, for upserting into a
    /// store.
    pub fn record(&self, trade: &ClosedTrade) -> Result<(RunningStat, RunningStat)> {
        let income = trade.income();
        let duration = trade.duration_minutes();
        let pair = Self::update(&self.pairs, trade.pair(), income, duration)?;
        let strategy = Self::update(&self.strategies, trade.strategy(), income, duration)?;
        Ok((pair, strategy))
    }

    fn update(map: &StatMap, key: &str, income: f64, duration: f64) -> Result<RunningStat> {
        {
            let shared = map.read().map_err(|e| Error::Mutex(e.to_string()))?;
            if let Some(slot) = shared.get(key) {
                let mut stat = slot.lock().map_err(|e| Error::Mutex(e.to_string()))?;
                stat.record(income, duration);
                return Ok(stat.clone());
            }
        }

        // First trade for this key: create the slot under the write lock.
        let mut exclusive = map.write().map_err(|e| Error::Mutex(e.to_string()))?;
        let slot = exclusive.entry(key.to_owned()).or_default();
        let mut stat = slot.lock().map_err(|e| Error::Mutex(e.to_string()))?;
        stat.record(income, duration);
        Ok(stat.clone())
    }

    fn snapshot(map: &StatMap, key: &str) -> Option<RunningStat> {
        let shared = map.read().ok()?;
        let slot = shared.get(key)?;
        slot.lock().ok().map(|stat| stat.clone())
    }

    /// Returns a snapshot of the stat for an instrument.
    pub fn pair_stat(&self, pair: &str) -> Option<RunningStat> {
        Self::snapshot(&self.pairs, pair)
    }

    /// Returns a snapshot of the stat for a strategy.
    pub fn strategy_stat(&self, strategy: &str) -> Option<RunningStat> {
        Self::snapshot(&self.strategies, strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{OrderType, Position, SellReason};
    use chrono::DateTime;
    use std::sync::Arc;

    // A trade with the given income (fee 0, quantity 1) and duration.
    fn trade(pair: &str, strategy: &str, income: f64, duration_minutes: i64) -> ClosedTrade {
        let position = Position::new(
            pair,
            strategy,
            OrderType::Market,
            DateTime::from_timestamp_millis(0).unwrap(),
            100.0,
            1.0,
            0.0,
        );
        position.close(
            100.0 + income,
            DateTime::from_timestamp_millis(duration_minutes * 60_000).unwrap(),
            0.0,
            SellReason::SellSignal,
        )
    }

    #[test]
    fn incremental_update_matches_expected_totals() {
        let stats = StatsAggregator::new();
        for income in [10.0, -4.0, 6.0] {
            stats.record(&trade("BTCUSDT", "test", income, 2)).unwrap();
        }

        let stat = stats.pair_stat("BTCUSDT").unwrap();
        assert_eq!(stat.num_wins(), 2);
        assert_eq!(stat.num_losses(), 1);
        assert_eq!(stat.cumulative_profit(), 16.0);
        assert_eq!(stat.cumulative_loss(), 4.0);
        assert_eq!(stat.net(), 12.0);
        assert_eq!(stat.win_ratio(), 2.0 / 3.0);
        assert_eq!(stat.profit_ratio(), 0.8);
    }

    #[test]
    fn totals_are_order_independent() {
        let forward = StatsAggregator::new();
        let backward = StatsAggregator::new();
        let incomes = [10.0, -4.0, 6.0];

        for income in incomes {
            forward.record(&trade("BTCUSDT", "test", income, 3)).unwrap();
        }
        for income in incomes.iter().rev() {
            backward.record(&trade("BTCUSDT", "test", *income, 3)).unwrap();
        }

        assert_eq!(
            forward.pair_stat("BTCUSDT").unwrap(),
            backward.pair_stat("BTCUSDT").unwrap()
        );
    }

    #[test]
    fn average_duration_is_online() {
        let stats = StatsAggregator::new();
        stats.record(&trade("BTCUSDT", "test", 1.0, 2)).unwrap();
        stats.record(&trade("BTCUSDT", "test", 1.0, 4)).unwrap();
        stats.record(&trade("BTCUSDT", "test", 1.0, 9)).unwrap();

        let stat = stats.pair_stat("BTCUSDT").unwrap();
        assert_eq!(stat.average_duration_minutes(), 5.0);
    }

    #[test]
    fn both_keys_are_updated() {
        let stats = StatsAggregator::new();
        stats.record(&trade("BTCUSDT", "alpha", 5.0, 1)).unwrap();
        stats.record(&trade("ETHUSDT", "alpha", -2.0, 1)).unwrap();

        assert_eq!(stats.pair_stat("BTCUSDT").unwrap().total(), 1);
        assert_eq!(stats.pair_stat("ETHUSDT").unwrap().total(), 1);
        assert_eq!(stats.strategy_stat("alpha").unwrap().total(), 2);
        assert!(stats.pair_stat("SOLUSDT").is_none());
    }

    #[test]
    fn record_returns_updated_snapshots() {
        let stats = StatsAggregator::new();
        let (pair, strategy) = stats.record(&trade("BTCUSDT", "alpha", 5.0, 1)).unwrap();
        assert_eq!(pair.total(), 1);
        assert_eq!(strategy.total(), 1);
        assert_eq!(pair.net(), 5.0);
    }

    #[test]
    fn concurrent_same_key_updates_match_sequential_replay() {
        let stats = Arc::new(StatsAggregator::new());
        let per_thread = 50;
        let threads = 4;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for i in 0..per_thread {
                        let income = if (t + i) % 2 == 0 { 2.0 } else { -1.0 };
                        stats.record(&trade("BTCUSDT", "racy", income, 1)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let sequential = StatsAggregator::new();
        for t in 0..threads {
            for i in 0..per_thread {
                let income = if (t + i) % 2 == 0 { 2.0 } else { -1.0 };
                sequential.record(&trade("BTCUSDT", "racy", income, 1)).unwrap();
            }
        }

        let concurrent_stat = stats.pair_stat("BTCUSDT").unwrap();
        let sequential_stat = sequential.pair_stat("BTCUSDT").unwrap();
        assert_eq!(concurrent_stat.total(), sequential_stat.total());
        assert_eq!(concurrent_stat.num_wins(), sequential_stat.num_wins());
        assert_eq!(
            concurrent_stat.cumulative_profit(),
            sequential_stat.cumulative_profit()
        );
        assert_eq!(
            concurrent_stat.cumulative_loss(),
            sequential_stat.cumulative_loss()
        );
        assert_eq!(
            concurrent_stat.average_duration_minutes(),
            sequential_stat.average_duration_minutes()
        );
    }

    #[test]
    fn memory_store_round_trip() {
        let mut store = MemoryStore::new();
        let trade = trade("BTCUSDT", "alpha", 5.0, 1);
        store.persist(&trade).unwrap();

        let mut stat = RunningStat::default();
        stat.record(trade.income(), trade.duration_minutes());
        let key = StatKey::Pair("BTCUSDT".to_owned());
        store.upsert(&key, &stat).unwrap();
        store.upsert(&key, &stat).unwrap();

        assert_eq!(store.trades().len(), 1);
        assert_eq!(store.stat(&key), Some(&stat));
        assert!(store.stat(&StatKey::Strategy("alpha".to_owned())).is_none());
    }
}
