//! Backtest runner: deterministic replay of stored tick series over a worker
//! pool.
//!
//! Each (strategy, pair) task owns fresh instances of the aggregator, exit
//! evaluator and lifecycle — no state is shared between tasks except the
//! [`StatsAggregator`], whose per-key locking serializes same-key updates.
//! Replaying the same series twice produces identical bars and trades.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::info;
use rayon::prelude::*;

use crate::engine::{
    BarAggregator, ClosedTrade, PositionLifecycle, Position, SellReason, Tick, TradeState,
};
use crate::errors::{Error, Result};
use crate::gateway::SimGateway;
use crate::stats::StatsAggregator;
use crate::strategy::{Signal, Strategy};
use crate::utils::minutes_between;

/// One unit of backtest work: a strategy replayed over one instrument's ticks.
pub struct BacktestTask {
    pair: String,
    strategy: Box<dyn Strategy>,
    ticks: Arc<[Tick]>,
}

impl BacktestTask {
    /// Creates a task.
    ///
    /// ### Arguments
    /// * `pair` - Instrument name, used for reporting and statistics.
    /// * `strategy` - Fresh strategy instance; tasks never share one.
    /// * `ticks` - The stored series; shared immutably between tasks.
    pub fn new(pair: impl Into<String>, strategy: Box<dyn Strategy>, ticks: Arc<[Tick]>) -> Self {
        Self {
            pair: pair.into(),
            strategy,
            ticks,
        }
    }
}

/// Outcome of one backtest task. Failures stay inside the report so one
/// task's error never affects its siblings.
#[derive(Debug)]
pub struct TaskReport {
    /// Instrument the task replayed.
    pub pair: String,
    /// Strategy name.
    pub strategy: String,
    /// Closed trades in replay order.
    pub trades: Vec<ClosedTrade>,
    /// Lifecycle state after the replay.
    pub final_state: TradeState,
    /// Position left open at the end of the series, if any.
    pub open_position: Option<Position>,
    /// True when the task stopped on the abort handle.
    pub aborted: bool,
    /// The error that stopped the task early, if any.
    pub error: Option<Error>,
}

/// Cooperative cancellation for a running backtest.
///
/// Tasks poll the handle between ticks, so an abort lands between lifecycle
/// transitions, never inside one. A task aborted with a position still open
/// halts its lifecycle instead of dropping the position silently.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    /// Requests all tasks to stop.
    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True once an abort was requested.
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Replays (strategy, instrument) tasks concurrently.
pub struct BacktestRunner {
    stake_amount: f64,
    fee_rate: f64,
    stats: Arc<StatsAggregator>,
    abort: AbortHandle,
}

impl BacktestRunner {
    /// Creates a runner.
    ///
    /// ### Arguments
    /// * `stake_amount` - Quote value committed per entry; positive.
    /// * `fee_rate` - Commission per leg for the simulated fills.
    /// * `stats` - Shared statistics aggregator, usually `Arc::new(..)` fresh.
    pub fn new(stake_amount: f64, fee_rate: f64, stats: Arc<StatsAggregator>) -> Result<Self> {
        if !stake_amount.is_finite() || stake_amount <= 0.0 {
            return Err(Error::NegZeroStake(stake_amount));
        }
        // fail fast: every task builds its gateway from this rate
        SimGateway::new(fee_rate)?;
        Ok(Self {
            stake_amount,
            fee_rate,
            stats,
            abort: AbortHandle::default(),
        })
    }

    /// Returns the shared statistics aggregator.
    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    /// Returns a handle that cancels the running tasks.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Runs all tasks on a worker pool sized to the machine.
    ///
    /// ### Arguments
    /// * `tasks` - The (strategy, pair) tasks; each runs isolated.
    ///
    /// ### Returns
    /// One report per task, in task order.
    pub fn run(&self, tasks: Vec<BacktestTask>) -> Result<Vec<TaskReport>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_cpus::get())
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;

        let reports =
            pool.install(|| tasks.into_par_iter().map(|task| self.run_task(task)).collect());
        Ok(reports)
    }

    fn run_task(&self, task: BacktestTask) -> TaskReport {
        let BacktestTask {
            pair,
            mut strategy,
            ticks,
        } = task;

        let mut report = TaskReport {
            pair: pair.clone(),
            strategy: strategy.name().to_owned(),
            trades: Vec::new(),
            final_state: TradeState::Flat,
            open_position: None,
            aborted: false,
            error: None,
        };

        let components = BarAggregator::new(strategy.bar_rule()).and_then(|aggregator| {
            let lifecycle = PositionLifecycle::new(
                &pair,
                strategy.name(),
                strategy.order_type(),
                self.stake_amount,
            )?;
            let gateway = SimGateway::new(self.fee_rate)?;
            Ok((aggregator, lifecycle, gateway))
        });
        let (mut aggregator, mut lifecycle, mut gateway) = match components {
            Ok(components) => components,
            Err(err) => {
                report.error = Some(err);
                return report;
            }
        };

        for tick in ticks.iter() {
            // Cancellation lands between ticks only: a transition in progress
            // always completes before the poll.
            if self.abort.is_aborted() {
                report.aborted = true;
                if lifecycle.state() != TradeState::Flat {
                    lifecycle.halt();
                }
                break;
            }

            // Tick-level exit path. Backtest exits fill at the computed
            // target/stop price, not the observed close.
            let verdict = lifecycle.open_position().and_then(|position| {
                let policy = strategy.exit_policy();
                policy
                    .evaluate(position, tick.price(), tick.time())
                    .map(|reason| {
                        let elapsed = minutes_between(position.start_time(), tick.time());
                        let fill_price = match reason {
                            SellReason::Roi => policy.roi_target(position.start_price(), elapsed),
                            SellReason::Stoploss => policy.stop_price(position.start_price()),
                            SellReason::SellSignal => tick.price(),
                        };
                        (reason, fill_price)
                    })
            });
            if let Some((reason, fill_price)) = verdict {
                match lifecycle.request_exit(reason, fill_price, tick.time(), &mut gateway) {
                    Ok(Some(trade)) => {
                        if let Err(err) = self.commit(&trade, &mut report) {
                            report.error = Some(err);
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        report.error = Some(err);
                        break;
                    }
                }
            }

            let Some(bar) = aggregator.accumulate(tick) else {
                continue;
            };
            let outcome = match strategy.compute_signal(&bar) {
                Some(Signal::Buy) => lifecycle
                    .request_entry(bar.close(), bar.close_time(), &mut gateway)
                    .map(|_| None),
                Some(Signal::Sell) => lifecycle.request_exit(
                    SellReason::SellSignal,
                    bar.close(),
                    bar.close_time(),
                    &mut gateway,
                ),
                None => Ok(None),
            };
            match outcome {
                Ok(Some(trade)) => {
                    if let Err(err) = self.commit(&trade, &mut report) {
                        report.error = Some(err);
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    report.error = Some(err);
                    break;
                }
            }
        }

        report.final_state = lifecycle.state();
        report.open_position = lifecycle.position().cloned();
        info!(
            "{}/{}: replay done, {} trade(s), final state {}",
            report.strategy,
            report.pair,
            report.trades.len(),
            report.final_state
        );
        report
    }

    fn commit(&self, trade: &ClosedTrade, report: &mut TaskReport) -> Result<()> {
        self.stats.record(trade)?;
        report.trades.push(trade.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Bar, BarRule, ExitPolicy, RoiLadder};

    // Buys on the first closed bar, then stays silent: exits come from the
    // exit evaluator only.
    struct BuyOnce {
        bought: bool,
        exit: ExitPolicy,
    }

    impl BuyOnce {
        fn boxed() -> Box<dyn Strategy> {
            let exit = ExitPolicy::new(RoiLadder::new([(5.0, 0.02)]).unwrap(), -0.02).unwrap();
            Box::new(Self {
                bought: false,
                exit,
            })
        }
    }

    impl Strategy for BuyOnce {
        fn name(&self) -> &str {
            "buy_once"
        }

        fn bar_rule(&self) -> BarRule {
            BarRule::Ticks(2)
        }

        fn exit_policy(&self) -> &ExitPolicy {
            &self.exit
        }

        fn compute_signal(&mut self, _bar: &Bar) -> Option<Signal> {
            if self.bought {
                None
            } else {
                self.bought = true;
                Some(Signal::Buy)
            }
        }
    }

    fn ticks(prices: &[f64]) -> Arc<[Tick]> {
        prices
            .iter()
            .enumerate()
            .map(|(i, price)| Tick::new(i as u64, *price, 1.0, 60_000 * i as i64).unwrap())
            .collect::<Vec<_>>()
            .into()
    }

    fn runner() -> BacktestRunner {
        BacktestRunner::new(100.0, 0.0, Arc::new(StatsAggregator::new())).unwrap()
    }

    #[test]
    fn roi_exit_fills_at_target_price() {
        let runner = runner();
        // entry at 100 after the first bar, then a spike through the target
        let series = ticks(&[100.0, 100.0, 104.0]);
        let reports = runner
            .run(vec![BacktestTask::new("BTCUSDT", BuyOnce::boxed(), series)])
            .unwrap();

        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert!(report.error.is_none());
        assert_eq!(report.trades.len(), 1);
        let trade = &report.trades[0];
        assert_eq!(trade.sell_reason(), SellReason::Roi);
        // filled at the 2% target, not at the 104.0 print
        assert_eq!(trade.end_price(), 102.0);
        assert_eq!(report.final_state, TradeState::Flat);
    }

    #[test]
    fn stoploss_exit_fills_at_stop_price() {
        let runner = runner();
        let series = ticks(&[100.0, 100.0, 95.0]);
        let reports = runner
            .run(vec![BacktestTask::new("BTCUSDT", BuyOnce::boxed(), series)])
            .unwrap();

        let trade = &reports[0].trades[0];
        assert_eq!(trade.sell_reason(), SellReason::Stoploss);
        assert_eq!(trade.end_price(), 98.0);
    }

    #[test]
    fn open_position_at_end_of_series_is_reported() {
        let runner = runner();
        let series = ticks(&[100.0, 100.0, 100.5]);
        let reports = runner
            .run(vec![BacktestTask::new("BTCUSDT", BuyOnce::boxed(), series)])
            .unwrap();

        let report = &reports[0];
        assert!(report.trades.is_empty());
        assert_eq!(report.final_state, TradeState::Open);
        assert_eq!(
            report.open_position.as_ref().map(|p| p.start_price()),
            Some(100.0)
        );
    }

    #[test]
    fn parallel_tasks_fill_shared_stats() {
        let runner = runner();
        let winning = ticks(&[100.0, 100.0, 104.0]);
        let tasks = vec![
            BacktestTask::new("BTCUSDT", BuyOnce::boxed(), Arc::clone(&winning)),
            BacktestTask::new("ETHUSDT", BuyOnce::boxed(), Arc::clone(&winning)),
            BacktestTask::new("SOLUSDT", BuyOnce::boxed(), winning),
        ];
        let reports = runner.run(tasks).unwrap();

        assert_eq!(reports.len(), 3);
        for report in &reports {
            assert_eq!(report.trades.len(), 1);
        }
        // per-pair stats stay isolated, the strategy key aggregates all three
        for pair in ["BTCUSDT", "ETHUSDT", "SOLUSDT"] {
            let stat = runner.stats().pair_stat(pair).unwrap();
            assert_eq!(stat.total(), 1);
            assert_eq!(stat.num_wins(), 1);
        }
        let strategy_stat = runner.stats().strategy_stat("buy_once").unwrap();
        assert_eq!(strategy_stat.total(), 3);
    }

    #[test]
    fn same_key_tasks_match_sequential_totals() {
        let series = ticks(&[100.0, 100.0, 104.0]);

        let parallel = runner();
        let tasks: Vec<_> = (0..6)
            .map(|_| BacktestTask::new("BTCUSDT", BuyOnce::boxed(), Arc::clone(&series)))
            .collect();
        parallel.run(tasks).unwrap();

        let sequential = runner();
        for _ in 0..6 {
            sequential
                .run(vec![BacktestTask::new(
                    "BTCUSDT",
                    BuyOnce::boxed(),
                    Arc::clone(&series),
                )])
                .unwrap();
        }

        let lhs = parallel.stats().pair_stat("BTCUSDT").unwrap();
        let rhs = sequential.stats().pair_stat("BTCUSDT").unwrap();
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn replay_is_reproducible() {
        let series = ticks(&[100.0, 100.0, 101.0, 104.0, 100.0, 100.0, 95.0]);
        let run_once = || {
            let runner = runner();
            let reports = runner
                .run(vec![BacktestTask::new(
                    "BTCUSDT",
                    BuyOnce::boxed(),
                    Arc::clone(&series),
                )])
                .unwrap();
            reports
                .into_iter()
                .flat_map(|r| r.trades)
                .collect::<Vec<_>>()
        };

        assert_eq!(run_once(), run_once());
    }

    #[test]
    fn abort_with_open_position_halts_the_lifecycle() {
        let runner = runner();
        // never hits ROI or stoploss: the position stays open forever
        let series = ticks(&[100.0; 64]);

        runner.abort_handle().abort();
        let reports = runner
            .run(vec![BacktestTask::new("BTCUSDT", BuyOnce::boxed(), series)])
            .unwrap();

        // aborted before the first tick: nothing opened, nothing dropped
        let report = &reports[0];
        assert!(report.aborted);
        assert_eq!(report.final_state, TradeState::Flat);
    }

    #[test]
    fn mid_run_abort_marks_error_not_silence() {
        struct AbortingStrategy {
            inner: BuyOnce,
            handle: AbortHandle,
        }

        impl Strategy for AbortingStrategy {
            fn name(&self) -> &str {
                self.inner.name()
            }

            fn bar_rule(&self) -> BarRule {
                self.inner.bar_rule()
            }

            fn exit_policy(&self) -> &ExitPolicy {
                self.inner.exit_policy()
            }

            fn compute_signal(&mut self, bar: &Bar) -> Option<Signal> {
                let signal = self.inner.compute_signal(bar);
                if signal.is_some() {
                    // abort lands right after the entry transition completes
                    self.handle.abort();
                }
                signal
            }
        }

        let runner = runner();
        let exit = ExitPolicy::new(RoiLadder::new([(5.0, 0.02)]).unwrap(), -0.02).unwrap();
        let strategy = Box::new(AbortingStrategy {
            inner: BuyOnce {
                bought: false,
                exit,
            },
            handle: runner.abort_handle(),
        });
        let series = ticks(&[100.0, 100.0, 100.5, 100.4]);
        let reports = runner
            .run(vec![BacktestTask::new("BTCUSDT", strategy, series)])
            .unwrap();

        let report = &reports[0];
        assert!(report.aborted);
        assert_eq!(report.final_state, TradeState::Error);
        assert!(report.open_position.is_some());
    }

    #[test]
    fn commission_is_charged_on_both_legs() {
        let stats = Arc::new(StatsAggregator::new());
        let runner = BacktestRunner::new(100.0, 0.001, stats).unwrap();
        let series = ticks(&[100.0, 100.0, 104.0]);
        let reports = runner
            .run(vec![BacktestTask::new("BTCUSDT", BuyOnce::boxed(), series)])
            .unwrap();

        let trade = &reports[0].trades[0];
        // entry leg: 100 * 1.0 * 0.001, exit leg: 102 * 1.0 * 0.001
        assert!((trade.fee() - 0.202).abs() < 1e-9);
    }
}
