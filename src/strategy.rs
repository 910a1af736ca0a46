//! The strategy capability interface and the bundled strategies.
//!
//! A strategy observes closed bars only — raw ticks are invisible to it — and
//! answers with an optional BUY/SELL signal. Each strategy instance carries its
//! own exit policy (ROI ladder + stoploss), its own bar closing rule and its
//! preferred order type, so runners can wire a full pipeline from the strategy
//! alone.

use std::collections::VecDeque;

use crate::RatioCalculus;
use crate::engine::{Bar, BarRule, ExitPolicy, OrderType};
use crate::errors::{Error, Result};

/// A trading signal computed at bar close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Open a position.
    Buy,
    /// Close the open position.
    Sell,
}

/// Capability interface over strategy variants.
///
/// `compute_signal` is called exactly once per closed bar, with the most
/// recently closed bar. Inappropriate signals (a BUY while a position is open,
/// a SELL while flat) are ignored downstream by the lifecycle, so strategies
/// do not need to track position state.
pub trait Strategy: Send {
    /// Stable name used as the statistics key.
    fn name(&self) -> &str;

    /// The bar closing rule this strategy wants to observe.
    fn bar_rule(&self) -> BarRule;

    /// Execution style for orders this strategy triggers.
    fn order_type(&self) -> OrderType {
        OrderType::Market
    }

    /// The ROI-ladder/stoploss policy supplied at construction.
    fn exit_policy(&self) -> &ExitPolicy;

    /// Computes the signal for the most recently closed bar.
    fn compute_signal(&mut self, bar: &Bar) -> Option<Signal>;
}

/// Fast/slow moving-average crossover.
///
/// Emits BUY when the fast mean crosses above the slow mean and SELL when it
/// crosses back below. Silent until the slow window is full.
pub struct SmaCross {
    fast: usize,
    slow: usize,
    closes: VecDeque<f64>,
    prev_delta: Option<f64>,
    rule: BarRule,
    exit: ExitPolicy,
}

impl SmaCross {
    /// Creates the strategy.
    ///
    /// ### Arguments
    /// * `fast` - Fast window length; `0 < fast < slow`.
    /// * `slow` - Slow window length.
    /// * `rule` - Bar closing rule to observe.
    /// * `exit` - ROI/stoploss exit policy.
    pub fn new(fast: usize, slow: usize, rule: BarRule, exit: ExitPolicy) -> Result<Self> {
        if fast == 0 || fast >= slow {
            return Err(Error::MaPeriods(fast, slow));
        }
        rule.validate()?;
        Ok(Self {
            fast,
            slow,
            closes: VecDeque::with_capacity(slow + 1),
            prev_delta: None,
            rule,
            exit,
        })
    }

    fn mean(values: impl Iterator<Item = f64>, len: usize) -> f64 {
        values.sum::<f64>() / len as f64
    }
}

impl Strategy for SmaCross {
    fn name(&self) -> &str {
        "sma_cross"
    }

    fn bar_rule(&self) -> BarRule {
        self.rule
    }

    fn exit_policy(&self) -> &ExitPolicy {
        &self.exit
    }

    fn compute_signal(&mut self, bar: &Bar) -> Option<Signal> {
        self.closes.push_back(bar.close());
        if self.closes.len() > self.slow {
            self.closes.pop_front();
        }
        if self.closes.len() < self.slow {
            return None;
        }

        let slow_ma = Self::mean(self.closes.iter().copied(), self.slow);
        let fast_ma = Self::mean(self.closes.iter().skip(self.slow - self.fast).copied(), self.fast);
        let delta = fast_ma - slow_ma;

        let signal = match self.prev_delta {
            Some(prev) if prev <= 0.0 && delta > 0.0 => Some(Signal::Buy),
            Some(prev) if prev >= 0.0 && delta < 0.0 => Some(Signal::Sell),
            _ => None,
        };
        self.prev_delta = Some(delta);
        signal
    }
}

/// Rate-of-change momentum.
///
/// Emits BUY when the return over the lookback window exceeds the threshold
/// and SELL when it falls below the negated threshold.
pub struct Momentum {
    lookback: usize,
    threshold: f64,
    closes: VecDeque<f64>,
    rule: BarRule,
    exit: ExitPolicy,
}

impl Momentum {
    /// Creates the strategy.
    ///
    /// ### Arguments
    /// * `lookback` - Number of bars the return is measured over; positive.
    /// * `threshold` - Entry/exit return magnitude; positive and finite.
    /// * `rule` - Bar closing rule to observe.
    /// * `exit` - ROI/stoploss exit policy.
    pub fn new(lookback: usize, threshold: f64, rule: BarRule, exit: ExitPolicy) -> Result<Self> {
        if lookback == 0 || !threshold.is_finite() || threshold <= 0.0 {
            return Err(Error::MomentumParams(lookback, threshold));
        }
        rule.validate()?;
        Ok(Self {
            lookback,
            threshold,
            closes: VecDeque::with_capacity(lookback + 2),
            rule,
            exit,
        })
    }
}

impl Strategy for Momentum {
    fn name(&self) -> &str {
        "momentum"
    }

    fn bar_rule(&self) -> BarRule {
        self.rule
    }

    fn exit_policy(&self) -> &ExitPolicy {
        &self.exit
    }

    fn compute_signal(&mut self, bar: &Bar) -> Option<Signal> {
        self.closes.push_back(bar.close());
        if self.closes.len() > self.lookback + 1 {
            self.closes.pop_front();
        }
        if self.closes.len() < self.lookback + 1 {
            return None;
        }

        let oldest = *self.closes.front()?;
        let roc = bar.close().return_against(oldest);
        if roc > self.threshold {
            Some(Signal::Buy)
        } else if roc < -self.threshold {
            Some(Signal::Sell)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BarBuilder, RoiLadder};
    use chrono::DateTime;

    fn bar(close: f64) -> Bar {
        BarBuilder::builder()
            .open(close)
            .high(close)
            .low(close)
            .close(close)
            .volume(1.0)
            .open_time(DateTime::default())
            .close_time(DateTime::default())
            .build()
            .unwrap()
    }

    fn exit() -> ExitPolicy {
        ExitPolicy::new(RoiLadder::new([(5.0, 0.02)]).unwrap(), -0.02).unwrap()
    }

    #[test]
    fn sma_cross_signals_on_sign_change() {
        let mut strategy = SmaCross::new(2, 3, BarRule::Ticks(1), exit()).unwrap();

        assert_eq!(strategy.compute_signal(&bar(10.0)), None);
        assert_eq!(strategy.compute_signal(&bar(9.0)), None);
        // window full, fast below slow: no crossover yet
        assert_eq!(strategy.compute_signal(&bar(8.0)), None);
        // fast crosses above slow
        assert_eq!(strategy.compute_signal(&bar(12.0)), Some(Signal::Buy));
        // still above: silent
        assert_eq!(strategy.compute_signal(&bar(6.0)), None);
        // crosses back below
        assert_eq!(strategy.compute_signal(&bar(1.0)), Some(Signal::Sell));
    }

    #[test]
    fn sma_cross_rejects_bad_periods() {
        assert!(matches!(
            SmaCross::new(0, 3, BarRule::Ticks(1), exit()),
            Err(Error::MaPeriods(_, _))
        ));
        assert!(matches!(
            SmaCross::new(3, 3, BarRule::Ticks(1), exit()),
            Err(Error::MaPeriods(_, _))
        ));
    }

    #[test]
    fn momentum_signals_on_threshold() {
        let mut strategy = Momentum::new(2, 0.01, BarRule::Ticks(1), exit()).unwrap();

        assert_eq!(strategy.compute_signal(&bar(100.0)), None);
        assert_eq!(strategy.compute_signal(&bar(100.5)), None);
        // +2% over two bars
        assert_eq!(strategy.compute_signal(&bar(102.0)), Some(Signal::Buy));
        // -1.5% against the window start
        assert_eq!(strategy.compute_signal(&bar(99.0)), Some(Signal::Sell));
    }

    #[test]
    fn momentum_holds_inside_threshold() {
        let mut strategy = Momentum::new(2, 0.05, BarRule::Ticks(1), exit()).unwrap();
        for close in [100.0, 101.0, 102.0, 101.5] {
            assert_eq!(strategy.compute_signal(&bar(close)), None);
        }
    }

    #[test]
    fn momentum_rejects_bad_parameters() {
        assert!(matches!(
            Momentum::new(0, 0.01, BarRule::Ticks(1), exit()),
            Err(Error::MomentumParams(_, _))
        ));
        assert!(matches!(
            Momentum::new(2, -0.01, BarRule::Ticks(1), exit()),
            Err(Error::MomentumParams(_, _))
        ));
    }
}
