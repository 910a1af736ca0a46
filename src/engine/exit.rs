use chrono::{DateTime, Utc};

use crate::RatioCalculus;
use crate::engine::Position;
use crate::errors::{Error, Result};
use crate::utils::minutes_between;

/// Time-indexed schedule of minimum acceptable returns.
///
/// Maps an elapsed-minutes threshold to the return ratio a position must have
/// reached before that threshold for an ROI exit. The ladder is terminated by
/// an implicit `+inf -> 0.0` (breakeven) entry appended at construction, so a
/// lookup always matches.
#[derive(Debug, Clone, PartialEq)]
pub struct RoiLadder {
    steps: Vec<(f64, f64)>,
}

impl RoiLadder {
    /// Validates and constructs a ladder from `(threshold_minutes, min_return)`
    /// pairs.
    ///
    /// ### Arguments
    /// * `steps` - Entries with strictly increasing, finite, non-negative
    ///   thresholds. Must not be empty.
    ///
    /// ### Returns
    /// The ladder with the breakeven sentinel appended, or a configuration
    /// error.
    pub fn new(steps: impl IntoIterator<Item = (f64, f64)>) -> Result<Self> {
        let mut steps: Vec<(f64, f64)> = steps.into_iter().collect();
        if steps.is_empty() {
            return Err(Error::RoiLadderEmpty);
        }

        let mut previous = f64::NEG_INFINITY;
        for (threshold, _) in &steps {
            if !threshold.is_finite() || *threshold < 0.0 {
                return Err(Error::RoiThreshold(*threshold));
            }
            if *threshold <= previous {
                return Err(Error::RoiThresholdOrder(previous, *threshold));
            }
            previous = *threshold;
        }

        steps.push((f64::INFINITY, 0.0));
        Ok(Self { steps })
    }

    /// Returns the minimum required return for a position at the given age:
    /// the value of the smallest threshold strictly greater than
    /// `elapsed_minutes`.
    pub fn required_return(&self, elapsed_minutes: f64) -> f64 {
        self.steps
            .iter()
            .find(|(threshold, _)| *threshold > elapsed_minutes)
            .map(|(_, ratio)| *ratio)
            .unwrap_or(0.0)
    }
}

/// Why a position was closed.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellReason {
    /// The ROI target for the position's age was exceeded.
    Roi,
    /// The price fell through the stoploss bound.
    Stoploss,
    /// The strategy emitted a SELL signal at bar close.
    SellSignal,
}

impl std::fmt::Display for SellReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::Roi => "ROI",
            Self::Stoploss => "STOPLOSS",
            Self::SellSignal => "SELL SIGNAL",
        };
        write!(f, "{reason}")
    }
}

/// Pure ROI-ladder + stoploss exit evaluator.
///
/// Invoked on every tick while a position is open, independently of bar
/// granularity. Stateless: the verdict depends only on the position, the
/// current price and the clock.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitPolicy {
    ladder: RoiLadder,
    stoploss: f64,
}

impl ExitPolicy {
    /// Validates and constructs the policy.
    ///
    /// ### Arguments
    /// * `ladder` - The ROI ladder.
    /// * `stoploss` - Maximum tolerated loss ratio; must be negative
    ///   (e.g. -0.02 for -2%).
    ///
    /// ### Returns
    /// The policy, or a configuration error.
    pub fn new(ladder: RoiLadder, stoploss: f64) -> Result<Self> {
        if !stoploss.is_finite() || stoploss >= 0.0 {
            return Err(Error::StoplossNotNegative(stoploss));
        }
        Ok(Self { ladder, stoploss })
    }

    /// Decides whether an open position should be closed at the current price.
    ///
    /// ROI is checked before the stoploss: the required return for the
    /// position's age is looked up in the ladder and the price must strictly
    /// exceed the resulting target; otherwise the price must sit strictly
    /// below the stoploss bound.
    ///
    /// ### Arguments
    /// * `position` - The open position (entry price and time populated).
    /// * `price` - The current tick price.
    /// * `now` - The current tick time.
    ///
    /// ### Returns
    /// The exit reason, or `None` to keep holding.
    pub fn evaluate(&self, position: &Position, price: f64, now: DateTime<Utc>) -> Option<SellReason> {
        let elapsed = minutes_between(position.start_time(), now);
        if price > self.roi_target(position.start_price(), elapsed) {
            return Some(SellReason::Roi);
        }
        if price < self.stop_price(position.start_price()) {
            return Some(SellReason::Stoploss);
        }
        None
    }

    /// Returns the ROI target price for an entry price at the given position age.
    pub fn roi_target(&self, start_price: f64, elapsed_minutes: f64) -> f64 {
        start_price.with_return(self.ladder.required_return(elapsed_minutes))
    }

    /// Returns the stoploss bound for an entry price.
    pub fn stop_price(&self, start_price: f64) -> f64 {
        start_price.with_return(self.stoploss)
    }

    /// Returns the stoploss ratio.
    pub fn stoploss(&self) -> f64 {
        self.stoploss
    }

    /// Returns the ROI ladder.
    pub fn ladder(&self) -> &RoiLadder {
        &self.ladder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OrderType;

    fn policy() -> ExitPolicy {
        let ladder = RoiLadder::new([(5.0, 0.02)]).unwrap();
        ExitPolicy::new(ladder, -0.02).unwrap()
    }

    fn position_at(start_price: f64) -> Position {
        Position::new(
            "BTCUSDT",
            "test",
            OrderType::Market,
            DateTime::from_timestamp_millis(0).unwrap(),
            start_price,
            0.1,
            0.0,
        )
    }

    fn at_minutes(minutes: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(minutes * 60_000).unwrap()
    }

    #[test]
    fn roi_fires_above_target() {
        let position = position_at(100.0);
        assert_eq!(
            policy().evaluate(&position, 103.0, at_minutes(3)),
            Some(SellReason::Roi)
        );
    }

    #[test]
    fn stoploss_fires_below_bound() {
        let position = position_at(100.0);
        assert_eq!(
            policy().evaluate(&position, 97.0, at_minutes(3)),
            Some(SellReason::Stoploss)
        );
    }

    #[test]
    fn holds_between_bounds() {
        let position = position_at(100.0);
        assert_eq!(policy().evaluate(&position, 101.0, at_minutes(3)), None);
    }

    #[test]
    fn roi_boundary_is_strict() {
        let position = position_at(100.0);
        // exactly on the 2% target is not an exit
        assert_eq!(policy().evaluate(&position, 102.0, at_minutes(3)), None);
        // exactly on the stoploss bound is not an exit either
        assert_eq!(policy().evaluate(&position, 98.0, at_minutes(3)), None);
    }

    #[test]
    fn sentinel_relaxes_to_breakeven() {
        let position = position_at(100.0);
        // past the last threshold the required return is 0, any gain exits
        assert_eq!(
            policy().evaluate(&position, 100.5, at_minutes(7)),
            Some(SellReason::Roi)
        );
        assert_eq!(policy().evaluate(&position, 100.0, at_minutes(7)), None);
    }

    #[test]
    fn ladder_lookup_is_strictly_greater() {
        let ladder = RoiLadder::new([(5.0, 0.02), (30.0, 0.01)]).unwrap();
        assert_eq!(ladder.required_return(3.0), 0.02);
        // an age exactly on a threshold belongs to the next rung
        assert_eq!(ladder.required_return(5.0), 0.01);
        assert_eq!(ladder.required_return(29.9), 0.01);
        assert_eq!(ladder.required_return(30.0), 0.0);
        assert_eq!(ladder.required_return(1e9), 0.0);
    }

    #[test]
    fn empty_ladder_is_rejected() {
        assert!(matches!(RoiLadder::new([]), Err(Error::RoiLadderEmpty)));
    }

    #[test]
    fn unordered_ladder_is_rejected() {
        assert!(matches!(
            RoiLadder::new([(5.0, 0.02), (5.0, 0.01)]),
            Err(Error::RoiThresholdOrder(_, _))
        ));
        assert!(matches!(
            RoiLadder::new([(10.0, 0.02), (5.0, 0.01)]),
            Err(Error::RoiThresholdOrder(_, _))
        ));
    }

    #[test]
    fn non_finite_threshold_is_rejected() {
        assert!(matches!(
            RoiLadder::new([(f64::INFINITY, 0.02)]),
            Err(Error::RoiThreshold(_))
        ));
        assert!(matches!(
            RoiLadder::new([(-1.0, 0.02)]),
            Err(Error::RoiThreshold(_))
        ));
    }

    #[test]
    fn positive_stoploss_is_rejected() {
        let ladder = RoiLadder::new([(5.0, 0.02)]).unwrap();
        assert!(matches!(
            ExitPolicy::new(ladder.clone(), 0.02),
            Err(Error::StoplossNotNegative(_))
        ));
        assert!(matches!(
            ExitPolicy::new(ladder, 0.0),
            Err(Error::StoplossNotNegative(_))
        ));
    }

    #[test]
    fn sell_reason_display() {
        assert_eq!(SellReason::Roi.to_string(), "ROI");
        assert_eq!(SellReason::Stoploss.to_string(), "STOPLOSS");
        assert_eq!(SellReason::SellSignal.to_string(), "SELL SIGNAL");
    }
}
