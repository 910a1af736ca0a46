use chrono::{DateTime, TimeDelta, Utc};

use crate::engine::Tick;
use crate::errors::{Error, Result};

/// A closed OHLCV bar. Finalized the instant its closing rule fires and never
/// mutated afterwards; the strategy layer only ever observes closed bars.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    notional: f64,
    tick_count: u32,
    open_time: DateTime<Utc>,
    close_time: DateTime<Utc>,
}

impl Bar {
    /// Returns the open price.
    pub fn open(&self) -> f64 {
        self.open
    }

    /// Returns the high price.
    pub fn high(&self) -> f64 {
        self.high
    }

    /// Returns the low price.
    pub fn low(&self) -> f64 {
        self.low
    }

    /// Returns the close price.
    pub fn close(&self) -> f64 {
        self.close
    }

    /// Returns the cumulative base volume.
    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Returns the cumulative quote volume (Σ price × quantity).
    pub fn notional(&self) -> f64 {
        self.notional
    }

    /// Returns the number of ticks folded into the bar.
    pub fn tick_count(&self) -> u32 {
        self.tick_count
    }

    /// Returns the time of the first tick in the bar.
    pub fn open_time(&self) -> DateTime<Utc> {
        self.open_time
    }

    /// Returns the time of the tick that closed the bar.
    pub fn close_time(&self) -> DateTime<Utc> {
        self.close_time
    }
}

/// Builder for externally-constructed bars (tests, stored bar series).
///
/// The aggregator produces its own bars; this builder exists so callers can
/// build bars that satisfy the same consistency rules.
#[derive(Debug, Default)]
pub struct BarBuilder {
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
    notional: Option<f64>,
    tick_count: Option<u32>,
    open_time: Option<DateTime<Utc>>,
    close_time: Option<DateTime<Utc>>,
}

impl BarBuilder {
    /// Creates an empty builder.
    pub fn builder() -> Self {
        Self::default()
    }

    /// Sets the open price.
    pub fn open(mut self, value: f64) -> Self {
        self.open = Some(value);
        self
    }

    /// Sets the high price.
    pub fn high(mut self, value: f64) -> Self {
        self.high = Some(value);
        self
    }

    /// Sets the low price.
    pub fn low(mut self, value: f64) -> Self {
        self.low = Some(value);
        self
    }

    /// Sets the close price.
    pub fn close(mut self, value: f64) -> Self {
        self.close = Some(value);
        self
    }

    /// Sets the cumulative base volume.
    pub fn volume(mut self, value: f64) -> Self {
        self.volume = Some(value);
        self
    }

    /// Sets the cumulative quote volume. Defaults to volume × close.
    pub fn notional(mut self, value: f64) -> Self {
        self.notional = Some(value);
        self
    }

    /// Sets the tick count. Defaults to 1.
    pub fn tick_count(mut self, value: u32) -> Self {
        self.tick_count = Some(value);
        self
    }

    /// Sets the open time.
    pub fn open_time(mut self, value: DateTime<Utc>) -> Self {
        self.open_time = Some(value);
        self
    }

    /// Sets the close time.
    pub fn close_time(mut self, value: DateTime<Utc>) -> Self {
        self.close_time = Some(value);
        self
    }

    /// Validates and builds the bar.
    ///
    /// ### Returns
    /// The bar, or an error naming the missing or inconsistent field.
    pub fn build(self) -> Result<Bar> {
        let open = self.open.ok_or(Error::BarField("open"))?;
        let high = self.high.ok_or(Error::BarField("high"))?;
        let low = self.low.ok_or(Error::BarField("low"))?;
        let close = self.close.ok_or(Error::BarField("close"))?;
        let volume = self.volume.ok_or(Error::BarField("volume"))?;
        let open_time = self.open_time.ok_or(Error::BarField("open_time"))?;
        let close_time = self.close_time.ok_or(Error::BarField("close_time"))?;
        let notional = self.notional.unwrap_or(volume * close);
        let tick_count = self.tick_count.unwrap_or(1);

        if !(low <= open && low <= close && open <= high && close <= high) {
            return Err(Error::BarField("ohlc range"));
        }
        if !volume.is_finite() || volume < 0.0 {
            return Err(Error::BarField("volume"));
        }
        if close_time < open_time {
            return Err(Error::BarField("close_time before open_time"));
        }
        if tick_count == 0 {
            return Err(Error::BarField("tick_count"));
        }

        Ok(Bar {
            open,
            high,
            low,
            close,
            volume,
            notional,
            tick_count,
            open_time,
            close_time,
        })
    }
}

/// The closing rule a [`BarAggregator`] evaluates after folding in each tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BarRule {
    /// Close after a fixed number of ticks.
    Ticks(u32),
    /// Close once cumulative base volume reaches the threshold.
    Volume(f64),
    /// Close once cumulative quote volume (Σ price × quantity) reaches the threshold.
    Notional(f64),
    /// Close once the elapsed time since the bar's first tick reaches the interval.
    Interval(TimeDelta),
}

impl BarRule {
    /// Validates the rule's threshold.
    pub fn validate(&self) -> Result<()> {
        let positive = match self {
            Self::Ticks(n) => *n > 0,
            Self::Volume(v) | Self::Notional(v) => v.is_finite() && *v > 0.0,
            Self::Interval(d) => *d > TimeDelta::zero(),
        };
        if positive { Ok(()) } else { Err(Error::BarRuleZero) }
    }

    fn is_met(&self, acc: &Accumulator) -> bool {
        match self {
            Self::Ticks(n) => acc.tick_count >= *n,
            Self::Volume(v) => acc.volume >= *v,
            Self::Notional(v) => acc.notional >= *v,
            Self::Interval(d) => acc.close_time - acc.open_time >= *d,
        }
    }
}

// The running bar under construction. Owned by the aggregator, reset to empty
// after each emission; never visible outside this module.
#[derive(Debug, Clone)]
struct Accumulator {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    notional: f64,
    tick_count: u32,
    open_time: DateTime<Utc>,
    close_time: DateTime<Utc>,
}

impl Accumulator {
    fn start(tick: &Tick) -> Self {
        Self {
            open: tick.price(),
            high: tick.price(),
            low: tick.price(),
            close: tick.price(),
            volume: tick.quantity(),
            notional: tick.notional(),
            tick_count: 1,
            open_time: tick.time(),
            close_time: tick.time(),
        }
    }

    fn fold(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.price());
        self.low = self.low.min(tick.price());
        self.close = tick.price();
        self.volume += tick.quantity();
        self.notional += tick.notional();
        self.tick_count += 1;
        self.close_time = tick.time();
    }

    fn into_bar(self) -> Bar {
        Bar {
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            notional: self.notional,
            tick_count: self.tick_count,
            open_time: self.open_time,
            close_time: self.close_time,
        }
    }
}

/// Folds a tick sequence into closed bars under a [`BarRule`].
///
/// Exactly one closed bar is emitted per call that crosses the rule's
/// threshold, and the triggering tick belongs to the bar it closes. Replaying
/// the same tick sequence through a fresh aggregator reproduces identical
/// bars.
#[derive(Debug, Clone)]
pub struct BarAggregator {
    rule: BarRule,
    working: Option<Accumulator>,
}

impl BarAggregator {
    /// Creates an aggregator for the given closing rule.
    ///
    /// ### Arguments
    /// * `rule` - The closing rule; its threshold must be positive.
    ///
    /// ### Returns
    /// The aggregator, or a configuration error.
    pub fn new(rule: BarRule) -> Result<Self> {
        rule.validate()?;
        Ok(Self {
            rule,
            working: None,
        })
    }

    /// Folds one tick into the working bar and emits the bar if the closing
    /// rule fired.
    ///
    /// ### Arguments
    /// * `tick` - The next tick, in feed order.
    ///
    /// ### Returns
    /// The closed bar when the rule fires, `None` otherwise.
    pub fn accumulate(&mut self, tick: &Tick) -> Option<Bar> {
        match self.working.as_mut() {
            Some(acc) => acc.fold(tick),
            None => {
                self.working = Some(Accumulator::start(tick));
            }
        }

        let closed = self
            .working
            .as_ref()
            .is_some_and(|acc| self.rule.is_met(acc));
        if closed {
            self.working.take().map(Accumulator::into_bar)
        } else {
            None
        }
    }

    /// Returns the closing rule.
    pub fn rule(&self) -> BarRule {
        self.rule
    }
}
