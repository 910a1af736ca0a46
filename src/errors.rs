pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The ROI ladder has no entries. At least one threshold is required before
    /// the implicit `+inf -> 0.0` sentinel is appended.
    #[error("ROI ladder is empty: at least one threshold entry is required")]
    RoiLadderEmpty,

    /// A ladder threshold is not finite or is negative.
    #[error("ROI ladder threshold must be finite and non-negative (got: {0})")]
    RoiThreshold(f64),

    /// Ladder thresholds must be strictly increasing.
    #[error("ROI ladder thresholds must be strictly increasing (got {0} then {1})")]
    RoiThresholdOrder(f64, f64),

    /// The stoploss is a maximum tolerated loss ratio and must be negative,
    /// e.g. -0.02 for -2%.
    #[error("stoploss must be a finite negative ratio (got: {0})")]
    StoplossNotNegative(f64),

    /// A bar closing rule was configured with a zero or negative threshold.
    #[error("bar closing rule requires a positive threshold")]
    BarRuleZero,

    /// A bar was built from missing or inconsistent values.
    #[error("bar field missing or inconsistent: {0}")]
    BarField(&'static str),

    /// A tick carried a non-positive or non-finite price. Feeds drop the tick
    /// and continue.
    #[error("tick price must be positive and finite (got: {0})")]
    TickPrice(f64),

    /// A tick carried a non-positive or non-finite quantity. Feeds drop the
    /// tick and continue.
    #[error("tick quantity must be positive and finite (got: {0})")]
    TickQuantity(f64),

    /// A tick timestamp could not be represented as a UTC datetime.
    #[error("tick timestamp out of range (got: {0})")]
    TickTimestamp(i64),

    /// The stake amount used to size entries must be positive.
    #[error("stake amount must be positive (got: {0})")]
    NegZeroStake(f64),

    /// The commission rate must be finite and non-negative.
    #[error("fee rate must be finite and non-negative (got: {0})")]
    FeeRate(f64),

    /// Invalid moving-average periods for a crossover strategy.
    #[error("moving-average periods must satisfy 0 < fast < slow (got {0}, {1})")]
    MaPeriods(usize, usize),

    /// Invalid momentum strategy parameters.
    #[error("momentum parameters must be positive and finite (lookback {0}, threshold {1})")]
    MomentumParams(usize, f64),

    /// Order placement or fill confirmation failed at the gateway. The
    /// lifecycle that issued the order moves to its error state; a partial
    /// fill may exist, so the order is never retried silently.
    #[error("order gateway failure: {0}")]
    Gateway(String),

    /// A fill confirmation arrived while no order was in flight.
    #[error("fill confirmation without an order in flight (state: {0})")]
    UnexpectedFill(&'static str),

    /// A lock was poisoned. This is likely a bug in a strategy panicking
    /// mid-update.
    #[error("lock poisoned (internal error): {0}")]
    Mutex(String),

    /// The backtest worker pool could not be started.
    #[error("worker pool failed to start: {0}")]
    WorkerPool(String),

    /// I/O error occurred.
    // utils.rs
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error occurred.
    #[cfg(feature = "serde")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
