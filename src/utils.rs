use chrono::{DateTime, Utc};

#[cfg(feature = "serde")]
use serde::Deserialize;

#[cfg(feature = "serde")]
use crate::engine::Tick;

// {
//   "a": 26129,            aggregate trade id
//   "p": "0.01633102",     price
//   "q": "4.70443515",     quantity
//   "T": 1498793709153     trade time (ms)
// }

/// A raw feed record as stored on disk, prior to validation.
///
/// Field aliases follow the aggregate-trade message shape most exchanges emit,
/// so both the short wire names and the long archived names deserialize.
#[cfg(feature = "serde")]
#[derive(Debug, Clone, Deserialize)]
pub struct RawTick {
    #[serde(alias = "a")]
    id: u64,
    #[serde(alias = "p")]
    price: f64,
    #[serde(alias = "q", alias = "amount")]
    quantity: f64,
    #[serde(alias = "T", alias = "timestamp")]
    timestamp_millis: i64,
}

#[cfg(feature = "serde")]
impl RawTick {
    /// Validates the raw record into an engine [`Tick`].
    pub fn into_tick(self) -> crate::errors::Result<Tick> {
        Tick::new(self.id, self.price, self.quantity, self.timestamp_millis)
    }
}

#[cfg(feature = "serde")]
/// Reads a stored tick series from `filepath` and returns the validated ticks.
///
/// Records that fail validation are dropped, consistent with how the runners
/// treat malformed feed input.
pub fn get_ticks_from_file(filepath: std::path::PathBuf) -> crate::errors::Result<Vec<Tick>> {
    use std::{fs::File, io::BufReader};

    let file = File::open(filepath)?;
    let reader = BufReader::new(file);
    let raw: Vec<RawTick> = serde_json::from_reader(reader)?;
    Ok(raw
        .into_iter()
        .filter_map(|record| match record.into_tick() {
            Ok(tick) => Some(tick),
            Err(err) => {
                log::warn!("dropping malformed stored tick: {err}");
                None
            }
        })
        .collect())
}

/// Generates a random order ID.
pub fn random_id() -> u32 {
    rand::random()
}

/// Elapsed minutes between two instants, fractional.
pub fn minutes_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 60_000.0
}
