//! Backup scheduling.
//!
//! Maps a frequency specification, a stable identifier (the source id) and
//! the current instant to the next instant a source is due. Everything that
//! looks random here is derived from a CRC32 checksum of the identifier, so
//! recomputing the schedule of the same source gives the same slot every
//! time; only the explicit `R` cron token draws fresh randomness.

pub mod cron;
mod frequency;

use chrono::{DateTime, Utc};

pub use cron::CronSchedule;
pub use frequency::{ClockWindow, Frequency};

/// Errors from parsing or evaluating a frequency specification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("Invalid time window {0:?} (expected HHMM or HHMM-HHMM)")]
    InvalidWindow(String),

    #[error("Invalid frequency {0:?} (expected at most \"<keyword>, <window>\")")]
    TooManyClauses(String),

    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("Cron expression {0:?} never matches")]
    NeverMatches(String),
}

/// Deterministic integer in `[low, high]` derived from `hash_id`.
///
/// This is a plain checksum reduced modulo the range width, not a secure
/// random draw. An empty id always yields `low`, as does an empty range.
pub fn hashed_int(low: i64, high: i64, hash_id: impl AsRef<[u8]>) -> i64 {
    if high <= low {
        return low;
    }
    let span = high - low + 1;
    low + i64::from(crc32fast::hash(hash_id.as_ref())) % span
}

/// Compute the next due instant for `frequency`.
///
/// Shorthand for [`Frequency::parse`] followed by [`Frequency::next_after`].
pub fn next_run(
    frequency: &str,
    stable_id: &str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    Frequency::parse(frequency)?.next_after(stable_id, now)
}
