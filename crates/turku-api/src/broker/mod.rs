//! Protocol handlers for machines and storage units.
//!
//! One [`Broker`] is built per process and shared by every request. It
//! holds no per-request state; all coordination goes through the registry.

mod error;
mod health;
mod machine_ops;
mod storage_ops;
pub mod types;

#[cfg(test)]
mod machine_ops_tests;
#[cfg(test)]
mod test_helpers;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use turku_core::db::to_unix;
use turku_core::{next_run, resolve_filters};

pub use error::ApiError;
pub use health::HealthReport;

use crate::auth::SecretHasher;
use crate::storage::{Source, StorageUnit, TurkuDatabase, ValidationError};
use types::{StorageTarget, TransferSource, TransferSources};

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Overwrite `field` with `value` when one is given and differs.
///
/// Returns whether anything changed.
fn set_if_changed<T: PartialEq>(field: &mut T, value: Option<T>) -> bool {
    match value {
        Some(v) if *field != v => {
            *field = v;
            true
        }
        _ => false,
    }
}

/// Next due instant of `source` as stored Unix seconds.
fn next_backup(source: &Source, now: DateTime<Utc>) -> Result<i64, ApiError> {
    let next = next_run(&source.frequency, &source.id, now)
        .map_err(|e| ValidationError::new("frequency", e.to_string()))?;
    Ok(to_unix(next))
}

/// The protocol handlers and their collaborators.
#[derive(Clone)]
pub struct Broker {
    db: TurkuDatabase,
    hasher: Arc<SecretHasher>,
    clock: Arc<dyn Clock>,
}

impl Broker {
    pub fn new(db: TurkuDatabase, hasher: Arc<SecretHasher>, clock: Arc<dyn Clock>) -> Self {
        Self { db, hasher, clock }
    }

    pub const fn db(&self) -> &TurkuDatabase {
        &self.db
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Transfer parameters for `sources`, all bound to `storage`.
    async fn transfer_sources(
        &self,
        sources: &[Source],
        storage: &StorageUnit,
    ) -> Result<TransferSources, ApiError> {
        if sources.is_empty() {
            return Ok(TransferSources::new());
        }
        let sets: HashMap<String, Vec<String>> = self.db.active_filter_sets().await?;
        let target = StorageTarget::from(storage);
        Ok(sources
            .iter()
            .map(|s| {
                let filter = resolve_filters(&s.filter_rules(), &sets);
                (s.name.clone(), TransferSource::new(s, filter, target.clone()))
            })
            .collect())
    }
}
