//! Liveness check, the `check-health` report and log retention.

use std::collections::HashMap;

use chrono::TimeDelta;
use tracing::{info, instrument};
use turku_core::config::HealthThresholds;
use turku_core::db::to_unix;

use super::types::HealthResponse;
use super::{ApiError, Broker};
use crate::storage::ValidationError;

/// Nagios exit code for a healthy report.
pub const EXIT_OK: u8 = 0;
/// Nagios exit code when anything is sick.
pub const EXIT_CRITICAL: u8 = 2;

/// Health of every live storage unit, machine and source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub storages: usize,
    pub machines: usize,
    pub sources: usize,
    /// One line per sick storage unit.
    pub sick_storages: Vec<String>,
    /// One line per sick machine.
    pub sick_machines: Vec<String>,
    /// One line per sick source, `<machine> <source>`.
    pub sick_sources: Vec<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.sick_storages.is_empty() && self.sick_machines.is_empty() && self.sick_sources.is_empty()
    }

    /// Nagios-style output and exit code.
    pub fn render(&self) -> (String, u8) {
        if self.is_healthy() {
            return (
                format!(
                    "OK {} storages, {} machines, {} sources",
                    self.storages, self.machines, self.sources
                ),
                EXIT_OK,
            );
        }

        let mut lines = vec![format!(
            "CRITICAL {}/{} storages, {}/{} machines, {}/{} sources",
            self.sick_storages.len(),
            self.storages,
            self.sick_machines.len(),
            self.machines,
            self.sick_sources.len(),
            self.sources,
        )];
        lines.extend(self.sick_storages.iter().cloned());
        lines.extend(self.sick_machines.iter().cloned());
        lines.extend(self.sick_sources.iter().cloned());
        (lines.join("\n"), EXIT_CRITICAL)
    }
}

impl Broker {
    /// Side-effect-free liveness check.
    #[instrument(skip(self), fields(op = "health"))]
    pub async fn health(&self) -> Result<HealthResponse, ApiError> {
        let counts = self.db.record_counts().await?;
        Ok(HealthResponse {
            healthy: true,
            date: self.now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            counts,
        })
    }

    /// Evaluate every live entity against `thresholds`.
    pub async fn health_report(
        &self,
        thresholds: &HealthThresholds,
    ) -> Result<HealthReport, ApiError> {
        let now = to_unix(self.now());
        let storages = self.db.list_live_storages().await?;
        let machines = self.db.list_live_machines().await?;
        let sources = self.db.list_live_sources().await?;

        let labels: HashMap<&str, String> =
            machines.iter().map(|m| (m.id.as_str(), m.label())).collect();

        Ok(HealthReport {
            storages: storages.len(),
            machines: machines.len(),
            sources: sources.len(),
            sick_storages: storages
                .iter()
                .filter(|s| !s.healthy(now, thresholds))
                .map(|s| s.name.clone())
                .collect(),
            sick_machines: machines
                .iter()
                .filter(|m| !m.healthy(now, thresholds))
                .map(|m| m.label())
                .collect(),
            sick_sources: sources
                .iter()
                .filter(|s| !s.healthy(now, thresholds))
                .map(|s| {
                    let machine = labels.get(s.machine_id.as_str()).map_or("?", String::as_str);
                    format!("{machine} {}", s.name)
                })
                .collect(),
        })
    }

    /// Delete backup log entries whose run ended more than `days` ago.
    pub async fn clean_logs(&self, days: u32) -> Result<u64, ApiError> {
        let cutoff = TimeDelta::try_days(i64::from(days))
            .and_then(|age| self.now().checked_sub_signed(age))
            .ok_or_else(|| ValidationError::new("days", format!("{days} days is out of range")))?;
        let deleted = self.db.delete_logs_ended_before(to_unix(cutoff)).await?;
        info!(deleted, days, "Old backup logs deleted");
        Ok(deleted)
    }
}
