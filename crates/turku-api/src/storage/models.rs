//! Data models for the Turku registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use turku_core::Frequency;
use turku_core::config::HealthThresholds;

use super::validate::{self, MAX_KEY_LEN, MAX_NAME_LEN, MAX_RULES_LEN, ValidationError};

/// Accepted `Source.snapshot_mode` values.
pub const SNAPSHOT_MODES: &[&str] = &["none", "link-dest"];

/// Default retention for sources that do not declare one.
pub const DEFAULT_RETENTION: &str = "last 5 days, earliest of month";

/// Default frequency for sources that do not declare one.
pub const DEFAULT_FREQUENCY: &str = "daily";

/// What a registration secret may create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    MachineReg,
    StorageReg,
}

impl SecretKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MachineReg => "machine_reg",
            Self::StorageReg => "storage_reg",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuthCredential {
    pub id: String,
    pub name: String,
    pub secret_hash: String,
    pub secret_type: String,
    pub comment: Option<String>,
    pub active: bool,
    pub date_added: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StorageUnit {
    pub id: String,
    pub name: String,
    pub secret_hash: String,
    pub comment: Option<String>,
    pub ssh_ping_host: String,
    pub ssh_ping_host_keys: String,
    pub ssh_ping_port: i64,
    pub ssh_ping_user: String,
    /// MiB.
    pub space_total: i64,
    /// MiB.
    pub space_available: i64,
    pub auth_id: String,
    pub active: bool,
    pub published: bool,
    pub date_registered: i64,
    pub date_updated: i64,
    pub date_checked_in: Option<i64>,
    pub revision: i64,
}

impl StorageUnit {
    pub fn host_keys(&self) -> Vec<String> {
        validate::decode_list(&self.ssh_ping_host_keys)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate::required("name", &self.name, MAX_NAME_LEN)?;
        validate::optional("comment", self.comment.as_deref(), MAX_NAME_LEN)?;
        validate::required("ssh_ping_host", &self.ssh_ping_host, MAX_NAME_LEN)?;
        validate::json_string_list("ssh_ping_host_keys", &self.ssh_ping_host_keys, 65536)?;
        validate::port("ssh_ping_port", self.ssh_ping_port)?;
        validate::required("ssh_ping_user", &self.ssh_ping_user, MAX_NAME_LEN)?;
        validate::non_negative("space_total", self.space_total)?;
        validate::non_negative("space_available", self.space_available)
    }

    /// Recently registered, or checked in recently enough.
    pub fn healthy(&self, now: i64, thresholds: &HealthThresholds) -> bool {
        if now <= self.date_registered + thresholds.storage_registration_grace_secs {
            return true;
        }
        self.date_checked_in
            .is_some_and(|at| now <= at + thresholds.storage_checkin_max_age_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Machine {
    pub id: String,
    /// Set by the machine itself; globally unique.
    pub uuid: String,
    pub secret_hash: String,
    pub environment_name: Option<String>,
    pub service_name: Option<String>,
    pub unit_name: String,
    pub comment: Option<String>,
    pub ssh_public_key: String,
    pub auth_id: String,
    /// Assigned once at registration.
    pub storage_id: String,
    pub active: bool,
    pub published: bool,
    pub date_registered: i64,
    pub date_updated: i64,
    pub date_checked_in: Option<i64>,
    pub revision: i64,
}

impl Machine {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate::uuid("uuid", &self.uuid)?;
        validate::optional("environment_name", self.environment_name.as_deref(), MAX_NAME_LEN)?;
        validate::optional("service_name", self.service_name.as_deref(), MAX_NAME_LEN)?;
        validate::required("unit_name", &self.unit_name, MAX_NAME_LEN)?;
        validate::optional("comment", self.comment.as_deref(), MAX_NAME_LEN)?;
        validate::required("ssh_public_key", &self.ssh_public_key, MAX_KEY_LEN)
    }

    pub fn healthy(&self, now: i64, thresholds: &HealthThresholds) -> bool {
        if now <= self.date_registered + thresholds.machine_registration_grace_secs {
            return true;
        }
        self.date_checked_in
            .is_some_and(|at| now <= at + thresholds.machine_checkin_max_age_secs)
    }

    /// Short label used in reports, e.g. `web/0 (0f6c5c1e)`.
    pub fn label(&self) -> String {
        let short: String = self.uuid.chars().take(8).collect();
        format!("{} ({short})", self.unit_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub machine_id: String,
    pub comment: Option<String>,
    pub path: String,
    /// JSON list of rsync filter rules.
    pub filter: String,
    /// JSON list of rsync exclude patterns.
    pub exclude: String,
    pub frequency: String,
    pub retention: String,
    pub bwlimit: Option<String>,
    pub snapshot_mode: Option<String>,
    pub preserve_hard_links: bool,
    pub shared_service: bool,
    pub large_rotating_files: bool,
    pub large_modifying_files: bool,
    pub active: bool,
    pub success: bool,
    pub published: bool,
    pub date_added: i64,
    pub date_updated: i64,
    pub date_last_backed_up: Option<i64>,
    pub date_next_backup: i64,
    pub revision: i64,
}

impl Source {
    pub fn filter_rules(&self) -> Vec<String> {
        validate::decode_list(&self.filter)
    }

    pub fn exclude_rules(&self) -> Vec<String> {
        validate::decode_list(&self.exclude)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate::required("name", &self.name, MAX_NAME_LEN)?;
        validate::optional("comment", self.comment.as_deref(), MAX_NAME_LEN)?;
        validate::required("path", &self.path, MAX_NAME_LEN)?;
        validate::json_string_list("filter", &self.filter, MAX_RULES_LEN)?;
        validate::json_string_list("exclude", &self.exclude, MAX_RULES_LEN)?;
        validate::required("frequency", &self.frequency, MAX_NAME_LEN)?;
        Frequency::parse(&self.frequency)
            .and_then(|f| f.next_after(&self.id, DateTime::<Utc>::UNIX_EPOCH))
            .map_err(|e| ValidationError::new("frequency", e.to_string()))?;
        validate::required("retention", &self.retention, MAX_NAME_LEN)?;
        validate::optional("bwlimit", self.bwlimit.as_deref(), MAX_NAME_LEN)?;
        validate::one_of("snapshot_mode", self.snapshot_mode.as_deref(), SNAPSHOT_MODES)
    }

    /// Recently added, or last run succeeded and is not long overdue.
    pub fn healthy(&self, now: i64, thresholds: &HealthThresholds) -> bool {
        if now <= self.date_added + thresholds.source_added_grace_secs {
            return true;
        }
        self.success && now <= self.date_next_backup + thresholds.source_overdue_tolerance_secs
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BackupLogEntry {
    pub id: String,
    pub source_id: String,
    pub storage_id: Option<String>,
    pub date: i64,
    pub success: bool,
    pub date_begin: Option<i64>,
    pub date_end: Option<i64>,
    pub snapshot: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FilterSet {
    pub id: String,
    pub name: String,
    /// JSON list of rsync filter rules.
    pub filters: String,
    pub comment: Option<String>,
    pub active: bool,
    pub date_added: i64,
}

impl FilterSet {
    pub fn rules(&self) -> Vec<String> {
        validate::decode_list(&self.filters)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn source(frequency: &str) -> Source {
        Source {
            id: "s1".into(),
            name: "etc".into(),
            machine_id: "m1".into(),
            comment: None,
            path: "/etc".into(),
            filter: "[]".into(),
            exclude: "[]".into(),
            frequency: frequency.into(),
            retention: DEFAULT_RETENTION.into(),
            bwlimit: None,
            snapshot_mode: None,
            preserve_hard_links: false,
            shared_service: false,
            large_rotating_files: false,
            large_modifying_files: false,
            active: true,
            success: true,
            published: true,
            date_added: 0,
            date_updated: 0,
            date_last_backed_up: None,
            date_next_backup: 0,
            revision: 0,
        }
    }

    #[test]
    fn source_frequency_must_parse() {
        assert!(source("daily, 0800-1600").validate().is_ok());
        let err = source("daily, 25:00").validate().unwrap_err();
        assert_eq!(err.field, "frequency");
    }

    #[test]
    fn source_frequency_must_be_satisfiable() {
        assert!(source("cron 0 0 29 feb *").validate().is_ok());
        let err = source("cron 0 0 30 feb *").validate().unwrap_err();
        assert_eq!(err.field, "frequency");
        assert!(err.message.contains("never matches"), "{}", err.message);
    }

    #[test]
    fn source_snapshot_mode_choices() {
        let mut s = source("weekly");
        s.snapshot_mode = Some("link-dest".into());
        assert!(s.validate().is_ok());
        s.snapshot_mode = Some("btrfs".into());
        assert_eq!(s.validate().unwrap_err().field, "snapshot_mode");
    }

    #[test]
    fn source_health() {
        let t = HealthThresholds::default();
        let mut s = source("daily");
        s.date_added = 1_000_000;
        s.date_next_backup = 1_000_000;
        assert!(s.healthy(1_000_000 + 3600, &t));

        let later = 1_000_000 + t.source_added_grace_secs + 1;
        assert!(s.healthy(later, &t));
        s.success = false;
        assert!(!s.healthy(later, &t));

        s.success = true;
        assert!(!s.healthy(1_000_000 + t.source_overdue_tolerance_secs + 1, &t));
    }
}
