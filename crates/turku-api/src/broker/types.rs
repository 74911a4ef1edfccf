//! Request and response bodies for the `/v1` protocol.
//!
//! Optional request fields mean "leave unchanged" when absent. Nullable
//! text fields use `Option<Option<_>>` so an explicit `null` clears them.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::auth::RegistrationAuth;
use crate::storage::{Machine, RecordCounts, Source, StorageUnit};

/// Distinguish an explicit `null` from an absent field.
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

// =============================================================================
// Machine-initiated requests
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    #[serde(default)]
    pub auth: Option<RegistrationAuth>,
    pub machine: MachineConfig,
    /// Older agents send sources next to `machine` instead of inside it.
    #[serde(default)]
    pub sources: Option<BTreeMap<String, SourceConfig>>,
}

#[derive(Debug, Deserialize)]
pub struct MachineConfig {
    pub uuid: String,
    pub secret: String,
    #[serde(default)]
    pub published: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub environment_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub service_name: Option<Option<String>>,
    #[serde(default)]
    pub unit_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub comment: Option<Option<String>>,
    #[serde(default)]
    pub ssh_public_key: Option<String>,
    #[serde(default)]
    pub sources: Option<BTreeMap<String, SourceConfig>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub retention: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub comment: Option<Option<String>>,
    #[serde(default)]
    pub shared_service: Option<bool>,
    #[serde(default)]
    pub large_rotating_files: Option<bool>,
    #[serde(default)]
    pub large_modifying_files: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub bwlimit: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub snapshot_mode: Option<Option<String>>,
    #[serde(default)]
    pub preserve_hard_links: Option<bool>,
    #[serde(default)]
    pub filter: Option<Vec<String>>,
    #[serde(default)]
    pub exclude: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct MachineCredentials {
    pub uuid: String,
    pub secret: String,
}

/// Body of `agent_ping_checkin` and `agent_ping_restore`.
#[derive(Debug, Deserialize)]
pub struct AgentRequest {
    pub machine: MachineCredentials,
}

// =============================================================================
// Storage-initiated requests
// =============================================================================

/// Missing fields are an auth failure rather than a malformed request.
#[derive(Debug, Default, Deserialize)]
pub struct StorageCredentials {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MachineRef {
    pub uuid: String,
}

#[derive(Debug, Deserialize)]
pub struct StorageCheckinRequest {
    pub storage: StorageCredentials,
    pub machine: MachineRef,
}

#[derive(Debug, Deserialize)]
pub struct SourceUpdateRequest {
    pub storage: StorageCredentials,
    pub machine: SourceUpdateMachine,
}

#[derive(Debug, Deserialize)]
pub struct SourceUpdateMachine {
    pub uuid: String,
    pub sources: BTreeMap<String, SourceResult>,
}

/// Outcome of one backup run as reported by the storage unit.
#[derive(Debug, Default, Deserialize)]
pub struct SourceResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub snapshot: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub time_begin: Option<f64>,
    /// Unix seconds.
    #[serde(default)]
    pub time_end: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct StorageUpdateConfigRequest {
    #[serde(default)]
    pub auth: Option<RegistrationAuth>,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub name: String,
    pub secret: String,
    #[serde(default)]
    pub published: Option<bool>,
    pub ssh_ping_host: String,
    pub ssh_ping_port: i64,
    pub ssh_ping_user: String,
    pub ssh_ping_host_keys: Vec<String>,
    #[serde(default)]
    pub space_total: Option<i64>,
    #[serde(default)]
    pub space_available: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub comment: Option<Option<String>>,
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateConfigResponse {
    pub storage_name: String,
    pub ssh_ping_host: String,
    pub ssh_ping_host_keys: Vec<String>,
    pub ssh_ping_port: i64,
    pub ssh_ping_user: String,
}

impl From<&StorageUnit> for UpdateConfigResponse {
    fn from(s: &StorageUnit) -> Self {
        Self {
            storage_name: s.name.clone(),
            ssh_ping_host: s.ssh_ping_host.clone(),
            ssh_ping_host_keys: s.host_keys(),
            ssh_ping_port: s.ssh_ping_port,
            ssh_ping_user: s.ssh_ping_user.clone(),
        }
    }
}

/// Where a source is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageTarget {
    pub name: String,
    pub ssh_ping_host: String,
    pub ssh_ping_host_keys: Vec<String>,
    pub ssh_ping_port: i64,
    pub ssh_ping_user: String,
}

impl From<&StorageUnit> for StorageTarget {
    fn from(s: &StorageUnit) -> Self {
        Self {
            name: s.name.clone(),
            ssh_ping_host: s.ssh_ping_host.clone(),
            ssh_ping_host_keys: s.host_keys(),
            ssh_ping_port: s.ssh_ping_port,
            ssh_ping_user: s.ssh_ping_user.clone(),
        }
    }
}

/// Transfer parameters of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferSource {
    pub path: String,
    pub retention: String,
    pub bwlimit: Option<String>,
    /// Filter rules with named sets already expanded.
    pub filter: Vec<String>,
    pub exclude: Vec<String>,
    pub shared_service: bool,
    pub large_rotating_files: bool,
    pub large_modifying_files: bool,
    pub snapshot_mode: Option<String>,
    pub preserve_hard_links: bool,
    pub storage: StorageTarget,
}

impl TransferSource {
    pub fn new(source: &Source, filter: Vec<String>, storage: StorageTarget) -> Self {
        Self {
            path: source.path.clone(),
            retention: source.retention.clone(),
            bwlimit: source.bwlimit.clone(),
            filter,
            exclude: source.exclude_rules(),
            shared_service: source.shared_service,
            large_rotating_files: source.large_rotating_files,
            large_modifying_files: source.large_modifying_files,
            snapshot_mode: source.snapshot_mode.clone(),
            preserve_hard_links: source.preserve_hard_links,
            storage,
        }
    }
}

pub type TransferSources = BTreeMap<String, TransferSource>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledSources {
    pub scheduled_sources: TransferSources,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentCheckinResponse {
    pub machine: ScheduledSources,
    /// Copy of `machine.scheduled_sources` for older agents.
    pub scheduled_sources: TransferSources,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllSources {
    pub sources: TransferSources,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentRestoreResponse {
    pub machine: AllSources,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageCheckinMachine {
    pub uuid: String,
    pub environment_name: Option<String>,
    pub service_name: Option<String>,
    pub unit_name: String,
    pub scheduled_sources: TransferSources,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageCheckinResponse {
    pub machine: StorageCheckinMachine,
}

/// Serializes as `{}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceUpdateResponse {}

/// What a storage unit needs to grant a machine access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundMachine {
    pub environment_name: Option<String>,
    pub service_name: Option<String>,
    pub unit_name: String,
    pub comment: Option<String>,
    pub ssh_public_key: String,
}

impl From<&Machine> for BoundMachine {
    fn from(m: &Machine) -> Self {
        Self {
            environment_name: m.environment_name.clone(),
            service_name: m.service_name.clone(),
            unit_name: m.unit_name.clone(),
            comment: m.comment.clone(),
            ssh_public_key: m.ssh_public_key.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageUpdateConfigResponse {
    /// Keyed by machine UUID.
    pub machines: BTreeMap<String, BoundMachine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    /// RFC 3339.
    pub date: String,
    pub version: String,
    pub counts: RecordCounts,
}
