//! Shared setup for the broker test modules.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use argon2::Params;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use super::types::{
    AgentRequest, MachineConfig, MachineCredentials, SourceConfig, StorageConfig,
    StorageUpdateConfigRequest, UpdateConfigRequest,
};
use super::{Broker, Clock};
use crate::auth::{RegistrationAuth, SecretHasher};
use crate::storage::{AuthCredential, Machine, SecretKind, TurkuDatabase};

pub const MACHINE_UUID: &str = "0f6c5c1e-1b7a-4f5e-9d43-2c8e2b1d7a10";
pub const MACHINE_SECRET: &str = "machine-secret";
pub const STORAGE_NAME: &str = "storage-01";
pub const STORAGE_SECRET: &str = "storage-secret";
pub const MACHINE_REG_SECRET: &str = "machine-reg";
pub const STORAGE_REG_SECRET: &str = "storage-reg";

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    pub const fn new(at: DateTime<Utc>) -> Self {
        Self(Mutex::new(at))
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Monday 2024-01-15 12:00:00 UTC.
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
}

pub fn fast_hasher() -> SecretHasher {
    SecretHasher::with_params(Params::new(8, 1, 1, None).unwrap())
}

/// A broker over an empty in-memory registry holding one registration
/// credential of each kind.
pub async fn setup() -> (Broker, Arc<FixedClock>) {
    let db = TurkuDatabase::open_in_memory().await.unwrap();
    let hasher = Arc::new(fast_hasher());
    for (id, name, secret, kind) in [
        ("auth-m", "machines", MACHINE_REG_SECRET, SecretKind::MachineReg),
        ("auth-s", "storages", STORAGE_REG_SECRET, SecretKind::StorageReg),
    ] {
        db.insert_auth(&AuthCredential {
            id: id.into(),
            name: name.into(),
            secret_hash: hasher.hash(secret).unwrap(),
            secret_type: kind.as_str().into(),
            comment: None,
            active: true,
            date_added: 0,
        })
        .await
        .unwrap();
    }
    let clock = Arc::new(FixedClock::new(start()));
    let broker = Broker::new(db, hasher, Arc::clone(&clock) as Arc<dyn super::Clock>);
    (broker, clock)
}

pub fn machine_reg_auth() -> Option<RegistrationAuth> {
    Some(RegistrationAuth::Named {
        name: Some("machines".into()),
        secret: Some(MACHINE_REG_SECRET.into()),
    })
}

pub fn storage_reg_auth() -> Option<RegistrationAuth> {
    Some(RegistrationAuth::Named {
        name: Some("storages".into()),
        secret: Some(STORAGE_REG_SECRET.into()),
    })
}

pub fn storage_config(name: &str, space_available: i64) -> StorageConfig {
    StorageConfig {
        name: name.into(),
        secret: STORAGE_SECRET.into(),
        published: None,
        ssh_ping_host: format!("{name}.example.com"),
        ssh_ping_port: 22,
        ssh_ping_user: "turku".into(),
        ssh_ping_host_keys: vec!["ssh-ed25519 AAAAstorage".into()],
        space_total: Some(space_available * 2),
        space_available: Some(space_available),
        comment: None,
    }
}

/// Register a storage unit through the protocol.
pub async fn register_storage(broker: &Broker, name: &str, space_available: i64) {
    broker
        .storage_update_config(StorageUpdateConfigRequest {
            auth: storage_reg_auth(),
            storage: storage_config(name, space_available),
        })
        .await
        .unwrap();
}

pub fn source_config(path: &str, frequency: &str) -> SourceConfig {
    SourceConfig {
        path: Some(path.into()),
        frequency: Some(frequency.into()),
        ..SourceConfig::default()
    }
}

pub fn machine_config(sources: &[(&str, SourceConfig)]) -> MachineConfig {
    MachineConfig {
        uuid: MACHINE_UUID.into(),
        secret: MACHINE_SECRET.into(),
        published: None,
        environment_name: Some(Some("prod".into())),
        service_name: Some(Some("web".into())),
        unit_name: Some("web/0".into()),
        comment: None,
        ssh_public_key: Some("ssh-ed25519 AAAAmachine".into()),
        sources: Some(
            sources
                .iter()
                .map(|(name, cfg)| ((*name).to_string(), cfg.clone()))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}

pub fn update_request(machine: MachineConfig) -> UpdateConfigRequest {
    UpdateConfigRequest {
        auth: machine_reg_auth(),
        machine,
        sources: None,
    }
}

pub fn agent_request() -> AgentRequest {
    AgentRequest {
        machine: MachineCredentials {
            uuid: MACHINE_UUID.into(),
            secret: MACHINE_SECRET.into(),
        },
    }
}

/// One storage unit and one machine with the given sources.
pub async fn setup_with_machine(sources: &[(&str, SourceConfig)]) -> (Broker, Arc<FixedClock>) {
    let (broker, clock) = setup().await;
    register_storage(&broker, STORAGE_NAME, 1000).await;
    broker
        .update_config(update_request(machine_config(sources)))
        .await
        .unwrap();
    (broker, clock)
}

pub async fn stored_machine(broker: &Broker) -> Machine {
    broker
        .db()
        .get_machine_by_uuid(MACHINE_UUID)
        .await
        .unwrap()
        .unwrap()
}
