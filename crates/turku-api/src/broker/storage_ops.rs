//! Storage-initiated operations: `storage_update_config`,
//! `storage_ping_checkin` and `storage_ping_source_update`.

use tracing::{info, instrument, warn};
use turku_core::db::to_unix;

use super::types::{
    BoundMachine, SourceResult, SourceUpdateRequest, SourceUpdateResponse, StorageCheckinMachine,
    StorageCheckinRequest, StorageCheckinResponse, StorageConfig, StorageCredentials,
    StorageUpdateConfigRequest, StorageUpdateConfigResponse,
};
use super::{ApiError, Broker, next_backup, set_if_changed};
use crate::auth::{RegistrationAuth, check_login, resolve_registration_auth};
use crate::storage::{BackupLogEntry, Machine, SecretKind, Source, StorageUnit, encode_list};

/// Whole seconds of a reported fractional timestamp.
#[allow(clippy::cast_possible_truncation)]
fn whole_seconds(t: Option<f64>) -> Option<i64> {
    t.filter(|v| v.is_finite()).map(|v| v.floor() as i64)
}

fn backup_log(
    source: &Source,
    storage: &StorageUnit,
    result: &SourceResult,
    now: i64,
) -> BackupLogEntry {
    BackupLogEntry {
        id: uuid::Uuid::new_v4().to_string(),
        source_id: source.id.clone(),
        storage_id: Some(storage.id.clone()),
        date: now,
        success: result.success,
        date_begin: whole_seconds(result.time_begin),
        date_end: whole_seconds(result.time_end),
        snapshot: result.snapshot.clone(),
        summary: result.summary.clone(),
    }
}

impl Broker {
    /// Register or update a storage unit and list the machines bound to it.
    #[instrument(skip(self, req), fields(op = "storage_update_config", storage = %req.storage.name))]
    pub async fn storage_update_config(
        &self,
        req: StorageUpdateConfigRequest,
    ) -> Result<StorageUpdateConfigResponse, ApiError> {
        let ts = to_unix(self.now());
        let StorageUpdateConfigRequest { auth, storage: cfg } = req;

        let found = self.db.get_storage_by_name(&cfg.name).await?;
        let existing = check_login(&self.hasher, found, &cfg.secret, true)
            .inspect_err(|_| warn!("Storage login failed"))?;

        let (mut storage, mut modified, is_new) = match existing {
            Some(storage) => (storage, false, false),
            None => (self.new_storage(&cfg, auth.as_ref(), ts).await?, true, true),
        };

        let published = cfg.published.unwrap_or(true);
        let host_keys = encode_list(&cfg.ssh_ping_host_keys);
        modified |= set_if_changed(&mut storage.published, Some(published));
        modified |= set_if_changed(&mut storage.comment, cfg.comment);
        modified |= set_if_changed(&mut storage.ssh_ping_host, Some(cfg.ssh_ping_host));
        modified |= set_if_changed(&mut storage.ssh_ping_port, Some(cfg.ssh_ping_port));
        modified |= set_if_changed(&mut storage.ssh_ping_user, Some(cfg.ssh_ping_user));
        modified |= set_if_changed(&mut storage.ssh_ping_host_keys, Some(host_keys));
        modified |= set_if_changed(&mut storage.space_total, cfg.space_total);
        modified |= set_if_changed(&mut storage.space_available, cfg.space_available);

        if modified {
            storage.date_updated = ts;
            storage.validate()?;
        }
        storage.date_checked_in = Some(ts);

        if is_new {
            self.db.insert_storage(&storage).await?;
            info!(storage_id = %storage.id, "Storage registered");
        } else if modified {
            storage = self.db.update_storage(&storage).await?;
            info!(storage_id = %storage.id, "Storage updated");
        } else {
            self.db.touch_storage_checkin(&storage.id, ts).await?;
        }

        let machines = self
            .db
            .list_machines_for_storage(&storage.id)
            .await?
            .iter()
            .map(|m| (m.uuid.clone(), BoundMachine::from(m)))
            .collect();
        Ok(StorageUpdateConfigResponse { machines })
    }

    /// A not-yet-stored storage unit, authorized by a registration secret.
    async fn new_storage(
        &self,
        cfg: &StorageConfig,
        auth: Option<&RegistrationAuth>,
        now: i64,
    ) -> Result<StorageUnit, ApiError> {
        let credential =
            resolve_registration_auth(&self.db, &self.hasher, SecretKind::StorageReg, auth).await?;
        let secret_hash = self
            .hasher
            .hash(&cfg.secret)
            .map_err(|e| ApiError::Internal(format!("Secret hashing failed: {e}")))?;

        Ok(StorageUnit {
            id: uuid::Uuid::new_v4().to_string(),
            name: cfg.name.clone(),
            secret_hash,
            comment: None,
            ssh_ping_host: String::new(),
            ssh_ping_host_keys: "[]".to_string(),
            ssh_ping_port: 0,
            ssh_ping_user: String::new(),
            space_total: 0,
            space_available: 0,
            auth_id: credential.id,
            active: true,
            published: true,
            date_registered: now,
            date_updated: now,
            date_checked_in: None,
            revision: 0,
        })
    }

    /// Authenticate a storage unit by name and secret.
    async fn storage_login(&self, creds: &StorageCredentials) -> Result<StorageUnit, ApiError> {
        let (Some(name), Some(secret)) = (&creds.name, &creds.secret) else {
            warn!("Storage credentials missing");
            return Err(ApiError::BadAuth);
        };
        let found = self.db.get_storage_by_name(name).await?;
        check_login(&self.hasher, found, secret, false)
            .inspect_err(|_| warn!(storage = %name, "Storage login failed"))?
            .ok_or(ApiError::BadAuth)
    }

    /// A live machine bound to `storage`.
    async fn bound_machine(&self, storage: &StorageUnit, uuid: &str) -> Result<Machine, ApiError> {
        self.db
            .get_machine_by_uuid(uuid)
            .await?
            .filter(|m| m.storage_id == storage.id && m.active && m.published)
            .ok_or(ApiError::NotFound("Machine"))
    }

    /// Due sources of a machine, as requested by its storage unit.
    #[instrument(skip(self, req), fields(op = "storage_ping_checkin", machine_uuid = %req.machine.uuid))]
    pub async fn storage_ping_checkin(
        &self,
        req: StorageCheckinRequest,
    ) -> Result<StorageCheckinResponse, ApiError> {
        let storage = self.storage_login(&req.storage).await?;
        let machine = self.bound_machine(&storage, &req.machine.uuid).await?;

        let ts = to_unix(self.now());
        let due = self.db.list_due_sources(&machine.id, ts).await?;
        let scheduled_sources = self.transfer_sources(&due, &storage).await?;
        self.db.touch_machine_checkin(&machine.id, ts).await?;

        Ok(StorageCheckinResponse {
            machine: StorageCheckinMachine {
                uuid: machine.uuid,
                environment_name: machine.environment_name,
                service_name: machine.service_name,
                unit_name: machine.unit_name,
                scheduled_sources,
            },
        })
    }

    /// Record backup outcomes and reschedule the successful sources.
    ///
    /// Sources are processed in name order, each in its own transaction; an
    /// unknown source stops processing without undoing earlier ones.
    #[instrument(skip(self, req), fields(op = "storage_ping_source_update", machine_uuid = %req.machine.uuid))]
    pub async fn storage_ping_source_update(
        &self,
        req: SourceUpdateRequest,
    ) -> Result<SourceUpdateResponse, ApiError> {
        let storage = self.storage_login(&req.storage).await?;
        let machine = self.bound_machine(&storage, &req.machine.uuid).await?;

        let now = self.now();
        let ts = to_unix(now);
        for (name, result) in &req.machine.sources {
            let Some(mut source) = self.db.get_live_source(&machine.id, name).await? else {
                warn!(source = %name, "Update for unknown source");
                return Err(ApiError::NotFound("Source"));
            };

            source.success = result.success;
            if result.success {
                source.date_last_backed_up = Some(ts);
                match next_backup(&source, now) {
                    Ok(next) => source.date_next_backup = next,
                    Err(e) => warn!(source = %name, error = %e, "Cannot reschedule source"),
                }
            }
            let log = backup_log(&source, &storage, result, ts);
            self.db.record_backup_result(&source, &log).await?;
            info!(
                source = %name,
                success = result.success,
                next_backup = source.date_next_backup,
                "Backup result recorded"
            );
        }

        Ok(SourceUpdateResponse {})
    }
}
