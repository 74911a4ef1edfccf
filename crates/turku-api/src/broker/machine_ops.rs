//! Machine-initiated operations: `update_config`, `agent_ping_checkin` and
//! `agent_ping_restore`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};
use turku_core::assign::assign;
use turku_core::db::to_unix;

use super::types::{
    AgentCheckinResponse, AgentRequest, AgentRestoreResponse, AllSources, MachineConfig,
    MachineCredentials, ScheduledSources, SourceConfig, UpdateConfigRequest, UpdateConfigResponse,
};
use super::{ApiError, Broker, next_backup, set_if_changed};
use crate::auth::{RegistrationAuth, check_login, resolve_registration_auth};
use crate::storage::{
    DEFAULT_FREQUENCY, DEFAULT_RETENTION, Machine, SecretKind, Source, encode_list,
};

/// Copy the declared fields of `cfg` onto `source`; returns whether any
/// differed.
fn apply_source_config(source: &mut Source, cfg: SourceConfig) -> bool {
    let mut modified = false;
    modified |= set_if_changed(&mut source.path, cfg.path);
    modified |= set_if_changed(&mut source.frequency, cfg.frequency);
    modified |= set_if_changed(&mut source.retention, cfg.retention);
    modified |= set_if_changed(&mut source.comment, cfg.comment);
    modified |= set_if_changed(&mut source.shared_service, cfg.shared_service);
    modified |= set_if_changed(&mut source.large_rotating_files, cfg.large_rotating_files);
    modified |= set_if_changed(&mut source.large_modifying_files, cfg.large_modifying_files);
    modified |= set_if_changed(&mut source.bwlimit, cfg.bwlimit);
    modified |= set_if_changed(&mut source.snapshot_mode, cfg.snapshot_mode);
    modified |= set_if_changed(&mut source.preserve_hard_links, cfg.preserve_hard_links);
    modified |= set_if_changed(&mut source.filter, cfg.filter.map(|f| encode_list(&f)));
    modified |= set_if_changed(&mut source.exclude, cfg.exclude.map(|e| encode_list(&e)));
    modified
}

fn new_source(machine_id: &str, name: String, now: i64) -> Source {
    Source {
        id: uuid::Uuid::new_v4().to_string(),
        name,
        machine_id: machine_id.to_string(),
        comment: None,
        path: String::new(),
        filter: "[]".to_string(),
        exclude: "[]".to_string(),
        frequency: DEFAULT_FREQUENCY.to_string(),
        retention: DEFAULT_RETENTION.to_string(),
        bwlimit: None,
        snapshot_mode: None,
        preserve_hard_links: false,
        shared_service: false,
        large_rotating_files: false,
        large_modifying_files: false,
        active: true,
        success: true,
        published: true,
        date_added: now,
        date_updated: now,
        date_last_backed_up: None,
        // Immediately due.
        date_next_backup: now,
        revision: 0,
    }
}

impl Broker {
    /// Register or update a machine and reconcile its declared sources.
    #[instrument(skip(self, req), fields(op = "update_config", machine_uuid = %req.machine.uuid))]
    pub async fn update_config(
        &self,
        req: UpdateConfigRequest,
    ) -> Result<UpdateConfigResponse, ApiError> {
        let now = self.now();
        let ts = to_unix(now);
        let UpdateConfigRequest {
            auth,
            machine: mut cfg,
            sources: legacy_sources,
        } = req;

        let found = self.db.get_machine_by_uuid(&cfg.uuid).await?;
        let existing = check_login(&self.hasher, found, &cfg.secret, true)
            .inspect_err(|_| warn!("Machine login failed"))?;

        let (mut machine, mut modified, is_new) = match existing {
            Some(machine) => (machine, false, false),
            None => (self.new_machine(&cfg, auth.as_ref(), ts).await?, true, true),
        };

        let published = cfg.published.unwrap_or(true);
        modified |= set_if_changed(&mut machine.published, Some(published));
        modified |= set_if_changed(&mut machine.environment_name, cfg.environment_name.take());
        modified |= set_if_changed(&mut machine.service_name, cfg.service_name.take());
        modified |= set_if_changed(&mut machine.unit_name, cfg.unit_name.take());
        modified |= set_if_changed(&mut machine.comment, cfg.comment.take());
        modified |= set_if_changed(&mut machine.ssh_public_key, cfg.ssh_public_key.take());

        if modified {
            machine.date_updated = ts;
            machine.validate()?;
            if is_new {
                self.db.insert_machine(&machine).await?;
                info!(machine_id = %machine.id, storage_id = %machine.storage_id, "Machine registered");
            } else {
                machine = self.db.update_machine(&machine).await?;
                info!(machine_id = %machine.id, "Machine updated");
            }
        }

        let declared = match (cfg.sources.take(), legacy_sources) {
            (Some(sources), _) => sources,
            (None, Some(sources)) => {
                warn!("Deprecated top-level \"sources\" in update_config");
                sources
            }
            (None, None) => BTreeMap::new(),
        };
        self.sync_sources(&machine, declared, now).await?;

        let storage = self.db.get_storage(&machine.storage_id).await?;
        Ok(UpdateConfigResponse::from(&storage))
    }

    /// A not-yet-stored machine, authorized by a registration secret and
    /// bound to a freshly assigned storage unit.
    async fn new_machine(
        &self,
        cfg: &MachineConfig,
        auth: Option<&RegistrationAuth>,
        now: i64,
    ) -> Result<Machine, ApiError> {
        let credential =
            resolve_registration_auth(&self.db, &self.hasher, SecretKind::MachineReg, auth).await?;

        let candidates: Vec<(String, i64)> = self
            .db
            .list_live_storages()
            .await?
            .into_iter()
            .map(|s| (s.id, s.space_available))
            .collect();
        let storage_id = assign(&candidates).inspect_err(|_| warn!("No storage available"))?;

        let secret_hash = self
            .hasher
            .hash(&cfg.secret)
            .map_err(|e| ApiError::Internal(format!("Secret hashing failed: {e}")))?;

        Ok(Machine {
            id: uuid::Uuid::new_v4().to_string(),
            uuid: cfg.uuid.clone(),
            secret_hash,
            environment_name: None,
            service_name: None,
            unit_name: String::new(),
            comment: None,
            ssh_public_key: String::new(),
            auth_id: credential.id,
            storage_id,
            active: true,
            published: true,
            date_registered: now,
            date_updated: now,
            date_checked_in: None,
            revision: 0,
        })
    }

    /// Bring the machine's sources in line with the declared set.
    ///
    /// Each source is written on its own; a failure stops processing but
    /// keeps the sources already written.
    async fn sync_sources(
        &self,
        machine: &Machine,
        mut declared: BTreeMap<String, SourceConfig>,
        now: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        let ts = to_unix(now);

        for mut source in self.db.list_sources_for_machine(&machine.id).await? {
            let Some(cfg) = declared.remove(&source.name) else {
                if source.published {
                    source.published = false;
                    source.date_updated = ts;
                    self.db.update_source(&source).await?;
                    info!(source = %source.name, "Source no longer declared, unpublished");
                }
                continue;
            };

            let old_frequency = source.frequency.clone();
            let mut modified = set_if_changed(&mut source.published, Some(true));
            modified |= apply_source_config(&mut source, cfg);
            if !modified {
                continue;
            }

            source.date_updated = ts;
            source.validate()?;
            if source.frequency != old_frequency {
                source.date_next_backup = next_backup(&source, now)?;
                info!(
                    source = %source.name,
                    frequency = %source.frequency,
                    next_backup = source.date_next_backup,
                    "Source rescheduled"
                );
            }
            self.db.update_source(&source).await?;
        }

        for (name, cfg) in declared {
            let mut source = new_source(&machine.id, name, ts);
            apply_source_config(&mut source, cfg);
            source.validate()?;
            self.db.insert_source(&source).await?;
            info!(source = %source.name, "Source added");
        }

        Ok(())
    }

    /// Authenticate a machine by UUID and secret.
    async fn machine_login(&self, creds: &MachineCredentials) -> Result<Machine, ApiError> {
        let found = self.db.get_machine_by_uuid(&creds.uuid).await?;
        check_login(&self.hasher, found, &creds.secret, false)
            .inspect_err(|_| warn!("Machine login failed"))?
            .ok_or(ApiError::BadAuth)
    }

    /// Due sources of the calling machine, with filters expanded.
    #[instrument(skip(self, req), fields(op = "agent_ping_checkin", machine_uuid = %req.machine.uuid))]
    pub async fn agent_ping_checkin(
        &self,
        req: AgentRequest,
    ) -> Result<AgentCheckinResponse, ApiError> {
        let machine = self.machine_login(&req.machine).await?;
        if !machine.published {
            warn!("Unpublished machine tried to check in");
            return Err(ApiError::BadAuth);
        }

        let ts = to_unix(self.now());
        let storage = self.db.get_storage(&machine.storage_id).await?;
        let due = self.db.list_due_sources(&machine.id, ts).await?;
        let scheduled = self.transfer_sources(&due, &storage).await?;
        self.db.touch_machine_checkin(&machine.id, ts).await?;

        Ok(AgentCheckinResponse {
            machine: ScheduledSources {
                scheduled_sources: scheduled.clone(),
            },
            scheduled_sources: scheduled,
        })
    }

    /// Every active source of the calling machine, due or not.
    #[instrument(skip(self, req), fields(op = "agent_ping_restore", machine_uuid = %req.machine.uuid))]
    pub async fn agent_ping_restore(
        &self,
        req: AgentRequest,
    ) -> Result<AgentRestoreResponse, ApiError> {
        let machine = self.machine_login(&req.machine).await?;

        let storage = self.db.get_storage(&machine.storage_id).await?;
        let sources = self.db.list_active_sources(&machine.id).await?;
        let sources = self.transfer_sources(&sources, &storage).await?;

        Ok(AgentRestoreResponse {
            machine: AllSources { sources },
        })
    }
}
