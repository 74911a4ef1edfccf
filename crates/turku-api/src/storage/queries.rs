//! Database queries for auths, storage units and machines.
//!
//! Full-row updates are optimistic: they match on `revision` and fail with
//! [`DatabaseError::Conflict`] when another writer got there first.
//! Check-in stamps are blind writes.

use super::db::TurkuDatabase;
use super::models::{AuthCredential, Machine, SecretKind, StorageUnit};
use turku_core::db::DatabaseError;

/// Row counts reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, sqlx::FromRow)]
pub struct RecordCounts {
    pub auth: i64,
    pub storage: i64,
    pub machine: i64,
    pub source: i64,
    pub filter_set: i64,
    pub backup_log: i64,
}

pub(super) fn check_revision(
    rows_affected: u64,
    what: &str,
    id: &str,
) -> Result<(), DatabaseError> {
    if rows_affected == 0 {
        return Err(DatabaseError::Conflict(format!(
            "{what} {id} was modified concurrently"
        )));
    }
    Ok(())
}

impl TurkuDatabase {
    // =========================================================================
    // Auth queries
    // =========================================================================

    /// Store a registration credential.
    pub async fn insert_auth(&self, auth: &AuthCredential) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO auths (id, name, secret_hash, secret_type, comment, active, date_added) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&auth.id)
        .bind(&auth.name)
        .bind(&auth.secret_hash)
        .bind(&auth.secret_type)
        .bind(&auth.comment)
        .bind(auth.active)
        .bind(auth.date_added)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Find an active registration credential by name and kind.
    pub async fn get_active_auth(
        &self,
        name: &str,
        kind: SecretKind,
    ) -> Result<Option<AuthCredential>, DatabaseError> {
        let auth = sqlx::query_as::<_, AuthCredential>(
            "SELECT * FROM auths WHERE name = ? AND secret_type = ? AND active = 1",
        )
        .bind(name)
        .bind(kind.as_str())
        .fetch_optional(self.pool())
        .await?;

        Ok(auth)
    }

    /// All active registration credentials of one kind.
    pub async fn list_active_auths(
        &self,
        kind: SecretKind,
    ) -> Result<Vec<AuthCredential>, DatabaseError> {
        let auths = sqlx::query_as::<_, AuthCredential>(
            "SELECT * FROM auths WHERE secret_type = ? AND active = 1 ORDER BY date_added, name",
        )
        .bind(kind.as_str())
        .fetch_all(self.pool())
        .await?;

        Ok(auths)
    }

    // =========================================================================
    // Storage queries
    // =========================================================================

    /// Register a storage unit.
    pub async fn insert_storage(&self, storage: &StorageUnit) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO storages (id, name, secret_hash, comment, ssh_ping_host, ssh_ping_host_keys, ssh_ping_port, ssh_ping_user, space_total, space_available, auth_id, active, published, date_registered, date_updated, date_checked_in, revision) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&storage.id)
        .bind(&storage.name)
        .bind(&storage.secret_hash)
        .bind(&storage.comment)
        .bind(&storage.ssh_ping_host)
        .bind(&storage.ssh_ping_host_keys)
        .bind(storage.ssh_ping_port)
        .bind(&storage.ssh_ping_user)
        .bind(storage.space_total)
        .bind(storage.space_available)
        .bind(&storage.auth_id)
        .bind(storage.active)
        .bind(storage.published)
        .bind(storage.date_registered)
        .bind(storage.date_updated)
        .bind(storage.date_checked_in)
        .bind(storage.revision)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Get a storage unit by row ID.
    pub async fn get_storage(&self, id: &str) -> Result<StorageUnit, DatabaseError> {
        sqlx::query_as::<_, StorageUnit>("SELECT * FROM storages WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Storage {id}")))
    }

    /// Get a storage unit by its unique name.
    pub async fn get_storage_by_name(
        &self,
        name: &str,
    ) -> Result<Option<StorageUnit>, DatabaseError> {
        let storage = sqlx::query_as::<_, StorageUnit>("SELECT * FROM storages WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;

        Ok(storage)
    }

    /// Storage units that are enabled and currently offering themselves.
    pub async fn list_live_storages(&self) -> Result<Vec<StorageUnit>, DatabaseError> {
        let storages = sqlx::query_as::<_, StorageUnit>(
            "SELECT * FROM storages WHERE active = 1 AND published = 1 ORDER BY name",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(storages)
    }

    /// Write back every mutable field of a storage unit.
    ///
    /// Returns the row as stored, with its new revision.
    pub async fn update_storage(&self, storage: &StorageUnit) -> Result<StorageUnit, DatabaseError> {
        let result = sqlx::query(
            "UPDATE storages SET secret_hash = ?, comment = ?, ssh_ping_host = ?, ssh_ping_host_keys = ?, ssh_ping_port = ?, ssh_ping_user = ?, space_total = ?, space_available = ?, active = ?, published = ?, date_updated = ?, date_checked_in = ?, revision = revision + 1 WHERE id = ? AND revision = ?",
        )
        .bind(&storage.secret_hash)
        .bind(&storage.comment)
        .bind(&storage.ssh_ping_host)
        .bind(&storage.ssh_ping_host_keys)
        .bind(storage.ssh_ping_port)
        .bind(&storage.ssh_ping_user)
        .bind(storage.space_total)
        .bind(storage.space_available)
        .bind(storage.active)
        .bind(storage.published)
        .bind(storage.date_updated)
        .bind(storage.date_checked_in)
        .bind(&storage.id)
        .bind(storage.revision)
        .execute(self.pool())
        .await?;

        check_revision(result.rows_affected(), "Storage", &storage.id)?;
        Ok(StorageUnit {
            revision: storage.revision + 1,
            ..storage.clone()
        })
    }

    /// Stamp a storage unit's check-in time.
    pub async fn touch_storage_checkin(&self, id: &str, at: i64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE storages SET date_checked_in = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    // =========================================================================
    // Machine queries
    // =========================================================================

    /// Register a machine.
    pub async fn insert_machine(&self, machine: &Machine) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO machines (id, uuid, secret_hash, environment_name, service_name, unit_name, comment, ssh_public_key, auth_id, storage_id, active, published, date_registered, date_updated, date_checked_in, revision) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&machine.id)
        .bind(&machine.uuid)
        .bind(&machine.secret_hash)
        .bind(&machine.environment_name)
        .bind(&machine.service_name)
        .bind(&machine.unit_name)
        .bind(&machine.comment)
        .bind(&machine.ssh_public_key)
        .bind(&machine.auth_id)
        .bind(&machine.storage_id)
        .bind(machine.active)
        .bind(machine.published)
        .bind(machine.date_registered)
        .bind(machine.date_updated)
        .bind(machine.date_checked_in)
        .bind(machine.revision)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Get a machine by its self-assigned UUID.
    pub async fn get_machine_by_uuid(&self, uuid: &str) -> Result<Option<Machine>, DatabaseError> {
        let machine = sqlx::query_as::<_, Machine>("SELECT * FROM machines WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(self.pool())
            .await?;

        Ok(machine)
    }

    /// Enabled, published machines bound to a storage unit.
    pub async fn list_machines_for_storage(
        &self,
        storage_id: &str,
    ) -> Result<Vec<Machine>, DatabaseError> {
        let machines = sqlx::query_as::<_, Machine>(
            "SELECT * FROM machines WHERE storage_id = ? AND active = 1 AND published = 1 ORDER BY uuid",
        )
        .bind(storage_id)
        .fetch_all(self.pool())
        .await?;

        Ok(machines)
    }

    /// All enabled, published machines.
    pub async fn list_live_machines(&self) -> Result<Vec<Machine>, DatabaseError> {
        let machines = sqlx::query_as::<_, Machine>(
            "SELECT * FROM machines WHERE active = 1 AND published = 1 ORDER BY unit_name, uuid",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(machines)
    }

    /// Write back every mutable field of a machine except its check-in stamp.
    ///
    /// Returns the row as stored, with its new revision.
    pub async fn update_machine(&self, machine: &Machine) -> Result<Machine, DatabaseError> {
        let result = sqlx::query(
            "UPDATE machines SET secret_hash = ?, environment_name = ?, service_name = ?, unit_name = ?, comment = ?, ssh_public_key = ?, storage_id = ?, active = ?, published = ?, date_updated = ?, revision = revision + 1 WHERE id = ? AND revision = ?",
        )
        .bind(&machine.secret_hash)
        .bind(&machine.environment_name)
        .bind(&machine.service_name)
        .bind(&machine.unit_name)
        .bind(&machine.comment)
        .bind(&machine.ssh_public_key)
        .bind(&machine.storage_id)
        .bind(machine.active)
        .bind(machine.published)
        .bind(machine.date_updated)
        .bind(&machine.id)
        .bind(machine.revision)
        .execute(self.pool())
        .await?;

        check_revision(result.rows_affected(), "Machine", &machine.id)?;
        Ok(Machine {
            revision: machine.revision + 1,
            ..machine.clone()
        })
    }

    /// Stamp a machine's check-in time.
    pub async fn touch_machine_checkin(&self, id: &str, at: i64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE machines SET date_checked_in = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Count rows in every registry table.
    pub async fn record_counts(&self) -> Result<RecordCounts, DatabaseError> {
        let counts = sqlx::query_as::<_, RecordCounts>(
            "SELECT \
                (SELECT COUNT(*) FROM auths) AS auth, \
                (SELECT COUNT(*) FROM storages) AS storage, \
                (SELECT COUNT(*) FROM machines) AS machine, \
                (SELECT COUNT(*) FROM sources) AS source, \
                (SELECT COUNT(*) FROM filter_sets) AS filter_set, \
                (SELECT COUNT(*) FROM backup_logs) AS backup_log",
        )
        .fetch_one(self.pool())
        .await?;

        Ok(counts)
    }
}
