//! Database queries for sources, backup logs and filter sets.

use std::collections::HashMap;

use super::db::TurkuDatabase;
use super::models::{BackupLogEntry, FilterSet, Source};
use super::queries::check_revision;
use turku_core::db::DatabaseError;

impl TurkuDatabase {
    // =========================================================================
    // Source queries
    // =========================================================================

    /// Add a source to a machine.
    pub async fn insert_source(&self, source: &Source) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO sources (id, name, machine_id, comment, path, filter, exclude, frequency, retention, bwlimit, snapshot_mode, preserve_hard_links, shared_service, large_rotating_files, large_modifying_files, active, success, published, date_added, date_updated, date_last_backed_up, date_next_backup, revision) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&source.id)
        .bind(&source.name)
        .bind(&source.machine_id)
        .bind(&source.comment)
        .bind(&source.path)
        .bind(&source.filter)
        .bind(&source.exclude)
        .bind(&source.frequency)
        .bind(&source.retention)
        .bind(&source.bwlimit)
        .bind(&source.snapshot_mode)
        .bind(source.preserve_hard_links)
        .bind(source.shared_service)
        .bind(source.large_rotating_files)
        .bind(source.large_modifying_files)
        .bind(source.active)
        .bind(source.success)
        .bind(source.published)
        .bind(source.date_added)
        .bind(source.date_updated)
        .bind(source.date_last_backed_up)
        .bind(source.date_next_backup)
        .bind(source.revision)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Write back every mutable field of a source.
    ///
    /// Returns the row as stored, with its new revision.
    pub async fn update_source(&self, source: &Source) -> Result<Source, DatabaseError> {
        let result = sqlx::query(
            "UPDATE sources SET comment = ?, path = ?, filter = ?, exclude = ?, frequency = ?, retention = ?, bwlimit = ?, snapshot_mode = ?, preserve_hard_links = ?, shared_service = ?, large_rotating_files = ?, large_modifying_files = ?, active = ?, success = ?, published = ?, date_updated = ?, date_last_backed_up = ?, date_next_backup = ?, revision = revision + 1 WHERE id = ? AND revision = ?",
        )
        .bind(&source.comment)
        .bind(&source.path)
        .bind(&source.filter)
        .bind(&source.exclude)
        .bind(&source.frequency)
        .bind(&source.retention)
        .bind(&source.bwlimit)
        .bind(&source.snapshot_mode)
        .bind(source.preserve_hard_links)
        .bind(source.shared_service)
        .bind(source.large_rotating_files)
        .bind(source.large_modifying_files)
        .bind(source.active)
        .bind(source.success)
        .bind(source.published)
        .bind(source.date_updated)
        .bind(source.date_last_backed_up)
        .bind(source.date_next_backup)
        .bind(&source.id)
        .bind(source.revision)
        .execute(self.pool())
        .await?;

        check_revision(result.rows_affected(), "Source", &source.id)?;
        Ok(Source {
            revision: source.revision + 1,
            ..source.clone()
        })
    }

    /// Get a source by row ID.
    pub async fn get_source(&self, id: &str) -> Result<Source, DatabaseError> {
        sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Source {id}")))
    }

    /// Get an enabled, published source of a machine by name.
    pub async fn get_live_source(
        &self,
        machine_id: &str,
        name: &str,
    ) -> Result<Option<Source>, DatabaseError> {
        let source = sqlx::query_as::<_, Source>(
            "SELECT * FROM sources WHERE machine_id = ? AND name = ? AND active = 1 AND published = 1",
        )
        .bind(machine_id)
        .bind(name)
        .fetch_optional(self.pool())
        .await?;

        Ok(source)
    }

    /// Every source of a machine, whatever its state.
    pub async fn list_sources_for_machine(
        &self,
        machine_id: &str,
    ) -> Result<Vec<Source>, DatabaseError> {
        let sources =
            sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE machine_id = ? ORDER BY name")
                .bind(machine_id)
                .fetch_all(self.pool())
                .await?;

        Ok(sources)
    }

    /// Enabled, published sources of a machine due at or before `now`.
    pub async fn list_due_sources(
        &self,
        machine_id: &str,
        now: i64,
    ) -> Result<Vec<Source>, DatabaseError> {
        let sources = sqlx::query_as::<_, Source>(
            "SELECT * FROM sources WHERE machine_id = ? AND date_next_backup <= ? AND active = 1 AND published = 1 ORDER BY name",
        )
        .bind(machine_id)
        .bind(now)
        .fetch_all(self.pool())
        .await?;

        Ok(sources)
    }

    /// Enabled sources of a machine, published or not.
    pub async fn list_active_sources(
        &self,
        machine_id: &str,
    ) -> Result<Vec<Source>, DatabaseError> {
        let sources = sqlx::query_as::<_, Source>(
            "SELECT * FROM sources WHERE machine_id = ? AND active = 1 ORDER BY name",
        )
        .bind(machine_id)
        .fetch_all(self.pool())
        .await?;

        Ok(sources)
    }

    /// Enabled, published sources of enabled, published machines.
    pub async fn list_live_sources(&self) -> Result<Vec<Source>, DatabaseError> {
        let sources = sqlx::query_as::<_, Source>(
            "SELECT s.* FROM sources s JOIN machines m ON m.id = s.machine_id \
             WHERE m.active = 1 AND m.published = 1 AND s.active = 1 AND s.published = 1 \
             ORDER BY m.unit_name, s.name",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(sources)
    }

    // =========================================================================
    // Backup log queries
    // =========================================================================

    /// Store the outcome of a backup run.
    ///
    /// The source row (already carrying the new success flag and schedule)
    /// and the log entry are written in one transaction.
    pub async fn record_backup_result(
        &self,
        source: &Source,
        log: &BackupLogEntry,
    ) -> Result<Source, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "UPDATE sources SET success = ?, date_last_backed_up = ?, date_next_backup = ?, revision = revision + 1 WHERE id = ? AND revision = ?",
        )
        .bind(source.success)
        .bind(source.date_last_backed_up)
        .bind(source.date_next_backup)
        .bind(&source.id)
        .bind(source.revision)
        .execute(&mut *tx)
        .await?;
        check_revision(result.rows_affected(), "Source", &source.id)?;

        sqlx::query(
            "INSERT INTO backup_logs (id, source_id, storage_id, date, success, date_begin, date_end, snapshot, summary) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&log.id)
        .bind(&log.source_id)
        .bind(&log.storage_id)
        .bind(log.date)
        .bind(log.success)
        .bind(log.date_begin)
        .bind(log.date_end)
        .bind(&log.snapshot)
        .bind(&log.summary)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Source {
            revision: source.revision + 1,
            ..source.clone()
        })
    }

    /// Log entries for a source, oldest first.
    pub async fn list_logs_for_source(
        &self,
        source_id: &str,
    ) -> Result<Vec<BackupLogEntry>, DatabaseError> {
        let logs = sqlx::query_as::<_, BackupLogEntry>(
            "SELECT * FROM backup_logs WHERE source_id = ? ORDER BY date, id",
        )
        .bind(source_id)
        .fetch_all(self.pool())
        .await?;

        Ok(logs)
    }

    /// Delete log entries whose run ended before `cutoff`.
    pub async fn delete_logs_ended_before(&self, cutoff: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM backup_logs WHERE date_end < ?")
            .bind(cutoff)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Filter set queries
    // =========================================================================

    /// Store a named filter set.
    pub async fn insert_filter_set(&self, set: &FilterSet) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO filter_sets (id, name, filters, comment, active, date_added) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&set.id)
        .bind(&set.name)
        .bind(&set.filters)
        .bind(&set.comment)
        .bind(set.active)
        .bind(set.date_added)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Rules of every active filter set, keyed by name.
    pub async fn active_filter_sets(&self) -> Result<HashMap<String, Vec<String>>, DatabaseError> {
        let sets = sqlx::query_as::<_, FilterSet>("SELECT * FROM filter_sets WHERE active = 1")
            .fetch_all(self.pool())
            .await?;

        Ok(sets
            .into_iter()
            .map(|set| {
                let rules = set.rules();
                (set.name, rules)
            })
            .collect())
    }
}
