//! SQLite persistence for campaigns, occurrences, and metric samples
//!
//! The occurrence table is the durable source of truth for schedule state;
//! the in-memory job store can always be rebuilt from it after a restart.
//! Uses `Mutex` to ensure thread-safety for the SQLite connection.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    Campaign, CampaignStatus, MetricSample, Occurrence, OccurrenceStatus,
};

/// Database wrapper holding the scheduler's persisted state
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_schema()?;

        tracing::info!(path = %path.display(), "Database initialized");
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_schema()?;
        Ok(db)
    }

    /// Create the database schema
    fn create_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS campaigns (
                    id TEXT PRIMARY KEY,
                    product_id TEXT,
                    name TEXT NOT NULL,
                    channel TEXT NOT NULL,
                    frequency TEXT NOT NULL,
                    start_time TEXT NOT NULL,
                    budget REAL NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'draft',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_campaigns_status
                    ON campaigns(status);

                CREATE TABLE IF NOT EXISTS occurrences (
                    id TEXT PRIMARY KEY,
                    campaign_id TEXT NOT NULL,
                    scheduled_time TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    job_handle TEXT,
                    executed_at TEXT,
                    attempt INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_occurrences_campaign
                    ON occurrences(campaign_id);

                CREATE INDEX IF NOT EXISTS idx_occurrences_status
                    ON occurrences(status);

                CREATE TABLE IF NOT EXISTS metrics (
                    id TEXT PRIMARY KEY,
                    campaign_id TEXT NOT NULL,
                    impressions INTEGER NOT NULL DEFAULT 0,
                    clicks INTEGER NOT NULL DEFAULT 0,
                    engagement_rate REAL NOT NULL DEFAULT 0,
                    conversion_rate REAL NOT NULL DEFAULT 0,
                    cpa REAL NOT NULL DEFAULT 0,
                    timestamp TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_metrics_campaign_time
                    ON metrics(campaign_id, timestamp);
                "#,
        )
        .context("Failed to create schema")?;

        Ok(())
    }

    // ========================================================================
    // Campaigns
    // ========================================================================

    /// Insert a new campaign
    pub fn insert_campaign(&self, campaign: &Campaign) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO campaigns
                (id, product_id, name, channel, frequency, start_time, budget, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                campaign.id.to_string(),
                campaign.product_id.map(|id| id.to_string()),
                campaign.name,
                campaign.channel.as_str(),
                campaign.frequency.as_str(),
                campaign.start_time.to_rfc3339(),
                campaign.budget,
                campaign.status.as_str(),
                campaign.created_at.to_rfc3339(),
                campaign.updated_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert campaign")?;
        Ok(())
    }

    /// Fetch a campaign by id
    pub fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, product_id, name, channel, frequency, start_time, budget, status, created_at, updated_at
                 FROM campaigns WHERE id = ?1",
                params![id.to_string()],
                CampaignRow::from_row,
            )
            .optional()
            .context("Failed to query campaign")?;

        row.map(CampaignRow::into_campaign).transpose()
    }

    /// List all campaigns
    pub fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, product_id, name, channel, frequency, start_time, budget, status, created_at, updated_at
             FROM campaigns ORDER BY created_at",
        )?;

        let rows = stmt
            .query_map([], CampaignRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list campaigns")?;

        rows.into_iter().map(CampaignRow::into_campaign).collect()
    }

    /// List campaigns in a given status
    pub fn campaigns_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, product_id, name, channel, frequency, start_time, budget, status, created_at, updated_at
             FROM campaigns WHERE status = ?1 ORDER BY created_at",
        )?;

        let rows = stmt
            .query_map(params![status.as_str()], CampaignRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list campaigns by status")?;

        rows.into_iter().map(CampaignRow::into_campaign).collect()
    }

    /// Update a campaign's lifecycle status
    pub fn update_campaign_status(&self, id: Uuid, status: CampaignStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE campaigns SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), id.to_string()],
        )?;
        anyhow::ensure!(changed == 1, "Campaign {id} not found");
        Ok(())
    }

    /// Update a campaign's budget
    pub fn update_campaign_budget(&self, id: Uuid, budget: f64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE campaigns SET budget = ?1, updated_at = ?2 WHERE id = ?3",
            params![budget, Utc::now().to_rfc3339(), id.to_string()],
        )?;
        anyhow::ensure!(changed == 1, "Campaign {id} not found");
        Ok(())
    }

    /// Update a campaign's schedule parameters
    pub fn update_campaign_schedule(
        &self,
        id: Uuid,
        frequency: crate::models::Frequency,
        start_time: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE campaigns SET frequency = ?1, start_time = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                frequency.as_str(),
                start_time.to_rfc3339(),
                Utc::now().to_rfc3339(),
                id.to_string()
            ],
        )?;
        anyhow::ensure!(changed == 1, "Campaign {id} not found");
        Ok(())
    }

    /// Delete a campaign row
    pub fn delete_campaign(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM campaigns WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    // ========================================================================
    // Occurrences
    // ========================================================================

    /// Insert a new occurrence
    pub fn insert_occurrence(&self, occurrence: &Occurrence) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO occurrences
                (id, campaign_id, scheduled_time, status, job_handle, executed_at, attempt, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                occurrence.id.to_string(),
                occurrence.campaign_id.to_string(),
                occurrence.scheduled_time.to_rfc3339(),
                occurrence.status.as_str(),
                occurrence.job_handle,
                occurrence.executed_at.map(|ts| ts.to_rfc3339()),
                occurrence.attempt,
                occurrence.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert occurrence")?;
        Ok(())
    }

    /// Fetch an occurrence by id
    pub fn get_occurrence(&self, id: Uuid) -> Result<Option<Occurrence>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, campaign_id, scheduled_time, status, job_handle, executed_at, attempt, created_at
                 FROM occurrences WHERE id = ?1",
                params![id.to_string()],
                OccurrenceRow::from_row,
            )
            .optional()
            .context("Failed to query occurrence")?;

        row.map(OccurrenceRow::into_occurrence).transpose()
    }

    /// All occurrences of a campaign, in scheduled order
    pub fn occurrences_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<Occurrence>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, campaign_id, scheduled_time, status, job_handle, executed_at, attempt, created_at
             FROM occurrences WHERE campaign_id = ?1 ORDER BY scheduled_time",
        )?;

        let rows = stmt
            .query_map(params![campaign_id.to_string()], OccurrenceRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list occurrences")?;

        rows.into_iter()
            .map(OccurrenceRow::into_occurrence)
            .collect()
    }

    /// Non-terminal occurrences of a campaign, in scheduled order
    pub fn open_occurrences(&self, campaign_id: Uuid) -> Result<Vec<Occurrence>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, campaign_id, scheduled_time, status, job_handle, executed_at, attempt, created_at
             FROM occurrences
             WHERE campaign_id = ?1 AND status IN ('pending', 'executing', 'rescheduled')
             ORDER BY scheduled_time",
        )?;

        let rows = stmt
            .query_map(params![campaign_id.to_string()], OccurrenceRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list open occurrences")?;

        rows.into_iter()
            .map(OccurrenceRow::into_occurrence)
            .collect()
    }

    /// Whether any occurrence of the campaign is currently executing
    pub fn has_executing(&self, campaign_id: Uuid) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM occurrences WHERE campaign_id = ?1 AND status = 'executing')",
                params![campaign_id.to_string()],
                |row| row.get(0),
            )
            .context("Failed to check executing occurrences")?;
        Ok(exists)
    }

    /// Transition an occurrence to `executing`, consuming one attempt
    pub fn mark_executing(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE occurrences SET status = 'executing', attempt = attempt + 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        anyhow::ensure!(changed == 1, "Occurrence {id} not found");
        Ok(())
    }

    /// Atomically claim an occurrence for execution.
    ///
    /// Succeeds only if the occurrence is still pending/rescheduled and no
    /// other occurrence of the campaign is executing. This single guarded
    /// update is what enforces the one-executing-per-campaign invariant;
    /// callers must not pre-check and race.
    pub fn try_mark_executing(&self, id: Uuid, campaign_id: Uuid) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE occurrences SET status = 'executing', attempt = attempt + 1
             WHERE id = ?1
               AND status IN ('pending', 'rescheduled')
               AND NOT EXISTS (
                   SELECT 1 FROM occurrences
                   WHERE campaign_id = ?2 AND status = 'executing'
               )",
            params![id.to_string(), campaign_id.to_string()],
        )?;
        Ok(changed == 1)
    }

    /// Transition an occurrence to `completed` with its execution time
    pub fn complete_occurrence(&self, id: Uuid, executed_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE occurrences SET status = 'completed', executed_at = ?1 WHERE id = ?2",
            params![executed_at.to_rfc3339(), id.to_string()],
        )?;
        anyhow::ensure!(changed == 1, "Occurrence {id} not found");
        Ok(())
    }

    /// Set an occurrence status without other side effects
    pub fn set_occurrence_status(&self, id: Uuid, status: OccurrenceStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE occurrences SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id.to_string()],
        )?;
        anyhow::ensure!(changed == 1, "Occurrence {id} not found");
        Ok(())
    }

    /// Mark an occurrence rescheduled and point it at its retry job
    pub fn reschedule_occurrence(&self, id: Uuid, job_handle: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE occurrences SET status = 'rescheduled', job_handle = ?1 WHERE id = ?2",
            params![job_handle, id.to_string()],
        )?;
        anyhow::ensure!(changed == 1, "Occurrence {id} not found");
        Ok(())
    }

    /// Cancel all non-terminal occurrences of a campaign.
    ///
    /// Returns the job handles that were attached, so the caller can remove
    /// them from the job store (best-effort).
    pub fn cancel_open_occurrences(&self, campaign_id: Uuid) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT job_handle FROM occurrences
             WHERE campaign_id = ?1 AND status IN ('pending', 'executing', 'rescheduled')
               AND job_handle IS NOT NULL",
        )?;
        let handles: Vec<String> = stmt
            .query_map(params![campaign_id.to_string()], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        conn.execute(
            "UPDATE occurrences SET status = 'cancelled'
             WHERE campaign_id = ?1 AND status IN ('pending', 'executing', 'rescheduled')",
            params![campaign_id.to_string()],
        )?;

        Ok(handles)
    }

    /// Delete every occurrence row of a campaign
    pub fn delete_occurrences(&self, campaign_id: Uuid) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM occurrences WHERE campaign_id = ?1",
            params![campaign_id.to_string()],
        )?;
        Ok(())
    }

    /// Delete terminal occurrences scheduled before the cutoff.
    /// Returns the number of rows removed.
    pub fn cleanup_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM occurrences
             WHERE scheduled_time < ?1 AND status IN ('completed', 'failed', 'cancelled')",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(removed)
    }

    // ========================================================================
    // Metrics
    // ========================================================================

    /// Append a metric sample. Samples are immutable once written.
    pub fn append_metric(&self, sample: &MetricSample) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO metrics
                (id, campaign_id, impressions, clicks, engagement_rate, conversion_rate, cpa, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                sample.id.to_string(),
                sample.campaign_id.to_string(),
                sample.impressions as i64,
                sample.clicks as i64,
                sample.engagement_rate,
                sample.conversion_rate,
                sample.cpa,
                sample.timestamp.to_rfc3339(),
            ],
        )
        .context("Failed to append metric")?;
        Ok(())
    }

    /// Metric samples of a campaign at or after `since`, oldest first
    pub fn metrics_since(
        &self,
        campaign_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, campaign_id, impressions, clicks, engagement_rate, conversion_rate, cpa, timestamp
             FROM metrics WHERE campaign_id = ?1 AND timestamp >= ?2 ORDER BY timestamp",
        )?;

        let rows = stmt
            .query_map(
                params![campaign_id.to_string(), since.to_rfc3339()],
                MetricRow::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to query metrics")?;

        rows.into_iter().map(MetricRow::into_sample).collect()
    }

    /// Total number of samples stored for a campaign
    pub fn metric_count(&self, campaign_id: Uuid) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM metrics WHERE campaign_id = ?1",
            params![campaign_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

// ============================================================================
// Row mapping
// ============================================================================

struct CampaignRow {
    id: String,
    product_id: Option<String>,
    name: String,
    channel: String,
    frequency: String,
    start_time: String,
    budget: f64,
    status: String,
    created_at: String,
    updated_at: String,
}

impl CampaignRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            product_id: row.get(1)?,
            name: row.get(2)?,
            channel: row.get(3)?,
            frequency: row.get(4)?,
            start_time: row.get(5)?,
            budget: row.get(6)?,
            status: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_campaign(self) -> Result<Campaign> {
        Ok(Campaign {
            id: parse_uuid(&self.id)?,
            product_id: self.product_id.as_deref().map(parse_uuid).transpose()?,
            name: self.name,
            channel: self.channel.parse().map_err(anyhow::Error::msg)?,
            frequency: self.frequency.parse().map_err(anyhow::Error::msg)?,
            start_time: parse_timestamp(&self.start_time)?,
            budget: self.budget,
            status: self.status.parse().map_err(anyhow::Error::msg)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

struct OccurrenceRow {
    id: String,
    campaign_id: String,
    scheduled_time: String,
    status: String,
    job_handle: Option<String>,
    executed_at: Option<String>,
    attempt: u32,
    created_at: String,
}

impl OccurrenceRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            campaign_id: row.get(1)?,
            scheduled_time: row.get(2)?,
            status: row.get(3)?,
            job_handle: row.get(4)?,
            executed_at: row.get(5)?,
            attempt: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_occurrence(self) -> Result<Occurrence> {
        Ok(Occurrence {
            id: parse_uuid(&self.id)?,
            campaign_id: parse_uuid(&self.campaign_id)?,
            scheduled_time: parse_timestamp(&self.scheduled_time)?,
            status: self.status.parse().map_err(anyhow::Error::msg)?,
            job_handle: self.job_handle,
            executed_at: self
                .executed_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            attempt: self.attempt,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

struct MetricRow {
    id: String,
    campaign_id: String,
    impressions: i64,
    clicks: i64,
    engagement_rate: f64,
    conversion_rate: f64,
    cpa: f64,
    timestamp: String,
}

impl MetricRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            campaign_id: row.get(1)?,
            impressions: row.get(2)?,
            clicks: row.get(3)?,
            engagement_rate: row.get(4)?,
            conversion_rate: row.get(5)?,
            cpa: row.get(6)?,
            timestamp: row.get(7)?,
        })
    }

    fn into_sample(self) -> Result<MetricSample> {
        Ok(MetricSample {
            id: parse_uuid(&self.id)?,
            campaign_id: parse_uuid(&self.campaign_id)?,
            impressions: self.impressions.max(0) as u64,
            clicks: self.clicks.max(0) as u64,
            engagement_rate: self.engagement_rate,
            conversion_rate: self.conversion_rate,
            cpa: self.cpa,
            timestamp: parse_timestamp(&self.timestamp)?,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("Invalid UUID in database: {s}"))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp in database: {s}"))?
        .with_timezone(&Utc))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CampaignSpec, Channel, Frequency};
    use chrono::Duration;

    fn test_campaign() -> Campaign {
        Campaign::new(CampaignSpec {
            name: "test-campaign".to_string(),
            product_id: Some(Uuid::new_v4()),
            channel: Channel::Facebook,
            frequency: Frequency::Weekly,
            start_time: Utc::now(),
            budget: 250.0,
        })
    }

    #[test]
    fn test_open_creates_file_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cadence.db");

        let db = Database::open(&path).unwrap();
        assert!(path.exists());

        let campaign = test_campaign();
        db.insert_campaign(&campaign).unwrap();

        // Reopen and read back through a fresh connection
        drop(db);
        let db = Database::open(&path).unwrap();
        assert!(db.get_campaign(campaign.id).unwrap().is_some());
    }

    #[test]
    fn test_campaign_roundtrip() {
        let db = Database::in_memory().unwrap();
        let campaign = test_campaign();

        db.insert_campaign(&campaign).unwrap();
        let loaded = db.get_campaign(campaign.id).unwrap().unwrap();

        assert_eq!(loaded.id, campaign.id);
        assert_eq!(loaded.name, campaign.name);
        assert_eq!(loaded.channel, Channel::Facebook);
        assert_eq!(loaded.frequency, Frequency::Weekly);
        assert_eq!(loaded.status, CampaignStatus::Draft);
        assert!((loaded.budget - 250.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_get_missing_campaign_is_none() {
        let db = Database::in_memory().unwrap();
        assert!(db.get_campaign(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_campaign_status_and_budget_updates() {
        let db = Database::in_memory().unwrap();
        let campaign = test_campaign();
        db.insert_campaign(&campaign).unwrap();

        db.update_campaign_status(campaign.id, CampaignStatus::Active)
            .unwrap();
        db.update_campaign_budget(campaign.id, 900.0).unwrap();

        let loaded = db.get_campaign(campaign.id).unwrap().unwrap();
        assert_eq!(loaded.status, CampaignStatus::Active);
        assert!((loaded.budget - 900.0).abs() < f64::EPSILON);

        let active = db.campaigns_by_status(CampaignStatus::Active).unwrap();
        assert_eq!(active.len(), 1);
    }

    #[test]
    fn test_update_missing_campaign_errors() {
        let db = Database::in_memory().unwrap();
        assert!(db
            .update_campaign_status(Uuid::new_v4(), CampaignStatus::Active)
            .is_err());
    }

    #[test]
    fn test_occurrence_lifecycle() {
        let db = Database::in_memory().unwrap();
        let campaign = test_campaign();
        db.insert_campaign(&campaign).unwrap();

        let occurrence =
            Occurrence::new(campaign.id, Utc::now()).with_job_handle("exec-1");
        db.insert_occurrence(&occurrence).unwrap();

        assert!(!db.has_executing(campaign.id).unwrap());

        db.mark_executing(occurrence.id).unwrap();
        assert!(db.has_executing(campaign.id).unwrap());

        let loaded = db.get_occurrence(occurrence.id).unwrap().unwrap();
        assert_eq!(loaded.status, OccurrenceStatus::Executing);
        assert_eq!(loaded.attempt, 1);

        let executed_at = Utc::now();
        db.complete_occurrence(occurrence.id, executed_at).unwrap();

        let loaded = db.get_occurrence(occurrence.id).unwrap().unwrap();
        assert_eq!(loaded.status, OccurrenceStatus::Completed);
        assert!(loaded.executed_at.is_some());
        assert!(!db.has_executing(campaign.id).unwrap());
    }

    #[test]
    fn test_cancel_open_occurrences_returns_handles() {
        let db = Database::in_memory().unwrap();
        let campaign = test_campaign();
        db.insert_campaign(&campaign).unwrap();

        let now = Utc::now();
        for i in 0..3 {
            let occ = Occurrence::new(campaign.id, now + Duration::days(i))
                .with_job_handle(format!("exec-{i}"));
            db.insert_occurrence(&occ).unwrap();
        }

        // A completed occurrence must be untouched
        let done = Occurrence::new(campaign.id, now - Duration::days(1));
        db.insert_occurrence(&done).unwrap();
        db.mark_executing(done.id).unwrap();
        db.complete_occurrence(done.id, now).unwrap();

        let handles = db.cancel_open_occurrences(campaign.id).unwrap();
        assert_eq!(handles.len(), 3);

        assert!(db.open_occurrences(campaign.id).unwrap().is_empty());
        let all = db.occurrences_for_campaign(campaign.id).unwrap();
        assert_eq!(
            all.iter()
                .filter(|o| o.status == OccurrenceStatus::Cancelled)
                .count(),
            3
        );
        assert_eq!(
            all.iter()
                .filter(|o| o.status == OccurrenceStatus::Completed)
                .count(),
            1
        );
    }

    #[test]
    fn test_cleanup_terminal_before() {
        let db = Database::in_memory().unwrap();
        let campaign = test_campaign();
        db.insert_campaign(&campaign).unwrap();

        let old = Occurrence::new(campaign.id, Utc::now() - Duration::days(60));
        db.insert_occurrence(&old).unwrap();
        db.mark_executing(old.id).unwrap();
        db.complete_occurrence(old.id, Utc::now() - Duration::days(60))
            .unwrap();

        let recent = Occurrence::new(campaign.id, Utc::now());
        db.insert_occurrence(&recent).unwrap();

        let removed = db
            .cleanup_terminal_before(Utc::now() - Duration::days(30))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.occurrences_for_campaign(campaign.id).unwrap().len(), 1);
    }

    #[test]
    fn test_metrics_window_query() {
        let db = Database::in_memory().unwrap();
        let campaign = test_campaign();
        db.insert_campaign(&campaign).unwrap();

        let mut old_sample = MetricSample {
            id: Uuid::new_v4(),
            campaign_id: campaign.id,
            impressions: 1000,
            clicks: 30,
            engagement_rate: 0.04,
            conversion_rate: 0.012,
            cpa: 55.0,
            timestamp: Utc::now() - Duration::days(10),
        };
        db.append_metric(&old_sample).unwrap();

        old_sample.id = Uuid::new_v4();
        old_sample.timestamp = Utc::now() - Duration::days(1);
        db.append_metric(&old_sample).unwrap();

        let window = db
            .metrics_since(campaign.id, Utc::now() - Duration::days(7))
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(db.metric_count(campaign.id).unwrap(), 2);
    }
}
