//! SQLite storage layer for Watchpost.
//!
//! All timestamps are persisted as unix seconds; dedup and correlation
//! comparisons therefore happen at second granularity. Compound writes
//! (detection + aggregate, incident + link + audit row, lifecycle update
//! + audit row, cascade deletion) each run inside a single transaction
//! so the engine's commit-fully-or-abort-fully contract holds.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::error::{EngineError, EngineResult};
use crate::lifecycle::UpdatePlan;
use crate::model::{
    DailyAggregate, Detection, Incident, IncidentAction, IncidentStatus, Role, User,
};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).unwrap()
}

fn incident_from_row(row: &SqliteRow) -> EngineResult<Incident> {
    let status: String = row.get("status");
    let status = status
        .parse::<IncidentStatus>()
        .map_err(|e| EngineError::Storage(sqlx::Error::Decode(e.into())))?;

    Ok(Incident {
        id: row.get("id"),
        incident_number: row.get("incident_number"),
        camera_id: row.get("camera_id"),
        weapon_type: row.get("weapon_type"),
        detection_id: row.get("detection_id"),
        status,
        priority: row.get("priority"),
        location: row.get("location"),
        description: row.get("description"),
        assigned_to: row.get("assigned_to"),
        created_by: row.get("created_by"),
        resolved_by: row.get("resolved_by"),
        detected_at: from_ts(row.get("detected_at")),
        responded_at: row.get::<Option<i64>, _>("responded_at").map(from_ts),
        resolved_at: row.get::<Option<i64>, _>("resolved_at").map(from_ts),
        response_notes: row.get("response_notes"),
        resolution_notes: row.get("resolution_notes"),
        created_at: from_ts(row.get("created_at")),
        updated_at: from_ts(row.get("updated_at")),
    })
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:watchpost.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                role TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS detection_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                camera_id INTEGER NOT NULL,
                weapon_type TEXT NOT NULL,
                confidence REAL NOT NULL,
                detected_at INTEGER NOT NULL,
                date_only TEXT NOT NULL,
                incident_id INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Index for the dedup recency probe
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_detection_logs_key_ts
            ON detection_logs(camera_id, weapon_type, detected_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_summary (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                camera_id INTEGER NOT NULL,
                detection_date TEXT NOT NULL,
                weapon_type TEXT NOT NULL,
                total_detections INTEGER NOT NULL,
                avg_confidence REAL NOT NULL,
                first_detection_at INTEGER NOT NULL,
                last_detection_at INTEGER NOT NULL,
                UNIQUE(user_id, camera_id, detection_date, weapon_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS incidents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                incident_number TEXT NOT NULL UNIQUE,
                camera_id INTEGER NOT NULL,
                weapon_type TEXT NOT NULL,
                detection_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                location TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                assigned_to INTEGER,
                created_by INTEGER NOT NULL,
                resolved_by INTEGER,
                detected_at INTEGER NOT NULL,
                responded_at INTEGER,
                resolved_at INTEGER,
                response_notes TEXT,
                resolution_notes TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Index for the correlation recency probe
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_incidents_key_ts
            ON incidents(camera_id, weapon_type, detected_at, status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS incident_actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                incident_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                action_type TEXT NOT NULL,
                notes TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Create a user record and return its id.
    pub async fn create_user(&self, username: &str, role: Role) -> EngineResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (username, role, is_active)
            VALUES (?, ?, 1)
            "#,
        )
        .bind(username)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Look up a user by id.
    pub async fn get_user(&self, user_id: i64) -> EngineResult<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, username, role, is_active FROM users WHERE id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let role: String = row.get("role");
            let role = role
                .parse::<Role>()
                .map_err(|e| EngineError::Storage(sqlx::Error::Decode(e.into())))?;
            Ok(User {
                id: row.get("id"),
                username: row.get("username"),
                role,
                is_active: row.get::<i64, _>("is_active") != 0,
            })
        })
        .transpose()
    }

    /// Administratively delete a user and their dependent records.
    ///
    /// Detection logs, daily summaries, and incident actions go first (in
    /// that order, matching the foreign-key dependencies). Incidents are
    /// kept but any assignment to the user is cleared. Returns false when
    /// the user did not exist; nothing is written in that case either,
    /// the transaction still commits empty.
    pub async fn delete_user_cascade(&self, user_id: i64) -> EngineResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM detection_logs WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM daily_summary WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM incident_actions WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE incidents SET assigned_to = NULL WHERE assigned_to = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Detections and aggregates
    // ------------------------------------------------------------------

    /// Find the most recent detection for `(camera_id, weapon_type)`
    /// strictly newer than `cutoff`. Returns the row id and its timestamp.
    ///
    /// The probe is exclusive at the cutoff, so an event landing exactly
    /// one cooldown after its predecessor sees the predecessor as expired.
    pub async fn find_recent_detection(
        &self,
        camera_id: i64,
        weapon_type: &str,
        cutoff: DateTime<Utc>,
    ) -> EngineResult<Option<(i64, DateTime<Utc>)>> {
        let row = sqlx::query(
            r#"
            SELECT id, detected_at
            FROM detection_logs
            WHERE camera_id = ? AND weapon_type = ? AND detected_at > ?
            ORDER BY detected_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(camera_id)
        .bind(weapon_type)
        .bind(cutoff.timestamp())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| (r.get("id"), from_ts(r.get("detected_at")))))
    }

    /// Insert a detection row and refresh its daily aggregate in one
    /// transaction. Returns the new detection id.
    ///
    /// The aggregate upsert recomputes `avg_confidence` as the mean over
    /// all same-day same-key detection rows (including the one just
    /// inserted), preserves `first_detection_at`, and always refreshes
    /// `last_detection_at`.
    pub async fn record_detection(
        &self,
        user_id: i64,
        camera_id: i64,
        weapon_type: &str,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> EngineResult<i64> {
        let ts = now.timestamp();
        let date_only = now.format("%Y-%m-%d").to_string();

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO detection_logs
                (user_id, camera_id, weapon_type, confidence, detected_at, date_only)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(camera_id)
        .bind(weapon_type)
        .bind(confidence)
        .bind(ts)
        .bind(&date_only)
        .execute(&mut *tx)
        .await?;

        let detection_id = result.last_insert_rowid();

        sqlx::query(
            r#"
            INSERT INTO daily_summary
                (user_id, camera_id, detection_date, weapon_type,
                 total_detections, avg_confidence, first_detection_at, last_detection_at)
            VALUES (?, ?, ?, ?, 1, ?, ?, ?)
            ON CONFLICT(user_id, camera_id, detection_date, weapon_type) DO UPDATE SET
                total_detections = total_detections + 1,
                avg_confidence = (
                    SELECT AVG(confidence) FROM detection_logs
                    WHERE user_id = ? AND camera_id = ? AND date_only = ? AND weapon_type = ?
                ),
                last_detection_at = excluded.last_detection_at
            "#,
        )
        .bind(user_id)
        .bind(camera_id)
        .bind(&date_only)
        .bind(weapon_type)
        .bind(confidence)
        .bind(ts)
        .bind(ts)
        .bind(user_id)
        .bind(camera_id)
        .bind(&date_only)
        .bind(weapon_type)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(detection_id)
    }

    /// Fetch a detection log row by id.
    pub async fn get_detection(&self, detection_id: i64) -> EngineResult<Option<Detection>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, camera_id, weapon_type, confidence, detected_at, incident_id
            FROM detection_logs
            WHERE id = ?
            "#,
        )
        .bind(detection_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Detection {
            id: r.get("id"),
            user_id: r.get("user_id"),
            camera_id: r.get("camera_id"),
            weapon_type: r.get("weapon_type"),
            confidence: r.get("confidence"),
            detected_at: from_ts(r.get("detected_at")),
            incident_id: r.get("incident_id"),
        }))
    }

    /// Count detection rows for a `(camera, weapon_type)` key.
    pub async fn count_detections(&self, camera_id: i64, weapon_type: &str) -> EngineResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as n FROM detection_logs
            WHERE camera_id = ? AND weapon_type = ?
            "#,
        )
        .bind(camera_id)
        .bind(weapon_type)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("n"))
    }

    /// Fetch the daily aggregate for a key, if any detections exist for it.
    pub async fn get_daily_aggregate(
        &self,
        user_id: i64,
        camera_id: i64,
        detection_date: &str,
        weapon_type: &str,
    ) -> EngineResult<Option<DailyAggregate>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, camera_id, detection_date, weapon_type,
                   total_detections, avg_confidence, first_detection_at, last_detection_at
            FROM daily_summary
            WHERE user_id = ? AND camera_id = ? AND detection_date = ? AND weapon_type = ?
            "#,
        )
        .bind(user_id)
        .bind(camera_id)
        .bind(detection_date)
        .bind(weapon_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| DailyAggregate {
            user_id: r.get("user_id"),
            camera_id: r.get("camera_id"),
            detection_date: r.get("detection_date"),
            weapon_type: r.get("weapon_type"),
            total_detections: r.get("total_detections"),
            avg_confidence: r.get("avg_confidence"),
            first_detection_at: from_ts(r.get("first_detection_at")),
            last_detection_at: from_ts(r.get("last_detection_at")),
        }))
    }

    // ------------------------------------------------------------------
    // Incidents
    // ------------------------------------------------------------------

    /// Find the most recent open incident for `(camera_id, weapon_type)`
    /// strictly newer than `cutoff`. Open means pending or responding;
    /// the cutoff is exclusive, matching the detection probe.
    pub async fn find_open_incident(
        &self,
        camera_id: i64,
        weapon_type: &str,
        cutoff: DateTime<Utc>,
    ) -> EngineResult<Option<i64>> {
        let row = sqlx::query(
            r#"
            SELECT id
            FROM incidents
            WHERE camera_id = ? AND weapon_type = ? AND detected_at > ?
              AND status IN ('pending', 'responding')
            ORDER BY detected_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(camera_id)
        .bind(weapon_type)
        .bind(cutoff.timestamp())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("id")))
    }

    /// Open a new incident, link its originating detection, and append the
    /// `created` audit row, all in one transaction. Returns the incident id.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_incident(
        &self,
        incident_number: &str,
        camera_id: i64,
        weapon_type: &str,
        detection_id: i64,
        detected_at: DateTime<Utc>,
        created_by: i64,
        location: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<i64> {
        let now_ts = now.timestamp();

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO incidents
                (incident_number, camera_id, weapon_type, detection_id,
                 status, priority, location, description, created_by,
                 detected_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'pending', 'high', ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(incident_number)
        .bind(camera_id)
        .bind(weapon_type)
        .bind(detection_id)
        .bind(location)
        .bind(description)
        .bind(created_by)
        .bind(detected_at.timestamp())
        .bind(now_ts)
        .bind(now_ts)
        .execute(&mut *tx)
        .await?;

        let incident_id = result.last_insert_rowid();

        // Link is set-once: a detection already attached elsewhere stays put
        sqlx::query(
            r#"
            UPDATE detection_logs SET incident_id = ?
            WHERE id = ? AND incident_id IS NULL
            "#,
        )
        .bind(incident_id)
        .bind(detection_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO incident_actions (incident_id, user_id, action_type, notes, created_at)
            VALUES (?, ?, 'created', 'Incident created from weapon detection', ?)
            "#,
        )
        .bind(incident_id)
        .bind(created_by)
        .bind(now_ts)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(incident_id)
    }

    /// Attach a detection to an existing incident. The link is written at
    /// most once; a detection that already carries an incident id keeps it.
    pub async fn attach_detection(
        &self,
        detection_id: i64,
        incident_id: i64,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE detection_logs SET incident_id = ?
            WHERE id = ? AND incident_id IS NULL
            "#,
        )
        .bind(incident_id)
        .bind(detection_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch an incident by id.
    pub async fn get_incident(&self, incident_id: i64) -> EngineResult<Option<Incident>> {
        let row = sqlx::query("SELECT * FROM incidents WHERE id = ?")
            .bind(incident_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(incident_from_row).transpose()
    }

    /// List incidents newest first, optionally filtered by status and assignee.
    pub async fn list_incidents(
        &self,
        status: Option<IncidentStatus>,
        assigned_to: Option<i64>,
        limit: i64,
    ) -> EngineResult<Vec<Incident>> {
        let status_str = status.map(|s| s.as_str().to_string());

        let rows = sqlx::query(
            r#"
            SELECT * FROM incidents
            WHERE (? IS NULL OR status = ?)
              AND (? IS NULL OR assigned_to = ?)
            ORDER BY detected_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(&status_str)
        .bind(&status_str)
        .bind(assigned_to)
        .bind(assigned_to)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(incident_from_row).collect()
    }

    /// Apply a validated lifecycle update and append its audit row in one
    /// transaction.
    pub async fn apply_incident_update(
        &self,
        plan: &UpdatePlan,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let now_ts = now.timestamp();
        let status_str = plan.new_status.map(|s| s.as_str().to_string());

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE incidents SET
                status = COALESCE(?, status),
                responded_at = CASE WHEN ? THEN ? ELSE responded_at END,
                resolved_at = CASE WHEN ? THEN ? ELSE resolved_at END,
                resolved_by = CASE WHEN ? THEN ? ELSE resolved_by END,
                priority = COALESCE(?, priority),
                assigned_to = COALESCE(?, assigned_to),
                response_notes = COALESCE(?, response_notes),
                resolution_notes = COALESCE(?, resolution_notes),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&status_str)
        .bind(plan.set_responded_at)
        .bind(now_ts)
        .bind(plan.set_resolved)
        .bind(now_ts)
        .bind(plan.set_resolved)
        .bind(plan.actor_id)
        .bind(&plan.priority)
        .bind(plan.assigned_to)
        .bind(&plan.response_notes)
        .bind(&plan.resolution_notes)
        .bind(now_ts)
        .bind(plan.incident_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO incident_actions (incident_id, user_id, action_type, notes, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(plan.incident_id)
        .bind(plan.actor_id)
        .bind(&plan.action_type)
        .bind(&plan.action_notes)
        .bind(now_ts)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Audit history for an incident, newest first.
    pub async fn list_incident_actions(
        &self,
        incident_id: i64,
    ) -> EngineResult<Vec<IncidentAction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, incident_id, user_id, action_type, notes, created_at
            FROM incident_actions
            WHERE incident_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(incident_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| IncidentAction {
                id: r.get("id"),
                incident_id: r.get("incident_id"),
                user_id: r.get("user_id"),
                action_type: r.get("action_type"),
                notes: r.get("notes"),
                created_at: from_ts(r.get("created_at")),
            })
            .collect())
    }

    /// Number of audit rows for an incident.
    pub async fn count_incident_actions(&self, incident_id: i64) -> EngineResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as n FROM incident_actions WHERE incident_id = ?")
            .bind(incident_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use chrono::Duration;

    async fn setup() -> (Storage, i64) {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let user_id = storage.create_user("tester", Role::Officer).await.unwrap();
        (storage, user_id)
    }

    // Fixed mid-day timestamp so date-keyed assertions cannot straddle
    // a UTC date rollover
    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 30, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_record_and_find_recent_detection() {
        let (storage, user_id) = setup().await;
        let now = Utc::now();

        let id = storage
            .record_detection(user_id, 1, "pistol", 0.9, now)
            .await
            .unwrap();

        let cutoff = now - Duration::seconds(300);
        let found = storage
            .find_recent_detection(1, "pistol", cutoff)
            .await
            .unwrap();
        assert_eq!(found.map(|(i, _)| i), Some(id));

        // Different key sees nothing
        let other = storage
            .find_recent_detection(2, "pistol", cutoff)
            .await
            .unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_recency_cutoff_is_exclusive() {
        let (storage, user_id) = setup().await;
        let now = Utc::now();

        storage
            .record_detection(user_id, 1, "knife", 0.9, now)
            .await
            .unwrap();

        // Cutoff just before the detection timestamp matches
        let found = storage
            .find_recent_detection(1, "knife", now - Duration::seconds(1))
            .await
            .unwrap();
        assert!(found.is_some());

        // Cutoff exactly at the detection timestamp does not (strict >)
        let found = storage.find_recent_detection(1, "knife", now).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_aggregate_tracks_count_and_mean() {
        let (storage, user_id) = setup().await;
        let now = noon();
        let date = now.format("%Y-%m-%d").to_string();

        for (i, conf) in [0.7, 0.8, 0.9].iter().enumerate() {
            storage
                .record_detection(user_id, 1, "pistol", *conf, now + Duration::seconds(i as i64))
                .await
                .unwrap();
        }

        let agg = storage
            .get_daily_aggregate(user_id, 1, &date, "pistol")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(agg.total_detections, 3);
        assert!((agg.avg_confidence - 0.8).abs() < 1e-9);
        assert_eq!(agg.first_detection_at.timestamp(), now.timestamp());
        assert_eq!(
            agg.last_detection_at.timestamp(),
            now.timestamp() + 2
        );
    }

    #[tokio::test]
    async fn test_create_incident_links_detection_and_logs_action() {
        let (storage, user_id) = setup().await;
        let now = Utc::now();

        let detection_id = storage
            .record_detection(user_id, 1, "pistol", 0.95, now)
            .await
            .unwrap();

        let incident_id = storage
            .create_incident(
                "INC-20260830-101010-000",
                1,
                "pistol",
                detection_id,
                now,
                user_id,
                "Lobby",
                "",
                now,
            )
            .await
            .unwrap();

        let detection = storage.get_detection(detection_id).await.unwrap().unwrap();
        assert_eq!(detection.incident_id, Some(incident_id));

        let incident = storage.get_incident(incident_id).await.unwrap().unwrap();
        assert_eq!(incident.status, IncidentStatus::Pending);
        assert_eq!(incident.priority, "high");
        assert_eq!(incident.detection_id, detection_id);

        let actions = storage.list_incident_actions(incident_id).await.unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, "created");
    }

    #[tokio::test]
    async fn test_attach_detection_is_set_once() {
        let (storage, user_id) = setup().await;
        let now = Utc::now();

        let detection_id = storage
            .record_detection(user_id, 1, "pistol", 0.95, now)
            .await
            .unwrap();

        storage.attach_detection(detection_id, 41).await.unwrap();
        storage.attach_detection(detection_id, 42).await.unwrap();

        let detection = storage.get_detection(detection_id).await.unwrap().unwrap();
        assert_eq!(detection.incident_id, Some(41));
    }

    #[tokio::test]
    async fn test_list_incidents_filters() {
        let (storage, user_id) = setup().await;
        let now = Utc::now();

        for i in 0..3 {
            let det = storage
                .record_detection(user_id, i + 1, "knife", 0.9, now + Duration::seconds(i))
                .await
                .unwrap();
            storage
                .create_incident(
                    &format!("INC-20260830-101010-{i:03}"),
                    i + 1,
                    "knife",
                    det,
                    now,
                    user_id,
                    "",
                    "",
                    now,
                )
                .await
                .unwrap();
        }

        let all = storage.list_incidents(None, None, 100).await.unwrap();
        assert_eq!(all.len(), 3);

        let pending = storage
            .list_incidents(Some(IncidentStatus::Pending), None, 100)
            .await
            .unwrap();
        assert_eq!(pending.len(), 3);

        let resolved = storage
            .list_incidents(Some(IncidentStatus::Resolved), None, 100)
            .await
            .unwrap();
        assert!(resolved.is_empty());

        let limited = storage.list_incidents(None, None, 2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_user_cascade() {
        let (storage, user_id) = setup().await;
        let other = storage.create_user("other", Role::Officer).await.unwrap();
        let now = noon();
        let date = now.format("%Y-%m-%d").to_string();

        let det = storage
            .record_detection(user_id, 1, "pistol", 0.9, now)
            .await
            .unwrap();
        let incident_id = storage
            .create_incident(
                "INC-20260830-101010-000",
                1,
                "pistol",
                det,
                now,
                user_id,
                "",
                "",
                now,
            )
            .await
            .unwrap();

        // Assign the incident to the user being deleted
        sqlx::query("UPDATE incidents SET assigned_to = ? WHERE id = ?")
            .bind(user_id)
            .bind(incident_id)
            .execute(&storage.pool)
            .await
            .unwrap();

        assert!(storage.delete_user_cascade(user_id).await.unwrap());

        assert!(storage.get_detection(det).await.unwrap().is_none());
        assert!(
            storage
                .get_daily_aggregate(user_id, 1, &date, "pistol")
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(storage.count_incident_actions(incident_id).await.unwrap(), 0);

        // Incident survives with its assignment cleared
        let incident = storage.get_incident(incident_id).await.unwrap().unwrap();
        assert_eq!(incident.assigned_to, None);

        assert!(storage.get_user(user_id).await.unwrap().is_none());
        assert!(storage.get_user(other).await.unwrap().is_some());

        // Deleting again reports nothing removed
        assert!(!storage.delete_user_cascade(user_id).await.unwrap());
    }
}
