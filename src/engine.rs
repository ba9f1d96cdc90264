//! The correlation and lifecycle engine.
//!
//! [`Engine`] chains the dedup and correlation decisions for each
//! inbound event and owns the per-key locks that serialize their
//! check-then-act sequences. Two concurrent events for the same
//! `(camera_id, weapon_type)` key cannot both observe "no recent row"
//! and both insert; events for different keys proceed in parallel.
//! The dedup write is committed before correlation runs, so the
//! incident link always points at a settled detection id.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;

use crate::correlate::{IncidentNumbers, correlate_detection};
use crate::dedup::submit_detection;
use crate::error::{EngineError, EngineResult};
use crate::lifecycle;
use crate::model::{
    Incident, IncidentAction, IncidentChanges, IncidentStatus, SubmitOutcome, canonical_weapon_type,
};
use crate::storage::Storage;

type KeyLocks = Mutex<HashMap<(i64, String), Arc<Mutex<()>>>>;

/// Detection correlation and incident lifecycle engine.
#[derive(Clone)]
pub struct Engine {
    storage: Storage,
    numbers: IncidentNumbers,
    key_locks: Arc<KeyLocks>,
}

impl Engine {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            numbers: IncidentNumbers::new(),
            key_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    async fn key_lock(&self, camera_id: i64, weapon_type: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks
            .entry((camera_id, weapon_type.to_string()))
            .or_default()
            .clone()
    }

    /// Combined entry point: validate, deduplicate the log entry, then
    /// run incident correlation, all under the key's lock.
    ///
    /// Validation failures reject the event before any storage mutation.
    /// The raw weapon label is canonicalized first; dedup and correlation
    /// only ever see canonical types.
    pub async fn submit(
        &self,
        camera_id: i64,
        weapon_type: &str,
        confidence: f64,
        user_id: i64,
        location: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<SubmitOutcome> {
        if weapon_type.trim().is_empty() {
            return Err(EngineError::Validation("weapon_type is required".into()));
        }
        if camera_id <= 0 {
            return Err(EngineError::Validation("camera_id is required".into()));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(EngineError::Validation(format!(
                "confidence out of range: {confidence}"
            )));
        }
        if self.storage.get_user(user_id).await?.is_none() {
            return Err(EngineError::NotFound {
                entity: "user",
                id: user_id,
            });
        }

        let weapon_type = canonical_weapon_type(weapon_type);

        let lock = self.key_lock(camera_id, &weapon_type).await;
        let _guard = lock.lock().await;

        let dedup = submit_detection(
            &self.storage,
            user_id,
            camera_id,
            &weapon_type,
            confidence,
            now,
        )
        .await?;

        let correlation = correlate_detection(
            &self.storage,
            &self.numbers,
            camera_id,
            &weapon_type,
            dedup.detection_id,
            dedup.detected_at,
            confidence,
            user_id,
            location,
            now,
        )
        .await?;

        info!(
            camera_id,
            weapon_type = %weapon_type,
            detection_id = dedup.detection_id,
            is_new_log = dedup.is_new_log,
            incident_id = ?correlation.incident_id,
            is_new_incident = correlation.is_new_incident,
            "Detection processed"
        );

        Ok(SubmitOutcome {
            detection_id: dedup.detection_id,
            is_new_log: dedup.is_new_log,
            incident_id: correlation.incident_id,
            is_new_incident: correlation.is_new_incident,
        })
    }

    /// Lifecycle entry point: apply a status/assignment/notes update to an
    /// incident on behalf of a user, enforcing the permission policy and
    /// the forward-only transition table.
    pub async fn update_incident(
        &self,
        incident_id: i64,
        actor_user_id: i64,
        changes: &IncidentChanges,
        now: DateTime<Utc>,
    ) -> EngineResult<Incident> {
        let actor = self.storage.get_user(actor_user_id).await?.ok_or(
            EngineError::NotFound {
                entity: "user",
                id: actor_user_id,
            },
        )?;

        let incident =
            self.storage
                .get_incident(incident_id)
                .await?
                .ok_or(EngineError::NotFound {
                    entity: "incident",
                    id: incident_id,
                })?;

        let plan = lifecycle::plan_update(&incident, actor.id, actor.role, changes)?;
        self.storage.apply_incident_update(&plan, now).await?;

        info!(
            incident_id,
            actor_user_id,
            action = %plan.action_type,
            "Incident updated"
        );

        // Re-read so the caller sees the committed state
        self.storage
            .get_incident(incident_id)
            .await?
            .ok_or(EngineError::NotFound {
                entity: "incident",
                id: incident_id,
            })
    }

    /// Incident detail with its audit trail.
    pub async fn incident_detail(
        &self,
        incident_id: i64,
    ) -> EngineResult<(Incident, Vec<IncidentAction>)> {
        let incident =
            self.storage
                .get_incident(incident_id)
                .await?
                .ok_or(EngineError::NotFound {
                    entity: "incident",
                    id: incident_id,
                })?;
        let actions = self.storage.list_incident_actions(incident_id).await?;
        Ok((incident, actions))
    }

    /// Filtered incident listing, newest first.
    pub async fn list_incidents(
        &self,
        status: Option<IncidentStatus>,
        assigned_to: Option<i64>,
        limit: i64,
    ) -> EngineResult<Vec<Incident>> {
        self.storage.list_incidents(status, assigned_to, limit).await
    }

    /// Administrative user deletion with cascade (see storage layer for
    /// the deletion order).
    pub async fn delete_user(&self, user_id: i64) -> EngineResult<()> {
        if !self.storage.delete_user_cascade(user_id).await? {
            return Err(EngineError::NotFound {
                entity: "user",
                id: user_id,
            });
        }
        info!(user_id, "User deleted with cascade");
        Ok(())
    }
}
