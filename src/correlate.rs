//! Incident correlation.
//!
//! Independently of the log dedup decision, decides CREATE vs ATTACH for
//! an incident: a qualifying detection either joins the most recent open
//! incident for its `(camera_id, weapon_type)` key inside the cooldown
//! window, or opens a new one. Detections below the confidence threshold
//! never touch incidents at all. The two cooldown windows (log dedup and
//! incident correlation) share a constant but never share state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::error::EngineResult;
use crate::model::{COOLDOWN_SECS, INCIDENT_CONFIDENCE_THRESHOLD};
use crate::storage::Storage;

/// Generator for human-readable, collision-free incident numbers.
///
/// The format keeps the date-prefixed shape responders are used to
/// (`INC-YYYYMMDD-HHMMSS-NNN`) but adds a process-wide monotonic suffix,
/// so two incidents created within the same second still get distinct
/// numbers. The storage layer additionally enforces uniqueness.
#[derive(Debug, Clone, Default)]
pub struct IncidentNumbers {
    counter: Arc<AtomicU64>,
}

impl IncidentNumbers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, now: DateTime<Utc>) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("INC-{}-{:03}", now.format("%Y%m%d-%H%M%S"), seq % 1000)
    }
}

/// Outcome of the correlation decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationOutcome {
    /// Incident this detection belongs to, if any.
    pub incident_id: Option<i64>,
    /// True when a new incident was opened.
    pub is_new_incident: bool,
}

/// Decide CREATE vs ATTACH and perform the corresponding writes.
///
/// Detections with `confidence < 0.80` are gated out entirely. Otherwise
/// the most recent incident for the key inside the cooldown window with
/// an open status (pending or responding) absorbs the detection;
/// failing that, a new pending high-priority incident is opened with a
/// `created` audit row. Callers hold the per-key lock around this
/// check-then-act sequence.
#[allow(clippy::too_many_arguments)]
pub async fn correlate_detection(
    storage: &Storage,
    numbers: &IncidentNumbers,
    camera_id: i64,
    weapon_type: &str,
    detection_id: i64,
    detected_at: DateTime<Utc>,
    confidence: f64,
    user_id: i64,
    location: &str,
    now: DateTime<Utc>,
) -> EngineResult<CorrelationOutcome> {
    if confidence < INCIDENT_CONFIDENCE_THRESHOLD {
        debug!(
            camera_id,
            weapon_type, confidence, "Below incident threshold, no correlation"
        );
        return Ok(CorrelationOutcome {
            incident_id: None,
            is_new_incident: false,
        });
    }

    let cutoff = now - Duration::seconds(COOLDOWN_SECS);

    if let Some(incident_id) = storage
        .find_open_incident(camera_id, weapon_type, cutoff)
        .await?
    {
        storage.attach_detection(detection_id, incident_id).await?;
        debug!(
            camera_id,
            weapon_type, incident_id, detection_id, "Detection attached to open incident"
        );
        return Ok(CorrelationOutcome {
            incident_id: Some(incident_id),
            is_new_incident: false,
        });
    }

    let incident_number = numbers.next(now);
    let description = format!("Automatic incident created from {weapon_type} detection");

    let incident_id = storage
        .create_incident(
            &incident_number,
            camera_id,
            weapon_type,
            detection_id,
            detected_at,
            user_id,
            location,
            &description,
            now,
        )
        .await?;

    info!(
        camera_id,
        weapon_type,
        incident_id,
        incident_number = %incident_number,
        "Incident opened"
    );

    Ok(CorrelationOutcome {
        incident_id: Some(incident_id),
        is_new_incident: true,
    })
}
