//! Data models for Watchpost.
//!
//! These types describe the four durable records the engine produces
//! (detections, daily aggregates, incidents, incident actions) plus the
//! in-memory live snapshot fed by the detection stream. Canonicalization
//! of raw weapon labels and the incident status/role vocabularies also
//! live here so every component agrees on the same spelling.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cooldown window applied independently by the deduplicator and the
/// correlator. An event arriving exactly at the boundary is treated as
/// *outside* the window (a new log / new incident candidate).
pub const COOLDOWN_SECS: i64 = 300;

/// Minimum confidence for a detection to create or attach to an incident.
pub const INCIDENT_CONFIDENCE_THRESHOLD: f64 = 0.80;

/// Normalize a raw weapon label from the vision process to its stored form.
///
/// The mapping table must match the upstream detector's vocabulary exactly:
/// `gun` and `pistol` collapse to `pistol`, both hyphen and underscore
/// spellings of heavy weapons collapse to `heavy_weapon`. Unrecognized
/// labels pass through lower-cased unchanged.
pub fn canonical_weapon_type(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    match lowered.as_str() {
        "gun" => "pistol".to_string(),
        "heavy-weapon" => "heavy_weapon".to_string(),
        "knife" => "knife".to_string(),
        "pistol" => "pistol".to_string(),
        "heavy_weapon" => "heavy_weapon".to_string(),
        _ => lowered,
    }
}

/// Human-readable display name for a canonical weapon type.
///
/// Used by the overlay derivation; falls back to replacing separators
/// with spaces for labels outside the known vocabulary.
pub fn weapon_display_name(weapon_type: &str) -> String {
    match weapon_type {
        "pistol" => "Pistol".to_string(),
        "heavy_weapon" => "Heavy Weapon".to_string(),
        "knife" => "Knife".to_string(),
        other => other.replace(['-', '_'], " "),
    }
}

/// Actor roles recognized by the incident permission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Unrestricted update rights over any incident.
    Admin,
    /// May only touch incidents that are unassigned or assigned to them.
    Officer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Officer => "officer",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "officer" => Ok(Role::Officer),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Lifecycle states of an incident.
///
/// The only legal path is forward: `pending -> responding -> resolved`
/// (skipping `responding` is allowed). Backward edges are rejected by
/// [`IncidentStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Pending,
    Responding,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Pending => "pending",
            IncidentStatus::Responding => "responding",
            IncidentStatus::Resolved => "resolved",
        }
    }

    /// Whether the incident still counts as open for correlation purposes.
    pub fn is_open(&self) -> bool {
        matches!(self, IncidentStatus::Pending | IncidentStatus::Responding)
    }

    /// Transition table for the lifecycle state machine.
    ///
    /// Same-state "transitions" are disallowed so that every accepted
    /// status change is a real edge with its own timestamp side effects.
    pub fn can_transition_to(&self, next: IncidentStatus) -> bool {
        matches!(
            (self, next),
            (IncidentStatus::Pending, IncidentStatus::Responding)
                | (IncidentStatus::Pending, IncidentStatus::Resolved)
                | (IncidentStatus::Responding, IncidentStatus::Resolved)
        )
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IncidentStatus::Pending),
            "responding" => Ok(IncidentStatus::Responding),
            "resolved" => Ok(IncidentStatus::Resolved),
            other => Err(format!("unknown incident status: {other}")),
        }
    }
}

/// A reporting or responding user, as far as the engine needs to know one.
///
/// Credential storage and token issuance live with external collaborators;
/// this record exists for existence checks, the permission policy, and
/// administrative cascade deletion.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub is_active: bool,
}

/// A single logged weapon detection. Immutable once written, except for
/// `incident_id` which the correlator sets at most once and never clears.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub id: i64,
    pub user_id: i64,
    pub camera_id: i64,
    pub weapon_type: String,
    pub confidence: f64,
    pub detected_at: DateTime<Utc>,
    pub incident_id: Option<i64>,
}

/// Per-day, per-key rollup of detection counts and confidence.
///
/// Invariant: `total_detections` equals the number of detection rows
/// sharing `(user_id, camera_id, date, weapon_type)` for that day, and
/// `avg_confidence` is their mean.
#[derive(Debug, Clone, Serialize)]
pub struct DailyAggregate {
    pub user_id: i64,
    pub camera_id: i64,
    pub detection_date: String,
    pub weapon_type: String,
    pub total_detections: i64,
    pub avg_confidence: f64,
    pub first_detection_at: DateTime<Utc>,
    pub last_detection_at: DateTime<Utc>,
}

/// A tracked incident requiring acknowledgement by security personnel.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub id: i64,
    pub incident_number: String,
    pub camera_id: i64,
    pub weapon_type: String,
    pub detection_id: i64,
    pub status: IncidentStatus,
    pub priority: String,
    pub location: String,
    pub description: String,
    pub assigned_to: Option<i64>,
    pub created_by: i64,
    pub resolved_by: Option<i64>,
    pub detected_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub response_notes: Option<String>,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit entry for an incident. One row per lifecycle
/// transition or creation event; never mutated or deleted.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentAction {
    pub id: i64,
    pub incident_id: i64,
    pub user_id: i64,
    pub action_type: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

/// Request body for POST /detections.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub camera_id: i64,
    pub weapon_type: String,
    pub confidence: f64,
    pub user_id: i64,
    /// Camera location carried onto any incident created for this event.
    #[serde(default)]
    pub location: String,
}

/// Result of the combined dedup + correlation pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    /// Id of the detection log row this event landed on (new or reused).
    pub detection_id: i64,
    /// True when a new log row (and aggregate update) was written.
    pub is_new_log: bool,
    /// Incident this detection belongs to, if the confidence gate passed.
    pub incident_id: Option<i64>,
    /// True when a new incident was opened for this event.
    pub is_new_incident: bool,
}

/// Mutable fields accepted by the incident update entry point.
/// Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncidentChanges {
    pub status: Option<IncidentStatus>,
    pub priority: Option<String>,
    pub assigned_to: Option<i64>,
    pub response_notes: Option<String>,
    pub resolution_notes: Option<String>,
}

impl IncidentChanges {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.priority.is_none()
            && self.assigned_to.is_none()
            && self.response_notes.is_none()
            && self.resolution_notes.is_none()
    }
}

/// Query parameters for GET /incidents.
#[derive(Debug, Deserialize)]
pub struct IncidentListQuery {
    pub status: Option<IncidentStatus>,
    pub assigned_to: Option<i64>,
    #[serde(default = "default_list_limit")]
    pub limit: i64,
}

fn default_list_limit() -> i64 {
    100
}

/// Per-weapon tally inside a live snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectStat {
    pub count: u32,
    pub confidences: Vec<f64>,
}

/// The most recent detection summary from the asynchronous feed.
///
/// Overwritten wholesale on every publish; no history is retained and
/// it is never consulted for dedup or correlation decisions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveSnapshot {
    pub detected: bool,
    pub objects: HashMap<String, ObjectStat>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_weapon_type_table() {
        assert_eq!(canonical_weapon_type("gun"), "pistol");
        assert_eq!(canonical_weapon_type("heavy-weapon"), "heavy_weapon");
        assert_eq!(canonical_weapon_type("knife"), "knife");
        assert_eq!(canonical_weapon_type("pistol"), "pistol");
        assert_eq!(canonical_weapon_type("heavy_weapon"), "heavy_weapon");
    }

    #[test]
    fn test_canonical_weapon_type_passthrough() {
        // Unknown labels are lower-cased but otherwise untouched
        assert_eq!(canonical_weapon_type("Crossbow"), "crossbow");
        assert_eq!(canonical_weapon_type("GUN"), "pistol");
    }

    #[test]
    fn test_weapon_display_name() {
        assert_eq!(weapon_display_name("pistol"), "Pistol");
        assert_eq!(weapon_display_name("heavy_weapon"), "Heavy Weapon");
        assert_eq!(weapon_display_name("some-thing"), "some thing");
    }

    #[test]
    fn test_status_forward_transitions() {
        assert!(IncidentStatus::Pending.can_transition_to(IncidentStatus::Responding));
        assert!(IncidentStatus::Pending.can_transition_to(IncidentStatus::Resolved));
        assert!(IncidentStatus::Responding.can_transition_to(IncidentStatus::Resolved));
    }

    #[test]
    fn test_status_rejects_backward_and_self() {
        assert!(!IncidentStatus::Resolved.can_transition_to(IncidentStatus::Pending));
        assert!(!IncidentStatus::Resolved.can_transition_to(IncidentStatus::Responding));
        assert!(!IncidentStatus::Responding.can_transition_to(IncidentStatus::Pending));
        assert!(!IncidentStatus::Pending.can_transition_to(IncidentStatus::Pending));
        assert!(!IncidentStatus::Resolved.can_transition_to(IncidentStatus::Resolved));
    }

    #[test]
    fn test_status_is_open() {
        assert!(IncidentStatus::Pending.is_open());
        assert!(IncidentStatus::Responding.is_open());
        assert!(!IncidentStatus::Resolved.is_open());
    }

    #[test]
    fn test_role_round_trip() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("officer".parse::<Role>().unwrap(), Role::Officer);
        assert!("guest".parse::<Role>().is_err());
    }
}
