//! Incident lifecycle state machine and permission policy.
//!
//! This module is deliberately pure: given the current incident, the
//! acting user, and the requested changes it either rejects the request
//! or produces an [`UpdatePlan`] describing every field the storage
//! layer must write in one transaction. Keeping the decision separate
//! from the writes makes the permission and transition rules directly
//! testable without a database.

use crate::error::{EngineError, EngineResult};
use crate::model::{Incident, IncidentChanges, IncidentStatus, Role};

/// Fallback audit note when an update carries no notes of its own.
const DEFAULT_ACTION_NOTES: &str = "Incident updated";

/// Everything a successful incident update writes, decided up front.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePlan {
    pub incident_id: i64,
    pub actor_id: i64,
    /// Status transition to perform, already validated against the table.
    pub new_status: Option<IncidentStatus>,
    /// Entering `responding` stamps `responded_at`.
    pub set_responded_at: bool,
    /// Entering `resolved` stamps `resolved_at` and `resolved_by = actor`.
    pub set_resolved: bool,
    pub priority: Option<String>,
    /// Assignment to write, combining an explicit request with the
    /// officer auto-assignment rule.
    pub assigned_to: Option<i64>,
    pub response_notes: Option<String>,
    pub resolution_notes: Option<String>,
    /// The single audit row appended with the update.
    pub action_type: String,
    pub action_notes: String,
}

/// Check whether `role`/`actor_id` may mutate `incident` at all.
///
/// Admins are unrestricted. Officers may only touch incidents that are
/// unassigned or assigned to themselves; anything else is a permission
/// error and nothing is written, no audit row included.
pub fn authorize_update(role: Role, actor_id: i64, incident: &Incident) -> EngineResult<()> {
    match role {
        Role::Admin => Ok(()),
        Role::Officer => match incident.assigned_to {
            None => Ok(()),
            Some(owner) if owner == actor_id => Ok(()),
            Some(owner) => Err(EngineError::Permission(format!(
                "incident {} is assigned to officer {owner}",
                incident.id
            ))),
        },
    }
}

/// Validate an update request and produce the plan of writes.
///
/// Rules:
/// - at least one mutable field must be present;
/// - a status change must be a legal forward edge (`pending -> responding`,
///   `pending -> resolved`, `responding -> resolved`);
/// - an officer updating an unassigned incident with a status change is
///   auto-assigned unless the request names an assignee explicitly;
/// - the audit action type is the new status when one was requested,
///   otherwise the literal `updated`; its notes prefer response notes,
///   then resolution notes, then a fixed fallback.
pub fn plan_update(
    incident: &Incident,
    actor_id: i64,
    role: Role,
    changes: &IncidentChanges,
) -> EngineResult<UpdatePlan> {
    authorize_update(role, actor_id, incident)?;

    if changes.is_empty() {
        return Err(EngineError::Validation(
            "no incident fields to update".to_string(),
        ));
    }

    if let Some(next) = changes.status {
        if !incident.status.can_transition_to(next) {
            return Err(EngineError::Validation(format!(
                "illegal status transition: {} -> {}",
                incident.status, next
            )));
        }
    }

    let mut assigned_to = changes.assigned_to;
    if assigned_to.is_none()
        && role == Role::Officer
        && incident.assigned_to.is_none()
        && changes.status.is_some()
    {
        assigned_to = Some(actor_id);
    }

    let action_type = match changes.status {
        Some(next) => next.as_str().to_string(),
        None => "updated".to_string(),
    };

    let action_notes = changes
        .response_notes
        .clone()
        .or_else(|| changes.resolution_notes.clone())
        .unwrap_or_else(|| DEFAULT_ACTION_NOTES.to_string());

    Ok(UpdatePlan {
        incident_id: incident.id,
        actor_id,
        new_status: changes.status,
        set_responded_at: changes.status == Some(IncidentStatus::Responding),
        set_resolved: changes.status == Some(IncidentStatus::Resolved),
        priority: changes.priority.clone(),
        assigned_to,
        response_notes: changes.response_notes.clone(),
        resolution_notes: changes.resolution_notes.clone(),
        action_type,
        action_notes,
    })
}
