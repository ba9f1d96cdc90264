//! Detection deduplication.
//!
//! Decides CREATE vs REUSE for the detection log: a new event inside the
//! cooldown window of the most recent detection for the same
//! `(camera_id, weapon_type)` key reuses that row instead of writing a
//! duplicate. Reuse skips the aggregate update too. Callers must hold
//! the engine's per-key lock around this check-then-act sequence; the
//! function itself only performs the decision and the conditional write.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::EngineResult;
use crate::model::COOLDOWN_SECS;
use crate::storage::Storage;

/// Outcome of the dedup decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupOutcome {
    /// The detection row this event landed on.
    pub detection_id: i64,
    /// Timestamp of that row (the original event time when reused).
    pub detected_at: DateTime<Utc>,
    /// False when the event was folded into an existing row.
    pub is_new_log: bool,
}

/// Decide CREATE vs REUSE and perform the corresponding write.
///
/// The window probe is exclusive at `now - COOLDOWN_SECS`, so an event
/// arriving exactly 300s after its predecessor starts a new log while
/// one at 299s is still suppressed.
pub async fn submit_detection(
    storage: &Storage,
    user_id: i64,
    camera_id: i64,
    weapon_type: &str,
    confidence: f64,
    now: DateTime<Utc>,
) -> EngineResult<DedupOutcome> {
    let cutoff = now - Duration::seconds(COOLDOWN_SECS);

    if let Some((detection_id, detected_at)) = storage
        .find_recent_detection(camera_id, weapon_type, cutoff)
        .await?
    {
        debug!(
            camera_id,
            weapon_type,
            detection_id,
            "Detection within cooldown, reusing log entry"
        );
        return Ok(DedupOutcome {
            detection_id,
            detected_at,
            is_new_log: false,
        });
    }

    let detection_id = storage
        .record_detection(user_id, camera_id, weapon_type, confidence, now)
        .await?;

    debug!(camera_id, weapon_type, detection_id, "New detection logged");

    Ok(DedupOutcome {
        detection_id,
        detected_at: now,
        is_new_log: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use chrono::TimeZone;

    async fn setup() -> (Storage, i64) {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let user_id = storage.create_user("tester", Role::Officer).await.unwrap();
        (storage, user_id)
    }

    #[tokio::test]
    async fn test_second_event_inside_window_is_reused() {
        let (storage, user_id) = setup().await;
        let now = Utc::now();

        let first = submit_detection(&storage, user_id, 1, "pistol", 0.9, now)
            .await
            .unwrap();
        assert!(first.is_new_log);

        let second = submit_detection(
            &storage,
            user_id,
            1,
            "pistol",
            0.85,
            now + Duration::seconds(120),
        )
        .await
        .unwrap();

        assert!(!second.is_new_log);
        assert_eq!(second.detection_id, first.detection_id);
        assert_eq!(second.detected_at.timestamp(), now.timestamp());
        assert_eq!(storage.count_detections(1, "pistol").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_boundary_event_starts_new_log() {
        let (storage, user_id) = setup().await;
        let now = Utc::now();

        let first = submit_detection(&storage, user_id, 1, "pistol", 0.9, now)
            .await
            .unwrap();

        // 299s later: still suppressed
        let inside = submit_detection(
            &storage,
            user_id,
            1,
            "pistol",
            0.9,
            now + Duration::seconds(COOLDOWN_SECS - 1),
        )
        .await
        .unwrap();
        assert!(!inside.is_new_log);

        // Exactly 300s later: outside the window, new row
        let boundary = submit_detection(
            &storage,
            user_id,
            1,
            "pistol",
            0.9,
            now + Duration::seconds(COOLDOWN_SECS),
        )
        .await
        .unwrap();
        assert!(boundary.is_new_log);
        assert_ne!(boundary.detection_id, first.detection_id);
        assert_eq!(storage.count_detections(1, "pistol").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_windows_are_keyed_per_camera_and_weapon() {
        let (storage, user_id) = setup().await;
        let now = Utc::now();

        submit_detection(&storage, user_id, 1, "pistol", 0.9, now)
            .await
            .unwrap();

        // Same weapon, different camera
        let other_camera = submit_detection(&storage, user_id, 2, "pistol", 0.9, now)
            .await
            .unwrap();
        assert!(other_camera.is_new_log);

        // Same camera, different weapon
        let other_weapon = submit_detection(&storage, user_id, 1, "knife", 0.9, now)
            .await
            .unwrap();
        assert!(other_weapon.is_new_log);
    }

    #[tokio::test]
    async fn test_reuse_skips_aggregate_update() {
        let (storage, user_id) = setup().await;
        // Fixed mid-day timestamp so the date-keyed lookup cannot
        // straddle a UTC date rollover
        let now = Utc.with_ymd_and_hms(2026, 8, 30, 12, 0, 0).unwrap();
        let date = now.format("%Y-%m-%d").to_string();

        submit_detection(&storage, user_id, 1, "pistol", 0.9, now)
            .await
            .unwrap();
        submit_detection(
            &storage,
            user_id,
            1,
            "pistol",
            0.5,
            now + Duration::seconds(10),
        )
        .await
        .unwrap();

        let agg = storage
            .get_daily_aggregate(user_id, 1, &date, "pistol")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(agg.total_detections, 1);
        assert!((agg.avg_confidence - 0.9).abs() < 1e-9);
    }
}
