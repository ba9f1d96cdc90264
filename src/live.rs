//! Shared live-detection snapshot.
//!
//! One logical writer (the asynchronous detection feed) and any number
//! of readers (overlay renderer, status polling) share a single-slot
//! cell. Every publish replaces the whole snapshot under a write lock,
//! so readers never observe a partially updated one. The cell is
//! best-effort and ephemeral: it is never consulted for dedup or
//! correlation decisions.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::model::{LiveSnapshot, ObjectStat, weapon_display_name};

/// Handle to the single-slot live snapshot cell.
#[derive(Clone, Default)]
pub struct LiveFeed {
    cell: Arc<RwLock<LiveSnapshot>>,
}

impl LiveFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot wholesale. Missing timestamps are stamped
    /// server-side so pollers can distinguish consecutive publishes.
    pub async fn publish(&self, mut snapshot: LiveSnapshot) {
        if snapshot.timestamp.is_none() {
            snapshot.timestamp = Some(Utc::now());
        }
        debug!(
            detected = snapshot.detected,
            weapon_kinds = snapshot.objects.len(),
            "Live snapshot published"
        );
        let mut cell = self.cell.write().await;
        *cell = snapshot;
    }

    /// Read the current snapshot. Never blocks writers beyond the copy.
    pub async fn read(&self) -> LiveSnapshot {
        self.cell.read().await.clone()
    }
}

/// Color signal for rendering consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayColor {
    Alert,
    Clear,
}

/// Human-readable overlay derived from a snapshot.
///
/// The derivation is side-effect-free and is re-run on every frame,
/// since the snapshot can change between frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    pub label: String,
    pub color: OverlayColor,
}

impl Overlay {
    pub fn from_snapshot(snapshot: &LiveSnapshot) -> Self {
        if !snapshot.detected || snapshot.objects.is_empty() {
            return Overlay {
                label: "All clear".to_string(),
                color: OverlayColor::Clear,
            };
        }

        let mut entries: Vec<(&String, &ObjectStat)> = snapshot.objects.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let parts: Vec<String> = entries
            .iter()
            .map(|(weapon, stat)| {
                let peak = stat
                    .confidences
                    .iter()
                    .cloned()
                    .fold(0.0_f64, f64::max);
                format!(
                    "{} x{} ({:.0}%)",
                    weapon_display_name(weapon),
                    stat.count,
                    peak * 100.0
                )
            })
            .collect();

        Overlay {
            label: parts.join(", "),
            color: OverlayColor::Alert,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn snapshot_with(weapon: &str, count: u32, confidences: Vec<f64>) -> LiveSnapshot {
        let mut objects = HashMap::new();
        objects.insert(weapon.to_string(), ObjectStat { count, confidences });
        LiveSnapshot {
            detected: true,
            objects,
            timestamp: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_publish_replaces_wholesale() {
        let feed = LiveFeed::new();

        feed.publish(snapshot_with("pistol", 2, vec![0.9, 0.8])).await;
        feed.publish(snapshot_with("knife", 1, vec![0.7])).await;

        let current = feed.read().await;
        assert!(current.objects.contains_key("knife"));
        // The pistol entry from the first publish is gone, not merged
        assert!(!current.objects.contains_key("pistol"));
    }

    #[tokio::test]
    async fn test_publish_stamps_missing_timestamp() {
        let feed = LiveFeed::new();
        feed.publish(LiveSnapshot {
            detected: false,
            objects: HashMap::new(),
            timestamp: None,
        })
        .await;

        assert!(feed.read().await.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_publish_and_read_never_tear() {
        let feed = LiveFeed::new();

        // Writers alternate between a detected snapshot with objects and
        // an all-clear one; readers must never see a mixed state.
        let writer = {
            let feed = feed.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    if i % 2 == 0 {
                        feed.publish(snapshot_with("pistol", 1, vec![0.9])).await;
                    } else {
                        feed.publish(LiveSnapshot::default()).await;
                    }
                }
            })
        };

        let reader = {
            let feed = feed.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    let snap = feed.read().await;
                    assert_eq!(snap.detected, !snap.objects.is_empty());
                }
            })
        };

        writer.await.unwrap();
        reader.await.unwrap();
    }

    #[test]
    fn test_overlay_clear_when_nothing_detected() {
        let overlay = Overlay::from_snapshot(&LiveSnapshot::default());
        assert_eq!(overlay.color, OverlayColor::Clear);
        assert_eq!(overlay.label, "All clear");
    }

    #[test]
    fn test_overlay_alert_with_counts_and_peak() {
        let mut snapshot = snapshot_with("pistol", 2, vec![0.72, 0.91]);
        snapshot.objects.insert(
            "knife".to_string(),
            ObjectStat {
                count: 1,
                confidences: vec![0.84],
            },
        );

        let overlay = Overlay::from_snapshot(&snapshot);
        assert_eq!(overlay.color, OverlayColor::Alert);
        assert_eq!(overlay.label, "Knife x1 (84%), Pistol x2 (91%)");
    }

    #[test]
    fn test_overlay_detected_flag_without_objects_is_clear() {
        let snapshot = LiveSnapshot {
            detected: true,
            objects: HashMap::new(),
            timestamp: None,
        };
        let overlay = Overlay::from_snapshot(&snapshot);
        assert_eq!(overlay.color, OverlayColor::Clear);
    }
}
