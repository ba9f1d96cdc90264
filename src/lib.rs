//! Watchpost - detection correlation and incident lifecycle engine.
//!
//! # Overview
//!
//! Watchpost ingests weapon-detection events produced by an external
//! computer-vision process and turns them into two durable, de-duplicated
//! records: a detection log entry and, when warranted, a tracked incident
//! that security personnel acknowledge and resolve. A separate single-slot
//! live snapshot carries the most recent feed state to overlay renderers
//! and status pollers.
//!
//! # Decision pipeline
//!
//! For each inbound event: validate, canonicalize the weapon label, then
//! under a per-`(camera, weapon)` lock decide whether the event is a
//! duplicate of recent activity (log dedup, 300s window) and whether it
//! spawns or joins an incident (correlation, its own 300s window, gated
//! at 0.80 confidence). The two windows never share state.
//!
//! # Modules
//!
//! - [`model`]: Domain types, weapon canonicalization, status and role vocabularies
//! - [`error`]: Typed error taxonomy
//! - [`storage`]: SQLite storage layer with transactional compound writes
//! - [`dedup`]: Detection log CREATE vs REUSE decision
//! - [`correlate`]: Incident CREATE vs ATTACH decision
//! - [`lifecycle`]: Incident state machine and permission policy
//! - [`engine`]: Combined pipeline and key-scoped locking
//! - [`live`]: Shared live-detection snapshot and overlay derivation
//! - [`api`]: HTTP API handlers

pub mod api;
pub mod correlate;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod live;
pub mod model;
pub mod storage;
