//! crierd: a text-to-speech daemon for stream overlays.
//!
//! Turns chat messages into rendered audio with voice selection,
//! moderation, sound-effect splicing, and capability-based authorization.
//! The binary in `main.rs` wires these modules together; they are exposed
//! as a library so integration tests can drive them directly.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod metrics;
pub mod moderation;
pub mod queue;
pub mod secrets;
pub mod sfx;
pub mod synth;
