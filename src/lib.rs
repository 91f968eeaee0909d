//! Triage library crate
//!
//! Exposes the analysis pipeline so integration tests and external tooling
//! can drive it without going through CLI startup.

pub mod analysis;
pub mod config;
pub mod federation;
pub mod logs;
pub mod oracle;
pub mod util;
