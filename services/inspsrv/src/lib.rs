//! Visual Inspection Service (`inspsrv`)
//!
//! Triggers cameras from PLC signals, runs a vision match per part and writes
//! pass/fail and angle back to the PLC over FINS/TCP, keeping per-station
//! yield statistics.

pub mod bootstrap;
pub mod camera;
pub mod config;
pub mod error;
pub mod events;
pub mod image_store;
pub mod orchestrator;
pub mod result;
pub mod sim;
pub mod station;
pub mod statistics;
pub mod vision;

pub use error::{InspectionError, Result};
pub use orchestrator::{InspectionOrchestrator, InspectionState, OrchestratorSettings};
