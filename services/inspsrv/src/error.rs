//! Error handling for the inspection service

use fins_comlink::FinsError;
use thiserror::Error;

use crate::orchestrator::InspectionState;

/// Inspection service error type
#[derive(Error, Debug, Clone)]
pub enum InspectionError {
    /// Start refused: a station has no vision model loaded
    #[error("Vision model not loaded for station {0}")]
    VisionNotLoaded(u32),

    /// No frame arrived within the capture timeout
    #[error("Capture timeout after {0} ms")]
    CaptureTimeout(u64),

    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Vision execution failed: {0}")]
    VisionExecutionFailed(String),

    /// PLC not connected; the write is skipped
    #[error("PLC unavailable: {0}")]
    PlcUnavailable(String),

    #[error("Cannot {action} while {from}")]
    InvalidTransition {
        from: InspectionState,
        action: &'static str,
    },

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Statistics error: {0}")]
    Statistics(String),

    #[error("Unknown station {0}")]
    UnknownStation(u32),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("PLC error: {0}")]
    Plc(#[from] FinsError),
}

/// Result type alias for the inspection service
pub type Result<T> = std::result::Result<T, InspectionError>;

impl InspectionError {
    pub fn config(msg: impl Into<String>) -> Self {
        InspectionError::Config(msg.into())
    }

    pub fn statistics(msg: impl Into<String>) -> Self {
        InspectionError::Statistics(msg.into())
    }

    pub fn initialization(msg: impl Into<String>) -> Self {
        InspectionError::Initialization(msg.into())
    }
}
