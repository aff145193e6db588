//! Inspection result value

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::vision::VisionOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultType {
    Ok,
    Ng,
    /// No frame within the capture timeout
    Timeout,
    /// Capture or vision failure
    Error,
}

impl ResultType {
    pub fn is_ok(self) -> bool {
        self == ResultType::Ok
    }

    /// Counts toward the consecutive-failure alarm and as NG in statistics
    pub fn is_failure(self) -> bool {
        matches!(self, ResultType::Ng | ResultType::Error)
    }

    /// Reaches the PLC and the statistics. Timeouts do neither.
    pub fn is_counted(self) -> bool {
        self.is_ok() || self.is_failure()
    }
}

impl std::fmt::Display for ResultType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultType::Ok => write!(f, "OK"),
            ResultType::Ng => write!(f, "NG"),
            ResultType::Timeout => write!(f, "TIMEOUT"),
            ResultType::Error => write!(f, "ERROR"),
        }
    }
}

/// One pipeline execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionResult {
    pub station_id: u32,
    pub timestamp: DateTime<Utc>,
    pub result_type: ResultType,
    pub score: f64,
    pub angle: f64,
    pub x: f64,
    pub y: f64,
    pub process_time_ms: f64,
    pub image_path: Option<PathBuf>,
    pub error_message: Option<String>,
}

impl InspectionResult {
    fn empty(station_id: u32, result_type: ResultType) -> Self {
        Self {
            station_id,
            timestamp: Utc::now(),
            result_type,
            score: 0.0,
            angle: 0.0,
            x: 0.0,
            y: 0.0,
            process_time_ms: 0.0,
            image_path: None,
            error_message: None,
        }
    }

    /// OK when the model was found, NG otherwise
    pub fn from_vision(station_id: u32, output: &VisionOutput) -> Self {
        let result_type = if output.found {
            ResultType::Ok
        } else {
            ResultType::Ng
        };
        Self {
            score: output.score,
            angle: output.angle,
            x: output.x,
            y: output.y,
            process_time_ms: output.process_time_ms,
            ..Self::empty(station_id, result_type)
        }
    }

    pub fn timeout(station_id: u32, message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::empty(station_id, ResultType::Timeout)
        }
    }

    pub fn error(station_id: u32, message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::empty(station_id, ResultType::Error)
        }
    }

    pub fn with_image_path(self, path: PathBuf) -> Self {
        Self {
            image_path: Some(path),
            ..self
        }
    }

    pub fn with_process_time(self, process_time_ms: f64) -> Self {
        Self {
            process_time_ms,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vision() {
        let output = VisionOutput {
            found: true,
            score: 0.95,
            angle: 12.5,
            x: 50.0,
            y: 40.0,
            process_time_ms: 8.0,
            annotated_image: None,
        };
        let result = InspectionResult::from_vision(1, &output);
        assert_eq!(result.result_type, ResultType::Ok);
        assert_eq!(result.angle, 12.5);
        assert_eq!(result.score, 0.95);
        assert!(result.error_message.is_none());

        let missed = InspectionResult::from_vision(
            2,
            &VisionOutput {
                found: false,
                ..output
            },
        );
        assert_eq!(missed.result_type, ResultType::Ng);
    }

    #[test]
    fn test_failure_classification() {
        assert!(!ResultType::Ok.is_failure());
        assert!(ResultType::Ng.is_failure());
        assert!(ResultType::Error.is_failure());
        assert!(!ResultType::Timeout.is_failure());
        assert!(ResultType::Error.is_counted());
        assert!(!ResultType::Timeout.is_counted());
        assert_eq!(ResultType::Timeout.to_string(), "TIMEOUT");
    }

    #[test]
    fn test_error_carries_message() {
        let result = InspectionResult::error(1, "lens cap on");
        assert_eq!(result.result_type, ResultType::Error);
        assert_eq!(result.error_message.as_deref(), Some("lens cap on"));
        assert_eq!(result.angle, 0.0);
    }
}
