//! Camera capability
//!
//! Vendor drivers implement [`Camera`]. Frames are delivered on a broadcast
//! channel; [`capture_with_timeout`] turns that stream into a single-shot
//! request for the orchestrator.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::InspectionError;

/// How an acquisition is started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// The service fires a soft trigger per capture
    #[default]
    Software,
    /// An external line triggers the sensor; the service only waits
    Hardware,
}

impl std::fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerMode::Software => write!(f, "software"),
            TriggerMode::Hardware => write!(f, "hardware"),
        }
    }
}

/// 8-bit grayscale frame
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
    pub timestamp: DateTime<Utc>,
}

impl ImageFrame {
    pub fn new(width: u32, height: u32, pixels: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            pixels: pixels.into(),
            timestamp: Utc::now(),
        }
    }

    /// Uniform frame, mostly for tests and simulation
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self::new(width, height, vec![value; (width * height) as usize])
    }

    /// Pixel buffer matches the declared size
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() == self.width as usize * self.height as usize
    }
}

#[async_trait]
pub trait Camera: Send + Sync {
    /// Open the device identified by `camera_id`
    async fn connect(&self, camera_id: &str) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn start_grab(&self) -> Result<()>;

    async fn stop_grab(&self) -> Result<()>;

    async fn set_trigger_mode(&self, mode: TriggerMode) -> Result<()>;

    async fn soft_trigger(&self) -> Result<()>;

    /// Receiver for every delivered frame
    fn subscribe(&self) -> broadcast::Receiver<ImageFrame>;

    fn is_connected(&self) -> bool;

    fn is_grabbing(&self) -> bool;
}

/// Request one frame and wait for it.
///
/// The receiver is created before the trigger so a fast camera cannot deliver
/// the frame unseen. Timing out is reported as `CaptureTimeout` and is never
/// retried here.
pub async fn capture_with_timeout(
    camera: &dyn Camera,
    mode: TriggerMode,
    timeout: Duration,
) -> Result<ImageFrame, InspectionError> {
    if !camera.is_grabbing() {
        return Err(InspectionError::CaptureFailed(
            "camera is not grabbing".to_string(),
        ));
    }

    let mut frames = camera.subscribe();

    if mode == TriggerMode::Software {
        camera
            .soft_trigger()
            .await
            .map_err(|e| InspectionError::CaptureFailed(format!("soft trigger: {}", e)))?;
    }

    let wait = async {
        loop {
            match frames.recv().await {
                Ok(frame) => return Ok(frame),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Capture lagged, {} frame(s) skipped", skipped);
                },
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(InspectionError::CaptureFailed(
                        "frame channel closed".to_string(),
                    ))
                },
            }
        }
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(result) => result,
        Err(_) => Err(InspectionError::CaptureTimeout(timeout.as_millis() as u64)),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::sim::SimulatedCamera;

    async fn grabbing_camera() -> SimulatedCamera {
        let camera = SimulatedCamera::new(64, 48);
        camera.connect("cam1").await.unwrap();
        camera.start_grab().await.unwrap();
        camera
    }

    #[tokio::test]
    async fn test_software_trigger_delivers_frame() {
        let camera = grabbing_camera().await;
        let frame = capture_with_timeout(&camera, TriggerMode::Software, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));
        assert!(frame.is_valid());
        assert_eq!(camera.trigger_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hardware_mode_waits_for_external_frame() {
        let camera = std::sync::Arc::new(grabbing_camera().await);

        let pusher = camera.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            pusher.push_frame(ImageFrame::filled(4, 4, 9));
        });

        let frame = capture_with_timeout(
            camera.as_ref(),
            TriggerMode::Hardware,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(frame.pixels[0], 9);
        assert_eq!(camera.trigger_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_no_frame() {
        let camera = grabbing_camera().await;
        camera.set_responsive(false);

        let started = tokio::time::Instant::now();
        let err = capture_with_timeout(&camera, TriggerMode::Software, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, InspectionError::CaptureTimeout(5000)));
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_not_grabbing_fails_fast() {
        let camera = SimulatedCamera::new(8, 8);
        camera.connect("cam1").await.unwrap();
        let err = capture_with_timeout(&camera, TriggerMode::Software, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, InspectionError::CaptureFailed(_)));
    }

    #[test]
    fn test_frame_validity() {
        assert!(ImageFrame::filled(3, 2, 0).is_valid());
        assert!(!ImageFrame::new(3, 2, vec![0u8; 5]).is_valid());
        assert!(!ImageFrame::new(0, 0, Vec::<u8>::new()).is_valid());
    }
}
