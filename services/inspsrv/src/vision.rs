//! Vision capability
//!
//! The matching algorithm lives behind [`VisionProcessor`]; the service only
//! needs the load/execute contract.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::camera::ImageFrame;

/// Outcome of one template match
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisionOutput {
    pub found: bool,
    /// Match score, 0.0 to 1.0
    pub score: f64,
    /// Degrees
    pub angle: f64,
    pub x: f64,
    pub y: f64,
    pub process_time_ms: f64,
    /// Frame with the match drawn on it, when the processor produces one
    pub annotated_image: Option<ImageFrame>,
}

#[async_trait]
pub trait VisionProcessor: Send + Sync {
    async fn load_model(&self, path: &Path) -> Result<()>;

    fn is_loaded(&self) -> bool;

    /// Run the loaded model. May take tens of milliseconds.
    async fn execute(&self, image: &ImageFrame) -> Result<VisionOutput>;
}
