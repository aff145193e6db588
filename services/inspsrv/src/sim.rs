//! Simulated camera and vision processor
//!
//! Used by the service when no vendor driver is available, and by tests.
//! Both can be scripted: the camera can stop answering triggers or refuse to
//! connect, and the vision processor can replay a queue of outputs.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::broadcast;
use tracing::debug;

use crate::camera::{Camera, ImageFrame, TriggerMode};
use crate::vision::{VisionOutput, VisionProcessor};

const FRAME_CHANNEL_CAPACITY: usize = 8;

pub struct SimulatedCamera {
    width: u32,
    height: u32,
    camera_id: Mutex<Option<String>>,
    connected: AtomicBool,
    grabbing: AtomicBool,
    mode: Mutex<TriggerMode>,
    frames: broadcast::Sender<ImageFrame>,
    /// Answer soft triggers with a frame
    responsive: AtomicBool,
    fail_connect: AtomicBool,
    triggers: AtomicU64,
}

impl SimulatedCamera {
    pub fn new(width: u32, height: u32) -> Self {
        let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        Self {
            width,
            height,
            camera_id: Mutex::new(None),
            connected: AtomicBool::new(false),
            grabbing: AtomicBool::new(false),
            mode: Mutex::new(TriggerMode::Software),
            frames,
            responsive: AtomicBool::new(true),
            fail_connect: AtomicBool::new(false),
            triggers: AtomicU64::new(0),
        }
    }

    pub fn set_responsive(&self, responsive: bool) {
        self.responsive.store(responsive, Ordering::SeqCst);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Drop the device as if its cable were pulled
    pub fn simulate_disconnect(&self) {
        self.grabbing.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn trigger_count(&self) -> u64 {
        self.triggers.load(Ordering::SeqCst)
    }

    pub fn trigger_mode(&self) -> TriggerMode {
        *self.mode.lock()
    }

    /// Deliver a frame, as a hardware trigger would
    pub fn push_frame(&self, frame: ImageFrame) {
        let _ = self.frames.send(frame);
    }

    /// Gradient with a little noise so consecutive frames differ
    fn synthesize(&self) -> ImageFrame {
        let mut rng = rand::thread_rng();
        let mut pixels = Vec::with_capacity((self.width * self.height) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                let base = ((x + y) * 255 / (self.width + self.height).max(1)) as u8;
                pixels.push(base.saturating_add(rng.gen_range(0..8)));
            }
        }
        ImageFrame::new(self.width, self.height, pixels)
    }
}

#[async_trait]
impl Camera for SimulatedCamera {
    async fn connect(&self, camera_id: &str) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            bail!("camera '{}' not found", camera_id);
        }
        *self.camera_id.lock() = Some(camera_id.to_string());
        self.connected.store(true, Ordering::SeqCst);
        debug!("Simulated camera '{}' connected", camera_id);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.simulate_disconnect();
        Ok(())
    }

    async fn start_grab(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            bail!("camera not connected");
        }
        self.grabbing.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_grab(&self) -> Result<()> {
        self.grabbing.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn set_trigger_mode(&self, mode: TriggerMode) -> Result<()> {
        *self.mode.lock() = mode;
        Ok(())
    }

    async fn soft_trigger(&self) -> Result<()> {
        if !self.grabbing.load(Ordering::SeqCst) {
            bail!("camera not grabbing");
        }
        self.triggers.fetch_add(1, Ordering::SeqCst);
        if self.responsive.load(Ordering::SeqCst) {
            let frame = self.synthesize();
            let _ = self.frames.send(frame);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ImageFrame> {
        self.frames.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_grabbing(&self) -> bool {
        self.grabbing.load(Ordering::SeqCst)
    }
}

/// Vision processor that replays scripted outputs, then a default
pub struct SimulatedVision {
    loaded: AtomicBool,
    model: Mutex<Option<PathBuf>>,
    fail_load: AtomicBool,
    script: Mutex<VecDeque<std::result::Result<VisionOutput, String>>>,
    default_output: Mutex<VisionOutput>,
}

impl Default for SimulatedVision {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedVision {
    pub fn new() -> Self {
        Self {
            loaded: AtomicBool::new(false),
            model: Mutex::new(None),
            fail_load: AtomicBool::new(false),
            script: Mutex::new(VecDeque::new()),
            default_output: Mutex::new(VisionOutput {
                found: true,
                score: 0.95,
                angle: 0.0,
                x: 0.0,
                y: 0.0,
                process_time_ms: 0.0,
                annotated_image: None,
            }),
        }
    }

    pub fn set_fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn set_default_output(&self, output: VisionOutput) {
        *self.default_output.lock() = output;
    }

    /// Queue the output of a future `execute`
    pub fn push_output(&self, output: VisionOutput) {
        self.script.lock().push_back(Ok(output));
    }

    /// Queue a failing `execute`
    pub fn push_failure(&self, message: impl Into<String>) {
        self.script.lock().push_back(Err(message.into()));
    }

    pub fn model_path(&self) -> Option<PathBuf> {
        self.model.lock().clone()
    }
}

#[async_trait]
impl VisionProcessor for SimulatedVision {
    async fn load_model(&self, path: &Path) -> Result<()> {
        if self.fail_load.load(Ordering::SeqCst) || path.as_os_str().is_empty() {
            self.loaded.store(false, Ordering::SeqCst);
            bail!("cannot load model '{}'", path.display());
        }
        *self.model.lock() = Some(path.to_path_buf());
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn execute(&self, image: &ImageFrame) -> Result<VisionOutput> {
        let started = Instant::now();
        if !self.is_loaded() {
            bail!("model not loaded");
        }
        if !image.is_valid() {
            bail!("invalid frame {}x{}", image.width, image.height);
        }

        let scripted = self.script.lock().pop_front();
        let mut output = match scripted {
            Some(Ok(output)) => output,
            Some(Err(message)) => return Err(anyhow!(message)),
            None => self.default_output.lock().clone(),
        };
        if output.process_time_ms == 0.0 {
            output.process_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        }
        Ok(output)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_camera_lifecycle() {
        let camera = SimulatedCamera::new(10, 10);
        assert!(camera.start_grab().await.is_err());

        camera.connect("cam1").await.unwrap();
        camera.start_grab().await.unwrap();
        let mut frames = camera.subscribe();
        camera.soft_trigger().await.unwrap();
        let frame = frames.recv().await.unwrap();
        assert!(frame.is_valid());

        camera.stop_grab().await.unwrap();
        assert!(camera.soft_trigger().await.is_err());

        camera.set_fail_connect(true);
        camera.disconnect().await.unwrap();
        assert!(camera.connect("cam1").await.is_err());
        assert!(!camera.is_connected());
    }

    #[tokio::test]
    async fn test_vision_script() {
        let vision = SimulatedVision::new();
        let frame = ImageFrame::filled(4, 4, 0);
        assert!(vision.execute(&frame).await.is_err());

        vision.load_model(Path::new("models/a.model")).await.unwrap();
        vision.push_output(VisionOutput {
            found: false,
            ..Default::default()
        });
        vision.push_failure("no contrast");

        assert!(!vision.execute(&frame).await.unwrap().found);
        assert_eq!(
            vision.execute(&frame).await.unwrap_err().to_string(),
            "no contrast"
        );
        assert!(vision.execute(&frame).await.unwrap().found);
        assert_eq!(vision.model_path().unwrap(), PathBuf::from("models/a.model"));
    }

    #[tokio::test]
    async fn test_vision_load_failure() {
        let vision = SimulatedVision::new();
        vision.set_fail_load(true);
        assert!(vision.load_model(Path::new("x.model")).await.is_err());
        assert!(!vision.is_loaded());
    }
}
