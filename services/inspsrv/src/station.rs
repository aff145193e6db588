//! Per-station runtime context

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::camera::Camera;
use crate::config::StationConfig;
use crate::result::ResultType;
use crate::vision::VisionProcessor;

/// One station's devices, trigger edge and failure counter.
///
/// Only the station's own task updates the counter and the edge state;
/// atomics let `status()` read them without locking.
pub struct StationContext {
    pub config: StationConfig,
    pub camera: Arc<dyn Camera>,
    pub vision: Arc<dyn VisionProcessor>,
    consecutive_failures: AtomicU32,
    last_trigger: AtomicBool,
}

impl std::fmt::Debug for StationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StationContext")
            .field("id", &self.config.id)
            .field("consecutive_failures", &self.consecutive_failures())
            .finish()
    }
}

impl StationContext {
    pub fn new(
        config: StationConfig,
        camera: Arc<dyn Camera>,
        vision: Arc<dyn VisionProcessor>,
    ) -> Self {
        Self {
            config,
            camera,
            vision,
            consecutive_failures: AtomicU32::new(0),
            last_trigger: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u32 {
        self.config.id
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn reset_failures(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
    }

    /// Feed one trigger reading; true on a false -> true edge
    pub fn observe_trigger(&self, level: bool) -> bool {
        let previous = self.last_trigger.swap(level, Ordering::AcqRel);
        level && !previous
    }

    /// Forget the last trigger level, so a trigger still held high fires again
    pub fn reset_trigger(&self) {
        self.last_trigger.store(false, Ordering::Release);
    }

    /// Update the failure counter. Returns the count when it has just
    /// reached `threshold`.
    ///
    /// Ok resets, Ng and Error increment, Timeout leaves it alone.
    pub fn record_outcome(&self, result_type: ResultType, threshold: u32) -> Option<u32> {
        if result_type.is_ok() {
            self.consecutive_failures.store(0, Ordering::Release);
            None
        } else if result_type.is_failure() {
            let count = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
            (count == threshold).then_some(count)
        } else {
            None
        }
    }
}
