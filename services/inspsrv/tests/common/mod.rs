//! Test Common Utilities
//!
//! Word-level in-memory PLC and a fully wired orchestrator on simulated
//! devices.

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::broadcast;

use fins_comlink::{word_order, Address, FinsError, MemoryArea, RegisterAccess, WordIo};
use inspsrv::config::{ImageConfig, StationConfig};
use inspsrv::events::EventHub;
use inspsrv::image_store::FileImageStore;
use inspsrv::sim::{SimulatedCamera, SimulatedVision};
use inspsrv::station::StationContext;
use inspsrv::statistics::StatisticsStore;
use inspsrv::{InspectionOrchestrator, OrchestratorSettings};

/// In-memory PLC word memory
#[derive(Default)]
pub struct MemoryPlc {
    words: Mutex<HashMap<(MemoryArea, u16), [u8; 2]>>,
    offline: AtomicBool,
    pub writes: AtomicUsize,
}

impl MemoryPlc {
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn set_bit(&self, address: &str, value: bool) {
        let address = Address::parse(address).unwrap();
        let bit = address.bit.unwrap();
        let mut words = self.words.lock();
        let slot = words.entry((address.area, address.offset)).or_default();
        let mut word = u16::from_be_bytes(*slot);
        if value {
            word |= 1 << bit;
        } else {
            word &= !(1 << bit);
        }
        *slot = word.to_be_bytes();
    }

    pub fn bit(&self, address: &str) -> bool {
        let address = Address::parse(address).unwrap();
        let word = u16::from_be_bytes(
            self.words
                .lock()
                .get(&(address.area, address.offset))
                .copied()
                .unwrap_or_default(),
        );
        word & (1 << address.bit.unwrap()) != 0
    }

    pub fn f32_at(&self, address: &str) -> f32 {
        let address = Address::parse(address).unwrap();
        let words = self.words.lock();
        let mut raw = Vec::new();
        for i in 0..2 {
            raw.extend_from_slice(
                &words
                    .get(&(address.area, address.offset + i))
                    .copied()
                    .unwrap_or_default(),
            );
        }
        word_order::decode_f32(&raw).unwrap()
    }
}

#[async_trait]
impl WordIo for MemoryPlc {
    async fn read_words(&self, address: &Address, count: u16) -> fins_comlink::Result<Bytes> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(FinsError::NotConnected);
        }
        let words = self.words.lock();
        let mut out = Vec::new();
        for i in 0..count {
            out.extend_from_slice(
                &words
                    .get(&(address.area, address.offset + i))
                    .copied()
                    .unwrap_or_default(),
            );
        }
        Ok(Bytes::from(out))
    }

    async fn write_words(&self, address: &Address, data: &[u8]) -> fins_comlink::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(FinsError::NotConnected);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut words = self.words.lock();
        for (i, chunk) in data.chunks_exact(2).enumerate() {
            words.insert((address.area, address.offset + i as u16), [chunk[0], chunk[1]]);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}

pub struct Harness {
    pub orchestrator: Arc<InspectionOrchestrator>,
    pub plc: Arc<MemoryPlc>,
    pub cameras: Vec<Arc<SimulatedCamera>>,
    pub visions: Vec<Arc<SimulatedVision>>,
    pub statistics: Arc<StatisticsStore>,
    pub events: EventHub,
    pub dir: TempDir,
}

pub struct HarnessOptions {
    pub stations: u32,
    pub alarm_threshold: u32,
    pub capture_timeout: Duration,
    pub poll_interval: Duration,
    pub save_ok_images: bool,
    pub clear_trigger: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            stations: 2,
            alarm_threshold: 3,
            capture_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(20),
            save_ok_images: false,
            clear_trigger: false,
        }
    }
}

impl Harness {
    pub fn new(options: HarnessOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let plc = Arc::new(MemoryPlc::default());
        let events = EventHub::new(64);

        let ids: Vec<u32> = (1..=options.stations).collect();
        let statistics = Arc::new(StatisticsStore::new(
            dir.path().join("statistics.json"),
            &ids,
        ));
        let images = Arc::new(FileImageStore::new(&ImageConfig {
            dir: dir.path().join("images"),
            save_ok: options.save_ok_images,
            save_ng: true,
        }));

        let mut cameras = Vec::new();
        let mut visions = Vec::new();
        let mut stations = Vec::new();
        for id in &ids {
            let camera = Arc::new(SimulatedCamera::new(100, 100));
            let vision = Arc::new(SimulatedVision::new());
            let mut config = StationConfig::numbered(*id);
            config.clear_trigger = options.clear_trigger;
            stations.push(StationContext::new(config, camera.clone(), vision.clone()));
            cameras.push(camera);
            visions.push(vision);
        }

        let orchestrator = InspectionOrchestrator::new(
            OrchestratorSettings {
                poll_interval: options.poll_interval,
                capture_timeout: options.capture_timeout,
                alarm_threshold: options.alarm_threshold,
            },
            stations,
            RegisterAccess::new(plc.clone()),
            statistics.clone(),
            images,
            events.clone(),
        );

        Self {
            orchestrator,
            plc,
            cameras,
            visions,
            statistics,
            events,
            dir,
        }
    }

    /// Initialized and running
    pub async fn running(options: HarnessOptions) -> Self {
        let harness = Self::new(options);
        harness.orchestrator.initialize().await.unwrap();
        harness.orchestrator.start().await.unwrap();
        harness
    }
}

/// Next event from `rx`, failing the test after `secs` seconds
pub async fn next_event<T: Clone>(rx: &mut broadcast::Receiver<T>, secs: u64) -> T {
    tokio::time::timeout(Duration::from_secs(secs), rx.recv())
        .await
        .expect("timed out waiting for event")
        .unwrap()
}
