//! Inspection orchestrator
//!
//! ```text
//! Offline --initialize--> Idle --start--> Running <--pause/resume--> Paused
//!                          ^                 |                         |
//!                          +------stop-------+-------------------------+
//! any --hardware failure--> Error --initialize--> Idle
//! any --shutdown--> Offline
//! ```
//!
//! While running, every station polls its trigger bit on its own task. A
//! rising edge runs the pipeline for that station:
//! capture -> vision -> PLC write -> persist -> statistics -> event.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fins_comlink::{FinsError, RegisterAccess};

use crate::camera::{capture_with_timeout, ImageFrame};
use crate::config::InspectionConfig;
use crate::error::{InspectionError, Result};
use crate::events::{DeviceType, EventHub};
use crate::image_store::ImageStore;
use crate::result::{InspectionResult, ResultType};
use crate::station::StationContext;
use crate::statistics::{StationStatistics, StatisticsStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum InspectionState {
    Idle,
    Running,
    Paused,
    Error,
    #[default]
    Offline,
}

impl std::fmt::Display for InspectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InspectionState::Idle => write!(f, "Idle"),
            InspectionState::Running => write!(f, "Running"),
            InspectionState::Paused => write!(f, "Paused"),
            InspectionState::Error => write!(f, "Error"),
            InspectionState::Offline => write!(f, "Offline"),
        }
    }
}

/// Loop timing and alarm threshold
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub poll_interval: Duration,
    pub capture_timeout: Duration,
    pub alarm_threshold: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&InspectionConfig::default())
    }
}

impl From<&InspectionConfig> for OrchestratorSettings {
    fn from(config: &InspectionConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            capture_timeout: config.capture_timeout(),
            alarm_threshold: config.alarm_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StationStatus {
    pub station_id: u32,
    pub name: String,
    pub camera_connected: bool,
    pub camera_grabbing: bool,
    pub vision_loaded: bool,
    pub consecutive_failures: u32,
    pub statistics: Option<StationStatistics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub state: InspectionState,
    pub plc_connected: bool,
    pub stations: Vec<StationStatus>,
}

/// Poll tasks of one Running/Paused period
struct RunHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct InspectionOrchestrator {
    settings: OrchestratorSettings,
    stations: Vec<Arc<StationContext>>,
    plc: RegisterAccess,
    statistics: Arc<StatisticsStore>,
    images: Arc<dyn ImageStore>,
    events: EventHub,
    state: Mutex<InspectionState>,
    run: tokio::sync::Mutex<Option<RunHandle>>,
}

impl std::fmt::Debug for InspectionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InspectionOrchestrator")
            .field("state", &self.state())
            .field("stations", &self.stations.len())
            .finish()
    }
}

impl InspectionOrchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        stations: Vec<StationContext>,
        plc: RegisterAccess,
        statistics: Arc<StatisticsStore>,
        images: Arc<dyn ImageStore>,
        events: EventHub,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            stations: stations.into_iter().map(Arc::new).collect(),
            plc,
            statistics,
            images,
            events,
            state: Mutex::new(InspectionState::Offline),
            run: tokio::sync::Mutex::new(None),
        })
    }

    pub fn state(&self) -> InspectionState {
        *self.state.lock()
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn stations(&self) -> &[Arc<StationContext>] {
        &self.stations
    }

    fn station(&self, station_id: u32) -> Result<&Arc<StationContext>> {
        self.stations
            .iter()
            .find(|s| s.id() == station_id)
            .ok_or(InspectionError::UnknownStation(station_id))
    }

    /// Move to `to` if the current state is in `from`
    fn transition(
        &self,
        from: &[InspectionState],
        to: InspectionState,
        action: &'static str,
    ) -> Result<InspectionState> {
        let old = {
            let mut state = self.state.lock();
            if !from.contains(&state) {
                return Err(InspectionError::InvalidTransition {
                    from: *state,
                    action,
                });
            }
            std::mem::replace(&mut *state, to)
        };
        self.announce(old, to);
        Ok(old)
    }

    /// Unconditional move, used for failures and shutdown
    fn force_state(&self, to: InspectionState) {
        let old = std::mem::replace(&mut *self.state.lock(), to);
        if old != to {
            self.announce(old, to);
        }
    }

    fn announce(&self, old: InspectionState, new: InspectionState) {
        info!("State: {} -> {}", old, new);
        self.events.state_changed(old, new);
    }

    fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.events.error_occurred(message);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connect cameras and load vision models.
    ///
    /// A camera that cannot connect puts the orchestrator in `Error`. A model
    /// that fails to load is reported but leaves it `Idle`; `start` then
    /// refuses with `VisionNotLoaded`.
    pub async fn initialize(&self) -> Result<()> {
        {
            let state = self.state();
            if !matches!(state, InspectionState::Offline | InspectionState::Error) {
                return Err(InspectionError::InvalidTransition {
                    from: state,
                    action: "initialize",
                });
            }
        }
        // Leftovers of a run that ended in Error
        self.stop_tasks().await;
        self.stop_cameras().await;

        for station in &self.stations {
            let cfg = &station.config;
            let name = cfg.display_name();

            if let Err(e) = station.camera.connect(&cfg.camera_id).await {
                self.events
                    .connection_changed(DeviceType::Camera, cfg.camera_id.clone(), false);
                let message = format!("{}: camera '{}' connect failed: {}", name, cfg.camera_id, e);
                self.report_error(message.clone());
                self.force_state(InspectionState::Error);
                return Err(InspectionError::initialization(message));
            }
            self.events
                .connection_changed(DeviceType::Camera, cfg.camera_id.clone(), true);

            if let Err(e) = station.camera.set_trigger_mode(cfg.trigger_mode).await {
                let message = format!("{}: trigger mode {}: {}", name, cfg.trigger_mode, e);
                self.report_error(message.clone());
                self.force_state(InspectionState::Error);
                return Err(InspectionError::initialization(message));
            }

            match station.vision.load_model(&cfg.model_path).await {
                Ok(()) => info!("{}: model {} loaded", name, cfg.model_path.display()),
                Err(e) => self.report_error(format!(
                    "{}: model {} failed to load: {}",
                    name,
                    cfg.model_path.display(),
                    e
                )),
            }
        }

        self.force_state(InspectionState::Idle);
        Ok(())
    }

    /// Idle -> Running. Every station needs a loaded model.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let state = self.state();
            if state != InspectionState::Idle {
                return Err(InspectionError::InvalidTransition {
                    from: state,
                    action: "start",
                });
            }
        }

        if let Some(station) = self.stations.iter().find(|s| !s.vision.is_loaded()) {
            let err = InspectionError::VisionNotLoaded(station.id());
            self.report_error(err.to_string());
            return Err(err);
        }

        let mut started: Vec<&Arc<StationContext>> = Vec::new();
        for station in &self.stations {
            if let Err(e) = station.camera.start_grab().await {
                for s in started {
                    if let Err(stop_err) = s.camera.stop_grab().await {
                        warn!("Station {}: stop grab: {}", s.id(), stop_err);
                    }
                }
                let err = InspectionError::CaptureFailed(format!(
                    "station {}: start grab: {}",
                    station.id(),
                    e
                ));
                self.report_error(err.to_string());
                return Err(err);
            }
            started.push(station);
        }

        let mut run = self.run.lock().await;
        self.transition(&[InspectionState::Idle], InspectionState::Running, "start")?;

        let token = CancellationToken::new();
        let tasks = self
            .stations
            .iter()
            .map(|station| {
                station.reset_trigger();
                tokio::spawn(station_loop(
                    Arc::downgrade(self),
                    station.clone(),
                    self.settings.poll_interval,
                    token.clone(),
                ))
            })
            .collect();
        *run = Some(RunHandle { token, tasks });
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.transition(&[InspectionState::Running], InspectionState::Paused, "pause")?;
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        self.transition(&[InspectionState::Paused], InspectionState::Running, "resume")?;
        Ok(())
    }

    /// Running|Paused -> Idle. In-flight pipelines finish first.
    pub async fn stop(&self) -> Result<()> {
        self.transition(
            &[InspectionState::Running, InspectionState::Paused],
            InspectionState::Idle,
            "stop",
        )?;
        self.stop_tasks().await;
        self.stop_cameras().await;
        Ok(())
    }

    /// Stop everything, save statistics and go `Offline`
    pub async fn shutdown(&self) {
        if matches!(
            self.state(),
            InspectionState::Running | InspectionState::Paused
        ) {
            if let Err(e) = self.stop().await {
                warn!("Stop during shutdown: {}", e);
            }
        }
        self.stop_tasks().await;
        self.stop_cameras().await;

        for station in &self.stations {
            if let Err(e) = station.camera.disconnect().await {
                warn!("Station {}: camera disconnect: {}", station.id(), e);
            }
        }

        if let Err(e) = self.statistics.save().await {
            self.report_error(format!("Statistics save on shutdown: {}", e));
        }

        self.force_state(InspectionState::Offline);
    }

    async fn stop_tasks(&self) {
        let Some(run) = self.run.lock().await.take() else {
            return;
        };
        run.token.cancel();
        for joined in futures::future::join_all(run.tasks).await {
            if let Err(e) = joined {
                warn!("Station task join: {}", e);
            }
        }
    }

    async fn stop_cameras(&self) {
        for station in &self.stations {
            if station.camera.is_grabbing() {
                if let Err(e) = station.camera.stop_grab().await {
                    warn!("Station {}: stop grab: {}", station.id(), e);
                }
            }
        }
    }

    /// Hardware failure while running. Poll tasks stop at their next tick.
    async fn enter_error(&self, message: String) {
        self.report_error(message);
        self.force_state(InspectionState::Error);
        if let Some(run) = self.run.lock().await.as_ref() {
            run.token.cancel();
        }
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    /// Inspect one part outside the trigger loop, e.g. from an operator
    /// command. With `image` the capture step is skipped.
    pub async fn inspect_once(
        &self,
        station_id: u32,
        image: Option<ImageFrame>,
    ) -> Result<InspectionResult> {
        let state = self.state();
        if matches!(state, InspectionState::Offline | InspectionState::Error) {
            return Err(InspectionError::InvalidTransition {
                from: state,
                action: "inspect",
            });
        }
        let station = self.station(station_id)?.clone();
        if !station.vision.is_loaded() {
            return Err(InspectionError::VisionNotLoaded(station_id));
        }
        Ok(self.run_pipeline(&station, image).await)
    }

    async fn run_pipeline(
        &self,
        station: &StationContext,
        supplied: Option<ImageFrame>,
    ) -> InspectionResult {
        let started = Instant::now();
        let id = station.id();
        let cfg = &station.config;

        // Capture
        let frame = match supplied {
            Some(frame) => Ok(frame),
            None => {
                capture_with_timeout(
                    station.camera.as_ref(),
                    cfg.trigger_mode,
                    self.settings.capture_timeout,
                )
                .await
            },
        };

        // Vision
        let (mut result, frame) = match frame {
            Err(e @ InspectionError::CaptureTimeout(_)) => {
                (InspectionResult::timeout(id, e.to_string()), None)
            },
            Err(e) => (InspectionResult::error(id, e.to_string()), None),
            Ok(frame) => match station.vision.execute(&frame).await {
                Ok(mut output) => {
                    let result = InspectionResult::from_vision(id, &output);
                    (result, Some(output.annotated_image.take().unwrap_or(frame)))
                },
                Err(e) => {
                    let err = InspectionError::VisionExecutionFailed(e.to_string());
                    (InspectionResult::error(id, err.to_string()), Some(frame))
                },
            },
        };
        if result.process_time_ms == 0.0 {
            result = result.with_process_time(started.elapsed().as_secs_f64() * 1000.0);
        }

        let counted = result.result_type.is_counted();

        // PLC write
        if counted {
            self.write_outcome(station, &result).await;
        }

        // Persist
        if let (true, Some(frame)) = (counted, frame.as_ref()) {
            match self
                .images
                .save_result_image(frame, id, result.result_type.is_ok())
                .await
            {
                Ok(Some(path)) => result = result.with_image_path(path),
                Ok(None) => {},
                Err(e) => warn!("Station {}: image save: {}", id, e),
            }
        }

        // Statistics
        if counted {
            self.statistics.add_result(id, result.result_type.is_ok());
        }

        // Failure counter
        if let Some(count) = station.record_outcome(result.result_type, self.settings.alarm_threshold)
        {
            warn!("Station {}: {} consecutive failures, alarm raised", id, count);
            self.events.alarm(id, count);
        }

        match result.result_type {
            ResultType::Ok | ResultType::Ng => info!(
                "Station {}: {} score={:.3} angle={:.2} ({:.1}ms)",
                id, result.result_type, result.score, result.angle, result.process_time_ms
            ),
            ResultType::Timeout | ResultType::Error => {
                let message = format!(
                    "Station {}: {} {}",
                    id,
                    result.result_type,
                    result.error_message.as_deref().unwrap_or("")
                );
                if result.result_type == ResultType::Error {
                    self.report_error(message);
                } else {
                    warn!("{}", message);
                }
            },
        }

        self.events.inspection_completed(result.clone());
        result
    }

    /// Result value and angle to the PLC. Skipped when the link is down.
    async fn write_outcome(&self, station: &StationContext, result: &InspectionResult) {
        let cfg = &station.config;
        if !self.plc.is_connected() {
            let err = InspectionError::PlcUnavailable(format!(
                "station {} result not written",
                cfg.id
            ));
            warn!("{}", err);
            return;
        }

        let (value, angle) = match result.result_type {
            ResultType::Ok => (cfg.ok_value, result.angle as f32),
            ResultType::Ng => (cfg.ng_value, result.angle as f32),
            _ => (cfg.ng_value, 0.0),
        };

        let written = async {
            self.plc.write_f32(&cfg.result_address, value).await?;
            self.plc.write_f32(&cfg.angle_address, angle).await
        }
        .await;

        if let Err(e) = written {
            self.report_error(format!("Station {}: PLC result write: {}", cfg.id, e));
        }
    }

    /// Read the trigger bit; true on a rising edge
    async fn poll_trigger(&self, station: &StationContext) -> std::result::Result<bool, FinsError> {
        if !self.plc.is_connected() {
            return Ok(false);
        }
        let level = self.plc.read_bit(&station.config.trigger_address).await?;
        Ok(station.observe_trigger(level))
    }

    async fn clear_trigger(&self, station: &StationContext) {
        if !station.config.clear_trigger || !self.plc.is_connected() {
            return;
        }
        match self
            .plc
            .write_bit(&station.config.trigger_address, false)
            .await
        {
            Ok(()) => {
                station.observe_trigger(false);
            },
            Err(e) => warn!("Station {}: clear trigger: {}", station.id(), e),
        }
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            state: self.state(),
            plc_connected: self.plc.is_connected(),
            stations: self
                .stations
                .iter()
                .map(|s| StationStatus {
                    station_id: s.id(),
                    name: s.config.display_name(),
                    camera_connected: s.camera.is_connected(),
                    camera_grabbing: s.camera.is_grabbing(),
                    vision_loaded: s.vision.is_loaded(),
                    consecutive_failures: s.consecutive_failures(),
                    statistics: self.statistics.get(s.id()),
                })
                .collect(),
        }
    }

    pub fn reset_statistics(&self, station_id: u32) -> Result<()> {
        self.station(station_id)?;
        self.statistics.reset(station_id);
        Ok(())
    }

    /// Zero every station's counters and failure streak
    pub fn reset_all_statistics(&self) {
        self.statistics.reset_all();
        for station in &self.stations {
            station.reset_failures();
        }
    }
}

/// Trigger poll loop for one station
async fn station_loop(
    orchestrator: Weak<InspectionOrchestrator>,
    station: Arc<StationContext>,
    period: Duration,
    token: CancellationToken,
) {
    let id = station.id();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut poll_failing = false;

    debug!("Station {}: poll loop started", id);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let Some(orchestrator) = orchestrator.upgrade() else {
            break;
        };
        if orchestrator.state() != InspectionState::Running {
            continue;
        }

        if !station.camera.is_connected() {
            orchestrator
                .events
                .connection_changed(DeviceType::Camera, station.config.camera_id.clone(), false);
            orchestrator
                .enter_error(format!(
                    "Station {}: camera '{}' lost",
                    id, station.config.camera_id
                ))
                .await;
            break;
        }

        match orchestrator.poll_trigger(&station).await {
            Ok(true) => {
                poll_failing = false;
                debug!("Station {}: trigger", id);
                orchestrator.run_pipeline(&station, None).await;
                orchestrator.clear_trigger(&station).await;
            },
            Ok(false) => poll_failing = false,
            Err(e) => {
                // Once per failure streak
                if !poll_failing {
                    warn!("Station {}: trigger read: {}", id, e);
                    poll_failing = true;
                }
            },
        }
    }

    debug!("Station {}: poll loop stopped", id);
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_state_display_and_default() {
        assert_eq!(InspectionState::default(), InspectionState::Offline);
        assert_eq!(InspectionState::Paused.to_string(), "Paused");
    }

    #[test]
    fn test_settings_from_config() {
        let settings = OrchestratorSettings::default();
        assert_eq!(settings.poll_interval, Duration::from_millis(100));
        assert_eq!(settings.capture_timeout, Duration::from_secs(5));
        assert_eq!(settings.alarm_threshold, 3);
    }
}
