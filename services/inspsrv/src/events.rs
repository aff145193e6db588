//! Typed event channels
//!
//! One broadcast channel per event category. Publishing never blocks and
//! never fails: with no subscribers the event is dropped, and slow
//! subscribers see `Lagged`.

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fins_comlink::LinkState;

use crate::orchestrator::InspectionState;
use crate::result::InspectionResult;

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChanged {
    pub old: InspectionState,
    pub new: InspectionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Plc,
    Camera,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Plc => write!(f, "PLC"),
            DeviceType::Camera => write!(f, "Camera"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionChanged {
    pub device_type: DeviceType,
    pub device_name: String,
    pub connected: bool,
}

/// Consecutive-failure alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmRaised {
    pub station_id: u32,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone)]
pub struct EventHub {
    state_tx: broadcast::Sender<StateChanged>,
    connection_tx: broadcast::Sender<ConnectionChanged>,
    inspection_tx: broadcast::Sender<InspectionResult>,
    error_tx: broadcast::Sender<String>,
    alarm_tx: broadcast::Sender<AlarmRaised>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            state_tx: broadcast::channel(capacity).0,
            connection_tx: broadcast::channel(capacity).0,
            inspection_tx: broadcast::channel(capacity).0,
            error_tx: broadcast::channel(capacity).0,
            alarm_tx: broadcast::channel(capacity).0,
        }
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<StateChanged> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionChanged> {
        self.connection_tx.subscribe()
    }

    pub fn subscribe_inspection(&self) -> broadcast::Receiver<InspectionResult> {
        self.inspection_tx.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<String> {
        self.error_tx.subscribe()
    }

    pub fn subscribe_alarms(&self) -> broadcast::Receiver<AlarmRaised> {
        self.alarm_tx.subscribe()
    }

    pub fn state_changed(&self, old: InspectionState, new: InspectionState) {
        let _ = self.state_tx.send(StateChanged { old, new });
    }

    pub fn connection_changed(
        &self,
        device_type: DeviceType,
        device_name: impl Into<String>,
        connected: bool,
    ) {
        let _ = self.connection_tx.send(ConnectionChanged {
            device_type,
            device_name: device_name.into(),
            connected,
        });
    }

    pub fn inspection_completed(&self, result: InspectionResult) {
        let _ = self.inspection_tx.send(result);
    }

    pub fn error_occurred(&self, message: impl Into<String>) {
        let _ = self.error_tx.send(message.into());
    }

    pub fn alarm(&self, station_id: u32, consecutive_failures: u32) {
        let _ = self.alarm_tx.send(AlarmRaised {
            station_id,
            consecutive_failures,
        });
    }
}

/// Publish PLC link transitions as connection-changed events.
///
/// Only edges into and out of `Connected` are reported; `Handshaking` is an
/// internal step.
pub fn spawn_link_watcher(
    mut states: watch::Receiver<LinkState>,
    events: EventHub,
    device_name: String,
    token: CancellationToken,
) -> JoinHandle<()> {
    let mut connected = *states.borrow_and_update() == LinkState::Connected;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let now_connected = *states.borrow_and_update() == LinkState::Connected;
                    if now_connected != connected {
                        connected = now_connected;
                        events.connection_changed(DeviceType::Plc, device_name.clone(), connected);
                    }
                },
            }
        }
    })
}

/// Log events for the operator. Stands in for the UI.
///
/// Error events are not subscribed: whoever publishes one has already logged
/// it at `error` level.
pub fn spawn_event_logger(events: &EventHub, token: CancellationToken) -> JoinHandle<()> {
    let mut state_rx = events.subscribe_state();
    let mut connection_rx = events.subscribe_connection();
    let mut inspection_rx = events.subscribe_inspection();
    let mut alarm_rx = events.subscribe_alarms();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                Ok(e) = state_rx.recv() => info!("[event] state {} -> {}", e.old, e.new),
                Ok(e) = connection_rx.recv() => info!(
                    "[event] {} '{}' {}",
                    e.device_type,
                    e.device_name,
                    if e.connected { "connected" } else { "disconnected" }
                ),
                Ok(r) = inspection_rx.recv() => info!(
                    "[event] station {} {} angle={:.2}",
                    r.station_id, r.result_type, r.angle
                ),
                Ok(a) = alarm_rx.recv() => warn!(
                    "[event] ALARM station {}: {} consecutive failures",
                    a.station_id, a.consecutive_failures
                ),
                else => break,
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_publish_without_subscribers() {
        let hub = EventHub::new(4);
        hub.error_occurred("nobody listening");
        hub.alarm(1, 3);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let hub = EventHub::new(4);
        let mut state = hub.subscribe_state();
        let mut alarms = hub.subscribe_alarms();

        hub.state_changed(InspectionState::Idle, InspectionState::Running);
        hub.alarm(2, 5);

        assert_eq!(
            state.recv().await.unwrap(),
            StateChanged {
                old: InspectionState::Idle,
                new: InspectionState::Running
            }
        );
        let alarm = alarms.recv().await.unwrap();
        assert_eq!((alarm.station_id, alarm.consecutive_failures), (2, 5));
    }

    #[tokio::test]
    async fn test_link_watcher_reports_edges() {
        let hub = EventHub::new(16);
        let mut connections = hub.subscribe_connection();
        let (tx, rx) = watch::channel(LinkState::Disconnected);
        let token = CancellationToken::new();
        let watcher = spawn_link_watcher(rx, hub.clone(), "plc".into(), token.clone());

        tx.send(LinkState::Handshaking).unwrap();
        tx.send(LinkState::Connected).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), connections.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.device_type, DeviceType::Plc);
        assert!(event.connected);

        tx.send(LinkState::Disconnected).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), connections.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!event.connected);

        token.cancel();
        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn test_event_logger_stops_on_cancel() {
        let hub = EventHub::new(16);
        let token = CancellationToken::new();
        let logger = spawn_event_logger(&hub, token.clone());
        // Errors are logged once, by their publisher
        assert_eq!(hub.error_tx.receiver_count(), 0);
        assert_eq!(hub.alarm_tx.receiver_count(), 1);

        hub.alarm(1, 3);
        hub.error_occurred("camera 2 lost");
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), logger)
            .await
            .unwrap()
            .unwrap();
    }
}
