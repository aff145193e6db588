//! Reconnection supervisor
//!
//! One task per link, started once and cancelled once. It sleeps while the
//! link is up, and while it is down retries the connection on a fixed interval
//! until it succeeds. A link taken down by an explicit `disconnect()` stays
//! down until someone calls `connect()` again.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::DEFAULT_RECONNECT_INTERVAL;
use crate::link::{LinkState, ProtocolLink};

/// Reconnection policy
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay between attempts
    pub interval: Duration,
    /// Spread attempts by up to ±10% so several services do not hit the PLC together
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONNECT_INTERVAL,
            jitter: false,
        }
    }
}

impl ReconnectPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            jitter: false,
        }
    }

    /// Delay before the next attempt
    pub fn next_delay(&self) -> Duration {
        if !self.jitter || self.interval.is_zero() {
            return self.interval;
        }
        let base = self.interval.as_millis() as f64;
        let spread = base * 0.1;
        let jitter = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis((base + jitter).max(0.0) as u64)
    }
}

/// Handle to the running supervisor task
#[derive(Debug)]
pub struct ReconnectSupervisor {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ReconnectSupervisor {
    /// Spawn the supervisor. It stops when `parent` or [`Self::stop`] cancels it.
    pub fn start(
        link: Arc<ProtocolLink>,
        policy: ReconnectPolicy,
        parent: &CancellationToken,
    ) -> Self {
        let token = parent.child_token();
        let handle = tokio::spawn(supervise(link, policy, token.clone()));
        Self { token, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel and wait for the task to finish
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!("Reconnect supervisor join: {}", e);
        }
    }
}

async fn supervise(link: Arc<ProtocolLink>, policy: ReconnectPolicy, token: CancellationToken) {
    let name = link.config().name.clone();
    let mut state_rx = link.subscribe_state();
    let mut attempts: u64 = 0;

    info!("[{}] Reconnect supervisor started ({:?})", name, policy.interval);

    loop {
        // Park until the link is down by failure
        while *state_rx.borrow_and_update() != LinkState::Disconnected || link.is_held_down() {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("[{}] Reconnect supervisor cancelled", name);
                    return;
                },
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                },
            }
        }

        tokio::select! {
            _ = token.cancelled() => {
                debug!("[{}] Reconnect supervisor cancelled", name);
                return;
            },
            _ = tokio::time::sleep(policy.next_delay()) => {},
        }

        if link.state() != LinkState::Disconnected || link.is_held_down() {
            continue;
        }

        attempts += 1;
        match link.reconnect().await {
            Ok(true) => {
                info!("[{}] Reconnected after {} attempt(s)", name, attempts);
                attempts = 0;
            },
            Ok(false) => {
                debug!("[{}] Disconnected on request, reconnect skipped", name);
                attempts = 0;
            },
            Err(e) => {
                warn!("[{}] Reconnect #{}: {}", name, attempts, e);
            },
        }
    }
}
