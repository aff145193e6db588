//! FINS session link
//!
//! `Disconnected -> Handshaking -> Connected`, and back to `Disconnected` on a
//! socket error, a failed heartbeat or an explicit disconnect. The link never
//! retries on its own; [`crate::reconnect::ReconnectSupervisor`] does that.
//!
//! Responses carry no request id, so exactly one request may be on the wire at
//! a time. The session mutex is held for the whole send/receive exchange.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::codec::FrameCodec;
use crate::connection::FinsConnection;
use crate::constants::*;
use crate::error::{FinsError, Result};
use crate::registers::WordIo;

/// Session connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Handshaking,
    Connected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "DISCONNECTED"),
            LinkState::Handshaking => write!(f, "HANDSHAKING"),
            LinkState::Connected => write!(f, "CONNECTED"),
        }
    }
}

/// Link parameters
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Name used in log lines
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Requested client node, `AUTO_NODE` to let the PLC assign one
    pub client_node: u8,
    pub connect_timeout: Duration,
    /// Deadline for each response, handshake included
    pub request_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Word read by the heartbeat; `None` disables the heartbeat
    pub heartbeat_address: Option<Address>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            name: "plc".to_string(),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            client_node: AUTO_NODE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_address: None,
        }
    }
}

/// Snapshot of the negotiated session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionInfo {
    pub state: LinkState,
    pub client_node: u8,
    pub server_node: u8,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

/// One live TCP session. Dropping it closes the socket.
struct Session {
    conn: FinsConnection,
    codec: FrameCodec,
    generation: u64,
    /// Cancels the heartbeat and any in-flight exchange of this session
    token: CancellationToken,
}

/// FINS/TCP link to one PLC
pub struct ProtocolLink {
    config: LinkConfig,
    session: Mutex<Option<Session>>,
    /// Token of the current session, reachable without the session lock so
    /// `disconnect` can interrupt an exchange that is holding it
    current_token: parking_lot::Mutex<CancellationToken>,
    generation: AtomicU64,
    /// Set by `disconnect`, cleared by `connect`. The supervisor leaves a
    /// link in this state alone.
    held_down: AtomicBool,
    state_tx: watch::Sender<LinkState>,
    info: parking_lot::Mutex<SessionInfo>,
}

impl std::fmt::Debug for ProtocolLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolLink")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .finish()
    }
}

impl ProtocolLink {
    pub fn new(config: LinkConfig) -> Arc<Self> {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Arc::new(Self {
            config,
            session: Mutex::new(None),
            current_token: parking_lot::Mutex::new(CancellationToken::new()),
            generation: AtomicU64::new(0),
            held_down: AtomicBool::new(false),
            state_tx,
            info: parking_lot::Mutex::new(SessionInfo::default()),
        })
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    /// Receiver notified on every state change
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    pub fn session_info(&self) -> SessionInfo {
        let mut info = self.info.lock().clone();
        info.state = self.state();
        info
    }

    fn set_state(&self, new_state: LinkState, reason: &str) {
        let old_state = self.state_tx.send_replace(new_state);
        if old_state != new_state {
            info!(
                "[{}] {} -> {} - {}",
                self.config.name, old_state, new_state, reason
            );
        }
    }

    /// True after an explicit `disconnect` until the next `connect`
    pub fn is_held_down(&self) -> bool {
        self.held_down.load(Ordering::SeqCst)
    }

    /// Open the socket and negotiate node addresses.
    ///
    /// Does not retry. On failure the link stays `Disconnected`.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        self.held_down.store(false, Ordering::SeqCst);
        self.open(false).await
    }

    /// Supervisor entry point: like `connect`, but a no-op while the link is
    /// held down. Checked under the session lock, so a `disconnect` racing
    /// with this call still wins.
    pub(crate) async fn reconnect(self: &Arc<Self>) -> Result<bool> {
        self.open(true).await?;
        Ok(self.is_connected())
    }

    async fn open(self: &Arc<Self>, respect_hold: bool) -> Result<()> {
        let mut guard = self.session.lock().await;
        if respect_hold && self.is_held_down() {
            debug!("[{}] Held down, not reconnecting", self.config.name);
            return Ok(());
        }
        if guard.is_some() {
            debug!("[{}] Already connected", self.config.name);
            return Ok(());
        }

        self.set_state(LinkState::Handshaking, "connect requested");

        match self.open_session().await {
            Ok(session) => {
                {
                    let mut info = self.info.lock();
                    info.client_node = session.codec.client_node();
                    info.server_node = session.codec.server_node();
                    info.last_heartbeat_at = None;
                }
                *self.current_token.lock() = session.token.clone();
                let token = session.token.clone();
                let generation = session.generation;
                *guard = Some(session);
                drop(guard);

                self.set_state(LinkState::Connected, "handshake complete");
                self.start_heartbeat(generation, token);
                Ok(())
            },
            Err(e) => {
                self.set_state(LinkState::Disconnected, &e.to_string());
                Err(e)
            },
        }
    }

    async fn open_session(&self) -> Result<Session> {
        let mut conn = FinsConnection::connect(
            &self.config.host,
            self.config.port,
            self.config.connect_timeout,
        )
        .await?;

        let request = FrameCodec::build_handshake(self.config.client_node);
        let reply = match conn.exchange(&request, self.config.request_timeout).await {
            Ok(reply) => reply,
            Err(e) => {
                conn.close().await;
                return Err(FinsError::handshake(e.to_string()));
            },
        };

        let nodes = match FrameCodec::parse_handshake_reply(&reply) {
            Ok(nodes) => nodes,
            Err(e) => {
                conn.close().await;
                return Err(e);
            },
        };
        info!(
            "[{}] Nodes: client={} server={}",
            self.config.name, nodes.client_node, nodes.server_node
        );

        Ok(Session {
            conn,
            codec: FrameCodec::from_handshake(nodes),
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            token: CancellationToken::new(),
        })
    }

    /// Close the socket and stop the heartbeat. Safe to call at any time.
    pub async fn disconnect(&self) {
        self.held_down.store(true, Ordering::SeqCst);
        // Interrupt an exchange that may be holding the session lock
        self.current_token.lock().cancel();

        let session = self.session.lock().await.take();
        match session {
            Some(session) => {
                session.conn.close().await;
                self.set_state(LinkState::Disconnected, "disconnect requested");
            },
            None => debug!("[{}] Disconnect: not connected", self.config.name),
        }
    }

    /// Drop the current session from inside the lock
    fn drop_session(&self, guard: &mut Option<Session>, reason: &str) {
        if let Some(session) = guard.take() {
            session.token.cancel();
            self.set_state(LinkState::Disconnected, reason);
        }
    }

    /// Drop the session only if it is still the one identified by `generation`
    async fn fail_session(&self, generation: u64, reason: &str) {
        let mut guard = self.session.lock().await;
        if guard.as_ref().map(|s| s.generation) == Some(generation) {
            self.drop_session(&mut guard, reason);
        }
    }

    /// One request/response exchange under the session lock
    async fn exchange<F>(&self, build: F) -> Result<Bytes>
    where
        F: FnOnce(&FrameCodec) -> Bytes,
    {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(FinsError::NotConnected)?;

        let request = build(&session.codec);
        let token = session.token.clone();
        let result = tokio::select! {
            r = session.conn.exchange(&request, self.config.request_timeout) => r,
            _ = token.cancelled() => Err(FinsError::io("link closed during exchange")),
        };

        if let Err(e) = &result {
            if e.forces_disconnect() {
                warn!("[{}] {}", self.config.name, e);
                self.drop_session(&mut guard, &e.to_string());
            }
        }
        result
    }

    /// Read through the bit-area code. One byte per bit in the response.
    pub async fn read_bit_area(&self, address: &Address) -> Result<bool> {
        let response = self
            .exchange(|codec| {
                codec.build_read(address.area_code(true), address.offset, address.bit_index(), 1)
            })
            .await?;
        let payload = FrameCodec::parse_read_response(&response)?;
        payload
            .first()
            .map(|b| *b != 0)
            .ok_or_else(|| FinsError::malformed("empty bit read payload"))
    }

    /// Write through the bit-area code
    pub async fn write_bit_area(&self, address: &Address, value: bool) -> Result<()> {
        let response = self
            .exchange(|codec| {
                codec.build_write(
                    address.area_code(true),
                    address.offset,
                    address.bit_index(),
                    &[u8::from(value)],
                )
            })
            .await?;
        FrameCodec::parse_write_response(&response)
    }

    // ========================================================================
    // Heartbeat
    // ========================================================================

    fn start_heartbeat(self: &Arc<Self>, generation: u64, token: CancellationToken) {
        let Some(address) = self.config.heartbeat_address else {
            debug!("[{}] Heartbeat disabled", self.config.name);
            return;
        };
        let period = self.config.heartbeat_interval;
        let weak = Arc::downgrade(self);

        tokio::spawn(heartbeat_loop(weak, address, period, generation, token));
    }
}

async fn heartbeat_loop(
    link: Weak<ProtocolLink>,
    address: Address,
    period: Duration,
    generation: u64,
    token: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick fires immediately; the handshake just proved liveness
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let Some(link) = link.upgrade() else {
            break;
        };

        match link.read_words(&address, 1).await {
            Ok(_) => {
                link.info.lock().last_heartbeat_at = Some(Utc::now());
            },
            Err(e) => {
                warn!("[{}] Heartbeat failed: {}", link.config.name, e);
                link.fail_session(generation, &format!("heartbeat failed: {e}"))
                    .await;
                break;
            },
        }
    }
    debug!("Heartbeat stopped");
}

#[async_trait]
impl WordIo for ProtocolLink {
    async fn read_words(&self, address: &Address, count: u16) -> Result<Bytes> {
        if count == 0 || count > MAX_WORDS_PER_REQUEST {
            return Err(FinsError::config(format!(
                "word count {} out of range 1-{}",
                count, MAX_WORDS_PER_REQUEST
            )));
        }

        let response = self
            .exchange(|codec| codec.build_read(address.area.word_code(), address.offset, 0, count))
            .await?;
        let payload = FrameCodec::parse_read_response(&response)?;

        let expected = usize::from(count) * 2;
        if payload.len() < expected {
            return Err(FinsError::malformed(format!(
                "read {} words from {} but got {}B",
                count,
                address,
                payload.len()
            )));
        }
        Ok(payload.slice(..expected))
    }

    async fn write_words(&self, address: &Address, data: &[u8]) -> Result<()> {
        if data.is_empty() || data.len() % 2 != 0 {
            return Err(FinsError::config(format!(
                "write of {}B is not a whole number of words",
                data.len()
            )));
        }

        let response = self
            .exchange(|codec| codec.build_write(address.area.word_code(), address.offset, 0, data))
            .await?;
        FrameCodec::parse_write_response(&response)
    }

    fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }
}
