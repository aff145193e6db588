//! Test Common Utilities
//!
//! In-process FINS/TCP PLC used by the link integration tests

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use fins_comlink::{LinkConfig, MemoryArea};

pub const CLIENT_NODE: u8 = 0x22;
pub const SERVER_NODE: u8 = 0x01;

/// Behaviour switches and memory of the simulated PLC
#[derive(Default)]
pub struct PlcState {
    /// Word memory keyed by (word area code, offset)
    pub words: Mutex<HashMap<(u8, u16), [u8; 2]>>,
    /// Answer node requests with an error code
    pub reject_handshake: AtomicBool,
    /// Stop answering data requests (socket stays open)
    pub silent: AtomicBool,
    /// Close the socket on the next data request
    pub drop_next: AtomicBool,
    /// End code returned for reads (0 = success)
    pub read_end_code: AtomicU16,
    /// Hold each data response this long (ms) before answering
    pub response_delay_ms: AtomicU64,
    /// Requests that arrived while an earlier one was still unanswered
    pub overlapping_requests: AtomicUsize,
    pub connections: AtomicUsize,
    pub requests: AtomicUsize,
}

impl PlcState {
    pub fn set_word(&self, area: MemoryArea, offset: u16, value: u16) {
        self.words
            .lock()
            .insert((area.word_code(), offset), value.to_be_bytes());
    }

    pub fn word(&self, area: MemoryArea, offset: u16) -> u16 {
        let bytes = self
            .words
            .lock()
            .get(&(area.word_code(), offset))
            .copied()
            .unwrap_or_default();
        u16::from_be_bytes(bytes)
    }
}

/// Running mock server
pub struct MockPlc {
    pub addr: SocketAddr,
    pub state: Arc<PlcState>,
    accept_task: JoinHandle<()>,
}

impl MockPlc {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(PlcState::default());

        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = serve(socket, state).await;
                });
            }
        });

        Self {
            addr,
            state,
            accept_task,
        }
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            name: "mock".into(),
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
            heartbeat_address: None,
            ..Default::default()
        }
    }

    pub fn stop(&self) {
        self.accept_task.abort();
    }
}

impl Drop for MockPlc {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

fn word_code_for(area_code: u8) -> (u8, bool) {
    match area_code {
        0x02 => (0x82, true),
        0x30 => (0xB0, true),
        0x31 => (0xB1, true),
        0x32 => (0xB2, true),
        0x33 => (0xB3, true),
        other => (other, false),
    }
}

fn envelope(command: u32, error: u32, body: &[u8]) -> Vec<u8> {
    let mut out = b"FINS".to_vec();
    out.extend_from_slice(&((8 + body.len()) as u32).to_be_bytes());
    out.extend_from_slice(&command.to_be_bytes());
    out.extend_from_slice(&error.to_be_bytes());
    out.extend_from_slice(body);
    out
}

async fn serve(mut socket: TcpStream, state: Arc<PlcState>) -> std::io::Result<()> {
    loop {
        let mut prefix = [0u8; 8];
        socket.read_exact(&mut prefix).await?;
        let length = u32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]) as usize;
        let mut rest = vec![0u8; length];
        socket.read_exact(&mut rest).await?;

        let command = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
        if command == 0 {
            if state.reject_handshake.load(Ordering::SeqCst) {
                socket.write_all(&envelope(1, 0x21, &[0; 8])).await?;
                continue;
            }
            let mut body = Vec::new();
            body.extend_from_slice(&u32::from(CLIENT_NODE).to_be_bytes());
            body.extend_from_slice(&u32::from(SERVER_NODE).to_be_bytes());
            socket.write_all(&envelope(1, 0, &body)).await?;
            continue;
        }

        state.requests.fetch_add(1, Ordering::SeqCst);
        if state.drop_next.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if state.silent.load(Ordering::SeqCst) {
            continue;
        }

        // Another frame on the wire before this one is answered means the
        // client pipelined requests
        let delay = Duration::from_millis(state.response_delay_ms.load(Ordering::SeqCst));
        if !delay.is_zero() {
            let mut next = [0u8; 1];
            if let Ok(Ok(n)) = tokio::time::timeout(delay, socket.peek(&mut next)).await {
                if n > 0 {
                    state.overlapping_requests.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(delay).await;
            }
        }

        // rest: command(4) error(4) header(10) service(2) area(1) addr(2) bit(1) count(2) data
        let header = &rest[8..18];
        let service = [rest[18], rest[19]];
        let (word_code, bit_access) = word_code_for(rest[20]);
        let offset = u16::from_be_bytes([rest[21], rest[22]]);
        let bit = rest[23];
        let count = u16::from_be_bytes([rest[24], rest[25]]);
        let data = &rest[26..];

        let mut body = vec![0xC0, 0x00, 0x02, 0x00, header[7], 0x00, 0x00, header[4], 0x00, header[9]];
        body.extend_from_slice(&service);

        if service == [0x01, 0x01] {
            let end_code = state.read_end_code.load(Ordering::SeqCst);
            body.extend_from_slice(&end_code.to_be_bytes());
            let words = state.words.lock();
            if bit_access {
                for i in 0..count {
                    let bit_no = u16::from(bit) + i;
                    let word = words
                        .get(&(word_code, offset + bit_no / 16))
                        .copied()
                        .unwrap_or_default();
                    let value = u16::from_be_bytes(word);
                    body.push(u8::from(value & (1 << (bit_no % 16)) != 0));
                }
            } else {
                for i in 0..count {
                    let word = words
                        .get(&(word_code, offset + i))
                        .copied()
                        .unwrap_or_default();
                    body.extend_from_slice(&word);
                }
            }
        } else {
            body.extend_from_slice(&[0x00, 0x00]);
            let mut words = state.words.lock();
            if bit_access {
                let key = (word_code, offset);
                let mut value = u16::from_be_bytes(words.get(&key).copied().unwrap_or_default());
                if data.first().copied().unwrap_or(0) != 0 {
                    value |= 1 << bit;
                } else {
                    value &= !(1 << bit);
                }
                words.insert(key, value.to_be_bytes());
            } else {
                for (i, chunk) in data.chunks_exact(2).enumerate() {
                    words.insert((word_code, offset + i as u16), [chunk[0], chunk[1]]);
                }
            }
        }

        socket.write_all(&envelope(2, 0, &body)).await?;
    }
}
