//! FINS/TCP socket wrapper
//!
//! Owns the raw stream and knows how to cut complete frames out of it.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::constants::{FINS_MAGIC, MAX_FRAME_LEN, TCP_LENGTH_PREFIX};
use crate::error::{FinsError, Result};

/// An open FINS/TCP stream
#[derive(Debug)]
pub struct FinsConnection {
    stream: TcpStream,
    peer: String,
}

impl FinsConnection {
    /// Open a TCP connection, bounded by `connect_timeout`
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        debug!("TCP connecting: {}", addr);

        match timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                info!("TCP connected: {}", addr);
                Ok(Self { stream, peer: addr })
            },
            Ok(Err(e)) => {
                error!("TCP err: {} - {}", addr, e);
                Err(FinsError::io(format!("Failed to connect to {addr}: {e}")))
            },
            Err(_) => {
                warn!("TCP timeout: {}", addr);
                Err(FinsError::ConnectTimeout(format!(
                    "Connection to {addr} timed out after {}ms",
                    connect_timeout.as_millis()
                )))
            },
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Write one frame
    pub async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.stream.write_all(frame).await.map_err(|e| {
            error!("TCP TX: {}", e);
            FinsError::io(format!("TCP send error: {e}"))
        })?;
        trace!("FINS TX: {}", common::hex::encode_spaced(frame));
        Ok(())
    }

    /// Read one complete frame: 8-byte prefix, then the declared body.
    /// A timeout here is reported as `Io`; the stream position is unknown.
    pub async fn receive(&mut self, read_timeout: Duration) -> Result<Bytes> {
        let mut prefix = [0u8; TCP_LENGTH_PREFIX];
        match timeout(read_timeout, self.stream.read_exact(&mut prefix)).await {
            Ok(Ok(_)) => {},
            Ok(Err(e)) => {
                error!("TCP header RX: {}", e);
                return Err(FinsError::io(format!("TCP header read error: {e}")));
            },
            Err(_) => {
                debug!("TCP header timeout");
                return Err(FinsError::io("response timeout"));
            },
        }

        if prefix[0..4] != FINS_MAGIC {
            error!("TCP bad magic: {}", common::hex::encode_upper(&prefix[0..4]));
            return Err(FinsError::io("stream out of sync: missing FINS marker"));
        }

        let length = u32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]) as usize;
        if length < 8 || length > MAX_FRAME_LEN {
            error!("TCP invalid len: {}", length);
            return Err(FinsError::io(format!("invalid frame length {length}")));
        }

        let mut frame = BytesMut::with_capacity(TCP_LENGTH_PREFIX + length);
        frame.put_slice(&prefix);
        frame.resize(TCP_LENGTH_PREFIX + length, 0);

        match timeout(
            read_timeout,
            self.stream.read_exact(&mut frame[TCP_LENGTH_PREFIX..]),
        )
        .await
        {
            Ok(Ok(_)) => {
                trace!("FINS RX: {}", common::hex::encode_spaced(&frame));
                Ok(frame.freeze())
            },
            Ok(Err(e)) => {
                error!("TCP body RX: {}", e);
                Err(FinsError::io(format!("TCP body read error: {e}")))
            },
            Err(_) => {
                debug!("TCP body timeout");
                Err(FinsError::io("response body timeout"))
            },
        }
    }

    /// Send a request and read its response
    pub async fn exchange(&mut self, frame: &[u8], read_timeout: Duration) -> Result<Bytes> {
        self.send(frame).await?;
        self.receive(read_timeout).await
    }

    /// Best-effort close
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("TCP shutdown: {}", e);
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_refused_is_io() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = FinsConnection::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FinsError::Io(_)));
    }

    #[tokio::test]
    async fn test_receive_reads_declared_length() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut frame = b"FINS".to_vec();
            frame.extend_from_slice(&8u32.to_be_bytes());
            frame.extend_from_slice(&[0, 0, 0, 2, 0, 0, 0, 0]);
            // Trailing bytes belong to the next frame
            frame.extend_from_slice(b"FINS");
            socket.write_all(&frame).await.unwrap();
        });

        let mut conn = FinsConnection::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        let frame = conn.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(frame.len(), 16);
        assert_eq!(&frame[8..12], &[0, 0, 0, 2]);
    }

    #[tokio::test]
    async fn test_receive_rejects_bad_marker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"HTTP/1.1 400").await.unwrap();
        });

        let mut conn = FinsConnection::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        let err = conn.receive(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.forces_disconnect());
    }

    #[tokio::test]
    async fn test_receive_timeout_is_io() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(socket);
        });

        let mut conn = FinsConnection::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        let err = conn.receive(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, FinsError::Io(_)));
        server.abort();
    }
}
