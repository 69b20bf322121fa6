//! OSC over UDP.
//!
//! Outputs talk to the network through the [`Transport`] trait so the
//! routing and scheduling code can be exercised without sockets.
//! [`OscClient`] is the UDP implementation, [`OscListener`] is the
//! inbound side used by the proxy.

use crate::error::{Error, Result};
use crate::message::OscMessage;
use rosc::{encoder, OscPacket};
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

/// Something that can deliver an OSC message to `host:port`.
pub trait Transport: Send + Sync {
    fn send(&self, host: &str, port: u16, message: &OscMessage) -> Result<()>;
}

/// UDP-based OSC client shared by all outputs.
#[derive(Clone)]
pub struct OscClient {
    /// The underlying UDP socket (None in noop mode).
    sock: Option<Arc<UdpSocket>>,
}

impl OscClient {
    /// Create a client bound to an ephemeral port.
    pub fn new() -> Result<Self> {
        let sock = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self {
            sock: Some(Arc::new(sock)),
        })
    }

    /// Create a no-op client for dry runs.
    ///
    /// All send operations succeed but do nothing.
    pub fn noop() -> Self {
        Self { sock: None }
    }

    /// Check if this client is in noop mode.
    pub fn is_noop(&self) -> bool {
        self.sock.is_none()
    }

    /// Encode a message into a UDP payload.
    pub fn encode(message: &OscMessage) -> Result<Vec<u8>> {
        Ok(encoder::encode(&OscPacket::Message(message.to_osc()))?)
    }
}

impl Transport for OscClient {
    fn send(&self, host: &str, port: u16, message: &OscMessage) -> Result<()> {
        let sock = match &self.sock {
            Some(s) => s,
            None => return Ok(()), // noop mode
        };
        let buf = Self::encode(message)?;
        sock.send_to(&buf, (host, port))
            .map_err(|e| Error::Transport(format!("send to {}:{} failed: {}", host, port, e)))?;
        Ok(())
    }
}

impl std::fmt::Debug for OscClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OscClient")
            .field("noop", &self.is_noop())
            .finish_non_exhaustive()
    }
}

/// Inbound UDP socket decoding OSC packets into messages.
pub struct OscListener {
    sock: UdpSocket,
}

impl OscListener {
    /// Bind to `host:port`. Port 0 picks an ephemeral port.
    pub fn bind(host: &str, port: u16) -> Result<Self> {
        let sock = UdpSocket::bind((host, port))?;
        Ok(Self { sock })
    }

    /// The bound local port.
    pub fn local_port(&self) -> Result<u16> {
        Ok(self.sock.local_addr()?.port())
    }

    /// Wait up to `timeout` for one datagram.
    ///
    /// # Returns
    /// `Ok(None)` on timeout, otherwise every message in the packet with
    /// bundles flattened in order.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<OscMessage>>> {
        self.sock.set_read_timeout(Some(timeout))?;
        let mut buf = [0u8; 65536];
        let size = match self.sock.recv_from(&mut buf) {
            Ok((size, _)) => size,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };
        let (_, packet) = rosc::decoder::decode_udp(&buf[..size])?;
        let mut messages = Vec::new();
        flatten(packet, &mut messages);
        Ok(Some(messages))
    }
}

fn flatten(packet: OscPacket, out: &mut Vec<OscMessage>) {
    match packet {
        OscPacket::Message(msg) => out.push(OscMessage::from_osc(msg)),
        OscPacket::Bundle(bundle) => {
            for p in bundle.content {
                flatten(p, out);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Instant;

    /// A message captured by [`RecordingTransport`].
    #[derive(Debug, Clone)]
    pub struct Sent {
        pub host: String,
        pub port: u16,
        pub message: OscMessage,
        pub at: Instant,
    }

    /// Transport that records every send instead of touching the network.
    #[derive(Default)]
    pub struct RecordingTransport {
        sent: Mutex<Vec<Sent>>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl RecordingTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().clone()
        }

        pub fn addresses(&self) -> Vec<String> {
            self.sent
                .lock()
                .iter()
                .map(|s| s.message.address().to_string())
                .collect()
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, std::sync::atomic::Ordering::Relaxed);
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, host: &str, port: u16, message: &OscMessage) -> Result<()> {
            if self.fail.load(std::sync::atomic::Ordering::Relaxed) {
                return Err(Error::Transport("simulated failure".to_string()));
            }
            self.sent.lock().push(Sent {
                host: host.to_string(),
                port,
                message: message.clone(),
                at: Instant::now(),
            });
            Ok(())
        }
    }
}
