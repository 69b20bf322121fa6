//! Inbound OSC proxy.
//!
//! The [`ProxyServer`] owns the listening socket and a receive thread.
//! Every inbound message is handed to each enabled output, which runs it
//! through its own chain. There is no shared pre-processing, so outputs
//! rewrite the same message independently.

use crate::error::Result;
use crate::message::OscMessage;
use crate::osc::OscListener;
use crate::output::{OutputRegistry, SendOptions, DEFAULT_OUTPUT_ID};
use crate::session::{Recorder, RecordingMode};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long the receive thread blocks before re-checking for shutdown.
const RECV_TIMEOUT: Duration = Duration::from_millis(50);

/// Deliver one inbound message to every enabled output.
///
/// When a recorder is active the message is captured either as received
/// or, in post-rewrite mode, as the default output (or the first enabled
/// one if the default is off) sent it.
pub fn handle_inbound(
    registry: &OutputRegistry,
    recorder: Option<&Recorder>,
    mode: RecordingMode,
    message: &OscMessage,
) {
    let recorder = recorder.filter(|r| r.is_recording());
    if mode == RecordingMode::PreRewrite {
        if let Some(recorder) = recorder {
            recorder.record(message);
        }
    }

    let outputs = registry.all_enabled();
    let capture_id = outputs
        .iter()
        .find(|o| o.id() == DEFAULT_OUTPUT_ID)
        .or_else(|| outputs.first())
        .map(|o| o.id().to_string());

    for output in &outputs {
        let sent = output.send(message, SendOptions::default(), registry.queue());
        if mode != RecordingMode::PostRewrite {
            continue;
        }
        if let Some(recorder) = recorder {
            if capture_id.as_deref() == Some(output.id()) {
                for m in &sent {
                    recorder.record(m);
                }
            }
        }
    }
}

/// Listens for OSC and forwards it through the output registry.
pub struct ProxyServer {
    local_port: u16,
    shutdown: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyServer {
    /// Bind `host:port` and start forwarding.
    pub fn bind(
        host: &str,
        port: u16,
        registry: Arc<OutputRegistry>,
        recorder: Option<Arc<Recorder>>,
        mode: RecordingMode,
    ) -> Result<Self> {
        Self::start(OscListener::bind(host, port)?, registry, recorder, mode)
    }

    /// Start forwarding messages received on an already bound listener.
    pub fn start(
        listener: OscListener,
        registry: Arc<OutputRegistry>,
        recorder: Option<Arc<Recorder>>,
        mode: RecordingMode,
    ) -> Result<Self> {
        let local_port = listener.local_port()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                match listener.recv_timeout(RECV_TIMEOUT) {
                    Ok(Some(messages)) => {
                        for message in &messages {
                            log::trace!("[PROXY] <- {}", message);
                            handle_inbound(&registry, recorder.as_deref(), mode, message);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => log::warn!("[PROXY] Receive failed: {}", e),
                }
            }
        });
        log::info!("[PROXY] Listening on port {}", local_port);
        Ok(Self {
            local_port,
            shutdown,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Stop the receive thread and close the socket.
    pub fn stop(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            self.shutdown.store(true, Ordering::Relaxed);
            let _ = handle.join();
            log::info!("[PROXY] Stopped listening on port {}", self.local_port);
        }
    }
}

impl Drop for ProxyServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyServer")
            .field("local_port", &self.local_port)
            .field("running", &self.is_running())
            .finish()
    }
}
