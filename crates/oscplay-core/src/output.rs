//! Outputs and the output registry.
//!
//! An [`Output`] is a named destination: a host/port endpoint, an enabled
//! flag and its own [`NodeChain`]. The [`OutputRegistry`] owns every output,
//! the shared transport and the shared [`DelayQueue`].

use crate::chain::NodeChain;
use crate::error::{Error, Result};
use crate::message::{MessageRequest, OscMessage};
use crate::osc::Transport;
use crate::scheduler::DelayQueue;
use crate::trace::TraceEvent;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Id of the output that always exists and cannot be removed.
pub const DEFAULT_OUTPUT_ID: &str = "default";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3030;

/// How [`Output::send`] treats a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Send even if the output is disabled.
    pub bypass_enabled: bool,
    /// Skip the node chain and transmit the message as-is.
    pub bypass_chain: bool,
}

impl SendOptions {
    /// Explicit routing: ignore the enabled flag but still run the chain.
    pub fn routed() -> Self {
        Self {
            bypass_enabled: true,
            bypass_chain: false,
        }
    }

    /// Transmit verbatim, ignoring both the enabled flag and the chain.
    pub fn raw() -> Self {
        Self {
            bypass_enabled: true,
            bypass_chain: true,
        }
    }
}

// ============================================================================
// Output
// ============================================================================

/// A named destination with its own node chain.
pub struct Output {
    id: String,
    endpoint: RwLock<(String, u16)>,
    enabled: AtomicBool,
    chain: NodeChain,
    transport: OnceLock<Arc<dyn Transport>>,
}

impl Output {
    /// Create an enabled output with an empty chain.
    ///
    /// The transport is attached when the output is added to a registry.
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            endpoint: RwLock::new((host.into(), port)),
            enabled: AtomicBool::new(true),
            chain: NodeChain::new(),
            transport: OnceLock::new(),
        }
    }

    /// Use a specific transport instead of the registry's shared one.
    pub fn with_transport(self, transport: Arc<dyn Transport>) -> Self {
        let _ = self.transport.set(transport);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> String {
        self.endpoint.read().0.clone()
    }

    pub fn port(&self) -> u16 {
        self.endpoint.read().1
    }

    pub fn set_endpoint(&self, host: impl Into<String>, port: u16) {
        *self.endpoint.write() = (host.into(), port);
    }

    pub fn set_host(&self, host: impl Into<String>) {
        self.endpoint.write().0 = host.into();
    }

    pub fn set_port(&self, port: u16) {
        self.endpoint.write().1 = port;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn chain(&self) -> &NodeChain {
        &self.chain
    }

    /// Send a message through this output.
    ///
    /// Immediate results go straight to the transport, delayed ones are
    /// queued addressed to this output.
    ///
    /// # Returns
    /// The messages handed to the transport right away.
    pub fn send(
        &self,
        message: &OscMessage,
        options: SendOptions,
        queue: &DelayQueue,
    ) -> Vec<OscMessage> {
        if !options.bypass_enabled && !self.is_enabled() {
            return Vec::new();
        }
        if options.bypass_chain {
            self.transmit(message, queue);
            return vec![message.clone()];
        }
        let requests = self.chain.process(message, 0);
        self.route(requests, queue)
    }

    /// Re-run a message whose delay has elapsed.
    ///
    /// Called by the scheduler. The enabled flag is not checked: the message
    /// was already accepted by this output once.
    pub(crate) fn deliver_delayed(
        &self,
        message: &OscMessage,
        previous_delay_ms: u64,
        queue: &DelayQueue,
    ) {
        let requests = self.chain.process(message, previous_delay_ms);
        self.route(requests, queue);
    }

    fn route(&self, requests: Vec<MessageRequest>, queue: &DelayQueue) -> Vec<OscMessage> {
        let mut sent = Vec::with_capacity(requests.len());
        for req in requests {
            if req.is_immediate() {
                self.transmit(&req.message, queue);
                sent.push(req.message);
            } else {
                queue.schedule(req, Some(&self.id));
            }
        }
        sent
    }

    fn transmit(&self, message: &OscMessage, queue: &DelayQueue) {
        let Some(transport) = self.transport.get() else {
            log::error!("[OUTPUT] {}: no transport attached", self.id);
            return;
        };
        let (host, port) = self.endpoint.read().clone();
        match transport.send(&host, port, message) {
            Ok(()) => queue.tracer().trace(TraceEvent::Sent {
                address: message.address().to_string(),
                output: self.id.clone(),
            }),
            Err(e) => {
                log::warn!("[OUTPUT] {} -> {}:{}: {}", self.id, host, port, e);
                queue.tracer().trace(TraceEvent::SendFailed {
                    address: message.address().to_string(),
                    output: self.id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("id", &self.id)
            .field("host", &self.host())
            .field("port", &self.port())
            .field("enabled", &self.is_enabled())
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Owns every output, keyed by id, in insertion order.
pub struct OutputRegistry {
    outputs: RwLock<Vec<Arc<Output>>>,
    transport: Arc<dyn Transport>,
    queue: Arc<DelayQueue>,
}

impl OutputRegistry {
    /// Create a registry holding only the `default` output.
    pub fn new(transport: Arc<dyn Transport>, queue: Arc<DelayQueue>) -> Self {
        let default = Output::new(DEFAULT_OUTPUT_ID, DEFAULT_HOST, DEFAULT_PORT)
            .with_transport(transport.clone());
        Self {
            outputs: RwLock::new(vec![Arc::new(default)]),
            transport,
            queue,
        }
    }

    pub fn queue(&self) -> &Arc<DelayQueue> {
        &self.queue
    }

    pub fn get(&self, id: &str) -> Option<Arc<Output>> {
        self.outputs.read().iter().find(|o| o.id == id).cloned()
    }

    /// Add an output.
    ///
    /// # Returns
    /// `false` if an output with the same id already exists.
    pub fn add(&self, output: Output) -> bool {
        let mut outputs = self.outputs.write();
        if outputs.iter().any(|o| o.id == output.id) {
            log::warn!("[OUTPUT] Output '{}' already exists", output.id);
            return false;
        }
        let _ = output.transport.set(self.transport.clone());
        log::info!(
            "[OUTPUT] Added '{}' -> {}:{}",
            output.id,
            output.host(),
            output.port()
        );
        outputs.push(Arc::new(output));
        true
    }

    /// Remove an output. Messages already queued for it are dropped when
    /// they come due.
    ///
    /// # Returns
    /// `false` for `default` or an unknown id.
    pub fn remove(&self, id: &str) -> bool {
        if id == DEFAULT_OUTPUT_ID {
            log::warn!("[OUTPUT] The default output cannot be removed");
            return false;
        }
        let mut outputs = self.outputs.write();
        let before = outputs.len();
        outputs.retain(|o| o.id != id);
        let removed = outputs.len() != before;
        if removed {
            log::info!("[OUTPUT] Removed '{}'", id);
        }
        removed
    }

    pub fn all(&self) -> Vec<Arc<Output>> {
        self.outputs.read().clone()
    }

    pub fn all_enabled(&self) -> Vec<Arc<Output>> {
        self.outputs
            .read()
            .iter()
            .filter(|o| o.is_enabled())
            .cloned()
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.outputs.read().iter().map(|o| o.id.clone()).collect()
    }

    /// Send through every enabled output, each via its own chain.
    pub fn broadcast(&self, message: &OscMessage) {
        for output in self.all_enabled() {
            output.send(message, SendOptions::default(), &self.queue);
        }
    }

    /// Send through one output.
    ///
    /// An unknown id is logged and reported as [`Error::Routing`]; nothing
    /// is sent.
    pub fn send_to(
        &self,
        id: &str,
        message: &OscMessage,
        options: SendOptions,
    ) -> Result<Vec<OscMessage>> {
        match self.get(id) {
            Some(output) => Ok(output.send(message, options, &self.queue)),
            None => {
                log::warn!("[OUTPUT] Unknown output '{}', dropping {}", id, message.address());
                self.queue.tracer().trace(TraceEvent::Dropped {
                    address: message.address().to_string(),
                    reason: format!("output '{}' not found", id),
                });
                Err(Error::Routing(format!("output '{}' not found", id)))
            }
        }
    }
}

impl std::fmt::Debug for OutputRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputRegistry")
            .field("outputs", &self.ids())
            .finish_non_exhaustive()
    }
}
