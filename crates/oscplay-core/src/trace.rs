//! Routing trace events.
//!
//! Every scheduling and dispatch decision is reported to a [`TraceSink`].
//! The default sink writes to the log at debug level; a debug window can
//! subscribe through [`ChannelTraceSink`] instead.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fmt;

/// One routing decision.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    /// A request was queued for later delivery.
    Scheduled {
        address: String,
        output: Option<String>,
        delay_ms: u64,
    },
    /// A queued message came due.
    Dispatched {
        address: String,
        output: Option<String>,
        previous_delay_ms: u64,
    },
    /// A message was discarded before reaching a transport.
    Dropped { address: String, reason: String },
    /// A message went out over an output's transport.
    Sent { address: String, output: String },
    /// The transport rejected a message.
    SendFailed {
        address: String,
        output: String,
        error: String,
    },
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::Scheduled {
                address,
                output,
                delay_ms,
            } => write!(
                f,
                "scheduled {} for {} in {}ms",
                address,
                output.as_deref().unwrap_or("all outputs"),
                delay_ms
            ),
            TraceEvent::Dispatched {
                address,
                output,
                previous_delay_ms,
            } => write!(
                f,
                "dispatching {} to {} (delayed {}ms)",
                address,
                output.as_deref().unwrap_or("all enabled outputs"),
                previous_delay_ms
            ),
            TraceEvent::Dropped { address, reason } => {
                write!(f, "dropped {}: {}", address, reason)
            }
            TraceEvent::Sent { address, output } => write!(f, "sent {} via {}", address, output),
            TraceEvent::SendFailed {
                address,
                output,
                error,
            } => write!(f, "send of {} via {} failed: {}", address, output, error),
        }
    }
}

/// Receiver of routing trace events.
pub trait TraceSink: Send + Sync {
    fn trace(&self, event: TraceEvent);
}

/// Writes trace events to the log at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTraceSink;

impl TraceSink for LogTraceSink {
    fn trace(&self, event: TraceEvent) {
        log::debug!("[TRACE] {}", event);
    }
}

/// Forwards trace events to a channel.
#[derive(Debug, Clone)]
pub struct ChannelTraceSink {
    tx: Sender<TraceEvent>,
}

impl ChannelTraceSink {
    pub fn new() -> (Self, Receiver<TraceEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl TraceSink for ChannelTraceSink {
    fn trace(&self, event: TraceEvent) {
        // Nobody listening is fine.
        let _ = self.tx.send(event);
    }
}
