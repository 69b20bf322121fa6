//! oscplay Core - OSC proxy, rewrite, record and replay.
//!
//! This crate provides the building blocks for oscplay:
//!
//! - **Message** - OSC values, messages and routing requests
//! - **Nodes** - Pluggable message transforms (rename, delay, script, ...)
//! - **Chain** - Ordered, lock-free editable node pipelines
//! - **Output** - Named destinations, each with its own chain
//! - **Scheduler** - Delivery of delayed messages
//! - **Proxy** - Inbound listener fanning out to every enabled output
//! - **Playback** - Timed replay of recorded sessions
//! - **Session** - Recording, storage and session settings
//! - **Config** - TOML configuration and JSON chain files
//!
//! # Architecture
//!
//! Inbound messages (from the [`ProxyServer`] or the [`PlaybackEngine`])
//! go to each enabled [`Output`]. The output runs its [`NodeChain`]; results
//! without a delay are sent immediately, the rest are queued on the shared
//! [`DelayQueue`] and re-run through the chain by the [`DelayScheduler`]
//! once due.

pub mod chain;
pub mod config;
pub mod error;
pub mod message;
pub mod nodes;
pub mod osc;
pub mod output;
pub mod playback;
pub mod proxy;
pub mod scheduler;
pub mod session;
pub mod trace;

pub use chain::NodeChain;
pub use config::{NodeConfig, OutputConfig, ProxyConfig};
pub use error::{Error, Result};
pub use message::{MessageRequest, OscMessage, OscValue};
pub use nodes::{available_nodes, build_node, AddressPattern, Node, NodeInfo};
pub use osc::{OscClient, OscListener, Transport};
pub use output::{Output, OutputRegistry, SendOptions, DEFAULT_OUTPUT_ID};
pub use playback::{AudioCue, PlaybackEngine, PlaybackMode, PlaybackUpdate};
pub use proxy::ProxyServer;
pub use scheduler::{DelayQueue, DelayScheduler, ScheduledMessage};
pub use session::{
    MessageRecord, Recorder, RecordingMode, RecordingSession, SessionSettings, SessionStore,
};
pub use trace::{ChannelTraceSink, LogTraceSink, TraceEvent, TraceSink};
