//! Transformation nodes.
//!
//! A [`Node`] inspects the request list produced so far by a chain and
//! mutates it in place:
//!
//! - do nothing to pass through
//! - clear the list to drop
//! - replace entries to transform, delay or reroute
//! - push several entries to fan out
//!
//! Nodes are shared behind `Arc` between the proxy, scheduler and playback
//! threads, so `process` takes `&self` and any per-node state (moving
//! average windows, compiled scripts) is synchronised inside the node.
//!
//! Nodes are built by type name through [`build_node`], which also accepts
//! the fully qualified class names stored in older chain files
//! (`xyz.theforks.nodes.PitchShiftNode`).

mod delay;
mod filter;
mod int_to_bang;
mod moving_average;
mod path_trim;
mod pitch_shift;
mod rename;
mod script;
mod splitter;

pub use delay::DelayNode;
pub use filter::{DropNode, PassNode};
pub use int_to_bang::IntToBangNode;
pub use moving_average::MovingAverageNode;
pub use path_trim::PathTrimNode;
pub use pitch_shift::PitchShiftNode;
pub use rename::RenameNode;
pub use script::ScriptNode;
pub use splitter::SplitterNode;

use crate::error::{Error, Result};
use crate::message::MessageRequest;
use regex::Regex;
use std::str::FromStr;
use std::sync::Arc;

/// A unit of transformation bound to an address pattern.
pub trait Node: Send + Sync {
    /// Stable type name used in configuration files.
    fn type_name(&self) -> &'static str;

    /// Short human-readable name.
    fn label(&self) -> &'static str;

    /// One line describing the node and its current configuration.
    fn help(&self) -> String;

    /// The configured address pattern.
    fn pattern(&self) -> &AddressPattern;

    /// Whether the chain should hand the request list to this node.
    fn matches(&self, address: &str) -> bool {
        self.pattern().is_match(address)
    }

    /// Mutate the request list in place.
    fn process(&self, requests: &mut Vec<MessageRequest>);

    /// Names of the configuration arguments, in order.
    fn arg_names(&self) -> &'static [&'static str];

    fn num_args(&self) -> usize {
        self.arg_names().len()
    }

    /// Apply configuration arguments.
    ///
    /// Fails on wrong arity or unparsable values. A node that failed to
    /// configure must not be registered.
    fn configure(&mut self, args: &[String]) -> Result<()>;

    /// Current configuration, suitable for feeding back into `configure`.
    fn args(&self) -> Vec<String>;
}

impl std::fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("type", &self.type_name())
            .field("args", &self.args())
            .finish()
    }
}

// ============================================================================
// Address patterns
// ============================================================================

/// A regular expression matched against the whole message address.
#[derive(Debug, Clone)]
pub struct AddressPattern {
    source: String,
    /// `None` matches every address.
    regex: Option<Regex>,
}

impl AddressPattern {
    /// Compile `pattern`, anchored at both ends.
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{})$", pattern))?;
        Ok(Self {
            source: pattern.to_string(),
            regex: Some(regex),
        })
    }

    /// A pattern that matches every address.
    pub fn any() -> Self {
        Self {
            source: ".*".to_string(),
            regex: None,
        }
    }

    pub fn is_match(&self, address: &str) -> bool {
        match &self.regex {
            Some(re) => re.is_match(address),
            None => true,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl Default for AddressPattern {
    fn default() -> Self {
        Self::any()
    }
}

// ============================================================================
// Helpers shared by the built-in nodes
// ============================================================================

/// Run `f` on every request whose address matches `pattern`.
///
/// Non-matching requests stay in place. `f` pushes zero or more results
/// into the output list.
pub(crate) fn for_each_matching<F>(
    requests: &mut Vec<MessageRequest>,
    pattern: &AddressPattern,
    mut f: F,
) where
    F: FnMut(MessageRequest, &mut Vec<MessageRequest>),
{
    let incoming = std::mem::take(requests);
    for req in incoming {
        if pattern.is_match(req.address()) {
            f(req, requests);
        } else {
            requests.push(req);
        }
    }
}

pub(crate) fn check_arity(type_name: &str, args: &[String], expected: usize) -> Result<()> {
    if args.len() != expected {
        return Err(Error::config(format!(
            "{} expects {} argument(s), got {}",
            type_name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

pub(crate) fn parse_arg<T: FromStr>(type_name: &str, name: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        Error::config(format!(
            "{}: invalid {} '{}'",
            type_name, name, value
        ))
    })
}

// ============================================================================
// Registry
// ============================================================================

/// Description of a built-in node type.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub type_name: &'static str,
    pub label: &'static str,
    pub help: String,
    pub arg_names: &'static [&'static str],
}

const NODE_TYPES: &[&str] = &[
    "pitch_shift",
    "rename",
    "moving_average",
    "int_to_bang",
    "path_trim",
    "drop",
    "delay",
    "pass",
    "script",
    "splitter",
];

/// Create an unconfigured node by type name.
pub fn new_node(type_name: &str) -> Option<Box<dyn Node>> {
    let node: Box<dyn Node> = match normalize_type(type_name).as_str() {
        "pitchshift" => Box::new(PitchShiftNode::default()),
        "rename" => Box::new(RenameNode::default()),
        "movingaverage" | "movingavg" => Box::new(MovingAverageNode::default()),
        "inttobang" => Box::new(IntToBangNode::default()),
        "pathtrim" => Box::new(PathTrimNode::default()),
        "drop" => Box::new(DropNode::default()),
        "pass" => Box::new(PassNode::default()),
        "delay" => Box::new(DelayNode::default()),
        "splitter" => Box::new(SplitterNode::default()),
        "script" => Box::new(ScriptNode::default()),
        _ => return None,
    };
    Some(node)
}

/// Create and configure a node, ready to be registered on a chain.
pub fn build_node(type_name: &str, args: &[String]) -> Result<Arc<dyn Node>> {
    let mut node = new_node(type_name)
        .ok_or_else(|| Error::config(format!("unknown node type '{}'", type_name)))?;
    node.configure(args)?;
    Ok(Arc::from(node))
}

/// Every built-in node type, in menu order.
pub fn available_nodes() -> Vec<NodeInfo> {
    NODE_TYPES
        .iter()
        .filter_map(|name| new_node(name))
        .map(|node| NodeInfo {
            type_name: node.type_name(),
            label: node.label(),
            help: node.help(),
            arg_names: node.arg_names(),
        })
        .collect()
}

/// `xyz.theforks.nodes.PitchShiftNode`, `PitchShift` and `pitch_shift` all
/// normalize to `pitchshift`.
fn normalize_type(type_name: &str) -> String {
    let short = type_name.rsplit('.').next().unwrap_or(type_name);
    let mut name: String = short
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    if name.len() > 4 && name.ends_with("node") {
        name.truncate(name.len() - 4);
    }
    name
}
