//! Node chains.
//!
//! A [`NodeChain`] is the ordered list of nodes bound to one output. The
//! list is copy-on-write: `process` works on the snapshot loaded at its
//! start, while configuration callers swap in new lists without blocking
//! in-flight messages.

use crate::message::{MessageRequest, OscMessage};
use crate::nodes::Node;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Ordered, concurrently editable pipeline of nodes.
pub struct NodeChain {
    nodes: ArcSwap<Vec<Arc<dyn Node>>>,
    enabled: AtomicBool,
}

impl NodeChain {
    pub fn new() -> Self {
        Self {
            nodes: ArcSwap::from_pointee(Vec::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Run `message` through the chain.
    ///
    /// `previous_delay_ms` is non-zero when the message is being re-run after
    /// a scheduled delay fired; delay nodes use it to avoid delaying twice.
    ///
    /// # Returns
    /// Zero or more requests. A disabled chain returns the message unchanged.
    pub fn process(&self, message: &OscMessage, previous_delay_ms: u64) -> Vec<MessageRequest> {
        let mut requests =
            vec![MessageRequest::new(message.clone()).with_previous_delay(previous_delay_ms)];
        if !self.is_enabled() {
            return requests;
        }

        let nodes = self.nodes.load();
        for node in nodes.iter() {
            let matched = match requests.first() {
                Some(first) => node.matches(first.address()),
                None => break,
            };
            if !matched {
                continue;
            }
            node.process(&mut requests);
            log::trace!(
                "[CHAIN] {} -> {} request(s)",
                node.label(),
                requests.len()
            );
            if requests.is_empty() {
                break;
            }
        }
        requests
    }

    /// Append a node to the end of the chain.
    pub fn register_node(&self, node: Arc<dyn Node>) {
        self.nodes.rcu(|nodes| {
            let mut next = Vec::clone(nodes);
            next.push(node.clone());
            next
        });
    }

    /// Remove a previously registered node instance.
    ///
    /// # Returns
    /// `true` if the node was part of the chain.
    pub fn unregister_node(&self, node: &Arc<dyn Node>) -> bool {
        let mut removed = false;
        self.nodes.rcu(|nodes| {
            let next: Vec<_> = nodes
                .iter()
                .filter(|n| !std::ptr::addr_eq(Arc::as_ptr(n), Arc::as_ptr(node)))
                .cloned()
                .collect();
            removed = next.len() != nodes.len();
            next
        });
        removed
    }

    /// Remove the node at `index`.
    pub fn remove_at(&self, index: usize) -> Option<Arc<dyn Node>> {
        let mut removed = None;
        self.nodes.rcu(|nodes| {
            let mut next = Vec::clone(nodes);
            removed = (index < next.len()).then(|| next.remove(index));
            next
        });
        removed
    }

    /// Move the node at `from` so it ends up at position `to`.
    pub fn move_node(&self, from: usize, to: usize) -> bool {
        let mut moved = false;
        self.nodes.rcu(|nodes| {
            let mut next = Vec::clone(nodes);
            moved = from < next.len() && to < next.len();
            if moved {
                let node = next.remove(from);
                next.insert(to, node);
            }
            next
        });
        moved
    }

    /// Atomically replace every node.
    pub fn set_nodes(&self, nodes: Vec<Arc<dyn Node>>) {
        self.nodes.store(Arc::new(nodes));
    }

    /// Snapshot copy of the current nodes.
    pub fn get_nodes(&self) -> Vec<Arc<dyn Node>> {
        Vec::clone(&self.nodes.load())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.load().len()
    }

    pub fn clear(&self) {
        self.set_nodes(Vec::new());
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

impl Default for NodeChain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NodeChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeChain")
            .field("enabled", &self.is_enabled())
            .field("nodes", &self.node_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::OscValue;
    use crate::nodes::build_node;

    fn node(type_name: &str, args: &[&str]) -> Arc<dyn Node> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        build_node(type_name, &args).unwrap()
    }

    fn msg(address: &str, args: Vec<OscValue>) -> OscMessage {
        OscMessage::new(address, args)
    }

    #[test]
    fn test_empty_chain_passes_message() {
        let chain = NodeChain::new();
        let out = chain.process(&msg("/a", vec![OscValue::Int32(1)]), 0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].message, msg("/a", vec![OscValue::Int32(1)]));
        assert!(out[0].is_immediate());
    }

    #[test]
    fn test_disabled_chain_short_circuits() {
        let chain = NodeChain::new();
        chain.register_node(node("drop", &[".*"]));
        chain.set_enabled(false);
        assert_eq!(chain.process(&msg("/a", vec![]), 0).len(), 1);
        chain.set_enabled(true);
        assert!(chain.process(&msg("/a", vec![]), 0).is_empty());
    }

    #[test]
    fn test_matching_follows_rewritten_address() {
        let chain = NodeChain::new();
        chain.register_node(node("rename", &["/in/.*", "/in/", "/out/"]));
        chain.register_node(node("pitch_shift", &["/out/.*"]));
        chain.register_node(node("drop", &["/in/.*"]));
        let out = chain.process(&msg("/in/note", vec![OscValue::Int32(60)]), 0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].address(), "/out/note");
        assert_eq!(out[0].message.args(), &[OscValue::Int32(72)]);
    }

    #[test]
    fn test_drop_stops_processing() {
        let chain = NodeChain::new();
        chain.register_node(node("drop", &["/a"]));
        chain.register_node(node("pass", &["/never"]));
        assert!(chain.process(&msg("/a", vec![]), 0).is_empty());
    }

    #[test]
    fn test_splitter_then_delay() {
        let chain = NodeChain::new();
        chain.register_node(node("splitter", &[]));
        chain.register_node(node("delay", &["/xy.*", "40"]));
        let out = chain.process(&msg("/xy", vec![OscValue::Int32(1), OscValue::Int32(2)]), 0);
        let summary: Vec<_> = out
            .iter()
            .map(|r| (r.address().to_string(), r.delay_ms))
            .collect();
        assert_eq!(
            summary,
            vec![("/xy1".to_string(), 40), ("/xy2".to_string(), 40)]
        );
    }

    #[test]
    fn test_previous_delay_reaches_delay_node() {
        let chain = NodeChain::new();
        chain.register_node(node("delay", &["/cue", "50"]));
        let first = chain.process(&msg("/cue", vec![]), 0);
        assert_eq!(first[0].delay_ms, 50);
        let again = chain.process(&msg("/cue", vec![]), 50);
        assert_eq!(again[0].delay_ms, 0);
        assert_eq!(again[0].previous_delay_ms, 50);
    }

    #[test]
    fn test_register_unregister_and_reorder() {
        let chain = NodeChain::new();
        let a = node("drop", &["/a"]);
        let b = node("drop", &["/b"]);
        chain.register_node(a.clone());
        chain.register_node(b.clone());
        assert_eq!(chain.node_count(), 2);

        assert!(chain.move_node(1, 0));
        assert_eq!(chain.get_nodes()[0].args(), vec!["/b".to_string()]);

        assert!(chain.unregister_node(&a));
        assert!(!chain.unregister_node(&a));
        assert_eq!(chain.node_count(), 1);

        assert!(chain.remove_at(3).is_none());
        assert!(chain.remove_at(0).is_some());
        assert_eq!(chain.node_count(), 0);
    }

    #[test]
    fn test_snapshot_unaffected_by_later_edits() {
        let chain = NodeChain::new();
        chain.set_nodes(vec![node("drop", &["/a"])]);
        let snapshot = chain.get_nodes();
        chain.clear();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(chain.node_count(), 0);
    }

    #[test]
    fn test_concurrent_edits_and_processing() {
        let chain = Arc::new(NodeChain::new());
        let writer = {
            let chain = chain.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    let n = node("pitch_shift", &["/n"]);
                    chain.register_node(n.clone());
                    if i % 2 == 0 {
                        chain.unregister_node(&n);
                    }
                }
            })
        };
        for _ in 0..200 {
            let out = chain.process(&msg("/n", vec![OscValue::Int32(0)]), 0);
            assert_eq!(out.len(), 1);
            let shifted = out[0].message.args()[0].as_int().unwrap();
            assert_eq!(shifted % 12, 0);
        }
        writer.join().unwrap();
        assert_eq!(chain.node_count(), 100);
    }
}
