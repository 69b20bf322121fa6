//! Drop and Pass: complementary address filters.

use super::{check_arity, AddressPattern, Node};
use crate::error::Result;
use crate::message::MessageRequest;

/// Removes requests whose address matches the pattern.
#[derive(Debug, Default)]
pub struct DropNode {
    pattern: AddressPattern,
}

impl Node for DropNode {
    fn type_name(&self) -> &'static str {
        "drop"
    }

    fn label(&self) -> &'static str {
        "Drop"
    }

    fn help(&self) -> String {
        "Drops (filters out) OSC messages that match the given address pattern".to_string()
    }

    fn pattern(&self) -> &AddressPattern {
        &self.pattern
    }

    fn process(&self, requests: &mut Vec<MessageRequest>) {
        requests.retain(|req| !self.pattern.is_match(req.address()));
    }

    fn arg_names(&self) -> &'static [&'static str] {
        &["Address Pattern"]
    }

    fn configure(&mut self, args: &[String]) -> Result<()> {
        check_arity("Drop", args, 1)?;
        self.pattern = AddressPattern::new(&args[0])?;
        Ok(())
    }

    fn args(&self) -> Vec<String> {
        vec![self.pattern.as_str().to_string()]
    }
}

/// Keeps only requests whose address matches the pattern.
///
/// Unlike other nodes it must see every message, so `matches` accepts any
/// address and the filtering happens in `process`.
#[derive(Debug, Default)]
pub struct PassNode {
    pattern: AddressPattern,
}

impl Node for PassNode {
    fn type_name(&self) -> &'static str {
        "pass"
    }

    fn label(&self) -> &'static str {
        "Pass"
    }

    fn help(&self) -> String {
        "Passes only OSC messages that match the given address pattern, drops all others"
            .to_string()
    }

    fn pattern(&self) -> &AddressPattern {
        &self.pattern
    }

    fn matches(&self, _address: &str) -> bool {
        true
    }

    fn process(&self, requests: &mut Vec<MessageRequest>) {
        requests.retain(|req| self.pattern.is_match(req.address()));
    }

    fn arg_names(&self) -> &'static [&'static str] {
        &["Address Pattern"]
    }

    fn configure(&mut self, args: &[String]) -> Result<()> {
        check_arity("Pass", args, 1)?;
        self.pattern = AddressPattern::new(&args[0])?;
        Ok(())
    }

    fn args(&self) -> Vec<String> {
        vec![self.pattern.as_str().to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::OscValue;
    use crate::nodes::test_util::*;

    fn pair(pattern: &str) -> (DropNode, PassNode) {
        let mut d = DropNode::default();
        let mut p = PassNode::default();
        d.configure(&strings(&[pattern])).unwrap();
        p.configure(&strings(&[pattern])).unwrap();
        (d, p)
    }

    #[test]
    fn test_drop_and_pass_are_complements() {
        let (drop, pass) = pair("/synth/osc[12]/.*");
        for address in ["/synth/osc1/freq", "/synth/osc3/freq", "/debug", "/synth/osc2/", "/"] {
            let mut dropped = req(address, vec![OscValue::Int32(1)]);
            let mut passed = req(address, vec![OscValue::Int32(1)]);
            if drop.matches(address) {
                drop.process(&mut dropped);
            }
            if pass.matches(address) {
                pass.process(&mut passed);
            }
            assert_ne!(
                dropped.is_empty(),
                passed.is_empty(),
                "{} must survive exactly one filter",
                address
            );
        }
    }

    #[test]
    fn test_drop_removes_match() {
        let (drop, _) = pair("/debug/.*");
        let mut list = req("/debug/x", vec![]);
        drop.process(&mut list);
        assert!(list.is_empty());
    }

    #[test]
    fn test_pass_matches_everything_at_chain_level() {
        let (_, pass) = pair("/only");
        assert!(pass.matches("/anything"));
        let mut list = req("/anything", vec![]);
        pass.process(&mut list);
        assert!(list.is_empty());
    }
}
