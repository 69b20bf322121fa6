use super::{check_arity, AddressPattern, Node};
use crate::error::Result;
use crate::message::{MessageRequest, OscMessage};

/// Splits an N-argument message into N single-argument messages.
///
/// `/foo a b c` becomes `/foo1 a`, `/foo2 b`, `/foo3 c`. Messages with zero
/// or one argument pass through unchanged.
#[derive(Debug, Default)]
pub struct SplitterNode {
    pattern: AddressPattern,
}

impl Node for SplitterNode {
    fn type_name(&self) -> &'static str {
        "splitter"
    }

    fn label(&self) -> &'static str {
        "Splitter"
    }

    fn help(&self) -> String {
        "Splits multi-argument OSC messages into separate single-argument messages with incremented addresses"
            .to_string()
    }

    fn pattern(&self) -> &AddressPattern {
        &self.pattern
    }

    fn matches(&self, _address: &str) -> bool {
        true
    }

    fn process(&self, requests: &mut Vec<MessageRequest>) {
        let incoming = std::mem::take(requests);
        for req in incoming {
            if req.message.args().len() <= 1 {
                requests.push(req);
                continue;
            }
            for (i, arg) in req.message.args().iter().enumerate() {
                let address = format!("{}{}", req.address(), i + 1);
                requests.push(req.derive(OscMessage::new(address, vec![arg.clone()])));
            }
        }
    }

    fn arg_names(&self) -> &'static [&'static str] {
        &[]
    }

    fn configure(&mut self, args: &[String]) -> Result<()> {
        check_arity("Splitter", args, 0)
    }

    fn args(&self) -> Vec<String> {
        Vec::new()
    }
}
