use super::{check_arity, for_each_matching, AddressPattern, Node};
use crate::error::Result;
use crate::message::{MessageRequest, OscValue};

/// Moves the last address segment into a leading string argument.
///
/// `/mixer/volume 0.5` becomes `/mixer "volume" 0.5`.
#[derive(Debug, Default)]
pub struct PathTrimNode {
    pattern: AddressPattern,
}

impl Node for PathTrimNode {
    fn type_name(&self) -> &'static str {
        "path_trim"
    }

    fn label(&self) -> &'static str {
        "Path Trim"
    }

    fn help(&self) -> String {
        "Trims the last path segment and prepends it as a string argument".to_string()
    }

    fn pattern(&self) -> &AddressPattern {
        &self.pattern
    }

    fn process(&self, requests: &mut Vec<MessageRequest>) {
        for_each_matching(requests, &self.pattern, |req, out| {
            let address = req.address();
            match address.rfind('/') {
                Some(idx) if idx > 0 => {
                    let mut args = Vec::with_capacity(req.message.args().len() + 1);
                    args.push(OscValue::Str(address[idx + 1..].to_string()));
                    args.extend_from_slice(req.message.args());
                    let trimmed = address[..idx].to_string();
                    out.push(req.derive(crate::message::OscMessage::new(trimmed, args)));
                }
                _ => out.push(req),
            }
        });
    }

    fn arg_names(&self) -> &'static [&'static str] {
        &["Address Pattern"]
    }

    fn configure(&mut self, args: &[String]) -> Result<()> {
        check_arity("PathTrim", args, 1)?;
        self.pattern = AddressPattern::new(&args[0])?;
        Ok(())
    }

    fn args(&self) -> Vec<String> {
        vec![self.pattern.as_str().to_string()]
    }
}
