use super::{check_arity, for_each_matching, parse_arg, AddressPattern, Node};
use crate::error::Result;
use crate::message::MessageRequest;

/// Attaches a fixed delay to matching messages.
///
/// Requests that were already delayed upstream (`previous_delay_ms > 0`)
/// pass through untouched so a rescheduled message is not delayed twice.
#[derive(Debug, Default)]
pub struct DelayNode {
    pattern: AddressPattern,
    delay_ms: u64,
}

impl DelayNode {
    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }
}

impl Node for DelayNode {
    fn type_name(&self) -> &'static str {
        "delay"
    }

    fn label(&self) -> &'static str {
        "Delay"
    }

    fn help(&self) -> String {
        format!("Delays matching messages by {} ms", self.delay_ms)
    }

    fn pattern(&self) -> &AddressPattern {
        &self.pattern
    }

    fn process(&self, requests: &mut Vec<MessageRequest>) {
        for_each_matching(requests, &self.pattern, |req, out| {
            if req.previous_delay_ms > 0 {
                out.push(req);
            } else {
                out.push(req.with_delay(self.delay_ms));
            }
        });
    }

    fn arg_names(&self) -> &'static [&'static str] {
        &["Address Pattern", "Delay (ms)"]
    }

    fn configure(&mut self, args: &[String]) -> Result<()> {
        check_arity("Delay", args, 2)?;
        let delay_ms: u64 = parse_arg("Delay", "delay", &args[1])?;
        self.pattern = AddressPattern::new(&args[0])?;
        self.delay_ms = delay_ms;
        Ok(())
    }

    fn args(&self) -> Vec<String> {
        vec![self.pattern.as_str().to_string(), self.delay_ms.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_util::*;

    fn node(ms: &str) -> DelayNode {
        let mut n = DelayNode::default();
        n.configure(&strings(&["/cue/.*", ms])).unwrap();
        n
    }

    #[test]
    fn test_attaches_delay() {
        let mut list = req("/cue/go", vec![]);
        node("250").process(&mut list);
        assert_eq!(list[0].delay_ms, 250);
    }

    #[test]
    fn test_previously_delayed_not_delayed_again() {
        let mut list = req("/cue/go", vec![]);
        list[0].previous_delay_ms = 50;
        node("250").process(&mut list);
        assert_eq!(list[0].delay_ms, 0);
        assert_eq!(list[0].previous_delay_ms, 50);
    }

    #[test]
    fn test_non_matching_not_delayed() {
        let mut list = req("/other", vec![]);
        node("250").process(&mut list);
        assert_eq!(list[0].delay_ms, 0);
    }

    #[test]
    fn test_rejects_negative_and_garbage() {
        let mut n = DelayNode::default();
        assert!(n.configure(&strings(&["/a", "-5"])).is_err());
        assert!(n.configure(&strings(&["/a", "soon"])).is_err());
        assert!(n.configure(&strings(&["/a"])).is_err());
        n.configure(&strings(&["/a", " 0 "])).unwrap();
        assert_eq!(n.delay_ms(), 0);
    }
}
