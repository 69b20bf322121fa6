use super::{check_arity, for_each_matching, AddressPattern, Node};
use crate::error::Result;
use crate::message::{MessageRequest, OscValue};

/// Turns `1` into an argumentless trigger and drops other integers.
#[derive(Debug, Default)]
pub struct IntToBangNode {
    pattern: AddressPattern,
}

impl Node for IntToBangNode {
    fn type_name(&self) -> &'static str {
        "int_to_bang"
    }

    fn label(&self) -> &'static str {
        "IntToBang"
    }

    fn help(&self) -> String {
        "Converts OSC messages with integer argument 1 to argumentless messages, drops others"
            .to_string()
    }

    fn pattern(&self) -> &AddressPattern {
        &self.pattern
    }

    fn process(&self, requests: &mut Vec<MessageRequest>) {
        for_each_matching(requests, &self.pattern, |req, out| match req.message.args() {
            [OscValue::Int32(1)] => out.push(req.derive(req.message.with_args(Vec::new()))),
            [OscValue::Int32(_)] => {}
            _ => out.push(req),
        });
    }

    fn arg_names(&self) -> &'static [&'static str] {
        &["Address Pattern"]
    }

    fn configure(&mut self, args: &[String]) -> Result<()> {
        check_arity("IntToBang", args, 1)?;
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
    use crate::nodes::test_util::*;

    fn node() -> IntToBangNode {
        let mut n = IntToBangNode::default();
        n.configure(&strings(&["/trigger/.*"])).unwrap();
        n
    }

    #[test]
    fn test_one_becomes_bang() {
        let mut list = req("/trigger/a", vec![OscValue::Int32(1)]);
        node().process(&mut list);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].address(), "/trigger/a");
        assert!(list[0].message.args().is_empty());
    }

    #[test]
    fn test_other_ints_dropped() {
        for v in [0, 2, -1] {
            let mut list = req("/trigger/a", vec![OscValue::Int32(v)]);
            node().process(&mut list);
            assert!(list.is_empty(), "value {} should drop", v);
        }
    }

    #[test]
    fn test_other_shapes_pass() {
        let mut floats = req("/trigger/a", vec![OscValue::Float32(1.0)]);
        node().process(&mut floats);
        assert_eq!(floats.len(), 1);

        let mut two = req("/trigger/a", vec![OscValue::Int32(1), OscValue::Int32(1)]);
        node().process(&mut two);
        assert_eq!(two[0].message.args().len(), 2);

        let mut other = req("/other", vec![OscValue::Int32(5)]);
        node().process(&mut other);
        assert_eq!(other.len(), 1);
    }
}
