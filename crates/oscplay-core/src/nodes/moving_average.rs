use super::{check_arity, for_each_matching, parse_arg, AddressPattern, Node};
use crate::error::{Error, Result};
use crate::message::{MessageRequest, OscValue};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Smooths single-float messages with a per-address sliding window.
#[derive(Debug)]
pub struct MovingAverageNode {
    pattern: AddressPattern,
    window: usize,
    /// Recent values per address. Only touched from `process`.
    history: Mutex<HashMap<String, VecDeque<f32>>>,
}

impl Default for MovingAverageNode {
    fn default() -> Self {
        Self {
            pattern: AddressPattern::default(),
            window: 1,
            history: Mutex::new(HashMap::new()),
        }
    }
}

impl MovingAverageNode {
    fn push(&self, address: &str, value: f32) -> f32 {
        let mut history = self.history.lock();
        let values = history.entry(address.to_string()).or_default();
        values.push_back(value);
        while values.len() > self.window {
            values.pop_front();
        }
        values.iter().sum::<f32>() / values.len() as f32
    }
}

impl Node for MovingAverageNode {
    fn type_name(&self) -> &'static str {
        "moving_average"
    }

    fn label(&self) -> &'static str {
        "Moving Average"
    }

    fn help(&self) -> String {
        format!(
            "Averages single float values over the last {} messages per address",
            self.window
        )
    }

    fn pattern(&self) -> &AddressPattern {
        &self.pattern
    }

    fn process(&self, requests: &mut Vec<MessageRequest>) {
        for_each_matching(requests, &self.pattern, |req, out| {
            match req.message.args() {
                [OscValue::Float32(v)] => {
                    let mean = self.push(req.address(), *v);
                    out.push(req.derive(req.message.with_args(vec![OscValue::Float32(mean)])));
                }
                _ => out.push(req),
            }
        });
    }

    fn arg_names(&self) -> &'static [&'static str] {
        &["Address Pattern", "Window Size"]
    }

    fn configure(&mut self, args: &[String]) -> Result<()> {
        check_arity("MovingAverage", args, 2)?;
        let window: usize = parse_arg("MovingAverage", "window size", &args[1])?;
        if window < 1 {
            return Err(Error::config("MovingAverage window size must be at least 1"));
        }
        self.pattern = AddressPattern::new(&args[0])?;
        self.window = window;
        self.history.lock().clear();
        Ok(())
    }

    fn args(&self) -> Vec<String> {
        vec![self.pattern.as_str().to_string(), self.window.to_string()]
    }
}
