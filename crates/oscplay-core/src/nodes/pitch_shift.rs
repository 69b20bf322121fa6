use super::{check_arity, for_each_matching, AddressPattern, Node};
use crate::error::Result;
use crate::message::{MessageRequest, OscValue};

/// Shifts integer note numbers up one octave.
#[derive(Debug, Default)]
pub struct PitchShiftNode {
    pattern: AddressPattern,
}

/// Semitones added to the first integer argument.
const OCTAVE: i32 = 12;

impl Node for PitchShiftNode {
    fn type_name(&self) -> &'static str {
        "pitch_shift"
    }

    fn label(&self) -> &'static str {
        "Pitch Shift"
    }

    fn help(&self) -> String {
        "Shifts the pitch of incoming notes up one octave".to_string()
    }

    fn pattern(&self) -> &AddressPattern {
        &self.pattern
    }

    fn process(&self, requests: &mut Vec<MessageRequest>) {
        for_each_matching(requests, &self.pattern, |req, out| {
            match req.message.args().first() {
                Some(OscValue::Int32(note)) => {
                    let mut args = req.message.args().to_vec();
                    args[0] = OscValue::Int32(note.wrapping_add(OCTAVE));
                    out.push(req.derive(req.message.with_args(args)));
                }
                _ => out.push(req),
            }
        });
    }

    fn arg_names(&self) -> &'static [&'static str] {
        &["Address Pattern"]
    }

    fn configure(&mut self, args: &[String]) -> Result<()> {
        check_arity("PitchShift", args, 1)?;
        self.pattern = AddressPattern::new(&args[0])?;
        Ok(())
    }

    fn args(&self) -> Vec<String> {
        vec![self.pattern.as_str().to_string()]
    }
}
