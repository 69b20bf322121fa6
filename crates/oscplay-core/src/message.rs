//! Message model for the transformation pipeline.
//!
//! - [`OscValue`] is one typed OSC argument
//! - [`OscMessage`] is an address plus ordered arguments, immutable once built
//! - [`MessageRequest`] wraps a message with delay and routing intent
//!
//! Conversions to and from [`rosc`] types live here so the rest of the crate
//! never touches the wire representation directly.

use rosc::OscType;
use std::fmt;

/// A single typed OSC argument.
#[derive(Debug, Clone, PartialEq)]
pub enum OscValue {
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Str(String),
    Bool(bool),
    Char(char),
    Blob(Vec<u8>),
    Nil,
    Impulse,
    /// Timetags, colors, MIDI packets and arrays, forwarded untouched.
    Other(OscType),
}

impl OscValue {
    /// OSC 1.0/1.1 type tag for this argument.
    pub fn type_tag(&self) -> char {
        match self {
            OscValue::Int32(_) => 'i',
            OscValue::Int64(_) => 'h',
            OscValue::Float32(_) => 'f',
            OscValue::Float64(_) => 'd',
            OscValue::Str(_) => 's',
            OscValue::Bool(true) => 'T',
            OscValue::Bool(false) => 'F',
            OscValue::Char(_) => 'c',
            OscValue::Blob(_) => 'b',
            OscValue::Nil => 'N',
            OscValue::Impulse => 'I',
            OscValue::Other(other) => match other {
                OscType::Time(_) => 't',
                OscType::Color(_) => 'r',
                OscType::Midi(_) => 'm',
                OscType::Array(_) => '[',
                scalar => OscValue::from_osc(scalar.clone()).type_tag(),
            },
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            OscValue::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            OscValue::Float32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Convert from the wire type.
    ///
    /// Types the pipeline does not model become [`OscValue::Other`].
    pub fn from_osc(value: OscType) -> Self {
        match value {
            OscType::Int(v) => OscValue::Int32(v),
            OscType::Long(v) => OscValue::Int64(v),
            OscType::Float(v) => OscValue::Float32(v),
            OscType::Double(v) => OscValue::Float64(v),
            OscType::String(s) => OscValue::Str(s),
            OscType::Bool(b) => OscValue::Bool(b),
            OscType::Char(c) => OscValue::Char(c),
            OscType::Blob(b) => OscValue::Blob(b),
            OscType::Nil => OscValue::Nil,
            OscType::Inf => OscValue::Impulse,
            other => OscValue::Other(other),
        }
    }

    /// Convert to the wire type.
    pub fn to_osc(&self) -> OscType {
        match self {
            OscValue::Int32(v) => OscType::Int(*v),
            OscValue::Int64(v) => OscType::Long(*v),
            OscValue::Float32(v) => OscType::Float(*v),
            OscValue::Float64(v) => OscType::Double(*v),
            OscValue::Str(s) => OscType::String(s.clone()),
            OscValue::Bool(b) => OscType::Bool(*b),
            OscValue::Char(c) => OscType::Char(*c),
            OscValue::Blob(b) => OscType::Blob(b.clone()),
            OscValue::Nil => OscType::Nil,
            OscValue::Impulse => OscType::Inf,
            OscValue::Other(other) => other.clone(),
        }
    }
}

impl fmt::Display for OscValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OscValue::Int32(v) => write!(f, "{}", v),
            OscValue::Int64(v) => write!(f, "{}", v),
            OscValue::Float32(v) => write!(f, "{}", v),
            OscValue::Float64(v) => write!(f, "{}", v),
            OscValue::Str(s) => write!(f, "\"{}\"", s),
            OscValue::Bool(b) => write!(f, "{}", b),
            OscValue::Char(c) => write!(f, "'{}'", c),
            OscValue::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
            OscValue::Nil => write!(f, "nil"),
            OscValue::Impulse => write!(f, "impulse"),
            OscValue::Other(other) => write!(f, "{:?}", other),
        }
    }
}

impl From<i32> for OscValue {
    fn from(v: i32) -> Self {
        OscValue::Int32(v)
    }
}

impl From<f32> for OscValue {
    fn from(v: f32) -> Self {
        OscValue::Float32(v)
    }
}

impl From<f64> for OscValue {
    fn from(v: f64) -> Self {
        OscValue::Float64(v)
    }
}

impl From<&str> for OscValue {
    fn from(v: &str) -> Self {
        OscValue::Str(v.to_string())
    }
}

impl From<String> for OscValue {
    fn from(v: String) -> Self {
        OscValue::Str(v)
    }
}

impl From<bool> for OscValue {
    fn from(v: bool) -> Self {
        OscValue::Bool(v)
    }
}

/// An OSC message: a slash-delimited address and ordered typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    address: String,
    args: Vec<OscValue>,
}

impl OscMessage {
    pub fn new(address: impl Into<String>, args: Vec<OscValue>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn args(&self) -> &[OscValue] {
        &self.args
    }

    /// Type tag string without the leading comma, e.g. `"ifs"`.
    pub fn type_tags(&self) -> String {
        self.args.iter().map(OscValue::type_tag).collect()
    }

    /// A copy of this message at a different address.
    pub fn with_address(&self, address: impl Into<String>) -> Self {
        Self::new(address, self.args.clone())
    }

    /// A copy of this message with different arguments.
    pub fn with_args(&self, args: Vec<OscValue>) -> Self {
        Self::new(self.address.clone(), args)
    }

    /// Convert from a decoded wire message.
    pub fn from_osc(msg: rosc::OscMessage) -> Self {
        Self {
            address: msg.addr,
            args: msg.args.into_iter().map(OscValue::from_osc).collect(),
        }
    }

    pub fn to_osc(&self) -> rosc::OscMessage {
        rosc::OscMessage {
            addr: self.address.clone(),
            args: self.args.iter().map(OscValue::to_osc).collect(),
        }
    }
}

impl fmt::Display for OscMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A message plus delivery intent, produced by node chains.
///
/// `delay_ms == 0` means send now. `target_output == None` means "the output
/// whose chain produced this request" (or every enabled output at top level).
/// A non-zero `previous_delay_ms` marks a request that has already been
/// delayed once and must not be delayed again by the same delay node.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRequest {
    pub message: OscMessage,
    pub delay_ms: u64,
    pub target_output: Option<String>,
    pub previous_delay_ms: u64,
}

impl MessageRequest {
    /// Immediate send to the current output.
    pub fn new(message: OscMessage) -> Self {
        Self {
            message,
            delay_ms: 0,
            target_output: None,
            previous_delay_ms: 0,
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_target(mut self, output_id: impl Into<String>) -> Self {
        self.target_output = Some(output_id.into());
        self
    }

    pub fn with_previous_delay(mut self, previous_delay_ms: u64) -> Self {
        self.previous_delay_ms = previous_delay_ms;
        self
    }

    /// A sibling request carrying a new message but the same delay, route and history.
    pub fn derive(&self, message: OscMessage) -> Self {
        Self {
            message,
            delay_ms: self.delay_ms,
            target_output: self.target_output.clone(),
            previous_delay_ms: self.previous_delay_ms,
        }
    }

    pub fn is_immediate(&self) -> bool {
        self.delay_ms == 0
    }

    pub fn address(&self) -> &str {
        self.message.address()
    }
}
