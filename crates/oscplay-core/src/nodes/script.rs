//! Script node backed by a hot-reloaded Rhai file.
//!
//! A script defines `fn process(msg)` where `msg` is
//! `#{ address, args, type_tags }`. Rhai has a single integer and a single
//! float type, so `type_tags` carries the original OSC tags; an argument
//! returned at the same position keeps its width (`h`, `d`, `I`) unless
//! the script changes its kind. Messages built with `create_message` have
//! no tags and use 32-bit types.
//!
//! The return value decides what happens:
//!
//! - `()` or `false` drops the message
//! - a message map replaces it
//! - a request map (from `create_request`) replaces it with delay/routing
//! - an array of messages or requests fans out
//! - anything else passes the original through
//!
//! Helpers available to scripts: `create_message(address, args)` and
//! `create_request(msg[, delay_ms[, output_id]])`.

use super::{check_arity, for_each_matching, AddressPattern, Node};
use crate::error::{Error, Result};
use crate::message::{MessageRequest, OscMessage, OscValue};
use parking_lot::Mutex;
use rhai::{Array, Dynamic, Engine, Map, Scope, AST, FLOAT, INT};
use rosc::OscType;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

struct LoadedScript {
    ast: AST,
    modified: Option<SystemTime>,
}

/// Runs a user script for every matching message.
pub struct ScriptNode {
    pattern: AddressPattern,
    path: PathBuf,
    engine: Engine,
    script: Mutex<Option<LoadedScript>>,
    last_error: Mutex<Option<String>>,
}

impl Default for ScriptNode {
    fn default() -> Self {
        Self {
            pattern: AddressPattern::default(),
            path: PathBuf::new(),
            engine: create_engine(),
            script: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }
}

impl std::fmt::Debug for ScriptNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptNode")
            .field("pattern", &self.pattern.as_str())
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Create a Rhai engine with the message helpers registered.
fn create_engine() -> Engine {
    let mut engine = Engine::new();

    engine.on_print(|text| {
        log::info!("[SCRIPT] {}", text);
    });
    engine.on_debug(|text, source, pos| {
        let loc = match (source, pos) {
            (Some(src), pos) if !pos.is_none() => format!(" ({}:{})", src, pos),
            (Some(src), _) => format!(" ({})", src),
            (None, pos) if !pos.is_none() => format!(" ({})", pos),
            _ => String::new(),
        };
        log::debug!("[SCRIPT]{} {}", loc, text);
    });

    engine.register_fn("create_message", |address: &str, args: Array| -> Map {
        let mut msg = Map::new();
        msg.insert("address".into(), Dynamic::from(address.to_string()));
        msg.insert("args".into(), Dynamic::from_array(args));
        msg
    });
    engine.register_fn("create_request", |msg: Map| -> Map { request_map(msg, 0, None) });
    engine.register_fn("create_request", |msg: Map, delay: INT| -> Map {
        request_map(msg, delay, None)
    });
    engine.register_fn("create_request", |msg: Map, delay: INT, output: &str| -> Map {
        request_map(msg, delay, Some(output))
    });

    engine
}

fn request_map(msg: Map, delay: INT, output: Option<&str>) -> Map {
    let mut req = Map::new();
    req.insert("message".into(), Dynamic::from_map(msg));
    req.insert("delay".into(), Dynamic::from(delay));
    req.insert(
        "output".into(),
        output.map_or(Dynamic::UNIT, |o| Dynamic::from(o.to_string())),
    );
    req
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl ScriptNode {
    pub fn script_path(&self) -> &Path {
        &self.path
    }

    fn compile(&self) -> Result<LoadedScript> {
        let modified = modified_time(&self.path);
        let source = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::Script(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        let ast = self
            .engine
            .compile(&source)
            .map_err(|e| Error::Script(format!("{}: {}", self.path.display(), e)))?;
        Ok(LoadedScript { ast, modified })
    }

    /// Reload the script if the file changed since it was last compiled.
    fn reload_if_changed(&self) {
        let current = modified_time(&self.path);
        let mut script = self.script.lock();
        let stale = match script.as_ref() {
            Some(loaded) => loaded.modified != current,
            None => true,
        };
        if !stale {
            return;
        }
        match self.compile() {
            Ok(loaded) => {
                log::info!("[SCRIPT] Reloaded {}", self.path.display());
                *script = Some(loaded);
            }
            Err(e) => {
                // Keep running the previous version until the file is fixed.
                if let Some(loaded) = script.as_mut() {
                    loaded.modified = current;
                }
                drop(script);
                self.report(&e.to_string());
            }
        }
    }

    /// Log an error once per distinct message.
    fn report(&self, error: &str) {
        let mut last = self.last_error.lock();
        if last.as_deref() != Some(error) {
            log::error!("[SCRIPT] Error in {}: {}", self.path.display(), error);
            *last = Some(error.to_string());
        }
    }

    /// Run the script on one request.
    ///
    /// Returns `None` when the original should pass through unchanged.
    fn run(&self, req: &MessageRequest) -> Result<Option<Vec<MessageRequest>>> {
        let script = self.script.lock();
        let loaded = match script.as_ref() {
            Some(loaded) => loaded,
            None => return Ok(None),
        };
        let mut scope = Scope::new();
        let arg = Dynamic::from_map(message_to_map(&req.message));
        let result: Dynamic = self
            .engine
            .call_fn(&mut scope, &loaded.ast, "process", (arg,))
            .map_err(|e| Error::Script(e.to_string()))?;
        drop(script);
        interpret(req, result)
    }
}

impl Node for ScriptNode {
    fn type_name(&self) -> &'static str {
        "script"
    }

    fn label(&self) -> &'static str {
        "Script"
    }

    fn help(&self) -> String {
        if self.path.as_os_str().is_empty() {
            "Executes a Rhai script to process OSC messages".to_string()
        } else {
            format!("Executes {} to process OSC messages", self.path.display())
        }
    }

    fn pattern(&self) -> &AddressPattern {
        &self.pattern
    }

    fn process(&self, requests: &mut Vec<MessageRequest>) {
        self.reload_if_changed();
        for_each_matching(requests, &self.pattern, |req, out| match self.run(&req) {
            Ok(Some(replacement)) => out.extend(replacement),
            Ok(None) => out.push(req),
            Err(e) => {
                self.report(&e.to_string());
                out.push(req);
            }
        });
    }

    fn arg_names(&self) -> &'static [&'static str] {
        &["Address Pattern", "Script Path"]
    }

    fn configure(&mut self, args: &[String]) -> Result<()> {
        check_arity("Script", args, 2)?;
        self.pattern = AddressPattern::new(&args[0])?;
        self.path = PathBuf::from(&args[1]);
        let loaded = self
            .compile()
            .map_err(|e| Error::config(format!("Script: {}", e)))?;
        *self.script.lock() = Some(loaded);
        *self.last_error.lock() = None;
        Ok(())
    }

    fn args(&self) -> Vec<String> {
        vec![
            self.pattern.as_str().to_string(),
            self.path.display().to_string(),
        ]
    }
}

// ============================================================================
// Value conversion
// ============================================================================

fn value_to_dynamic(value: &OscValue) -> Dynamic {
    match value {
        OscValue::Int32(v) => Dynamic::from(*v as INT),
        OscValue::Int64(v) => Dynamic::from(*v as INT),
        OscValue::Float32(v) => Dynamic::from(*v as FLOAT),
        OscValue::Float64(v) => Dynamic::from(*v as FLOAT),
        OscValue::Str(s) => Dynamic::from(s.clone()),
        OscValue::Bool(b) => Dynamic::from(*b),
        OscValue::Char(c) => Dynamic::from(*c),
        OscValue::Blob(b) => Dynamic::from_blob(b.clone()),
        OscValue::Nil | OscValue::Impulse => Dynamic::UNIT,
        OscValue::Other(other) => Dynamic::from(other.clone()),
    }
}

/// Convert a script value back, using `tag` to restore the original width.
fn dynamic_to_value(value: Dynamic, tag: Option<char>) -> Result<OscValue> {
    if value.is_unit() {
        return Ok(match tag {
            Some('I') => OscValue::Impulse,
            _ => OscValue::Nil,
        });
    }
    if let Ok(v) = value.as_int() {
        if tag == Some('h') {
            return Ok(OscValue::Int64(v));
        }
        return Ok(match i32::try_from(v) {
            Ok(small) => OscValue::Int32(small),
            Err(_) => OscValue::Int64(v),
        });
    }
    if let Ok(v) = value.as_float() {
        return Ok(match tag {
            Some('d') => OscValue::Float64(v),
            _ => OscValue::Float32(v as f32),
        });
    }
    if let Ok(b) = value.as_bool() {
        return Ok(OscValue::Bool(b));
    }
    if let Ok(c) = value.as_char() {
        return Ok(OscValue::Char(c));
    }
    if value.is_string() {
        return value
            .into_string()
            .map(OscValue::Str)
            .map_err(|t| Error::Script(format!("bad string argument: {}", t)));
    }
    if value.is::<OscType>() {
        return value
            .try_cast::<OscType>()
            .map(OscValue::Other)
            .ok_or_else(|| Error::Script("bad opaque argument".to_string()));
    }
    let type_name = value.type_name();
    value
        .try_cast::<rhai::Blob>()
        .map(OscValue::Blob)
        .ok_or_else(|| Error::Script(format!("unsupported argument type '{}'", type_name)))
}

fn message_to_map(msg: &OscMessage) -> Map {
    let args: Array = msg.args().iter().map(value_to_dynamic).collect();
    let mut map = Map::new();
    map.insert("address".into(), Dynamic::from(msg.address().to_string()));
    map.insert("args".into(), Dynamic::from_array(args));
    map.insert("type_tags".into(), Dynamic::from(msg.type_tags()));
    map
}

fn map_to_message(mut map: Map) -> Result<OscMessage> {
    let address = map
        .remove("address")
        .and_then(|a| a.into_string().ok())
        .ok_or_else(|| Error::Script("message has no string 'address'".to_string()))?;
    let tags: Vec<char> = map
        .remove("type_tags")
        .and_then(|t| t.into_string().ok())
        .map(|t| t.chars().collect())
        .unwrap_or_default();
    let args = match map.remove("args") {
        Some(args) => args
            .try_cast::<Array>()
            .ok_or_else(|| Error::Script("message 'args' must be an array".to_string()))?
            .into_iter()
            .enumerate()
            .map(|(i, value)| dynamic_to_value(value, tags.get(i).copied()))
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };
    Ok(OscMessage::new(address, args))
}

fn map_to_request(original: &MessageRequest, mut map: Map) -> Result<MessageRequest> {
    let inner = match map.remove("message") {
        Some(inner) => inner,
        None => return Ok(original.derive(map_to_message(map)?)),
    };
    let message = inner
        .try_cast::<Map>()
        .ok_or_else(|| Error::Script("request 'message' must be a map".to_string()))
        .and_then(map_to_message)?;
    let mut req = original.derive(message);
    if let Some(delay) = map.remove("delay").and_then(|d| d.as_int().ok()) {
        req.delay_ms = delay.max(0) as u64;
    }
    if let Some(output) = map.remove("output").and_then(|o| o.into_string().ok()) {
        req.target_output = Some(output);
    }
    Ok(req)
}

fn interpret(original: &MessageRequest, result: Dynamic) -> Result<Option<Vec<MessageRequest>>> {
    if result.is_unit() || matches!(result.as_bool(), Ok(false)) {
        return Ok(Some(Vec::new()));
    }
    if result.is_map() {
        let map = result
            .try_cast::<Map>()
            .ok_or_else(|| Error::Script("bad map".to_string()))?;
        return Ok(Some(vec![map_to_request(original, map)?]));
    }
    if result.is_array() {
        let items = result
            .try_cast::<Array>()
            .ok_or_else(|| Error::Script("bad array".to_string()))?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if let Some(map) = item.try_cast::<Map>() {
                out.push(map_to_request(original, map)?);
            }
        }
        return Ok(Some(out));
    }
    if matches!(result.as_bool(), Ok(true)) {
        return Ok(None);
    }
    Err(Error::Script(format!(
        "process() returned unsupported type '{}'",
        result.type_name()
    )))
}
