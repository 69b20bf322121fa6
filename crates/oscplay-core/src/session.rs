//! Recording sessions and their on-disk layout.
//!
//! Sessions live under a data directory:
//!
//! ```text
//! <data>/recordings/<name>/data.json      session messages
//! <data>/recordings/<name>/settings.json  per-session settings
//! <data>/audio/<file>                     associated audio assets
//! ```
//!
//! Older flat recordings (`<data>/recordings/<name>.json`) are still
//! listed and loaded.

use crate::error::{Error, Result};
use crate::message::{OscMessage, OscValue};
use rosc::{OscArray, OscColor, OscMidiMessage, OscType};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const RECORDINGS_DIR: &str = "recordings";
const AUDIO_DIR: &str = "audio";
const DATA_FILE: &str = "data.json";
const SETTINGS_FILE: &str = "settings.json";

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ============================================================================
// Data shapes
// ============================================================================

/// One captured message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub address: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
    /// Capture time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// OSC type tags for `arguments`; absent in older recordings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_tags: Option<String>,
}

impl MessageRecord {
    pub fn from_message(message: &OscMessage, timestamp: i64) -> Self {
        Self {
            address: message.address().to_string(),
            arguments: message.args().iter().map(value_to_json).collect(),
            timestamp,
            type_tags: Some(message.type_tags()),
        }
    }

    /// Rebuild the message, honouring type tags when present.
    pub fn to_message(&self) -> Result<OscMessage> {
        let tags: Vec<char> = self
            .type_tags
            .as_deref()
            .map(|t| t.chars().collect())
            .unwrap_or_default();
        let args = self
            .arguments
            .iter()
            .enumerate()
            .map(|(i, value)| json_to_value(value, tags.get(i).copied()))
            .collect::<std::result::Result<Vec<_>, String>>()
            .map_err(|e| Error::Session(format!("{}: {}", self.address, e)))?;
        Ok(OscMessage::new(self.address.clone(), args))
    }
}

/// An ordered capture of messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub name: String,
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
    #[serde(default)]
    pub start_time: i64,
}

impl RecordingSession {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Vec::new(),
            start_time: now_millis(),
        }
    }

    pub fn add_message(&mut self, record: MessageRecord) {
        self.messages.push(record);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Span between the first and last message in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        match (self.messages.first(), self.messages.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0,
        }
    }
}

/// Per-session settings stored next to the session data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_file_name: Option<String>,
}

// ============================================================================
// Argument encoding
// ============================================================================

fn value_to_json(value: &OscValue) -> Value {
    match value {
        OscValue::Int32(v) => Value::from(*v),
        OscValue::Int64(v) => Value::from(*v),
        OscValue::Float32(v) => float_to_json(*v as f64),
        OscValue::Float64(v) => float_to_json(*v),
        OscValue::Str(s) => Value::from(s.as_str()),
        OscValue::Bool(b) => Value::from(*b),
        OscValue::Char(c) => Value::from(c.to_string()),
        OscValue::Blob(b) => Value::from(b.clone()),
        OscValue::Nil | OscValue::Impulse => Value::Null,
        OscValue::Other(other) => other_to_json(other),
    }
}

/// JSON has no NaN or infinities, so those are stored as strings.
fn float_to_json(v: f64) -> Value {
    if v.is_nan() {
        Value::from("NaN")
    } else if v.is_infinite() {
        Value::from(if v > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        Value::from(v)
    }
}

fn json_float(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => match s.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => value.as_f64(),
    }
}

/// Timetags, colors and MIDI packets are stored as number arrays; OSC arrays
/// as a nested `{typeTags, arguments}` object.
fn other_to_json(other: &OscType) -> Value {
    match other {
        OscType::Time(t) => Value::from(vec![t.seconds, t.fractional]),
        OscType::Color(c) => Value::from(vec![c.red, c.green, c.blue, c.alpha]),
        OscType::Midi(m) => Value::from(vec![m.port, m.status, m.data1, m.data2]),
        OscType::Array(array) => {
            let items: Vec<OscValue> = array
                .content
                .iter()
                .cloned()
                .map(OscValue::from_osc)
                .collect();
            serde_json::json!({
                "typeTags": items.iter().map(OscValue::type_tag).collect::<String>(),
                "arguments": items.iter().map(value_to_json).collect::<Vec<_>>(),
            })
        }
        scalar => value_to_json(&OscValue::from_osc(scalar.clone())),
    }
}

fn json_to_value(value: &Value, tag: Option<char>) -> std::result::Result<OscValue, String> {
    let bad = || format!("argument {} does not fit type tag {:?}", value, tag);
    Ok(match tag {
        Some('i') => OscValue::Int32(
            value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(bad)?,
        ),
        Some('h') => OscValue::Int64(value.as_i64().ok_or_else(bad)?),
        Some('f') => OscValue::Float32(json_float(value).ok_or_else(bad)? as f32),
        Some('d') => OscValue::Float64(json_float(value).ok_or_else(bad)?),
        Some('s') => OscValue::Str(value.as_str().ok_or_else(bad)?.to_string()),
        Some('T') | Some('F') => OscValue::Bool(value.as_bool().ok_or_else(bad)?),
        Some('c') => OscValue::Char(
            value
                .as_str()
                .and_then(|s| s.chars().next())
                .ok_or_else(bad)?,
        ),
        Some('b') => OscValue::Blob(json_bytes(value).ok_or_else(bad)?),
        Some('N') => OscValue::Nil,
        Some('I') => OscValue::Impulse,
        Some('t') => match json_numbers::<u32>(value).as_deref() {
            Some(&[seconds, fractional]) => {
                OscValue::Other(OscType::Time((seconds, fractional).into()))
            }
            _ => return Err(bad()),
        },
        Some('r') => match json_bytes(value).as_deref() {
            Some(&[red, green, blue, alpha]) => OscValue::Other(OscType::Color(OscColor {
                red,
                green,
                blue,
                alpha,
            })),
            _ => return Err(bad()),
        },
        Some('m') => match json_bytes(value).as_deref() {
            Some(&[port, status, data1, data2]) => OscValue::Other(OscType::Midi(OscMidiMessage {
                port,
                status,
                data1,
                data2,
            })),
            _ => return Err(bad()),
        },
        Some('[') => OscValue::Other(OscType::Array(json_array(value).ok_or_else(bad)??)),
        Some(other) => return Err(format!("unknown type tag '{}'", other)),
        None => return untagged(value),
    })
}

fn json_array(value: &Value) -> Option<std::result::Result<OscArray, String>> {
    let tags: Vec<char> = value.get("typeTags")?.as_str()?.chars().collect();
    let items = value.get("arguments")?.as_array()?;
    Some(
        items
            .iter()
            .enumerate()
            .map(|(i, item)| json_to_value(item, tags.get(i).copied()).map(|v| v.to_osc()))
            .collect::<std::result::Result<Vec<_>, String>>()
            .map(|content| OscArray { content }),
    )
}

/// Best-effort decoding for recordings without type tags.
fn untagged(value: &Value) -> std::result::Result<OscValue, String> {
    Ok(match value {
        Value::Null => OscValue::Nil,
        Value::Bool(b) => OscValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(v) => match i32::try_from(v) {
                Ok(small) => OscValue::Int32(small),
                Err(_) => OscValue::Int64(v),
            },
            None => OscValue::Float32(n.as_f64().unwrap_or_default() as f32),
        },
        Value::String(s) => OscValue::Str(s.clone()),
        Value::Array(_) => {
            OscValue::Blob(json_bytes(value).ok_or_else(|| format!("unsupported array {}", value))?)
        }
        Value::Object(_) => return Err(format!("unsupported argument {}", value)),
    })
}

fn json_numbers<T: TryFrom<u64>>(value: &Value) -> Option<Vec<T>> {
    value
        .as_array()?
        .iter()
        .map(|n| n.as_u64().and_then(|n| T::try_from(n).ok()))
        .collect()
}

fn json_bytes(value: &Value) -> Option<Vec<u8>> {
    json_numbers::<u8>(value)
}

// ============================================================================
// Storage
// ============================================================================

/// Session names become directory names and must stay inside `recordings/`.
fn check_name(name: &str) -> Result<()> {
    if matches!(name, "" | "." | "..") || name.contains(['/', '\\']) {
        return Err(Error::Session(format!("invalid session name '{}'", name)));
    }
    Ok(())
}

/// Reads and writes sessions under a data directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.root.join(RECORDINGS_DIR)
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.root.join(AUDIO_DIR)
    }

    pub fn session_dir(&self, name: &str) -> PathBuf {
        self.recordings_dir().join(name)
    }

    fn data_file(&self, name: &str) -> PathBuf {
        self.session_dir(name).join(DATA_FILE)
    }

    fn legacy_file(&self, name: &str) -> PathBuf {
        self.recordings_dir().join(format!("{}.json", name))
    }

    fn settings_file(&self, name: &str) -> PathBuf {
        self.session_dir(name).join(SETTINGS_FILE)
    }

    /// Write `session` to `recordings/<name>/data.json`.
    pub fn save(&self, session: &RecordingSession) -> Result<PathBuf> {
        check_name(&session.name)?;
        fs::create_dir_all(self.session_dir(&session.name))?;
        let path = self.data_file(&session.name);
        fs::write(&path, serde_json::to_string_pretty(session)?)?;
        log::info!(
            "[SESSION] Saved '{}' ({} messages) to {}",
            session.name,
            session.len(),
            path.display()
        );
        Ok(path)
    }

    /// Load a session for playback.
    ///
    /// Fails if the session does not exist or holds no messages.
    pub fn load(&self, name: &str) -> Result<RecordingSession> {
        check_name(name)?;
        let path = [self.data_file(name), self.legacy_file(name)]
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| Error::Session(format!("recording '{}' not found", name)))?;
        let session: RecordingSession = serde_json::from_str(&fs::read_to_string(&path)?)?;
        if session.is_empty() {
            return Err(Error::Session(format!("recording '{}' has no messages", name)));
        }
        Ok(session)
    }

    /// Names of every stored session, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let dir = self.recordings_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let name = if path.is_dir() && path.join(DATA_FILE).is_file() {
                path.file_name()
            } else if path.extension().is_some_and(|e| e == "json") {
                path.file_stem()
            } else {
                None
            };
            if let Some(name) = name.and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    pub fn save_settings(&self, name: &str, settings: &SessionSettings) -> Result<()> {
        check_name(name)?;
        fs::create_dir_all(self.session_dir(name))?;
        fs::write(self.settings_file(name), serde_json::to_string_pretty(settings)?)?;
        Ok(())
    }

    /// Settings for a session, or `None` if none were saved.
    pub fn load_settings(&self, name: &str) -> Result<Option<SessionSettings>> {
        check_name(name)?;
        let path = self.settings_file(name);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&fs::read_to_string(path)?)?))
    }

    /// Path of the audio asset named in `settings`, if any.
    pub fn audio_path(&self, settings: &SessionSettings) -> Option<PathBuf> {
        settings
            .audio_file_name
            .as_ref()
            .map(|file| self.audio_dir().join(file))
    }

    /// Copy `audio_file` into the audio directory and link it to a session.
    pub fn associate_audio(&self, name: &str, audio_file: &Path) -> Result<PathBuf> {
        check_name(name)?;
        let file_name = audio_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Session(format!("bad audio path {}", audio_file.display())))?
            .to_string();
        fs::create_dir_all(self.audio_dir())?;
        let target = self.audio_dir().join(&file_name);
        if fs::canonicalize(audio_file).ok() != fs::canonicalize(&target).ok() {
            fs::copy(audio_file, &target)?;
        }
        let mut settings = self.load_settings(name)?.unwrap_or_default();
        settings.audio_file_name = Some(file_name);
        self.save_settings(name, &settings)?;
        log::info!("[SESSION] Associated {} with '{}'", target.display(), name);
        Ok(target)
    }
}

// ============================================================================
// Recorder
// ============================================================================

/// When inbound messages are captured relative to node chain processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMode {
    /// Record messages as received.
    #[default]
    PreRewrite,
    /// Record what the default output's chain sends immediately.
    PostRewrite,
}

/// Captures messages into a session while recording is active.
#[derive(Debug, Default)]
pub struct Recorder {
    session: Mutex<Option<RecordingSession>>,
    count: AtomicUsize,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new session, discarding any unfinished one.
    pub fn start(&self, name: impl Into<String>) {
        let session = RecordingSession::new(name);
        log::info!("[SESSION] Recording '{}'", session.name);
        *self.session.lock() = Some(session);
        self.count.store(0, Ordering::Relaxed);
    }

    /// Finish recording and hand back the captured session.
    pub fn stop(&self) -> Option<RecordingSession> {
        let session = self.session.lock().take();
        if let Some(session) = &session {
            log::info!(
                "[SESSION] Stopped recording '{}' ({} messages)",
                session.name,
                session.len()
            );
        }
        session
    }

    pub fn is_recording(&self) -> bool {
        self.session.lock().is_some()
    }

    pub fn message_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Append a message stamped with the current time. No-op when idle.
    pub fn record(&self, message: &OscMessage) {
        if let Some(session) = self.session.lock().as_mut() {
            session.add_message(MessageRecord::from_message(message, now_millis()));
            self.count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session() -> RecordingSession {
        let mut session = RecordingSession::new("take1");
        let msgs = [
            OscMessage::new("/a", vec![OscValue::Int32(1), OscValue::Float32(0.5)]),
            OscMessage::new("/b", vec![OscValue::from("x"), OscValue::Bool(true)]),
            OscMessage::new("/c", vec![OscValue::Float64(2.5), OscValue::Nil]),
        ];
        for (i, m) in msgs.iter().enumerate() {
            session.add_message(MessageRecord::from_message(m, 1000 + i as i64 * 100));
        }
        session
    }

    #[test]
    fn test_json_shape() {
        let session = sample_session();
        let json: Value = serde_json::to_value(&session).unwrap();
        assert_eq!(json["name"], "take1");
        assert!(json["startTime"].is_i64());
        assert_eq!(json["messages"][0]["address"], "/a");
        assert_eq!(json["messages"][0]["arguments"][0], 1);
        assert_eq!(json["messages"][0]["typeTags"], "if");
        assert_eq!(json["messages"][1]["timestamp"], 1100);
    }

    #[test]
    fn test_record_restores_typed_message() {
        let session = sample_session();
        let restored: Vec<_> = session
            .messages
            .iter()
            .map(|r| r.to_message().unwrap())
            .collect();
        assert_eq!(restored[0].type_tags(), "if");
        assert_eq!(restored[1].args()[1], OscValue::Bool(true));
        assert_eq!(restored[2].args()[0], OscValue::Float64(2.5));
    }

    #[test]
    fn test_untagged_recording_from_older_files() {
        let json = r#"{
            "name": "old",
            "messages": [
                {"address": "/x", "arguments": [3, 0.25, "s", null], "timestamp": 5}
            ],
            "startTime": 1
        }"#;
        let session: RecordingSession = serde_json::from_str(json).unwrap();
        let msg = session.messages[0].to_message().unwrap();
        assert_eq!(
            msg.args(),
            &[
                OscValue::Int32(3),
                OscValue::Float32(0.25),
                OscValue::from("s"),
                OscValue::Nil
            ]
        );
    }

    #[test]
    fn test_non_finite_floats_survive_storage() {
        let msg = OscMessage::new(
            "/f",
            vec![
                OscValue::Float32(f32::NAN),
                OscValue::Float32(f32::INFINITY),
                OscValue::Float64(f64::NEG_INFINITY),
                OscValue::Float64(1.25),
            ],
        );
        let record = MessageRecord::from_message(&msg, 0);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""NaN""#));
        let restored = serde_json::from_str::<MessageRecord>(&json)
            .unwrap()
            .to_message()
            .unwrap();
        assert_eq!(restored.type_tags(), "ffdd");
        assert!(matches!(restored.args()[0], OscValue::Float32(v) if v.is_nan()));
        assert_eq!(restored.args()[1], OscValue::Float32(f32::INFINITY));
        assert_eq!(restored.args()[2], OscValue::Float64(f64::NEG_INFINITY));
        assert_eq!(restored.args()[3], OscValue::Float64(1.25));
    }

    #[test]
    fn test_unmodelled_arguments_survive_storage() {
        let nested = OscType::Array(OscArray {
            content: vec![
                OscType::Int(1),
                OscType::Array(OscArray {
                    content: vec![OscType::String("deep".to_string())],
                }),
            ],
        });
        let msg = OscMessage::new(
            "/o",
            vec![
                OscValue::Other(OscType::Time((10, 20).into())),
                OscValue::Other(OscType::Color(OscColor {
                    red: 255,
                    green: 0,
                    blue: 128,
                    alpha: 64,
                })),
                OscValue::Other(OscType::Midi(OscMidiMessage {
                    port: 1,
                    status: 0x90,
                    data1: 60,
                    data2: 127,
                })),
                OscValue::Other(nested),
            ],
        );
        let json = serde_json::to_string(&MessageRecord::from_message(&msg, 0)).unwrap();
        let restored = serde_json::from_str::<MessageRecord>(&json)
            .unwrap()
            .to_message()
            .unwrap();
        assert_eq!(restored, msg);
    }

    #[test]
    fn test_tag_mismatch_is_session_error() {
        let record = MessageRecord {
            address: "/x".to_string(),
            arguments: vec![Value::from("nope")],
            timestamp: 0,
            type_tags: Some("i".to_string()),
        };
        assert!(matches!(record.to_message(), Err(Error::Session(_))));
    }

    #[test]
    fn test_store_save_load_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.list().unwrap().is_empty());

        let session = sample_session();
        let path = store.save(&session).unwrap();
        assert!(path.ends_with("recordings/take1/data.json"));
        assert_eq!(store.load("take1").unwrap(), session);

        fs::write(
            store.recordings_dir().join("legacy.json"),
            r#"{"name":"legacy","messages":[{"address":"/l","arguments":[],"timestamp":1}],"startTime":0}"#,
        )
        .unwrap();
        assert_eq!(store.list().unwrap(), vec!["legacy", "take1"]);
        assert_eq!(store.load("legacy").unwrap().len(), 1);
    }

    #[test]
    fn test_load_missing_or_empty_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(matches!(store.load("nope"), Err(Error::Session(_))));
        store.save(&RecordingSession::new("empty")).unwrap();
        assert!(matches!(store.load("empty"), Err(Error::Session(_))));
    }

    #[test]
    fn test_settings_and_audio_association() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.load_settings("take1").unwrap().is_none());

        let audio = dir.path().join("track.wav");
        fs::write(&audio, b"RIFF").unwrap();
        let target = store.associate_audio("take1", &audio).unwrap();
        assert!(target.is_file());

        let settings = store.load_settings("take1").unwrap().unwrap();
        assert_eq!(settings.audio_file_name.as_deref(), Some("track.wav"));
        assert_eq!(store.audio_path(&settings), Some(target));

        let json = fs::read_to_string(store.session_dir("take1").join(SETTINGS_FILE)).unwrap();
        assert!(json.contains("audioFileName"));
    }

    #[test]
    fn test_names_cannot_leave_recordings_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("data"));
        for name in ["../x", "a/b", "..", "", "a\\b"] {
            let mut session = sample_session();
            session.name = name.to_string();
            assert!(matches!(store.save(&session), Err(Error::Session(_))), "{name}");
            assert!(matches!(store.load(name), Err(Error::Session(_))), "{name}");
            assert!(matches!(
                store.associate_audio(name, Path::new("track.wav")),
                Err(Error::Session(_))
            ));
        }
        assert!(!dir.path().join("x").exists());
        assert!(!dir.path().join("data").exists());

        let mut session = sample_session();
        session.name = "take..2".to_string();
        store.save(&session).unwrap();
        assert_eq!(store.load("take..2").unwrap().name, "take..2");
    }

    #[test]
    fn test_recorder_lifecycle() {
        let recorder = Recorder::new();
        recorder.record(&OscMessage::new("/ignored", vec![]));
        assert!(!recorder.is_recording());

        recorder.start("live");
        recorder.record(&OscMessage::new("/a", vec![OscValue::Int32(1)]));
        recorder.record(&OscMessage::new("/b", vec![]));
        assert_eq!(recorder.message_count(), 2);

        let session = recorder.stop().unwrap();
        assert_eq!(session.name, "live");
        assert_eq!(session.len(), 2);
        assert!(session.messages[0].timestamp <= session.messages[1].timestamp);
        assert!(recorder.stop().is_none());
    }
}
