//! Configuration file support for oscplay
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/oscplay/config.toml`
//! - macOS: `~/Library/Application Support/xyz.theforks.oscplay/config.toml`
//! - Windows: `%APPDATA%\theforks\oscplay\config\config.toml`
//!
//! Node chains are either listed inline per output or kept in a separate
//! JSON chain file (`[{type, enabled, args}]` or `{"nodes": [...]}`).

use crate::error::{Error, Result};
use crate::nodes::build_node;
use crate::osc::Transport;
use crate::output::{Output, OutputRegistry, DEFAULT_HOST, DEFAULT_OUTPUT_ID, DEFAULT_PORT};
use crate::playback::PlaybackMode;
use crate::scheduler::DelayQueue;
use crate::session::RecordingMode;
use directories::ProjectDirs;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";
pub const DEFAULT_LISTEN_PORT: u16 = 7000;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address the proxy listens on
    pub listen_host: String,
    pub listen_port: u16,
    /// Base directory for recordings and audio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    pub recording_mode: RecordingMode,
    pub playback_mode: PlaybackMode,
    pub outputs: Vec<OutputConfig>,
    /// Directory relative chain files are resolved against
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_host: DEFAULT_LISTEN_HOST.to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            data_dir: None,
            recording_mode: RecordingMode::default(),
            playback_mode: PlaybackMode::default(),
            outputs: vec![OutputConfig::default()],
            base_dir: None,
        }
    }
}

/// One `[[outputs]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub id: String,
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeConfig>,
    /// JSON chain file, appended after the inline nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_file: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            id: DEFAULT_OUTPUT_ID.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            enabled: true,
            nodes: Vec::new(),
            chain_file: None,
        }
    }
}

/// One node slot in a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, deserialize_with = "args_as_strings")]
    pub args: Vec<String>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawArg {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Node args are strings, but bare numbers are accepted for convenience.
fn args_as_strings<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<String>, D::Error> {
    let raw = Vec::<RawArg>::deserialize(d)?;
    Ok(raw
        .into_iter()
        .map(|arg| match arg {
            RawArg::Str(s) => s,
            RawArg::Int(i) => i.to_string(),
            RawArg::Float(f) => f.to_string(),
            RawArg::Bool(b) => b.to_string(),
        })
        .collect())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChainFile {
    List(Vec<NodeConfig>),
    Wrapped { nodes: Vec<NodeConfig> },
}

#[derive(Serialize)]
struct ChainFileOut<'a> {
    nodes: &'a [NodeConfig],
}

/// Read a JSON chain file.
pub fn load_chain_file(path: &Path) -> Result<Vec<NodeConfig>> {
    let content = fs::read_to_string(path)?;
    Ok(match serde_json::from_str::<ChainFile>(&content)? {
        ChainFile::List(nodes) | ChainFile::Wrapped { nodes } => nodes,
    })
}

/// Write a JSON chain file in the `{"nodes": [...]}` form.
pub fn save_chain_file(path: &Path, nodes: &[NodeConfig]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(&ChainFileOut { nodes })?)?;
    Ok(())
}

impl ProxyConfig {
    /// Load configuration from the default config file location
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Err(Error::config(format!("Config file not found at {:?}", path)))
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: ProxyConfig = toml::from_str(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        log::debug!("[CONFIG] Loaded {}", path.display());
        Ok(config)
    }

    /// Load configuration or return default if not found
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Save configuration to the default config file location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        ProjectDirs::from("xyz", "theforks", "oscplay")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or(Error::NoConfigDir)
    }

    /// Create a default config file with comments
    pub fn create_default_config_file() -> Result<PathBuf> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = r#"# oscplay configuration file

# Where the proxy listens for inbound OSC
listen_host = "127.0.0.1"
listen_port = 7000

# Recordings and audio live here (defaults to the platform data directory)
# data_dir = "/path/to/oscplay-data"

# "pre_rewrite" records messages as received,
# "post_rewrite" records what the default output sends
recording_mode = "pre_rewrite"

# "with_rewrite" replays through the output chains,
# "without_rewrite" sends recorded messages verbatim
playback_mode = "with_rewrite"

[[outputs]]
id = "default"
host = "127.0.0.1"
port = 3030
enabled = true

# Nodes run in order. Patterns are regular expressions matched
# against the whole address.
# nodes = [
#   { type = "rename", args = ["/in/.*", "/in/", "/out/"] },
#   { type = "delay", args = ["/out/cue", "250"] },
# ]

# Or keep the chain in a JSON file next to this one
# chain_file = "default-chain.json"

# [[outputs]]
# id = "lights"
# host = "192.168.1.20"
# port = 8000
"#;

        fs::write(&path, content)?;
        Ok(path)
    }

    /// Base directory for recordings and audio.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(|| {
                ProjectDirs::from("xyz", "theforks", "oscplay").map(|d| d.data_dir().to_path_buf())
            })
            .unwrap_or_else(|| PathBuf::from("oscplay-data"))
    }

    /// Every enabled node slot for `output`, inline ones first.
    pub fn node_configs(&self, output: &OutputConfig) -> Result<Vec<NodeConfig>> {
        let mut nodes = output.nodes.clone();
        if let Some(file) = &output.chain_file {
            let path = match &self.base_dir {
                Some(base) if file.is_relative() => base.join(file),
                _ => file.clone(),
            };
            let loaded = load_chain_file(&path).map_err(|e| {
                Error::config(format!(
                    "output '{}': chain file {}: {}",
                    output.id,
                    path.display(),
                    e
                ))
            })?;
            nodes.extend(loaded);
        }
        nodes.retain(|n| n.enabled);
        Ok(nodes)
    }

    /// Build the output registry described by this configuration.
    ///
    /// The `default` output always exists; an entry with that id only
    /// updates its endpoint, enabled flag and chain.
    pub fn build_registry(
        &self,
        transport: Arc<dyn Transport>,
        queue: Arc<DelayQueue>,
    ) -> Result<Arc<OutputRegistry>> {
        let registry = Arc::new(OutputRegistry::new(transport, queue));
        let mut seen = Vec::new();
        for entry in &self.outputs {
            if seen.contains(&entry.id) {
                return Err(Error::config(format!("duplicate output id '{}'", entry.id)));
            }
            seen.push(entry.id.clone());

            let mut nodes = Vec::new();
            for node in self.node_configs(entry)? {
                let built = build_node(&node.node_type, &node.args).map_err(|e| {
                    Error::config(format!(
                        "output '{}': node '{}': {}",
                        entry.id, node.node_type, e
                    ))
                })?;
                nodes.push(built);
            }

            let output = match registry.get(&entry.id) {
                Some(existing) => {
                    existing.set_endpoint(entry.host.clone(), entry.port);
                    existing
                }
                None => {
                    registry.add(Output::new(entry.id.clone(), entry.host.clone(), entry.port));
                    registry
                        .get(&entry.id)
                        .ok_or_else(|| Error::config(format!("output '{}' was not added", entry.id)))?
                }
            };
            output.set_enabled(entry.enabled);
            log::info!(
                "[CONFIG] Output '{}' -> {}:{} ({} node(s){})",
                entry.id,
                entry.host,
                entry.port,
                nodes.len(),
                if entry.enabled { "" } else { ", disabled" }
            );
            output.chain().set_nodes(nodes);
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc::testing::RecordingTransport;

    fn build(config: &ProxyConfig) -> Result<Arc<OutputRegistry>> {
        config.build_registry(RecordingTransport::new(), Arc::new(DelayQueue::new()))
    }

    #[test]
    fn test_default_config() {
        let config = ProxyConfig::default();
        assert_eq!(config.listen_port, 7000);
        assert_eq!(config.outputs.len(), 1);
        assert_eq!(config.outputs[0].id, "default");
        assert_eq!(config.outputs[0].port, 3030);
        assert_eq!(config.recording_mode, RecordingMode::PreRewrite);
        assert_eq!(config.playback_mode, PlaybackMode::WithRewrite);
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
listen_port = 9000
recording_mode = "post_rewrite"
playback_mode = "without_rewrite"

[[outputs]]
id = "default"
port = 3031

[[outputs]]
id = "lights"
host = "10.0.0.5"
port = 8000
enabled = false
nodes = [
  { type = "xyz.theforks.nodes.PitchShiftNode", args = ["/note"] },
  { type = "delay", args = ["/cue", 250] },
  { type = "drop", enabled = false, args = [".*"] },
]
"#;
        let config: ProxyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.listen_host, "127.0.0.1");
        assert_eq!(config.listen_port, 9000);
        assert_eq!(config.recording_mode, RecordingMode::PostRewrite);
        assert_eq!(config.playback_mode, PlaybackMode::WithoutRewrite);
        assert_eq!(config.outputs[1].nodes[1].args, vec!["/cue", "250"]);

        let registry = build(&config).unwrap();
        assert_eq!(registry.ids(), vec!["default", "lights"]);
        assert_eq!(registry.get("default").unwrap().port(), 3031);
        let lights = registry.get("lights").unwrap();
        assert!(!lights.is_enabled());
        assert_eq!(lights.chain().node_count(), 2);
    }

    #[test]
    fn test_bad_node_names_output_and_type() {
        let config: ProxyConfig = toml::from_str(
            r#"
[[outputs]]
id = "side"
port = 4000
nodes = [{ type = "delay", args = ["/a", "soon"] }]
"#,
        )
        .unwrap();
        match build(&config) {
            Err(Error::Configuration(msg)) => {
                assert!(msg.contains("side"), "{}", msg);
                assert!(msg.contains("delay"), "{}", msg);
            }
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_output_rejected() {
        let mut config = ProxyConfig::default();
        config.outputs.push(OutputConfig::default());
        assert!(matches!(build(&config), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_chain_file_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("chain.json"),
            r#"{"nodes": [
                {"type": "xyz.theforks.nodes.RenameNode", "enabled": true, "args": ["/a", "/a", "/b"]},
                {"type": "xyz.theforks.nodes.DropNode", "enabled": false, "args": ["/b"]}
            ]}"#,
        )
        .unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[[outputs]]
id = "default"
port = 3030
chain_file = "chain.json"
"#,
        )
        .unwrap();

        let config = ProxyConfig::load_from(&config_path).unwrap();
        let registry = build(&config).unwrap();
        let chain = registry.get("default").unwrap();
        assert_eq!(chain.chain().node_count(), 1);
        assert_eq!(chain.chain().get_nodes()[0].type_name(), "rename");
    }

    #[test]
    fn test_missing_chain_file_is_configuration_error() {
        let mut config = ProxyConfig::default();
        config.outputs[0].chain_file = Some(PathBuf::from("/nonexistent/chain.json"));
        assert!(matches!(build(&config), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_chain_file_plain_array_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.json");
        fs::write(&path, r#"[{"type": "pass", "args": ["/x"]}]"#).unwrap();
        let nodes = load_chain_file(&path).unwrap();
        assert!(nodes[0].enabled);

        let out = dir.path().join("saved/chain.json");
        save_chain_file(&out, &nodes).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(json["nodes"][0]["type"], "pass");
        assert_eq!(load_chain_file(&out).unwrap(), nodes);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = ProxyConfig::default();
        config.listen_port = 7100;
        config.data_dir = Some(dir.path().join("data"));
        config.save_to(&path).unwrap();

        let loaded = ProxyConfig::load_from(&path).unwrap();
        assert_eq!(loaded.listen_port, 7100);
        assert_eq!(loaded.data_dir(), dir.path().join("data"));
        assert_eq!(loaded.outputs, config.outputs);
    }
}
