//! oscplay CLI - The `oscplay` command.
//!
//! Runs the OSC proxy, records and replays sessions, and sends test
//! messages. All the work happens in **oscplay-core**; this binary wires a
//! configuration file to it and handles Ctrl-C.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use oscplay_core::{
    available_nodes, ChannelTraceSink, DelayQueue, DelayScheduler, LogTraceSink, OscClient,
    OscMessage, OscValue, OutputRegistry, PlaybackEngine, PlaybackMode, PlaybackUpdate,
    ProxyConfig, ProxyServer, Recorder, SessionStore, TraceSink, Transport,
};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How often blocking loops re-check the Ctrl-C flag.
const TICK: Duration = Duration::from_millis(100);

/// Longest wait for delayed messages after playback ends.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// oscplay - OSC proxy, rewrite, record and replay
#[derive(Parser, Debug)]
#[command(name = "oscplay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "OSC proxy with per-output rewriting, recording and playback", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default: platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for recordings and audio (overrides the config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print every scheduling and dispatch decision
    #[arg(long, global = true)]
    trace: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Forward inbound OSC to every enabled output until Ctrl-C
    Proxy {
        /// Port to listen on (overrides the config file)
        #[arg(short = 'p', long)]
        listen_port: Option<u16>,

        /// Record the session under this name while proxying
        #[arg(short, long, value_name = "NAME")]
        record: Option<String>,
    },

    /// Proxy and record a session, saved on Ctrl-C
    Record {
        /// Session name
        #[arg(value_name = "NAME")]
        name: String,

        /// Port to listen on (overrides the config file)
        #[arg(short = 'p', long)]
        listen_port: Option<u16>,
    },

    /// Replay a recorded session
    Play {
        /// Session name
        #[arg(value_name = "NAME")]
        name: String,

        /// Send only to this output, even if it is disabled
        #[arg(short, long, value_name = "ID")]
        output: Option<String>,

        /// Send recorded messages without running the node chains
        #[arg(long)]
        without_rewrite: bool,

        /// Run the timeline without touching the network
        #[arg(long)]
        dry_run: bool,
    },

    /// List recorded sessions
    Sessions,

    /// List available node types
    Nodes,

    /// Send a test message
    Send {
        /// OSC address, e.g. /fader/1
        #[arg(value_name = "ADDRESS")]
        address: String,

        /// Arguments: integers, floats, anything else is a string
        #[arg(value_name = "ARGS", allow_negative_numbers = true)]
        args: Vec<String>,

        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Destination port (default: the proxy's listen port)
        #[arg(long)]
        port: Option<u16>,

        /// Number of times to send
        #[arg(long, default_value = "1")]
        repeat: u32,

        /// Pause between repeats
        #[arg(long, default_value = "100")]
        interval_ms: u64,
    },

    /// Create a default configuration file
    Init,

    /// Show the configuration file path
    ConfigPath,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match args.command {
        Commands::Init => {
            let path = ProxyConfig::create_default_config_file()?;
            println!("Created default config at: {}", path.display());
            Ok(())
        }
        Commands::ConfigPath => {
            let path = ProxyConfig::config_path()?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Nodes => {
            list_nodes();
            Ok(())
        }
        Commands::Sessions => {
            let config = load_config(args.config.as_deref(), args.data_dir)?;
            list_sessions(&SessionStore::new(config.data_dir()))
        }
        Commands::Send {
            address,
            args: values,
            host,
            port,
            repeat,
            interval_ms,
        } => {
            let config = load_config(args.config.as_deref(), args.data_dir)?;
            let port = port.unwrap_or(config.listen_port);
            send_test_message(&address, &values, &host, port, repeat, interval_ms)
        }
        Commands::Proxy {
            listen_port,
            record,
        } => {
            let config = load_config(args.config.as_deref(), args.data_dir)?;
            run_proxy(config, listen_port, record, args.trace)
        }
        Commands::Record { name, listen_port } => {
            let config = load_config(args.config.as_deref(), args.data_dir)?;
            run_proxy(config, listen_port, Some(name), args.trace)
        }
        Commands::Play {
            name,
            output,
            without_rewrite,
            dry_run,
        } => {
            let mut config = load_config(args.config.as_deref(), args.data_dir)?;
            if without_rewrite {
                config.playback_mode = PlaybackMode::WithoutRewrite;
            }
            run_playback(config, &name, output, dry_run, args.trace)
        }
    }
}

fn load_config(path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<ProxyConfig> {
    let mut config = match path {
        Some(path) => ProxyConfig::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ProxyConfig::load_or_default(),
    };
    if data_dir.is_some() {
        config.data_dir = data_dir;
    }
    Ok(config)
}

/// Flag raised by SIGINT or SIGTERM.
fn shutdown_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, flag.clone()).context("Failed to register SIGINT")?;
    signal_hook::flag::register(SIGTERM, flag.clone()).context("Failed to register SIGTERM")?;
    Ok(flag)
}

fn tracer(print: bool) -> Arc<dyn TraceSink> {
    if !print {
        return Arc::new(LogTraceSink);
    }
    let (sink, events) = ChannelTraceSink::new();
    thread::spawn(move || {
        for event in events {
            println!("  {}", event);
        }
    });
    Arc::new(sink)
}

/// Outputs plus a running delay scheduler.
fn start_routing(
    config: &ProxyConfig,
    transport: Arc<dyn Transport>,
    trace: bool,
) -> Result<(Arc<OutputRegistry>, DelayScheduler)> {
    let queue = Arc::new(DelayQueue::with_tracer(tracer(trace)));
    let registry = config
        .build_registry(transport, queue)
        .context("Failed to build outputs")?;
    let scheduler = DelayScheduler::new(registry.clone());
    scheduler.start();
    Ok((registry, scheduler))
}

fn run_proxy(
    config: ProxyConfig,
    listen_port: Option<u16>,
    record: Option<String>,
    trace: bool,
) -> Result<()> {
    let shutdown = shutdown_flag()?;
    let client = OscClient::new().context("Failed to open OSC client socket")?;
    let (registry, scheduler) = start_routing(&config, Arc::new(client), trace)?;

    let recorder = record.map(|name| {
        let recorder = Arc::new(Recorder::new());
        recorder.start(name);
        recorder
    });

    let port = listen_port.unwrap_or(config.listen_port);
    let server = ProxyServer::bind(
        &config.listen_host,
        port,
        registry.clone(),
        recorder.clone(),
        config.recording_mode,
    )
    .with_context(|| format!("Failed to listen on {}:{}", config.listen_host, port))?;

    for output in registry.all() {
        log::info!(
            "  {} -> {}:{} [{}] ({} node(s))",
            output.id(),
            output.host(),
            output.port(),
            if output.is_enabled() { "on" } else { "off" },
            output.chain().node_count()
        );
    }
    log::info!("Proxy running (Press Ctrl+C to exit)");

    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(TICK);
    }

    log::info!("Interrupted, shutting down...");
    server.stop();
    scheduler.stop();

    if let Some(session) = recorder.and_then(|r| r.stop()) {
        if session.is_empty() {
            log::warn!("Nothing was recorded, not saving '{}'", session.name);
        } else {
            let store = SessionStore::new(config.data_dir());
            let path = store.save(&session).context("Failed to save recording")?;
            println!("Saved {} messages to {}", session.len(), path.display());
        }
    }
    Ok(())
}

fn run_playback(
    config: ProxyConfig,
    name: &str,
    output: Option<String>,
    dry_run: bool,
    trace: bool,
) -> Result<()> {
    let store = SessionStore::new(config.data_dir());
    let session = store
        .load(name)
        .with_context(|| format!("Failed to load session '{}'", name))?;
    let audio = store
        .load_settings(name)?
        .and_then(|settings| store.audio_path(&settings));

    let shutdown = shutdown_flag()?;
    let transport: Arc<dyn Transport> = if dry_run {
        Arc::new(OscClient::noop())
    } else {
        Arc::new(OscClient::new().context("Failed to open OSC client socket")?)
    };
    let (registry, scheduler) = start_routing(&config, transport, trace)?;

    let engine = PlaybackEngine::new(registry.clone()).with_mode(config.playback_mode);
    let updates = engine.subscribe();
    engine.play(&session, output, audio)?;

    let mut finished = false;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            log::info!("Interrupted, stopping playback");
            engine.stop();
            break;
        }
        match updates.recv_timeout(TICK) {
            Ok(PlaybackUpdate::Started { total }) => {
                println!("Playing '{}' ({} messages)", session.name, total)
            }
            Ok(PlaybackUpdate::Progress(p)) => log::debug!("Progress {:.0}%", p * 100.0),
            Ok(PlaybackUpdate::Finished) => {
                finished = true;
                break;
            }
            Ok(PlaybackUpdate::Stopped) => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => bail!("Playback ended unexpectedly"),
        }
    }

    if finished {
        // Let messages still sitting in the delay queue go out.
        let queue = registry.queue();
        let mut waited = Duration::ZERO;
        while !queue.is_empty() && !shutdown.load(Ordering::Relaxed) && waited < DRAIN_TIMEOUT {
            thread::sleep(Duration::from_millis(10));
            waited += Duration::from_millis(10);
        }
        println!("Done");
    }
    scheduler.stop();
    Ok(())
}

fn list_sessions(store: &SessionStore) -> Result<()> {
    let names = store.list()?;
    if names.is_empty() {
        println!("No recordings in {}", store.recordings_dir().display());
        return Ok(());
    }
    for name in names {
        match store.load(&name) {
            Ok(session) => println!(
                "  {:<24} {:>6} messages  {:>8.1}s",
                name,
                session.len(),
                session.duration_ms() as f64 / 1000.0
            ),
            Err(e) => println!("  {:<24} ({})", name, e),
        }
    }
    Ok(())
}

fn list_nodes() {
    for info in available_nodes() {
        println!("{} ({})", info.type_name, info.label);
        if !info.arg_names.is_empty() {
            println!("    args: {}", info.arg_names.join(", "));
        }
        println!("    {}", info.help);
    }
}

fn parse_arg(value: &str) -> OscValue {
    if let Ok(i) = value.parse::<i32>() {
        OscValue::Int32(i)
    } else if let Ok(f) = value.parse::<f32>() {
        OscValue::Float32(f)
    } else {
        OscValue::Str(value.to_string())
    }
}

fn send_test_message(
    address: &str,
    values: &[String],
    host: &str,
    port: u16,
    repeat: u32,
    interval_ms: u64,
) -> Result<()> {
    if !address.starts_with('/') {
        bail!("OSC addresses start with '/': {}", address);
    }
    let client = OscClient::new().context("Failed to open OSC client socket")?;
    let message = OscMessage::new(address, values.iter().map(|v| parse_arg(v)).collect());
    for i in 0..repeat {
        if i > 0 {
            thread::sleep(Duration::from_millis(interval_ms));
        }
        client
            .send(host, port, &message)
            .with_context(|| format!("Failed to send to {}:{}", host, port))?;
        println!("-> {}:{} {}", host, port, message);
    }
    Ok(())
}
