//! Playback of recorded sessions.
//!
//! A [`PlaybackEngine`] replays one [`RecordingSession`] at a time on a
//! worker thread, reproducing the original gaps between messages. Each
//! message's wait is measured from the start of playback rather than from
//! the previous send, so processing time does not accumulate as drift.

use crate::error::{Error, Result};
use crate::message::OscMessage;
use crate::output::{OutputRegistry, SendOptions};
use crate::session::RecordingSession;
use crossbeam_channel::{bounded, select, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often the audio start gate re-checks for cancellation.
const AUDIO_POLL: Duration = Duration::from_millis(5);

/// Whether replayed messages go through the output chains again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    #[default]
    WithRewrite,
    /// Send recorded messages verbatim.
    WithoutRewrite,
}

/// Playback state changes pushed to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackUpdate {
    Started { total: usize },
    Progress(f64),
    Finished,
    Stopped,
}

/// Starts an audio asset alongside playback.
///
/// `start` returns a channel that yields once the media is actually
/// playing. Messages are held back until then.
pub trait AudioCue: Send + Sync {
    fn start(&self, path: &Path) -> Result<Receiver<()>>;
    fn stop(&self);
}

// ============================================================================
// Engine
// ============================================================================

struct Shared {
    registry: Arc<OutputRegistry>,
    audio: Option<Arc<dyn AudioCue>>,
    progress: AtomicU64,
    playing: AtomicBool,
    cancelled: AtomicBool,
    subscribers: Mutex<Vec<Sender<PlaybackUpdate>>>,
}

impl Shared {
    fn set_progress(&self, value: f64) {
        self.progress.store(value.to_bits(), Ordering::Relaxed);
    }

    fn notify(&self, update: PlaybackUpdate) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(update.clone()).is_ok());
    }
}

struct Run {
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

/// Replays sessions through an [`OutputRegistry`].
pub struct PlaybackEngine {
    shared: Arc<Shared>,
    mode: Mutex<PlaybackMode>,
    run: Mutex<Option<Run>>,
}

impl PlaybackEngine {
    pub fn new(registry: Arc<OutputRegistry>) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                audio: None,
                progress: AtomicU64::new(0f64.to_bits()),
                playing: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                subscribers: Mutex::new(Vec::new()),
            }),
            mode: Mutex::new(PlaybackMode::default()),
            run: Mutex::new(None),
        }
    }

    /// Attach an audio start gate. Only valid before the first `play`.
    pub fn with_audio(mut self, cue: Arc<dyn AudioCue>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.audio = Some(cue);
        }
        self
    }

    pub fn with_mode(self, mode: PlaybackMode) -> Self {
        self.set_mode(mode);
        self
    }

    pub fn set_mode(&self, mode: PlaybackMode) {
        *self.mode.lock() = mode;
    }

    pub fn mode(&self) -> PlaybackMode {
        *self.mode.lock()
    }

    /// Fraction of the session sent so far, `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        f64::from_bits(self.shared.progress.load(Ordering::Relaxed))
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Relaxed)
    }

    /// Receive every subsequent [`PlaybackUpdate`].
    pub fn subscribe(&self) -> Receiver<PlaybackUpdate> {
        let (tx, rx) = unbounded();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// Start replaying `session`.
    ///
    /// With `target_output` every message goes to that output only, even if
    /// it is disabled. Otherwise messages fan out to all enabled outputs.
    /// `audio` is started first and gates the first message. A run already
    /// in progress is stopped before the new one begins.
    pub fn play(
        &self,
        session: &RecordingSession,
        target_output: Option<String>,
        audio: Option<PathBuf>,
    ) -> Result<()> {
        if session.is_empty() {
            return Err(Error::Session(format!(
                "recording '{}' has no messages",
                session.name
            )));
        }
        if let Some(id) = &target_output {
            if self.shared.registry.get(id).is_none() {
                return Err(Error::Routing(format!("output '{}' not found", id)));
            }
        }
        let timeline = session
            .messages
            .iter()
            .map(|r| Ok((r.timestamp, r.to_message()?)))
            .collect::<Result<Vec<_>>>()?;

        self.stop();

        let shared = self.shared.clone();
        shared.cancelled.store(false, Ordering::Relaxed);
        shared.set_progress(0.0);
        shared.playing.store(true, Ordering::Relaxed);

        let (cancel, cancel_rx) = bounded(1);
        let mode = self.mode();
        log::info!(
            "[PLAYBACK] Playing '{}' ({} messages) to {}",
            session.name,
            timeline.len(),
            target_output.as_deref().unwrap_or("all enabled outputs")
        );
        let handle = thread::spawn(move || {
            let job = Job {
                timeline,
                target_output,
                mode,
                audio,
            };
            job.run(&shared, &cancel_rx);
        });
        *self.run.lock() = Some(Run { cancel, handle });
        Ok(())
    }

    /// Cancel the current run, if any, and halt its audio.
    ///
    /// Messages already handed to the delay queue still fire.
    pub fn stop(&self) {
        let run = self.run.lock().take();
        if let Some(run) = run {
            self.shared.cancelled.store(true, Ordering::Relaxed);
            let _ = run.cancel.try_send(());
            if let Some(cue) = &self.shared.audio {
                cue.stop();
            }
            let _ = run.handle.join();
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PlaybackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackEngine")
            .field("playing", &self.is_playing())
            .field("progress", &self.progress())
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Worker
// ============================================================================

struct Job {
    timeline: Vec<(i64, OscMessage)>,
    target_output: Option<String>,
    mode: PlaybackMode,
    audio: Option<PathBuf>,
}

impl Job {
    fn run(self, shared: &Shared, cancel: &Receiver<()>) {
        let total = self.timeline.len();
        shared.notify(PlaybackUpdate::Started { total });

        if let Some(path) = &self.audio {
            if !wait_for_audio(shared, path, cancel) {
                cancelled(shared);
                return;
            }
        }

        let first = self.timeline.first().map(|(t, _)| *t).unwrap_or_default();
        let started = Instant::now();
        for (i, (timestamp, message)) in self.timeline.iter().enumerate() {
            let offset = Duration::from_millis((timestamp - first).max(0) as u64);
            let wait = offset.saturating_sub(started.elapsed());
            if !wait.is_zero() {
                match cancel.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => {
                        cancelled(shared);
                        return;
                    }
                }
            }
            if shared.cancelled.load(Ordering::Relaxed) {
                cancelled(shared);
                return;
            }

            self.deliver(shared, message);

            let progress = (i + 1) as f64 / total as f64;
            shared.set_progress(progress);
            shared.notify(PlaybackUpdate::Progress(progress));
        }

        shared.set_progress(1.0);
        shared.playing.store(false, Ordering::Relaxed);
        shared.notify(PlaybackUpdate::Finished);
        log::info!("[PLAYBACK] Finished ({} messages)", total);
    }

    fn deliver(&self, shared: &Shared, message: &OscMessage) {
        let bypass_chain = self.mode == PlaybackMode::WithoutRewrite;
        let registry = &shared.registry;
        match &self.target_output {
            Some(id) => {
                let options = SendOptions {
                    bypass_enabled: true,
                    bypass_chain,
                };
                if let Err(e) = registry.send_to(id, message, options) {
                    log::debug!("[PLAYBACK] {}", e);
                }
            }
            None => {
                let options = SendOptions {
                    bypass_enabled: false,
                    bypass_chain,
                };
                for output in registry.all_enabled() {
                    output.send(message, options, registry.queue());
                }
            }
        }
    }
}

fn cancelled(shared: &Shared) {
    shared.set_progress(0.0);
    shared.playing.store(false, Ordering::Relaxed);
    shared.notify(PlaybackUpdate::Stopped);
    log::info!("[PLAYBACK] Stopped");
}

/// Start the audio asset and wait until it reports playing.
///
/// # Returns
/// `false` if playback was cancelled while waiting. A missing asset, a
/// missing cue or a cue failure all let playback proceed.
fn wait_for_audio(shared: &Shared, path: &Path, cancel: &Receiver<()>) -> bool {
    let Some(cue) = &shared.audio else {
        log::debug!("[PLAYBACK] No audio cue configured, ignoring {}", path.display());
        return true;
    };
    if !path.exists() {
        log::warn!("[PLAYBACK] Audio file {} not found, starting without it", path.display());
        return true;
    }
    let ready = match cue.start(path) {
        Ok(ready) => ready,
        Err(e) => {
            log::warn!("[PLAYBACK] Could not start audio: {}", e);
            return true;
        }
    };
    loop {
        if shared.cancelled.load(Ordering::Relaxed) {
            return false;
        }
        select! {
            recv(ready) -> signal => {
                if signal.is_err() {
                    log::warn!("[PLAYBACK] Audio cue closed before it started playing");
                }
                return true;
            }
            recv(cancel) -> _ => return false,
            default(AUDIO_POLL) => {}
        }
    }
}
