//! Delay scheduler.
//!
//! Delayed requests from both the proxy and playback paths end up in one
//! [`DelayQueue`], a min-heap ordered by due time with FIFO tie-breaking.
//! A single [`DelayScheduler`] worker pops due entries and re-runs them
//! through the target output's chain with `previous_delay_ms` set, so a
//! delay node does not fire twice for the same message.
//!
//! The worker polls every millisecond rather than sleeping until the next
//! due time, which keeps dispatch latency low when new, earlier entries are
//! pushed while it waits.

use crate::message::{MessageRequest, OscMessage};
use crate::output::OutputRegistry;
use crate::trace::{LogTraceSink, TraceEvent, TraceSink};
use parking_lot::Mutex;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Poll interval of the dispatch worker.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

// ============================================================================
// Scheduled messages
// ============================================================================

/// A message waiting in the delay queue.
#[derive(Debug, Clone)]
pub struct ScheduledMessage {
    pub record: OscMessage,
    pub due_at: Instant,
    /// `None` fans out to every enabled output on dispatch.
    pub target_output: Option<String>,
    /// The delay that put this message in the queue.
    pub previous_delay_ms: u64,
    seq: u64,
}

impl PartialEq for ScheduledMessage {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for ScheduledMessage {}

impl PartialOrd for ScheduledMessage {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledMessage {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.due_at
            .cmp(&other.due_at)
            .then(self.seq.cmp(&other.seq))
    }
}

// ============================================================================
// Queue
// ============================================================================

/// Time-ordered queue shared by every producer of delayed messages.
///
/// Also carries the trace sink so outputs and the scheduler report
/// through the same channel.
pub struct DelayQueue {
    heap: Mutex<BinaryHeap<Reverse<ScheduledMessage>>>,
    seq: AtomicU64,
    running: AtomicBool,
    tracer: Arc<dyn TraceSink>,
}

impl DelayQueue {
    pub fn new() -> Self {
        Self::with_tracer(Arc::new(LogTraceSink))
    }

    pub fn with_tracer(tracer: Arc<dyn TraceSink>) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            running: AtomicBool::new(false),
            tracer,
        }
    }

    /// Queue `request` for delivery after `request.delay_ms`.
    ///
    /// The target is the request's own target if set, otherwise
    /// `fallback_output`. Requests are refused while no scheduler is running.
    ///
    /// # Returns
    /// `true` if the request was queued.
    pub fn schedule(&self, request: MessageRequest, fallback_output: Option<&str>) -> bool {
        if !self.is_running() {
            log::warn!(
                "[SCHEDULER] Not running, dropping delayed {}",
                request.message.address()
            );
            self.tracer.trace(TraceEvent::Dropped {
                address: request.message.address().to_string(),
                reason: "scheduler not running".to_string(),
            });
            return false;
        }

        let target_output = request
            .target_output
            .or_else(|| fallback_output.map(str::to_string));
        self.tracer.trace(TraceEvent::Scheduled {
            address: request.message.address().to_string(),
            output: target_output.clone(),
            delay_ms: request.delay_ms,
        });
        let scheduled = ScheduledMessage {
            due_at: Instant::now() + Duration::from_millis(request.delay_ms),
            previous_delay_ms: request.delay_ms,
            record: request.message,
            target_output,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        self.heap.lock().push(Reverse(scheduled));
        true
    }

    /// Pop the earliest entry if it is due at `now`.
    pub fn pop_due(&self, now: Instant) -> Option<ScheduledMessage> {
        let mut heap = self.heap.lock();
        match heap.peek() {
            Some(Reverse(next)) if next.due_at <= now => heap.pop().map(|Reverse(m)| m),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Discard every pending entry, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut heap = self.heap.lock();
        let dropped = heap.len();
        heap.clear();
        dropped
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    pub fn tracer(&self) -> &Arc<dyn TraceSink> {
        &self.tracer
    }
}

impl Default for DelayQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DelayQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayQueue")
            .field("pending", &self.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Worker
// ============================================================================

struct Worker {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Background dispatcher for the delay queue.
pub struct DelayScheduler {
    registry: Arc<OutputRegistry>,
    worker: Mutex<Option<Worker>>,
}

impl DelayScheduler {
    /// Create a scheduler draining the registry's delay queue.
    pub fn new(registry: Arc<OutputRegistry>) -> Self {
        Self {
            registry,
            worker: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &Arc<DelayQueue> {
        self.registry.queue()
    }

    /// Start the dispatch worker. Does nothing if already running.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let registry = self.registry.clone();
        let flag = shutdown.clone();
        self.registry.queue().set_running(true);
        let handle = thread::spawn(move || run(registry, flag));
        *worker = Some(Worker { shutdown, handle });
        log::info!("[SCHEDULER] Started");
    }

    /// Stop the worker and discard everything still queued.
    /// Does nothing if not running.
    pub fn stop(&self) {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return;
        };
        let queue = self.registry.queue();
        queue.set_running(false);
        worker.shutdown.store(true, Ordering::Relaxed);
        let _ = worker.handle.join();
        let dropped = queue.clear();
        log::info!("[SCHEDULER] Stopped ({} pending message(s) discarded)", dropped);
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }
}

impl Drop for DelayScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for DelayScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayScheduler")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn run(registry: Arc<OutputRegistry>, shutdown: Arc<AtomicBool>) {
    let queue = registry.queue().clone();
    while !shutdown.load(Ordering::Relaxed) {
        match queue.pop_due(Instant::now()) {
            Some(scheduled) => dispatch(&registry, &queue, scheduled),
            None => thread::sleep(POLL_INTERVAL),
        }
    }
}

/// Deliver one due message.
///
/// An explicit target wins over the output's enabled flag. Without a
/// target the message fans out to every enabled output. Either way the
/// output re-runs its chain with `previous_delay_ms` and any further delay
/// is queued again.
fn dispatch(registry: &OutputRegistry, queue: &DelayQueue, scheduled: ScheduledMessage) {
    let address = scheduled.record.address().to_string();
    queue.tracer().trace(TraceEvent::Dispatched {
        address: address.clone(),
        output: scheduled.target_output.clone(),
        previous_delay_ms: scheduled.previous_delay_ms,
    });

    match &scheduled.target_output {
        Some(id) => match registry.get(id) {
            Some(output) => {
                output.deliver_delayed(&scheduled.record, scheduled.previous_delay_ms, queue)
            }
            None => {
                log::warn!(
                    "[SCHEDULER] Output '{}' not found, dropping {}",
                    id,
                    address
                );
                queue.tracer().trace(TraceEvent::Dropped {
                    address,
                    reason: format!("output '{}' not found", id),
                });
            }
        },
        None => {
            for output in registry.all_enabled() {
                output.deliver_delayed(&scheduled.record, scheduled.previous_delay_ms, queue);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::build_node;
    use crate::osc::testing::RecordingTransport;
    use crate::output::{Output, SendOptions};
    use crate::trace::ChannelTraceSink;

    fn msg(address: &str) -> OscMessage {
        OscMessage::new(address, vec![])
    }

    fn setup() -> (Arc<RecordingTransport>, Arc<OutputRegistry>, DelayScheduler) {
        let transport = RecordingTransport::new();
        let registry = Arc::new(OutputRegistry::new(
            transport.clone(),
            Arc::new(DelayQueue::new()),
        ));
        let scheduler = DelayScheduler::new(registry.clone());
        (transport, registry, scheduler)
    }

    fn wait_for(transport: &RecordingTransport, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while transport.sent().len() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_heap_orders_by_due_then_fifo() {
        let queue = DelayQueue::new();
        queue.set_running(true);
        queue.schedule(MessageRequest::new(msg("/late")).with_delay(30), None);
        queue.schedule(MessageRequest::new(msg("/early-a")), None);
        queue.schedule(MessageRequest::new(msg("/early-b")), None);

        let far = Instant::now() + Duration::from_secs(1);
        let order: Vec<_> = std::iter::from_fn(|| queue.pop_due(far))
            .map(|m| m.record.address().to_string())
            .collect();
        assert_eq!(order, vec!["/early-a", "/early-b", "/late"]);
    }

    #[test]
    fn test_pop_due_waits_for_due_time() {
        let queue = DelayQueue::new();
        queue.set_running(true);
        queue.schedule(MessageRequest::new(msg("/a")).with_delay(500), Some("x"));
        assert!(queue.pop_due(Instant::now()).is_none());
        let m = queue
            .pop_due(Instant::now() + Duration::from_millis(600))
            .unwrap();
        assert_eq!(m.target_output.as_deref(), Some("x"));
        assert_eq!(m.previous_delay_ms, 500);
    }

    #[test]
    fn test_schedule_refused_when_stopped() {
        let (sink, rx) = ChannelTraceSink::new();
        let queue = DelayQueue::with_tracer(Arc::new(sink));
        assert!(!queue.schedule(MessageRequest::new(msg("/a")).with_delay(5), None));
        assert!(queue.is_empty());
        assert!(matches!(rx.try_recv(), Ok(TraceEvent::Dropped { .. })));
    }

    #[test]
    fn test_request_target_wins_over_fallback() {
        let queue = DelayQueue::new();
        queue.set_running(true);
        queue.schedule(
            MessageRequest::new(msg("/a")).with_target("side"),
            Some("default"),
        );
        let m = queue.pop_due(Instant::now() + Duration::from_secs(1)).unwrap();
        assert_eq!(m.target_output.as_deref(), Some("side"));
    }

    #[test]
    fn test_dispatch_order_independent_of_enqueue_order() {
        let (transport, registry, scheduler) = setup();
        scheduler.start();
        let queue = registry.queue();
        queue.schedule(MessageRequest::new(msg("/second")).with_delay(60), Some("default"));
        queue.schedule(MessageRequest::new(msg("/first")).with_delay(20), Some("default"));
        wait_for(&transport, 2);
        assert_eq!(transport.addresses(), vec!["/first", "/second"]);
    }

    #[test]
    fn test_delay_chain_not_applied_twice() {
        let (transport, registry, scheduler) = setup();
        let default = registry.get("default").unwrap();
        default
            .chain()
            .register_node(build_node("delay", &["/cue".to_string(), "30".to_string()]).unwrap());
        scheduler.start();

        let started = Instant::now();
        default.send(&msg("/cue"), SendOptions::default(), registry.queue());
        assert!(transport.sent().is_empty());
        wait_for(&transport, 1);
        thread::sleep(Duration::from_millis(80));

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        let elapsed = sent[0].at.duration_since(started);
        assert!(elapsed >= Duration::from_millis(30));
        assert!(elapsed < Duration::from_millis(200), "took {:?}", elapsed);
    }

    #[test]
    fn test_explicit_target_bypasses_enabled() {
        let (transport, registry, scheduler) = setup();
        registry.get("default").unwrap().set_enabled(false);
        scheduler.start();
        registry
            .queue()
            .schedule(MessageRequest::new(msg("/a")).with_delay(1), Some("default"));
        wait_for(&transport, 1);
        assert_eq!(transport.addresses(), vec!["/a"]);
    }

    #[test]
    fn test_untargeted_fans_out_to_enabled_outputs() {
        let (transport, registry, scheduler) = setup();
        registry.add(Output::new("side", "127.0.0.1", 4000));
        registry.add(Output::new("off", "127.0.0.1", 5000));
        registry.get("off").unwrap().set_enabled(false);
        scheduler.start();
        registry
            .queue()
            .schedule(MessageRequest::new(msg("/a")).with_delay(1), None);
        wait_for(&transport, 2);
        thread::sleep(Duration::from_millis(20));
        let mut ports: Vec<_> = transport.sent().iter().map(|s| s.port).collect();
        ports.sort();
        assert_eq!(ports, vec![3030, 4000]);
    }

    #[test]
    fn test_removed_output_drops_scheduled_send() {
        let (sink, rx) = ChannelTraceSink::new();
        let transport = RecordingTransport::new();
        let registry = Arc::new(OutputRegistry::new(
            transport.clone(),
            Arc::new(DelayQueue::with_tracer(Arc::new(sink))),
        ));
        registry.add(Output::new("side", "127.0.0.1", 4000));
        let scheduler = DelayScheduler::new(registry.clone());
        scheduler.start();

        registry
            .queue()
            .schedule(MessageRequest::new(msg("/a")).with_delay(20), Some("side"));
        assert!(registry.remove("side"));
        thread::sleep(Duration::from_millis(80));

        assert!(transport.sent().is_empty());
        let dropped = rx
            .try_iter()
            .any(|e| matches!(e, TraceEvent::Dropped { ref reason, .. } if reason.contains("side")));
        assert!(dropped);
    }

    #[test]
    fn test_stop_discards_pending_and_is_idempotent() {
        let (transport, registry, scheduler) = setup();
        scheduler.start();
        scheduler.start();
        registry
            .queue()
            .schedule(MessageRequest::new(msg("/later")).with_delay(10_000), Some("default"));
        assert_eq!(registry.queue().len(), 1);
        scheduler.stop();
        scheduler.stop();
        assert!(registry.queue().is_empty());
        assert!(!scheduler.is_running());
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_chained_delays_requeue() {
        use std::io::Write;
        let mut script = tempfile::Builder::new().suffix(".rhai").tempfile().unwrap();
        script
            .write_all(
                br#"
                fn process(msg) {
                    if msg.address == "/b" {
                        return create_request(create_message("/c", []), 10);
                    }
                    msg
                }
                "#,
            )
            .unwrap();
        let args = |a: &[&str]| a.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let (transport, registry, scheduler) = setup();
        let default = registry.get("default").unwrap();
        let path = script.path().to_str().unwrap();
        default
            .chain()
            .register_node(build_node("script", &args(&[".*", path])).unwrap());
        default
            .chain()
            .register_node(build_node("delay", &args(&["/a", "10"])).unwrap());
        default
            .chain()
            .register_node(build_node("rename", &args(&["/a", "/a", "/b"])).unwrap());
        scheduler.start();

        let started = Instant::now();
        default.send(&msg("/a"), SendOptions::default(), registry.queue());
        wait_for(&transport, 1);
        thread::sleep(Duration::from_millis(30));

        let sent = transport.sent();
        assert_eq!(transport.addresses(), vec!["/c"]);
        assert!(sent[0].at.duration_since(started) >= Duration::from_millis(20));
    }
}
