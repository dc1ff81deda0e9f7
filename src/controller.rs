//! Session tracking and timed measurement over the packet stream.
//!
//! Two independent concerns share the buffer's packet feed:
//! - **Session tracking** (continuous): counts distinct messages while the
//!   declared sampling interval stays unchanged. A packet declaring a new
//!   interval means the device has applied a new configuration, so prior
//!   counts are no longer comparable and the session restarts at 1. There
//!   is no other way to learn *when* the device switched rates than seeing
//!   it in the stream.
//! - **Measurement window** (one-shot): an exact wall-clock-bounded count
//!   of distinct messages. The deadline is an absolute timestamp checked
//!   periodically, so the window's real duration never drifts with tick
//!   granularity or missed ticks.
//!
//! Both only ever compare against the buffer's current head (the most
//! recent arrival); mid-buffer packets are not independently diffed.
//! Latency derivation is stateless and recomputed from the full snapshot.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::errors::{StreamError, StreamResult};
use crate::ingest::IngestClient;
use crate::models::{Packet, DEFAULT_READ_INTERVAL};

// ---

/// Continuous per-session message counting.
///
/// Invariant: while the declared interval is unchanged, the count grows by
/// exactly 1 per distinct `msg_id` observed at the head, never for a
/// repeated one. Identity, not content, decides: a re-delivered `msg_id`
/// is a no-op even if its payload differs.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    // ---
    current_interval: f64,
    session_count: u64,
    session_start: DateTime<Utc>,
    last_seen_msg_id: Option<u64>,
}

impl SessionTracker {
    pub fn new(now: DateTime<Utc>) -> Self {
        SessionTracker {
            current_interval: DEFAULT_READ_INTERVAL,
            session_count: 0,
            session_start: now,
            last_seen_msg_id: None,
        }
    }

    /// Feed the current buffer head into the tracker.
    ///
    /// Returns `true` when the packet started a fresh session.
    pub fn observe(&mut self, head: &Packet, now: DateTime<Utc>) -> bool {
        // ---
        let declared = head.declared_interval();

        if declared != self.current_interval {
            info!(
                "New scenario detected: interval {} -> {}, resetting session",
                self.current_interval, declared
            );
            self.current_interval = declared;
            self.session_count = 1;
            self.session_start = now;
            self.last_seen_msg_id = Some(head.msg_id);
            return true;
        }

        if self.last_seen_msg_id != Some(head.msg_id) {
            self.session_count += 1;
            self.last_seen_msg_id = Some(head.msg_id);
        }
        false
    }

    /// Zero the counters (user reset).
    ///
    /// The tracked interval and dedup cursor are left as-is: the device
    /// keeps streaming at its old rate until it picks up the restored
    /// default, and that change restarts the session on its own. Resetting
    /// the interval here would fire one extra reset in between.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        // ---
        self.session_count = 0;
        self.session_start = now;
    }

    pub fn current_interval(&self) -> f64 {
        self.current_interval
    }

    pub fn session_count(&self) -> u64 {
        self.session_count
    }

    pub fn session_start(&self) -> DateTime<Utc> {
        self.session_start
    }
}

// ---

/// Lifecycle phase of the measurement window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPhase {
    Inactive,
    Running,
    Completed,
}

/// One-shot, time-boxed counting run.
///
/// At most one run is active at a time; `start` while running is rejected
/// with no state mutation. After completion the frozen result stays
/// readable until the window is re-armed by the next `start`.
#[derive(Debug, Clone)]
pub struct MeasurementWindow {
    // ---
    phase: WindowPhase,
    deadline_ms: i64,
    running_count: u64,
    last_seen_msg_id: Option<u64>,
    result: Option<u64>,
}

impl MeasurementWindow {
    pub fn new() -> Self {
        MeasurementWindow {
            phase: WindowPhase::Inactive,
            deadline_ms: 0,
            running_count: 0,
            last_seen_msg_id: None,
            result: None,
        }
    }

    /// Arm the window: deadline = now + duration, counters cleared.
    ///
    /// `head_msg_id` seeds the dedup cursor so a packet already buffered at
    /// T=0 is not counted. Returns the absolute deadline, or
    /// [`StreamError::WindowActive`] if a run is in progress.
    pub fn start(
        &mut self,
        now_ms: i64,
        duration_ms: i64,
        head_msg_id: Option<u64>,
    ) -> StreamResult<i64> {
        // ---
        if self.phase == WindowPhase::Running {
            return Err(StreamError::WindowActive);
        }

        self.phase = WindowPhase::Running;
        self.deadline_ms = now_ms + duration_ms;
        self.running_count = 0;
        self.last_seen_msg_id = head_msg_id;
        self.result = None;
        Ok(self.deadline_ms)
    }

    /// Count a head `msg_id`; repeated ids and non-running phases are no-ops.
    pub fn observe(&mut self, msg_id: u64) {
        // ---
        if self.phase != WindowPhase::Running {
            return;
        }
        if self.last_seen_msg_id != Some(msg_id) {
            self.running_count += 1;
            self.last_seen_msg_id = Some(msg_id);
        }
    }

    /// Periodic deadline check.
    ///
    /// The first call with `now_ms >= deadline` freezes the result and
    /// returns it; every later call returns `None` again, so completion is
    /// reported exactly once.
    pub fn check(&mut self, now_ms: i64) -> Option<u64> {
        // ---
        if self.phase != WindowPhase::Running || now_ms < self.deadline_ms {
            return None;
        }
        self.phase = WindowPhase::Completed;
        self.result = Some(self.running_count);
        self.result
    }

    /// Whole seconds left until the deadline, rounded up, never negative.
    pub fn remaining_secs(&self, now_ms: i64) -> i64 {
        // ---
        if self.phase != WindowPhase::Running {
            return 0;
        }
        ((self.deadline_ms - now_ms).max(0) + 999) / 1000
    }

    pub fn phase(&self) -> WindowPhase {
        self.phase
    }

    pub fn running_count(&self) -> u64 {
        self.running_count
    }

    pub fn result(&self) -> Option<u64> {
        self.result
    }
}

impl Default for MeasurementWindow {
    fn default() -> Self {
        MeasurementWindow::new()
    }
}

// ---

/// Inter-arrival deltas of a newest-first snapshot, oldest interval first.
///
/// `diffs[i] = p[i].timestamp - p[i+1].timestamp` over the newest-first
/// sequence, reversed for presentation. Needs at least two packets.
pub fn inter_arrival_latencies(newest_first: &[Packet]) -> Vec<i64> {
    // ---
    if newest_first.len() < 2 {
        return Vec::new();
    }

    let mut diffs: Vec<i64> = newest_first
        .windows(2)
        .map(|pair| pair[0].timestamp - pair[1].timestamp)
        .collect();
    diffs.reverse();
    diffs
}

/// Arithmetic mean rounded to the nearest millisecond; 0 when empty.
pub fn average_latency(latencies: &[i64]) -> i64 {
    // ---
    if latencies.is_empty() {
        return 0;
    }
    let sum: i64 = latencies.iter().sum();
    (sum as f64 / latencies.len() as f64).round() as i64
}

// ---

/// Shared mutable evaluation state, locked by the controller task and the
/// route handlers that start/reset runs.
#[derive(Debug)]
pub struct EvalState {
    pub session: SessionTracker,
    pub window: MeasurementWindow,
}

impl EvalState {
    pub fn new(now: DateTime<Utc>) -> Self {
        EvalState {
            session: SessionTracker::new(now),
            window: MeasurementWindow::new(),
        }
    }
}

/// Measurement window state as served to observers.
#[derive(Debug, Clone, Serialize)]
pub struct WindowReport {
    pub phase: WindowPhase,
    pub remaining_secs: i64,
    pub running_count: u64,
    pub result: Option<u64>,
}

/// Everything the stream side derives, published after every buffer change
/// and every tick.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    // ---
    pub connected: bool,
    pub buffered: usize,
    pub session_count: u64,
    pub current_interval: f64,
    pub session_start: DateTime<Utc>,
    /// Oldest interval first, empty below two packets.
    pub latencies_ms: Vec<i64>,
    pub avg_latency_ms: i64,
    /// Reference line: the declared interval in milliseconds.
    pub expected_interval_ms: i64,
    pub window: WindowReport,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        MetricsSnapshot {
            connected: false,
            buffered: 0,
            session_count: 0,
            current_interval: DEFAULT_READ_INTERVAL,
            session_start: Utc::now(),
            latencies_ms: Vec::new(),
            avg_latency_ms: 0,
            expected_interval_ms: (DEFAULT_READ_INTERVAL * 1000.0) as i64,
            window: WindowReport {
                phase: WindowPhase::Inactive,
                remaining_secs: 0,
                running_count: 0,
                result: None,
            },
        }
    }
}

// ---

/// Spawn the controller task.
///
/// The task multiplexes two delivery sources and nothing else mutates the
/// evaluation state in between: buffer-change notifications drive session
/// and window counting, the periodic tick drives the deadline check. Each
/// event recomputes and publishes a fresh [`MetricsSnapshot`].
pub fn spawn(
    ingest: Arc<IngestClient>,
    state: Arc<Mutex<EvalState>>,
    metrics: watch::Sender<MetricsSnapshot>,
    tick_interval_ms: u64,
) -> JoinHandle<()> {
    // ---
    let mut changes = ingest.subscribe_changes();

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(tick_interval_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        // Ingestion client torn down; stop deriving.
                        info!("Controller stopped: packet stream gone");
                        return;
                    }
                    on_buffer_change(&ingest, &state, &metrics);
                }
                _ = tick.tick() => {
                    on_tick(&ingest, &state, &metrics);
                }
            }
        }
    })
}

fn on_buffer_change(
    ingest: &IngestClient,
    state: &Mutex<EvalState>,
    metrics: &watch::Sender<MetricsSnapshot>,
) {
    // ---
    let now = Utc::now();
    let snapshot = ingest.snapshot();

    let mut st = state.lock();
    if let Some(head) = snapshot.first() {
        st.session.observe(head, now);
        st.window.observe(head.msg_id);
    }
    publish(ingest, &st, &snapshot, now, metrics);
}

fn on_tick(
    ingest: &IngestClient,
    state: &Mutex<EvalState>,
    metrics: &watch::Sender<MetricsSnapshot>,
) {
    // ---
    let now = Utc::now();

    let mut st = state.lock();
    if let Some(result) = st.window.check(now.timestamp_millis()) {
        info!("Measurement window complete: {} messages", result);
    }
    publish(ingest, &st, &ingest.snapshot(), now, metrics);
}

fn publish(
    ingest: &IngestClient,
    st: &EvalState,
    snapshot: &[Packet],
    now: DateTime<Utc>,
    metrics: &watch::Sender<MetricsSnapshot>,
) {
    // ---
    let now_ms = now.timestamp_millis();
    let latencies = inter_arrival_latencies(snapshot);
    let avg = average_latency(&latencies);
    debug!(
        "Publishing metrics: {} buffered, session {}, avg latency {}ms",
        snapshot.len(),
        st.session.session_count(),
        avg
    );

    let _ = metrics.send(MetricsSnapshot {
        connected: ingest.connected(),
        buffered: snapshot.len(),
        session_count: st.session.session_count(),
        current_interval: st.session.current_interval(),
        session_start: st.session.session_start(),
        avg_latency_ms: avg,
        latencies_ms: latencies,
        expected_interval_ms: (st.session.current_interval() * 1000.0).round() as i64,
        window: WindowReport {
            phase: st.window.phase(),
            remaining_secs: st.window.remaining_secs(now_ms),
            running_count: st.window.running_count(),
            result: st.window.result(),
        },
    });
}
