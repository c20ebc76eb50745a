//! Log listener side-channel.
//!
//! The executor reports lifecycle events and failures to a single
//! process-wide [`LogListener`]. Reporting is fire-and-forget:
//!
//! - events are queued and delivered by a background thread, so a slow
//!   listener never stalls a request;
//! - the queue holds at most [`LOG_QUEUE_CAPACITY`] events. While it is full,
//!   new events are dropped and counted (see [`dropped_events`]);
//! - a panicking listener is contained and the event dropped;
//! - with no listener registered, events are discarded.
//!
//! Internal diagnostics go through `tracing` independently of this channel.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`LogEvent`] | Message, caller tag, level |
//! | [`LogListener`] | Trait for event destinations |
//! | [`NoopLogListener`] | Default listener |
//! | [`InMemoryLogListener`] | Collects events, for tests |
//! | [`TracingLogListener`] | Forwards events to `tracing` |

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Events buffered for the listener before new ones are dropped.
pub const LOG_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error { code: i32, name: String },
}

#[derive(Debug, Clone)]
pub struct LogEvent {
    pub message: String,
    /// Which component emitted the event (e.g. `"RequestExecutor"`).
    pub caller_tag: String,
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub fn info(caller_tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self { message: message.into(), caller_tag: caller_tag.into(), level: LogLevel::Info, timestamp: Utc::now() }
    }

    pub fn error(caller_tag: impl Into<String>, message: impl Into<String>, code: i32, name: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            caller_tag: caller_tag.into(),
            level: LogLevel::Error { code, name: name.into() },
            timestamp: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.level, LogLevel::Error { .. })
    }
}

/// Destination for log events. Called from a dedicated background thread.
pub trait LogListener: Send + Sync {
    fn on_event(&self, event: &LogEvent);
}

impl<F> LogListener for F
where
    F: Fn(&LogEvent) + Send + Sync,
{
    fn on_event(&self, event: &LogEvent) {
        self(event)
    }
}

pub struct NoopLogListener;
impl LogListener for NoopLogListener {
    fn on_event(&self, _: &LogEvent) {}
}

/// In-memory listener for testing.
pub struct InMemoryLogListener {
    events: RwLock<Vec<LogEvent>>,
    max_events: usize,
}
impl InMemoryLogListener {
    pub fn new(max: usize) -> Self {
        Self { events: RwLock::new(Vec::new()), max_events: max }
    }
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
    pub fn errors(&self) -> Vec<LogEvent> {
        self.events().into_iter().filter(LogEvent::is_error).collect()
    }
    pub fn clear(&self) {
        self.events.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(PoisonError::into_inner).len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
impl LogListener for InMemoryLogListener {
    fn on_event(&self, event: &LogEvent) {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        events.push(event.clone());
        if events.len() > self.max_events {
            events.remove(0);
        }
    }
}

/// Forwards events to `tracing` under the `cachelane::listener` target.
pub struct TracingLogListener;
impl LogListener for TracingLogListener {
    fn on_event(&self, event: &LogEvent) {
        match &event.level {
            LogLevel::Info => tracing::info!(target: "cachelane::listener", caller = %event.caller_tag, "{}", event.message),
            LogLevel::Error { code, name } => {
                tracing::error!(target: "cachelane::listener", caller = %event.caller_tag, code, name = %name, "{}", event.message)
            }
        }
    }
}

enum Msg {
    Event(LogEvent),
    Flush(std_mpsc::SyncSender<()>),
}

static LISTENER: Lazy<RwLock<Arc<dyn LogListener>>> = Lazy::new(|| RwLock::new(Arc::new(NoopLogListener)));

static DROPPED: AtomicU64 = AtomicU64::new(0);

static WORKER: Lazy<Option<mpsc::Sender<Msg>>> = Lazy::new(|| {
    let (tx, mut rx) = mpsc::channel::<Msg>(LOG_QUEUE_CAPACITY);
    // A plain thread, not a runtime task: listeners may block and events can
    // be emitted from outside any runtime.
    let spawned = std::thread::Builder::new().name("cachelane-log".into()).spawn(move || {
        while let Some(msg) = rx.blocking_recv() {
            match msg {
                Msg::Event(event) => {
                    let listener = get_log_listener();
                    if catch_unwind(AssertUnwindSafe(|| listener.on_event(&event))).is_err() {
                        tracing::warn!(caller = %event.caller_tag, "log listener panicked; event dropped");
                    }
                }
                Msg::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    });
    match spawned {
        Ok(_) => Some(tx),
        Err(e) => {
            tracing::warn!(error = %e, "could not start log delivery thread; listener events disabled");
            None
        }
    }
});

/// Returns the registered listener.
pub fn get_log_listener() -> Arc<dyn LogListener> {
    LISTENER.read().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Registers the process-wide listener, replacing the previous one.
pub fn set_log_listener(listener: Arc<dyn LogListener>) {
    *LISTENER.write().unwrap_or_else(PoisonError::into_inner) = listener;
}

/// Restores the no-op listener.
pub fn clear_log_listener() {
    set_log_listener(Arc::new(NoopLogListener));
}

/// Queues an event for the listener. Never blocks; drops the event when the
/// queue is full.
pub fn emit(event: LogEvent) {
    let Some(tx) = WORKER.as_ref() else { return };
    if tx.try_send(Msg::Event(event)).is_err() {
        DROPPED.fetch_add(1, Ordering::Relaxed);
    }
}

/// Events discarded because the queue was full or delivery had stopped.
pub fn dropped_events() -> u64 {
    DROPPED.load(Ordering::Relaxed)
}

/// Blocks until every event queued before this call has been delivered.
/// Returns `false` on timeout.
pub fn flush(timeout: Duration) -> bool {
    let Some(tx) = WORKER.as_ref() else { return true };
    let deadline = Instant::now() + timeout;
    let (done_tx, done_rx) = std_mpsc::sync_channel(1);
    let mut marker = Msg::Flush(done_tx);
    loop {
        match tx.try_send(marker) {
            Ok(()) => break,
            Err(TrySendError::Closed(_)) => return false,
            Err(TrySendError::Full(back)) => {
                if Instant::now() >= deadline {
                    return false;
                }
                marker = back;
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
    done_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())).is_ok()
}
