//! Bounded-concurrency lanes.

use futures::future::BoxFuture;
use std::env;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::trace;

/// Which lane a request runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Serial lane for requests flagged main-priority.
    Primary,
    /// Bounded-parallel lane for everything else.
    Secondary,
}

impl Lane {
    pub fn for_priority(is_main_priority: bool) -> Self {
        if is_main_priority { Lane::Primary } else { Lane::Secondary }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Lane::Primary => "primary",
            Lane::Secondary => "secondary",
        }
    }
}

/// Point-in-time view of a lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneSnapshot {
    pub lane: Lane,
    pub max_concurrency: usize,
    /// Jobs currently holding a slot.
    pub running: usize,
    /// Jobs submitted and not yet finished, including those waiting for a slot.
    pub queued_or_running: usize,
    pub completed: u64,
}

/// Something that runs jobs with a concurrency bound.
pub trait Dispatcher: Send + Sync {
    fn lane(&self) -> Lane;

    /// Queues `job`; it starts once a slot is free. Never blocks the caller.
    fn dispatch(&self, job: BoxFuture<'static, ()>) -> JoinHandle<()>;

    fn snapshot(&self) -> LaneSnapshot;
}

/// Semaphore-bounded lane running jobs as tokio tasks on a fixed runtime.
pub struct LaneQueue {
    lane: Lane,
    max_concurrency: usize,
    slots: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    completed: Arc<AtomicU64>,
    runtime: Handle,
}

impl LaneQueue {
    pub fn new(lane: Lane, max_concurrency: usize, runtime: Handle) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            lane,
            max_concurrency,
            slots: Arc::new(Semaphore::new(max_concurrency)),
            pending: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicU64::new(0)),
            runtime,
        }
    }

    pub fn serial(lane: Lane, runtime: Handle) -> Self {
        Self::new(lane, 1, runtime)
    }
}

struct JobTally {
    pending: Arc<AtomicUsize>,
    completed: Arc<AtomicU64>,
}

impl Drop for JobTally {
    fn drop(&mut self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Dispatcher for LaneQueue {
    fn lane(&self) -> Lane {
        self.lane
    }

    fn dispatch(&self, job: BoxFuture<'static, ()>) -> JoinHandle<()> {
        let slots = self.slots.clone();
        let pending = self.pending.clone();
        let completed = self.completed.clone();
        let lane = self.lane;
        pending.fetch_add(1, Ordering::SeqCst);
        self.runtime.spawn(async move {
            // Settles the counters even if `job` panics.
            let _tally = JobTally { pending, completed };
            // The semaphore is never closed, so acquire only fails if it is.
            let _permit = slots.acquire_owned().await.ok();
            trace!(lane = lane.name(), "job started");
            job.await;
        })
    }

    fn snapshot(&self) -> LaneSnapshot {
        LaneSnapshot {
            lane: self.lane,
            max_concurrency: self.max_concurrency,
            running: self.max_concurrency - self.slots.available_permits(),
            queued_or_running: self.pending.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LaneConfig {
    /// Bound for the secondary lane. The primary lane is always serial.
    pub secondary_concurrency: usize,
}

impl Default for LaneConfig {
    fn default() -> Self {
        let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self { secondary_concurrency: n }
    }
}

impl LaneConfig {
    /// Defaults overridden by `CACHELANE_SECONDARY_CONCURRENCY`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = env::var("CACHELANE_SECONDARY_CONCURRENCY").ok().and_then(|s| s.parse::<usize>().ok()) {
            cfg.secondary_concurrency = n.max(1);
        }
        cfg
    }

    pub fn with_secondary_concurrency(mut self, n: usize) -> Self {
        self.secondary_concurrency = n.max(1);
        self
    }
}

/// The two lanes the executor routes requests to.
pub struct QueuePair {
    primary: Arc<dyn Dispatcher>,
    secondary: Arc<dyn Dispatcher>,
}

impl QueuePair {
    pub fn new(config: &LaneConfig, runtime: Handle) -> Self {
        Self {
            primary: Arc::new(LaneQueue::serial(Lane::Primary, runtime.clone())),
            secondary: Arc::new(LaneQueue::new(Lane::Secondary, config.secondary_concurrency, runtime)),
        }
    }

    /// Pairs custom dispatchers.
    pub fn from_dispatchers(primary: Arc<dyn Dispatcher>, secondary: Arc<dyn Dispatcher>) -> Self {
        Self { primary, secondary }
    }

    pub fn get(&self, lane: Lane) -> &Arc<dyn Dispatcher> {
        match lane {
            Lane::Primary => &self.primary,
            Lane::Secondary => &self.secondary,
        }
    }

    pub fn snapshots(&self) -> [LaneSnapshot; 2] {
        [self.primary.snapshot(), self.secondary.snapshot()]
    }
}
