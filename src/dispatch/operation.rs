//! One tracked fetch attempt.

use super::lane::Lane;
use crate::client::core::ExecutorShared;
use crate::error_code::TransportErrorCode;
use crate::request::PreparedRequest;
use crate::telemetry::{self, LogEvent};
use crate::transport::{FetchedResponse, Transport, TransportError};
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Terminal outcome of a fetch.
pub type FetchOutcome = Result<FetchedResponse, TransportError>;

/// Operation identifier: creation time in milliseconds, bumped when needed so
/// ids stay strictly increasing within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId(u64);

static LAST_ID: AtomicU64 = AtomicU64::new(0);

impl OperationId {
    pub fn next() -> Self {
        let now_ms = Utc::now().timestamp_millis().max(0) as u64;
        let mut last = LAST_ID.load(Ordering::Relaxed);
        loop {
            let candidate = now_ms.max(last + 1);
            match LAST_ID.compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return OperationId(candidate),
                Err(actual) => last = actual,
            }
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// A prepared, not yet started fetch.
///
/// The completion sender is the consume-once token: whoever takes it first
/// (a finished fetch or a cancellation) decides the outcome, and every later
/// attempt finds it gone.
pub struct Operation {
    id: OperationId,
    lane: Lane,
    cancel: CancellationToken,
    completion: Mutex<Option<oneshot::Sender<FetchOutcome>>>,
    owner: Weak<ExecutorShared>,
}

impl Operation {
    /// Creates the operation and the receiver its outcome will arrive on.
    pub(crate) fn prepare(lane: Lane, owner: Weak<ExecutorShared>) -> (Arc<Self>, oneshot::Receiver<FetchOutcome>) {
        let (tx, rx) = oneshot::channel();
        let op = Arc::new(Self {
            id: OperationId::next(),
            lane,
            cancel: CancellationToken::new(),
            completion: Mutex::new(Some(tx)),
            owner,
        });
        (op, rx)
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    pub fn is_finished(&self) -> bool {
        self.completion.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn take_completion(&self) -> Option<oneshot::Sender<FetchOutcome>> {
        self.completion.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Delivers the outcome if nothing has finished this operation yet.
    /// Returns `false` when the outcome was dropped as late or duplicate.
    pub fn complete(&self, outcome: FetchOutcome) -> bool {
        match self.take_completion() {
            Some(tx) => {
                // A dropped receiver means the caller went away; nothing to do.
                let _ = tx.send(outcome);
                true
            }
            None => {
                debug!(operation_id = %self.id, lane = self.lane.name(), "dropping late fetch completion");
                self.log("dropped late completion");
                false
            }
        }
    }

    /// Cancels the fetch. Returns `true` if the operation had not finished.
    pub fn cancel(&self) -> bool {
        self.cancel.cancel();
        let pending = self.take_completion().is_some();
        if pending {
            self.log("cancelled before start");
        }
        pending
    }

    /// Runs the fetch unless cancelled, racing it against cancellation.
    pub async fn run(self: Arc<Self>, transport: Arc<dyn Transport>, request: PreparedRequest) {
        if self.is_cancelled() {
            return;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(operation_id = %self.id, "fetch cancelled while in flight");
            }
            caught = AssertUnwindSafe(transport.fetch(request)).catch_unwind() => {
                let outcome = caught.unwrap_or_else(|_| {
                    Err(TransportError::other(TransportErrorCode::Unknown, "transport panicked during fetch"))
                });
                self.complete(outcome);
            }
        }
    }

    fn log(&self, what: &str) {
        let tag = match self.owner.upgrade() {
            Some(owner) => owner.log_tag().to_string(),
            None => "RequestExecutor".to_string(),
        };
        telemetry::emit(LogEvent::info(tag, format!("{} {} on {} lane", self.id, what, self.lane.name())));
    }
}
