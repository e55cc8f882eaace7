//! Delivery of results to the consumer
//!
//! Jobs send into one bounded channel per operation and wait when it is
//! full, so a slow consumer slows producers down and nothing is dropped.
//! The consumer callback runs on the task awaiting the operation, one
//! delivery at a time.

use crate::config::ErrorPolicy;
use crate::error::{CallbackError, WalkError, WalkErrorKind};
use crate::summary::WalkStats;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One item in flight to the consumer, tagged with its job's token
#[derive(Debug)]
pub struct Delivery<T> {
    pub item: Result<T, WalkError>,
    pub path: Arc<str>,
    pub job: CancellationToken,
}

/// What a job holds while it runs
#[derive(Debug)]
pub struct JobContext<T> {
    path: Arc<str>,
    cancel: CancellationToken,
    tx: mpsc::Sender<Delivery<T>>,
    stats: Arc<WalkStats>,
}

impl<T: Send> JobContext<T> {
    pub fn new(
        path: impl Into<String>,
        cancel: CancellationToken,
        tx: mpsc::Sender<Delivery<T>>,
        stats: Arc<WalkStats>,
    ) -> Self {
        JobContext {
            path: Arc::from(path.into()),
            cancel,
            tx,
            stats,
        }
    }

    /// Key or prefix this job works on
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn stats(&self) -> &WalkStats {
        &self.stats
    }

    /// Send one item, waiting for channel space.
    ///
    /// Returns `false` once the job should stop: it was cancelled (by the
    /// consumer rejecting an earlier delivery, or by the whole operation)
    /// or the consumer is gone.
    pub async fn deliver(&self, item: Result<T, WalkError>) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let delivery = Delivery {
            item,
            path: Arc::clone(&self.path),
            job: self.cancel.clone(),
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(delivery) => sent.is_ok(),
        }
    }
}

/// Run `callback` on every delivery until all senders are gone.
///
/// A rejected delivery cancels its job. Under `FailFast`, a rejected
/// delivery or any delivered error cancels `root`. Once a job is cancelled
/// its queued results are discarded, but its queued errors still reach
/// the callback.
pub async fn drain<T, F>(
    mut rx: mpsc::Receiver<Delivery<T>>,
    mut callback: F,
    root: CancellationToken,
    policy: ErrorPolicy,
    stats: Arc<WalkStats>,
) where
    F: FnMut(Result<T, WalkError>) -> Result<(), CallbackError>,
{
    while let Some(Delivery { item, path, job }) = rx.recv().await {
        if job.is_cancelled() && item.is_ok() {
            WalkStats::incr(&stats.discarded);
            continue;
        }

        let failed = match &item {
            Ok(_) => false,
            Err(err) => {
                warn!(path = %err.path, line = err.line_number, error = %err.kind, "Job reported error");
                stats.record_error(err.kind_name());
                true
            }
        };
        WalkStats::incr(&stats.delivered);

        if let Err(rejected) = callback(item) {
            let err = WalkError::new(path.as_ref(), WalkErrorKind::Callback(rejected));
            warn!(error = %err, "Consumer rejected delivery, stopping job");
            stats.record_error(err.kind_name());
            job.cancel();
            if policy == ErrorPolicy::FailFast {
                root.cancel();
            }
        } else if failed && policy == ErrorPolicy::FailFast && !root.is_cancelled() {
            debug!("Fail-fast: cancelling operation after first error");
            root.cancel();
        }
    }
}
