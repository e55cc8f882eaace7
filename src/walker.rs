//! Tree walker
//!
//! A single dispatcher owns a queue of pending work: prefixes to list and
//! leaf keys to process. Each item runs as its own task once it holds a
//! throttle slot, so at most `workers` store operations are in flight no
//! matter how deep or wide the tree is. Listing tasks hand the entries they
//! find back to the dispatcher instead of recursing themselves.
//!
//! The walk ends when the queue is empty and no task is running. After
//! cancellation the queue is dropped, nothing new is dispatched, and the
//! walk ends once running tasks return.

use crate::config::WalkConfig;
use crate::delivery::{self, Delivery, JobContext};
use crate::error::{CallbackError, ConfigResult, WalkError};
use crate::resolver::{TraversalMode, WalkTarget};
use crate::store::SharedStore;
use crate::summary::{WalkStats, WalkSummary};
use crate::throttle::{WorkerSlot, WorkerThrottle};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

pub type JobFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Per-leaf work plugged into the walker
pub trait LeafHandler: Send + Sync + 'static {
    /// Item delivered to the consumer for each successful unit of work
    type Output: Send + 'static;

    /// Process one leaf, delivering results and errors through `job`.
    ///
    /// Must return promptly once `job` is cancelled, and must close every
    /// store handle it opened before returning.
    fn handle_leaf<'a>(&'a self, key: &'a str, job: &'a JobContext<Self::Output>)
        -> JobFuture<'a>;
}

/// A unit of pending work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    List { prefix: String },
    Leaf { key: String },
}

enum TaskOutcome {
    Listed(Vec<WorkItem>),
    LeafDone,
}

/// Walks targets over one store
pub struct Walker {
    store: SharedStore,
    config: WalkConfig,
    cancel: CancellationToken,
}

impl Walker {
    pub fn new(store: SharedStore, config: WalkConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Walker {
            store,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Use an externally owned token, e.g. one shared with a signal handler
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this walker's operations
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn config(&self) -> &WalkConfig {
        &self.config
    }

    /// Walk `targets`, running `handler` on each leaf and `callback` on each
    /// delivery. Returns when every dispatched job has finished and every
    /// delivery has been consumed.
    pub async fn run<H, F>(
        &self,
        targets: Vec<WalkTarget>,
        handler: Arc<H>,
        callback: F,
    ) -> WalkSummary
    where
        H: LeafHandler,
        F: FnMut(Result<H::Output, WalkError>) -> Result<(), CallbackError> + Send,
    {
        let started = Instant::now();
        let stats = Arc::new(WalkStats::default());
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);

        let drain = delivery::drain(
            rx,
            callback,
            self.cancel.clone(),
            self.config.error_policy,
            Arc::clone(&stats),
        );
        let walk = self.dispatch(targets, handler, tx, Arc::clone(&stats));
        tokio::join!(walk, drain);

        if self.cancel.is_cancelled() {
            stats.mark_cancelled();
        }
        let summary = stats.snapshot(started.elapsed());
        info!(
            leaves = summary.leaves_completed,
            delivered = summary.delivered,
            errors = summary.total_errors(),
            cancelled = summary.cancelled,
            elapsed_ms = summary.elapsed_ms,
            "Walk finished"
        );
        summary
    }

    async fn dispatch<H: LeafHandler>(
        &self,
        targets: Vec<WalkTarget>,
        handler: Arc<H>,
        tx: mpsc::Sender<Delivery<H::Output>>,
        stats: Arc<WalkStats>,
    ) {
        let throttle = WorkerThrottle::new(self.config.workers, self.cancel.clone());
        let mut queue: VecDeque<WorkItem> = VecDeque::new();

        info!(targets = targets.len(), workers = self.config.workers, "Starting walk");
        for target in targets {
            WalkStats::incr(&stats.roots);
            debug!(root = %target.root_path, mode = ?target.mode, "Queueing root");
            match target.mode {
                TraversalMode::Listable => queue.push_back(WorkItem::List {
                    prefix: target.root_path,
                }),
                TraversalMode::Enumerated => queue.extend(
                    target
                        .leaf_keys
                        .into_iter()
                        .map(|key| WorkItem::Leaf { key }),
                ),
            }
        }

        let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
        loop {
            while let Some(done) = tasks.try_join_next() {
                absorb(done, &mut queue, &stats);
            }

            if self.cancel.is_cancelled() && !queue.is_empty() {
                info!(pending = queue.len(), "Walk cancelled, dropping pending work");
                queue.clear();
            }

            let Some(item) = queue.pop_front() else {
                match tasks.join_next().await {
                    Some(done) => {
                        absorb(done, &mut queue, &stats);
                        continue;
                    }
                    None => break,
                }
            };

            let slot = match throttle.acquire().await {
                Ok(slot) => slot,
                Err(_) => {
                    queue.clear();
                    continue;
                }
            };

            match item {
                WorkItem::List { prefix } => {
                    let job = JobContext::new(
                        prefix.clone(),
                        self.cancel.child_token(),
                        tx.clone(),
                        Arc::clone(&stats),
                    );
                    let store = Arc::clone(&self.store);
                    tasks.spawn(async move {
                        let children = list_prefix(&store, &prefix, &job).await;
                        drop(slot);
                        TaskOutcome::Listed(children)
                    });
                }
                WorkItem::Leaf { key } => {
                    WalkStats::incr(&stats.leaves_dispatched);
                    trace!(key = %key, "Dispatching leaf");
                    let job = JobContext::new(
                        key.clone(),
                        self.cancel.child_token(),
                        tx.clone(),
                        Arc::clone(&stats),
                    );
                    let handler = Arc::clone(&handler);
                    tasks.spawn(run_leaf(handler, key, job, slot));
                }
            }
        }
        // Dropping the last sender lets the drain finish
        drop(tx);
    }
}

async fn run_leaf<H: LeafHandler>(
    handler: Arc<H>,
    key: String,
    job: JobContext<H::Output>,
    slot: WorkerSlot,
) -> TaskOutcome {
    handler.handle_leaf(&key, &job).await;
    WalkStats::incr(&job.stats().leaves_completed);
    drop(slot);
    TaskOutcome::LeafDone
}

/// List every page under `prefix`.
///
/// On failure the whole subtree is abandoned: one listing error is delivered
/// and no children are returned, including those from earlier pages.
async fn list_prefix<T: Send>(
    store: &SharedStore,
    prefix: &str,
    job: &JobContext<T>,
) -> Vec<WorkItem> {
    let mut children = Vec::new();
    let mut token: Option<String> = None;

    loop {
        if job.is_cancelled() {
            return Vec::new();
        }
        WalkStats::incr(&job.stats().listings);
        debug!(prefix = %prefix, "Listing");

        let page = match store.list(prefix, "/", token.as_deref()).await {
            Ok(page) => page,
            Err(e) => {
                job.deliver(Err(WalkError::listing(prefix, e))).await;
                return Vec::new();
            }
        };

        for entry in page.entries {
            if entry.key == prefix || entry.key.is_empty() {
                continue;
            }
            if entry.is_container {
                children.push(WorkItem::List { prefix: entry.key });
            } else {
                children.push(WorkItem::Leaf { key: entry.key });
            }
        }

        match page.continuation_token {
            Some(next) => token = Some(next),
            None => return children,
        }
    }
}

fn absorb(
    done: Result<TaskOutcome, JoinError>,
    queue: &mut VecDeque<WorkItem>,
    stats: &WalkStats,
) {
    match done {
        Ok(TaskOutcome::Listed(children)) => queue.extend(children),
        Ok(TaskOutcome::LeafDone) => {}
        Err(e) => {
            error!(error = %e, "Walk task failed");
            stats.record_error("panic");
        }
    }
}
