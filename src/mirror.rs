//! Mirror engine
//!
//! Copies each leaf from a source store to the same key in a target store,
//! skipping objects whose fingerprints already agree. With compression on,
//! the target key gets the codec suffix and fingerprints are not compared
//! (a compressed copy never fingerprints like its source); what happens to
//! an existing compressed target is set by `CompressionComparePolicy`.

use crate::codec::{compressed_key, CompressionCodec};
use crate::config::{CompressionComparePolicy, MirrorOptions};
use crate::delivery::JobContext;
use crate::error::{CallbackError, WalkError};
use crate::resolver::WalkTarget;
use crate::store::SharedStore;
use crate::summary::{WalkStats, WalkSummary};
use crate::walker::{JobFuture, LeafHandler, Walker};
use serde::Serialize;
use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// One object to mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorJob {
    pub source_key: String,
    /// Same as `source_key` unless compression appends a suffix
    pub target_key: String,
    /// Transfer without comparing fingerprints
    pub force: bool,
    pub compress: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MirrorAction {
    Transferred,
    /// Target already up to date; nothing moved
    Skipped,
}

/// Result of one successful job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirrorOutcome {
    pub source_key: String,
    pub target_key: String,
    pub action: MirrorAction,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl MirrorOutcome {
    fn skipped(job: &MirrorJob) -> Self {
        MirrorOutcome {
            source_key: job.source_key.clone(),
            target_key: job.target_key.clone(),
            action: MirrorAction::Skipped,
            bytes_read: 0,
            bytes_written: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Transfer,
    Skip,
}

#[derive(Clone)]
pub struct MirrorEngine {
    source: SharedStore,
    target: SharedStore,
    options: MirrorOptions,
    codec: Arc<dyn CompressionCodec>,
}

impl MirrorEngine {
    pub fn new(source: SharedStore, target: SharedStore, options: MirrorOptions) -> Self {
        MirrorEngine {
            source,
            target,
            codec: options.compression.codec(),
            options,
        }
    }

    pub fn options(&self) -> &MirrorOptions {
        &self.options
    }

    pub fn job_for(&self, key: &str) -> MirrorJob {
        let target_key = if self.options.compress {
            compressed_key(key, self.options.compression)
        } else {
            key.to_string()
        };
        MirrorJob {
            source_key: key.to_string(),
            target_key,
            force: self.options.force,
            compress: self.options.compress,
        }
    }

    /// Mirror every leaf under `targets`, one delivery per leaf
    pub async fn run<F>(&self, walker: &Walker, targets: Vec<WalkTarget>, callback: F) -> WalkSummary
    where
        F: FnMut(Result<MirrorOutcome, WalkError>) -> Result<(), CallbackError> + Send,
    {
        walker.run(targets, Arc::new(self.clone()), callback).await
    }

    /// Run a single job to completion
    pub async fn mirror_one(
        &self,
        job: &MirrorJob,
        cancel: &CancellationToken,
    ) -> Result<MirrorOutcome, WalkError> {
        match self.decide(job).await? {
            Decision::Skip => {
                trace!(key = %job.source_key, "Target up to date");
                Ok(MirrorOutcome::skipped(job))
            }
            Decision::Transfer => self.transfer(job, cancel).await,
        }
    }

    async fn decide(&self, job: &MirrorJob) -> Result<Decision, WalkError> {
        if job.force {
            return Ok(Decision::Transfer);
        }

        if job.compress {
            return match self.options.compression_compare {
                CompressionComparePolicy::SkipComparison => Ok(Decision::Transfer),
                CompressionComparePolicy::SkipIfTargetExists => {
                    match self.target.attributes(&job.target_key).await {
                        Ok(_) => Ok(Decision::Skip),
                        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Decision::Transfer),
                        Err(e) => Err(WalkError::transfer(&job.target_key, e)),
                    }
                }
            };
        }

        let target = match self.target.attributes(&job.target_key).await {
            Ok(attrs) => attrs,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Decision::Transfer),
            Err(e) => return Err(WalkError::transfer(&job.target_key, e)),
        };
        let source = self
            .source
            .attributes(&job.source_key)
            .await
            .map_err(|e| WalkError::transfer(&job.source_key, e))?;

        if source.fingerprint == target.fingerprint {
            Ok(Decision::Skip)
        } else {
            Ok(Decision::Transfer)
        }
    }

    async fn transfer(
        &self,
        job: &MirrorJob,
        cancel: &CancellationToken,
    ) -> Result<MirrorOutcome, WalkError> {
        let fail = |e: IoError| WalkError::transfer(&job.source_key, e);

        let mut reader = self.source.open_reader(&job.source_key).await.map_err(fail)?;
        let mut writer = self.target.open_writer(&job.target_key).await.map_err(fail)?;

        // Both paths end with the writer's shutdown, which commits the target
        let copy = async {
            if job.compress {
                let stats = self.codec.compress(&mut *reader, &mut *writer).await?;
                Ok::<_, IoError>((stats.bytes_in, stats.bytes_out))
            } else {
                let n = tokio::io::copy(&mut reader, &mut writer).await?;
                writer.shutdown().await?;
                Ok::<_, IoError>((n, n))
            }
        };
        let copied: Result<(u64, u64), IoError> = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IoError::new(ErrorKind::Interrupted, "mirror cancelled")),
            copied = copy => copied,
        };

        // Dropping an unclosed writer discards what was written
        let (bytes_read, bytes_written) = copied.map_err(fail)?;

        debug!(
            source = %job.source_key,
            target = %job.target_key,
            bytes = bytes_written,
            "Transferred"
        );
        Ok(MirrorOutcome {
            source_key: job.source_key.clone(),
            target_key: job.target_key.clone(),
            action: MirrorAction::Transferred,
            bytes_read,
            bytes_written,
        })
    }
}

impl std::fmt::Debug for MirrorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorEngine")
            .field("options", &self.options)
            .finish()
    }
}

impl LeafHandler for MirrorEngine {
    type Output = MirrorOutcome;

    fn handle_leaf<'a>(
        &'a self,
        key: &'a str,
        job: &'a JobContext<MirrorOutcome>,
    ) -> JobFuture<'a> {
        Box::pin(async move {
            let mirror_job = self.job_for(key);
            let result = self.mirror_one(&mirror_job, job.cancellation()).await;

            if let Ok(outcome) = &result {
                let stats = job.stats();
                match outcome.action {
                    MirrorAction::Transferred => {
                        WalkStats::incr(&stats.jobs_transferred);
                        WalkStats::add(&stats.bytes_transferred, outcome.bytes_written);
                    }
                    MirrorAction::Skipped => WalkStats::incr(&stats.jobs_skipped),
                }
            }
            job.deliver(result).await;
        })
    }
}
