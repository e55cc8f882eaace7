//! Record stream engine
//!
//! Reads each leaf as newline-delimited JSON and delivers one record per
//! line, in line order. Line numbers count every line read, blank or
//! broken, so a consumer can point at the exact line of any error. A bad
//! line costs only that line; a failed read ends the file, since the
//! stream cannot be resynchronised.

use crate::codec::{codec_for_key, LineCodec, LineFrame};
use crate::config::StreamOptions;
use crate::delivery::JobContext;
use crate::error::{CallbackError, WalkError, WalkErrorKind};
use crate::resolver::WalkTarget;
use crate::store::SharedStore;
use crate::summary::{WalkStats, WalkSummary};
use crate::walker::{JobFuture, LeafHandler, Walker};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;
use tokio_util::codec::FramedRead;
use tracing::{debug, trace};

/// One line of one source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub source_path: String,
    /// 1-based
    pub line_number: u64,
    pub body: Bytes,
}

impl Record {
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// What became of one line
#[derive(Debug)]
pub enum LineOutcome {
    Deliver(Result<Record, WalkError>),
    /// Rejected by the query
    Filtered,
    Blank,
}

#[derive(Clone)]
pub struct RecordStream {
    store: SharedStore,
    options: StreamOptions,
    max_line_bytes: usize,
}

impl RecordStream {
    pub fn new(store: SharedStore, options: StreamOptions, max_line_bytes: usize) -> Self {
        RecordStream {
            store,
            options,
            max_line_bytes,
        }
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// Stream every leaf under `targets`
    pub async fn run<F>(&self, walker: &Walker, targets: Vec<WalkTarget>, callback: F) -> WalkSummary
    where
        F: FnMut(Result<Record, WalkError>) -> Result<(), CallbackError> + Send,
    {
        walker.run(targets, Arc::new(self.clone()), callback).await
    }

    /// Validate, filter and format one line
    pub fn process_line(&self, path: &str, line_number: u64, raw: Bytes) -> LineOutcome {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return LineOutcome::Blank;
        }
        let parse_error = |e| {
            LineOutcome::Deliver(Err(WalkError::at_line(
                path,
                line_number,
                WalkErrorKind::Parse(e),
            )))
        };

        let mut body = raw;
        let mut parsed: Option<Value> = None;

        if self.options.validate {
            let value: Value = match serde_json::from_slice(&body) {
                Ok(v) => v,
                Err(e) => return parse_error(e),
            };
            body = match serde_json::to_vec(&value) {
                Ok(compact) => Bytes::from(compact),
                Err(e) => return parse_error(e),
            };
            parsed = Some(value);
        }

        if let Some(query) = self.options.query.as_ref().filter(|q| !q.is_empty()) {
            if parsed.is_none() {
                parsed = serde_json::from_slice::<Value>(&body).ok();
            }
            // Unparseable lines match nothing
            let matched = parsed.as_ref().map_or(false, |value| query.matches(value));
            if !matched {
                return LineOutcome::Filtered;
            }
        }

        if self.options.format {
            let value = match parsed {
                Some(value) => value,
                None => match serde_json::from_slice(&body) {
                    Ok(v) => v,
                    Err(e) => return parse_error(e),
                },
            };
            body = match serde_json::to_vec_pretty(&value) {
                Ok(pretty) => Bytes::from(pretty),
                Err(e) => return parse_error(e),
            };
        }

        LineOutcome::Deliver(Ok(Record {
            source_path: path.to_string(),
            line_number,
            body,
        }))
    }

    async fn stream_file(&self, key: &str, job: &JobContext<Record>) {
        let reader = match self.store.open_reader(key).await {
            Ok(reader) => reader,
            Err(e) => {
                job.deliver(Err(WalkError::new(key, WalkErrorKind::Read(e)))).await;
                return;
            }
        };
        // `.bz2` and `.zst` leaves decode on the fly
        let reader = match codec_for_key(key) {
            Some(codec) => codec.decompressing_reader(reader),
            None => reader,
        };

        debug!(key = %key, "Streaming records");
        let mut frames = FramedRead::new(reader, LineCodec::new(self.max_line_bytes));
        let mut line_number: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = job.cancellation().cancelled() => break,
                next = frames.next() => next,
            };
            line_number += 1;

            let outcome = match next {
                None => break,
                Some(Ok(LineFrame::Line(raw))) => self.process_line(key, line_number, raw),
                Some(Ok(LineFrame::Oversized { length })) => {
                    let err = IoError::new(
                        ErrorKind::InvalidData,
                        format!(
                            "line of {} bytes exceeds limit of {} bytes",
                            length, self.max_line_bytes
                        ),
                    );
                    LineOutcome::Deliver(Err(WalkError::at_line(
                        key,
                        line_number,
                        WalkErrorKind::Read(err),
                    )))
                }
                Some(Err(e)) => {
                    job.deliver(Err(WalkError::at_line(
                        key,
                        line_number,
                        WalkErrorKind::Read(e),
                    )))
                    .await;
                    break;
                }
            };

            match outcome {
                LineOutcome::Deliver(item) => {
                    if !job.deliver(item).await {
                        trace!(key = %key, line = line_number, "Job stopped");
                        break;
                    }
                }
                LineOutcome::Filtered => WalkStats::incr(&job.stats().records_filtered),
                LineOutcome::Blank => {}
            }
        }
    }
}

impl std::fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream")
            .field("options", &self.options)
            .field("max_line_bytes", &self.max_line_bytes)
            .finish()
    }
}

impl LeafHandler for RecordStream {
    type Output = Record;

    fn handle_leaf<'a>(&'a self, key: &'a str, job: &'a JobContext<Record>) -> JobFuture<'a> {
        Box::pin(self.stream_file(key, job))
    }
}
