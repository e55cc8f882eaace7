//! Stream dataset records as NDJSON
//!
//! Usage: `oa-walk [ROOT...]`. Every record that survives validation and
//! the query filter is written to stdout, one per line (or pretty-printed
//! with `OA_FORMAT`). Errors go to the log on stderr along with the final
//! summary.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | OA_CONFIG | - | TOML config file, read before the overrides below |
//! | OA_STORE | memory | Store: memory, localfs, s3, or smithsonian |
//! | OA_LOCAL_PATH | - | Directory for localfs |
//! | OA_PREFIX | - | Key prefix |
//! | OA_ENUMERATE | false | Traverse by shard names instead of listing |
//! | OA_WORKERS | 10 | Concurrent jobs |
//! | OA_FAIL_FAST | false | Stop on the first error |
//! | OA_VALIDATE | false | Parse each line and re-serialize it compactly |
//! | OA_FORMAT | false | Pretty-print each record |
//! | OA_QUERY | - | `;`-separated `PATH=REGEXP` filters |
//! | OA_QUERY_MODE | ALL | `ALL` or `ANY` of the filters must match |
//! | RUST_LOG | info | Log filter |
//! | OA_LOG_FORMAT | text | `json` for JSON log lines |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use openaccess_walk::observability::init_tracing;
use openaccess_walk::{open_store, AppConfig, CallbackError, PathResolver, RecordStream, Walker};
use std::io::{BufWriter, Write};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.log)?;

    let mut roots: Vec<String> = std::env::args().skip(1).collect();
    if roots.is_empty() {
        roots.push("metadata".to_string());
    }

    let store = open_store(&config.source)?;
    let resolver = PathResolver::new(config.dataset.clone(), config.source.traversal);
    let targets = resolver.resolve_all(&roots);
    let options = config.stream.to_options()?;

    let walker = Walker::new(store.clone(), config.walk.clone())?;
    let stop = walker.cancellation();
    shutdown_on_signal(stop.clone());

    let stream = RecordStream::new(store, options, config.walk.max_line_bytes);
    let mut out = BufWriter::new(std::io::stdout());
    let summary = stream
        .run(&walker, targets, |result| {
            let Ok(record) = result else {
                return Ok(());
            };
            let written = out
                .write_all(&record.body)
                .and_then(|_| out.write_all(b"\n"));
            if let Err(e) = written {
                // Nobody is reading any more
                error!(error = %e, "Cannot write to stdout, stopping");
                stop.cancel();
                return Err(CallbackError::new(e.to_string()));
            }
            Ok(())
        })
        .await;
    out.flush()?;

    info!(summary = %serde_json::to_string(&summary)?, "Done");
    if summary.total_errors() > 0 || summary.cancelled {
        std::process::exit(1);
    }
    Ok(())
}

fn shutdown_on_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            cancel.cancel();
        }
    });
}
