//! Mirror dataset objects from one store into another
//!
//! Usage: `oa-mirror [ROOT...]` where each root is a dataset alias
//! (`metadata`), a unit code (`NMAH`), a prefix, or a single key. With no
//! roots the whole `metadata` alias is mirrored.
//!
//! Prints the run summary as JSON on stdout; exits non-zero if any job
//! failed or the run was interrupted.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | OA_CONFIG | - | TOML config file, read before the overrides below |
//! | OA_STORE | memory | Source store: memory, localfs, s3, or smithsonian |
//! | OA_LOCAL_PATH | - | Source directory for localfs |
//! | OA_PREFIX | - | Source key prefix |
//! | OA_ENUMERATE | false | Traverse the source by shard names instead of listing |
//! | OA_TARGET_STORE | memory | Target store type |
//! | OA_TARGET_PATH | - | Target directory for localfs |
//! | OA_TARGET_PREFIX | - | Target key prefix |
//! | OA_WORKERS | 10 | Concurrent jobs |
//! | OA_FAIL_FAST | false | Stop on the first error |
//! | OA_FORCE | false | Transfer without comparing fingerprints |
//! | OA_COMPRESS | false | Write compressed `<key>.bz2` (or `.zst`) targets |
//! | OA_COMPRESSION | bzip2 | Compression format: `bzip2` or `zstd` |
//! | RUST_LOG | info | Log filter |
//! | OA_LOG_FORMAT | text | `json` for JSON log lines |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use openaccess_walk::error::ConfigError;
use openaccess_walk::mirror::{MirrorAction, MirrorEngine};
use openaccess_walk::observability::init_tracing;
use openaccess_walk::{open_store, AppConfig, PathResolver, Walker};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.log)?;

    let mut roots: Vec<String> = std::env::args().skip(1).collect();
    if roots.is_empty() {
        roots.push("metadata".to_string());
    }

    let target_config = config
        .target
        .clone()
        .ok_or(ConfigError::Missing("target store (OA_TARGET_STORE or OA_TARGET_PATH)"))?;
    let source = open_store(&config.source)?;
    let target = open_store(&target_config)?;

    let resolver = PathResolver::new(config.dataset.clone(), config.source.traversal);
    let targets = resolver.resolve_all(&roots);
    info!(roots = ?roots, targets = targets.len(), "Mirroring");

    let walker = Walker::new(source.clone(), config.walk.clone())?;
    shutdown_on_signal(walker.cancellation());

    let engine = MirrorEngine::new(source, target, config.mirror.clone());
    let summary = engine
        .run(&walker, targets, |result| {
            if let Ok(outcome) = result {
                match outcome.action {
                    MirrorAction::Transferred => info!(
                        source = %outcome.source_key,
                        target = %outcome.target_key,
                        bytes = outcome.bytes_written,
                        "Mirrored"
                    ),
                    MirrorAction::Skipped => debug!(key = %outcome.source_key, "Up to date"),
                }
            }
            Ok(())
        })
        .await;

    println!("{}", serde_json::to_string_pretty(&summary)?);
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
