//! Print the key of every object a walk would visit
//!
//! Usage: `oa-list [ROOT...]`. Useful for checking how roots resolve and
//! whether a store lists the same keys the enumerated shard names predict.
//! Takes the same source variables as `oa-walk`.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use openaccess_walk::delivery::JobContext;
use openaccess_walk::observability::init_tracing;
use openaccess_walk::walker::JobFuture;
use openaccess_walk::{
    open_store, AppConfig, LeafHandler, ObjectStore, PathResolver, SharedStore, WalkError,
    WalkErrorKind, Walker,
};
use std::sync::Arc;
use tokio::signal;
use tracing::info;

/// Delivers each key that exists, with its size
struct KeyLister {
    store: SharedStore,
}

impl LeafHandler for KeyLister {
    type Output = (String, u64);

    fn handle_leaf<'a>(&'a self, key: &'a str, job: &'a JobContext<(String, u64)>) -> JobFuture<'a> {
        Box::pin(async move {
            // Enumerated targets name keys that may not exist
            match self.store.attributes(key).await {
                Ok(attrs) => {
                    job.deliver(Ok((key.to_string(), attrs.size_bytes))).await;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    job.deliver(Err(WalkError::new(key, WalkErrorKind::Read(e)))).await;
                }
            }
        })
    }
}

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

    let walker = Walker::new(store.clone(), config.walk.clone())?;
    let cancel = walker.cancellation();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            cancel.cancel();
        }
    });

    let summary = walker
        .run(targets, Arc::new(KeyLister { store }), |result| {
            if let Ok((key, size)) = result {
                println!("{}\t{}", size, key);
            }
            Ok(())
        })
        .await;

    info!(
        objects = summary.delivered.saturating_sub(summary.errors_of("read")),
        errors = summary.total_errors(),
        "Done"
    );
    Ok(())
}
