pub mod codec;
pub mod config;
pub mod delivery;
pub mod error;
pub mod mirror;
pub mod observability;
pub mod query;
pub mod resolver;
pub mod store;
pub mod stream;
pub mod summary;
pub mod throttle;
pub mod walker;

pub use codec::CompressionFormat;
pub use config::{AppConfig, ErrorPolicy, MirrorOptions, StoreConfig, StreamOptions, WalkConfig};
pub use error::{CallbackError, ConfigError, WalkError, WalkErrorKind};
pub use mirror::{MirrorAction, MirrorEngine, MirrorOutcome};
pub use query::{QueryMode, QuerySet, QuerySpec};
pub use resolver::{PathResolver, TraversalMode, WalkTarget};
pub use store::{open_store, ObjectStore, SharedStore};
pub use stream::{Record, RecordStream};
pub use summary::WalkSummary;
pub use walker::{LeafHandler, Walker};
