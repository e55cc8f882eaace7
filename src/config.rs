//! Configuration
//!
//! Every component takes an immutable configuration value at construction.
//! Binaries build these once: defaults, then an optional TOML file named by
//! `OA_CONFIG`, then environment overrides.
//!
//! ## Environment
//! - `OA_CONFIG`: path to a TOML file (optional)
//! - `OA_WORKERS`: concurrent leaf jobs (default: 10)
//! - `OA_FAIL_FAST`: cancel the whole operation on the first error
//! - `OA_STORE` / `OA_LOCAL_PATH` / `OA_PREFIX`: source store
//! - `OA_TARGET_STORE` / `OA_TARGET_PATH` / `OA_TARGET_PREFIX`: mirror target
//! - `OA_FORCE` / `OA_COMPRESS` / `OA_COMPRESSION`: mirror options (`bzip2` or `zstd`)
//! - `OA_VALIDATE` / `OA_FORMAT` / `OA_QUERY` / `OA_QUERY_MODE`: record stream options
//! - `RUST_LOG` / `OA_LOG_FORMAT`: logging

use crate::codec::CompressionFormat;
use crate::error::{ConfigError, ConfigResult};
use crate::query::{QueryMode, QuerySet};
use crate::resolver::TraversalMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Upper bound on concurrent leaf jobs
pub const MAX_WORKERS: usize = 1024;

/// Organizational units of the Smithsonian Open Access metadata release.
///
/// Order and case are part of the dataset's naming and must not change.
pub const SMITHSONIAN_UNITS: [&str; 33] = [
    "ACAH",
    "ACM",
    "CFCHFOLKLIFE",
    "CHNDM",
    "FBR",
    "FSA",
    "FSG",
    "HAC",
    "HMSG",
    "HSFA",
    "NAA",
    "NASM",
    "NMAAHC",
    "NMAH",
    "NMAI",
    "NMAfA",
    "NMNHANTHRO",
    "NMNHBIRDS",
    "NMNHBOTANY",
    "NMNHEDUCATION",
    "NMNHENTO",
    "NMNHFISHES",
    "NMNHHERPS",
    "NMNHINV",
    "NMNHMAMMALS",
    "NMNHMINSCI",
    "NMNHPALEO",
    "NPG",
    "NPM",
    "SAAM",
    "SI",
    "SIA",
    "SIL",
];

/// The dataset's fixed naming: units, aggregate aliases, shard files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Unit codes, in expansion order
    pub units: Vec<String>,
    /// Roots that expand to every unit
    pub aliases: Vec<String>,
    /// Extension of each shard file
    pub shard_extension: String,
    /// Key prefix of the metadata tree within the bucket
    pub metadata_prefix: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self::smithsonian()
    }
}

impl DatasetConfig {
    pub fn smithsonian() -> Self {
        DatasetConfig {
            units: SMITHSONIAN_UNITS.iter().map(|u| u.to_string()).collect(),
            aliases: vec!["metadata".to_string(), "objects".to_string()],
            shard_extension: ".txt".to_string(),
            metadata_prefix: "metadata/edan".to_string(),
        }
    }

    pub fn is_alias(&self, root: &str) -> bool {
        let root = root.trim_matches('/');
        self.aliases.iter().any(|a| a == root)
    }

    /// Unit code named by `root`, either as the code itself or its directory
    pub fn unit_for(&self, root: &str) -> Option<&str> {
        let root = root.trim_matches('/');
        self.units
            .iter()
            .find(|u| u.as_str() == root || u.to_lowercase() == root)
            .map(String::as_str)
    }

    /// Directory holding a unit's shard files, with a trailing `/`
    pub fn unit_dir(&self, unit: &str) -> String {
        format!("{}/", unit.to_lowercase())
    }
}

/// What the operation does when a job reports an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorPolicy {
    /// Report the error and keep going
    #[default]
    ContinueOnError,
    /// Cancel the whole operation on the first error
    FailFast,
}

/// Traversal and delivery settings shared by both engines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkConfig {
    /// Maximum leaf jobs in flight (default: 10)
    pub workers: usize,
    /// Delivery channel capacity (default: 1024)
    pub channel_capacity: usize,
    pub error_policy: ErrorPolicy,
    /// Longest accepted record line in bytes (default: 32MB)
    pub max_line_bytes: usize,
}

impl Default for WalkConfig {
    fn default() -> Self {
        WalkConfig {
            workers: 10,
            channel_capacity: 1024,
            error_policy: ErrorPolicy::ContinueOnError,
            max_line_bytes: 32 * 1024 * 1024, // 32MB
        }
    }
}

impl WalkConfig {
    /// Configuration for tests (few workers, small channel)
    pub fn test() -> Self {
        WalkConfig {
            workers: 4,
            channel_capacity: 16,
            error_policy: ErrorPolicy::ContinueOnError,
            max_line_bytes: 64 * 1024, // 64KB
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn fail_fast(mut self) -> Self {
        self.error_policy = ErrorPolicy::FailFast;
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: self.workers,
                max: MAX_WORKERS,
            });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidChannelCapacity(self.channel_capacity));
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_line_bytes",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

/// How a compressing mirror treats an existing target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressionComparePolicy {
    /// Never compare; every compressed job transfers
    #[default]
    SkipComparison,
    /// An existing compressed target counts as up to date
    SkipIfTargetExists,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorOptions {
    /// Transfer without comparing fingerprints
    pub force: bool,
    /// Compress into `<key>` plus the format's suffix
    pub compress: bool,
    pub compression: CompressionFormat,
    pub compression_compare: CompressionComparePolicy,
}

/// Per-record processing for the record stream engine
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Parse each line and re-serialize it compactly
    pub validate: bool,
    /// Pretty-print each delivered body
    pub format: bool,
    /// Drop records that do not match
    pub query: Option<QuerySet>,
}

/// Serializable form of `StreamOptions`; queries are kept as text
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub validate: bool,
    pub format: bool,
    /// `{PATH}={REGEXP}` specs
    pub query: Vec<String>,
    pub query_mode: QueryMode,
}

impl StreamSettings {
    pub fn to_options(&self) -> ConfigResult<StreamOptions> {
        let query = if self.query.is_empty() {
            None
        } else {
            Some(QuerySet::parse(&self.query, self.query_mode)?)
        };
        Ok(StreamOptions {
            validate: self.validate,
            format: self.format,
            query,
        })
    }
}

/// Type of object store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectStoreType {
    /// In-memory store (for tests)
    InMemory,
    /// Local filesystem
    LocalFs,
    /// Amazon S3 or compatible
    #[cfg(feature = "s3")]
    S3,
}

impl FromStr for ObjectStoreType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "inmemory" => Ok(ObjectStoreType::InMemory),
            "local" | "localfs" | "fs" => Ok(ObjectStoreType::LocalFs),
            #[cfg(feature = "s3")]
            "s3" => Ok(ObjectStoreType::S3),
            _ => Err(ConfigError::UnknownStoreType(s.to_string())),
        }
    }
}

/// S3 configuration
#[cfg(feature = "s3")]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// Key prefix within bucket
    #[serde(default)]
    pub prefix: String,
    /// AWS region
    pub region: String,
    /// Custom endpoint (for S3-compatible services like MinIO)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Send unsigned requests (public buckets)
    #[serde(default)]
    pub anonymous: bool,
}

/// One side of an operation: which store, where, and how to traverse it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub store_type: ObjectStoreType,
    /// Key prefix applied to every key (empty for none)
    #[serde(default)]
    pub prefix: String,
    /// Local filesystem path (for LocalFs store)
    #[serde(default)]
    pub local_path: Option<PathBuf>,
    /// S3 configuration (for S3 store)
    #[cfg(feature = "s3")]
    #[serde(default)]
    pub s3: Option<S3Config>,
    /// `Enumerated` when the store refuses delimiter listing
    #[serde(default)]
    pub traversal: TraversalMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        StoreConfig {
            store_type: ObjectStoreType::InMemory,
            prefix: String::new(),
            local_path: None,
            #[cfg(feature = "s3")]
            s3: None,
            traversal: TraversalMode::Listable,
        }
    }

    /// Create config for a local directory tree
    pub fn local(path: impl Into<PathBuf>) -> Self {
        StoreConfig {
            store_type: ObjectStoreType::LocalFs,
            local_path: Some(path.into()),
            ..Self::in_memory()
        }
    }

    /// The public Smithsonian Open Access bucket.
    ///
    /// The bucket serves objects anonymously but refuses delimiter listing,
    /// so traversal is always by enumerated shard names.
    #[cfg(feature = "s3")]
    pub fn smithsonian() -> Self {
        let dataset = DatasetConfig::smithsonian();
        StoreConfig {
            store_type: ObjectStoreType::S3,
            prefix: String::new(),
            local_path: None,
            s3: Some(S3Config {
                bucket: "smithsonian-open-access".to_string(),
                prefix: dataset.metadata_prefix,
                region: "us-west-2".to_string(),
                endpoint: None,
                anonymous: true,
            }),
            traversal: TraversalMode::Enumerated,
        }
    }

    /// Switch backend by name; `smithsonian` selects the public bucket preset
    fn with_store_kind(mut self, kind: &str) -> ConfigResult<Self> {
        #[cfg(feature = "s3")]
        if kind.eq_ignore_ascii_case("smithsonian") {
            return Ok(Self::smithsonian());
        }
        self.store_type = kind.parse()?;
        Ok(self)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_traversal(mut self, traversal: TraversalMode) -> Self {
        self.traversal = traversal;
        self
    }

    /// Override from `OA_{side}STORE`, `OA_{side}PATH` (`OA_LOCAL_PATH` for
    /// the source), `OA_{side}PREFIX` and `OA_{side}ENUMERATE`
    fn apply_env(mut self, side: &str) -> ConfigResult<Self> {
        if let Some(kind) = env_var(&format!("OA_{}STORE", side)) {
            self = self.with_store_kind(&kind)?;
        }
        let path_var = if side.is_empty() {
            "OA_LOCAL_PATH".to_string()
        } else {
            format!("OA_{}PATH", side)
        };
        if let Some(path) = env_var(&path_var) {
            self.local_path = Some(PathBuf::from(path));
        }
        if let Some(prefix) = env_var(&format!("OA_{}PREFIX", side)) {
            self.prefix = prefix;
        }
        if let Some(value) = env_var(&format!("OA_{}ENUMERATE", side)) {
            if parse_bool("enumerate", &value)? {
                self.traversal = TraversalMode::Enumerated;
            }
        }
        Ok(self)
    }
}

/// Logging settings for the binaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        LogConfig {
            filter: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            json: std::env::var("OA_LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }
}

/// Everything a binary needs, in one value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dataset: DatasetConfig,
    pub walk: WalkConfig,
    /// Store the roots are read from
    pub source: StoreConfig,
    /// Mirror destination
    pub target: Option<StoreConfig>,
    pub mirror: MirrorOptions,
    pub stream: StreamSettings,
    pub log: LogConfig,
}

impl AppConfig {
    /// Parse a TOML document
    pub fn from_toml(text: &str) -> ConfigResult<Self> {
        let config: AppConfig = toml::from_str(text)?;
        config.walk.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load configuration: `OA_CONFIG` file if set, then environment overrides
    pub fn from_env() -> ConfigResult<Self> {
        let base = match env_var("OA_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => AppConfig {
                log: LogConfig::from_env(),
                ..AppConfig::default()
            },
        };
        base.apply_env()
    }

    fn apply_env(mut self) -> ConfigResult<Self> {
        if let Some(workers) = env_var("OA_WORKERS") {
            self.walk.workers = parse_value("OA_WORKERS", &workers)?;
        }
        if let Some(value) = env_var("OA_FAIL_FAST") {
            if parse_bool("OA_FAIL_FAST", &value)? {
                self.walk.error_policy = ErrorPolicy::FailFast;
            }
        }

        self.source = self.source.apply_env("")?;
        if env_var("OA_TARGET_STORE").is_some() || env_var("OA_TARGET_PATH").is_some() {
            let target = self.target.take().unwrap_or_else(StoreConfig::in_memory);
            self.target = Some(target.apply_env("TARGET_")?);
        }

        if let Some(value) = env_var("OA_FORCE") {
            self.mirror.force = parse_bool("OA_FORCE", &value)?;
        }
        if let Some(value) = env_var("OA_COMPRESS") {
            self.mirror.compress = parse_bool("OA_COMPRESS", &value)?;
        }
        if let Some(value) = env_var("OA_COMPRESSION") {
            self.mirror.compression = value.parse()?;
        }

        if let Some(value) = env_var("OA_VALIDATE") {
            self.stream.validate = parse_bool("OA_VALIDATE", &value)?;
        }
        if let Some(value) = env_var("OA_FORMAT") {
            self.stream.format = parse_bool("OA_FORMAT", &value)?;
        }
        if let Some(value) = env_var("OA_QUERY") {
            self.stream.query = value
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = env_var("OA_QUERY_MODE") {
            self.stream.query_mode = value.parse()?;
        }

        self.walk.validate()?;
        Ok(self)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_value<T: FromStr>(name: &'static str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    })
}

fn parse_bool(name: &'static str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        }),
    }
}
