//! Path resolver
//!
//! Turns a logical root (an aggregate alias, a unit code, a prefix or a
//! single key) into the walk targets the tree walker consumes. The traversal
//! mode is decided here, once, from configuration; nothing downstream tests
//! the store to find out whether listing works.

use crate::codec::CompressionFormat;
use crate::config::DatasetConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How leaves under a root are discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TraversalMode {
    /// Delimiter listing, recursing into containers
    #[default]
    Listable,
    /// A precomputed key set; the store is never listed
    Enumerated,
}

/// One root to traverse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkTarget {
    pub root_path: String,
    pub mode: TraversalMode,
    /// Full leaf keys, in dispatch order (empty for `Listable`)
    pub leaf_keys: Vec<String>,
}

impl WalkTarget {
    pub fn listable(root_path: impl Into<String>) -> Self {
        WalkTarget {
            root_path: root_path.into(),
            mode: TraversalMode::Listable,
            leaf_keys: Vec::new(),
        }
    }

    pub fn enumerated(root_path: impl Into<String>, leaf_keys: Vec<String>) -> Self {
        WalkTarget {
            root_path: root_path.into(),
            mode: TraversalMode::Enumerated,
            leaf_keys,
        }
    }
}

const SHARD_DIGITS: [char; 10] = ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
const SHARD_LETTERS: [char; 6] = ['a', 'b', 'c', 'd', 'e', 'f'];

/// The 256 shard file names of a unit: `00`..`ff` plus `extension`.
///
/// First character is the outer loop, second the inner; digits come before
/// letters in both positions.
pub fn shard_names(extension: &str) -> Vec<String> {
    let alphabet: Vec<char> = SHARD_DIGITS
        .iter()
        .chain(SHARD_LETTERS.iter())
        .copied()
        .collect();

    let mut names = Vec::with_capacity(alphabet.len() * alphabet.len());
    for first in &alphabet {
        for second in &alphabet {
            names.push(format!("{}{}{}", first, second, extension));
        }
    }
    names
}

/// Maps roots to walk targets for one store
#[derive(Debug, Clone)]
pub struct PathResolver {
    dataset: DatasetConfig,
    mode: TraversalMode,
    shards: Vec<String>,
}

impl PathResolver {
    pub fn new(dataset: DatasetConfig, mode: TraversalMode) -> Self {
        let shards = shard_names(&dataset.shard_extension);
        PathResolver {
            dataset,
            mode,
            shards,
        }
    }

    pub fn mode(&self) -> TraversalMode {
        self.mode
    }

    pub fn dataset(&self) -> &DatasetConfig {
        &self.dataset
    }

    /// Resolve one root.
    ///
    /// - An alias expands to one target per unit, in unit order.
    /// - A unit code (or its directory) yields one target for that unit.
    /// - A key ending in the shard extension, optionally followed by a
    ///   compression suffix, is a single leaf.
    /// - Anything else is a listable prefix. The empty root is the whole
    ///   store when listable and every unit when enumerated.
    pub fn resolve(&self, root: &str) -> Vec<WalkTarget> {
        let trimmed = root.trim_matches('/');

        let targets = if self.dataset.is_alias(trimmed)
            || (trimmed.is_empty() && self.mode == TraversalMode::Enumerated)
        {
            self.dataset
                .units
                .iter()
                .map(|unit| self.unit_target(unit))
                .collect()
        } else if let Some(unit) = self.dataset.unit_for(trimmed) {
            vec![self.unit_target(unit)]
        } else if self.is_leaf_key(root) {
            vec![WalkTarget::enumerated(root, vec![root.to_string()])]
        } else if trimmed.is_empty() {
            vec![WalkTarget::listable("")]
        } else {
            vec![WalkTarget::listable(format!("{}/", trimmed))]
        };

        debug!(root = %root, targets = targets.len(), mode = ?self.mode, "Resolved root");
        targets
    }

    /// Resolve many roots, keeping their order
    pub fn resolve_all<S: AsRef<str>>(&self, roots: &[S]) -> Vec<WalkTarget> {
        roots
            .iter()
            .flat_map(|root| self.resolve(root.as_ref()))
            .collect()
    }

    /// `nmah/0a.txt` and `nmah/0a.txt.bz2` name leaves; `archive/v1.2` does not
    fn is_leaf_key(&self, root: &str) -> bool {
        let extension = self.dataset.shard_extension.as_str();
        if root.ends_with('/') || extension.is_empty() {
            return false;
        }
        let stem = match CompressionFormat::for_key(root) {
            Some(format) => &root[..root.len() - format.suffix().len()],
            None => root,
        };
        let name = stem.rsplit('/').next().unwrap_or(stem);
        name.len() > extension.len() && name.ends_with(extension)
    }

    fn unit_target(&self, unit: &str) -> WalkTarget {
        let dir = self.dataset.unit_dir(unit);
        match self.mode {
            TraversalMode::Listable => WalkTarget::listable(dir),
            TraversalMode::Enumerated => {
                let keys = self
                    .shards
                    .iter()
                    .map(|shard| format!("{}{}", dir, shard))
                    .collect();
                WalkTarget::enumerated(dir, keys)
            }
        }
    }
}
