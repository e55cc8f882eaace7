//! Prefix-scoped view of another store
//!
//! Every key passed in is resolved under a fixed prefix, and every key
//! returned by a listing has that prefix stripped. Used to open the
//! metadata tree of a bucket as if it were the bucket root.

use crate::store::object_store::{
    ListResult, ObjectAttributes, ObjectReader, ObjectStore, ObjectWriter, SharedStore,
    StoreEntry, StoreFuture,
};

#[derive(Clone)]
pub struct PrefixedStore {
    inner: SharedStore,
    prefix: String,
}

impl PrefixedStore {
    /// Scope `inner` under `prefix`; a trailing `/` is added if missing
    pub fn new(inner: SharedStore, prefix: &str) -> Self {
        let trimmed = prefix.trim_matches('/');
        let prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{}/", trimmed)
        };
        PrefixedStore { inner, prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn strip(&self, key: String) -> String {
        match key.strip_prefix(&self.prefix) {
            Some(rest) => rest.to_string(),
            None => key,
        }
    }
}

impl std::fmt::Debug for PrefixedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefixedStore")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ObjectStore for PrefixedStore {
    fn list<'a>(
        &'a self,
        prefix: &'a str,
        delimiter: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListResult> {
        Box::pin(async move {
            let full = self.full_key(prefix);
            let result = self.inner.list(&full, delimiter, continuation_token).await?;
            Ok(ListResult {
                entries: result
                    .entries
                    .into_iter()
                    .map(|e| StoreEntry {
                        key: self.strip(e.key),
                        is_container: e.is_container,
                    })
                    .collect(),
                continuation_token: result.continuation_token,
            })
        })
    }

    fn open_reader<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectReader> {
        Box::pin(async move {
            let full = self.full_key(key);
            self.inner.open_reader(&full).await
        })
    }

    fn open_writer<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectWriter> {
        Box::pin(async move {
            let full = self.full_key(key);
            self.inner.open_writer(&full).await
        })
    }

    fn attributes<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectAttributes> {
        Box::pin(async move {
            let full = self.full_key(key);
            let mut attrs = self.inner.attributes(&full).await?;
            attrs.key = key.to_string();
            Ok(attrs)
        })
    }
}
