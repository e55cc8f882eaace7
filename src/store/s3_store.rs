//! S3 backend over the `object_store` crate
//!
//! Reads stream straight from the GET body; writes go through a buffered
//! multipart upload that only completes on `shutdown`. Public buckets such
//! as the Smithsonian one are read with unsigned requests. A single-part
//! ETag is the object's MD5 and compares with local fingerprints; any other
//! ETag stays opaque.

use crate::config::S3Config;
use crate::store::object_store::{
    group_by_delimiter, ContentFingerprint, FingerprintAlgorithm, ListResult, ObjectAttributes,
    ObjectReader, ObjectStore, ObjectWriter, StoreEntry, StoreFuture,
};
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::buffered::BufWriter;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore as ObjectStoreTrait;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::sync::Arc;
use tokio_util::io::StreamReader;

/// A bucket, optionally scoped under a key prefix
#[derive(Clone)]
pub struct S3ObjectStore {
    store: Arc<dyn ObjectStoreTrait>,
    prefix: String,
}

impl S3ObjectStore {
    /// Signed requests take credentials from `AWS_ACCESS_KEY_ID` and
    /// `AWS_SECRET_ACCESS_KEY`; anonymous ones skip signing entirely.
    pub fn new(config: &S3Config) -> IoResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        if config.anonymous {
            builder = builder.with_skip_signature(true);
        } else {
            if let Ok(key_id) = std::env::var("AWS_ACCESS_KEY_ID") {
                builder = builder.with_access_key_id(key_id);
            }
            if let Ok(secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
                builder = builder.with_secret_access_key(secret);
            }
        }

        let store = builder.build().map_err(|e| {
            IoError::new(
                ErrorKind::InvalidInput,
                format!("cannot open bucket '{}': {}", config.bucket, e),
            )
        })?;

        Ok(S3ObjectStore {
            store: Arc::new(store),
            prefix: config.prefix.trim_matches('/').to_string(),
        })
    }

    /// Wrap any `object_store` backend, e.g. `InMemory` in tests
    pub fn from_store(store: Arc<dyn ObjectStoreTrait>, prefix: String) -> Self {
        S3ObjectStore { store, prefix }
    }

    fn full_path(&self, key: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(key)
        } else {
            ObjectPath::from(format!("{}/{}", self.prefix, key))
        }
    }

    /// Key relative to this store's prefix
    fn strip_prefix(&self, path: &ObjectPath) -> String {
        let full = path.to_string();
        match full
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        {
            Some(rest) if !self.prefix.is_empty() => rest.to_string(),
            _ => full,
        }
    }

    /// Absent keys must surface as `NotFound`; the mirror relies on it
    fn map_error(err: object_store::Error) -> IoError {
        match &err {
            object_store::Error::NotFound { .. } => IoError::new(ErrorKind::NotFound, err.to_string()),
            object_store::Error::AlreadyExists { .. } => {
                IoError::new(ErrorKind::AlreadyExists, err.to_string())
            }
            _ => IoError::new(ErrorKind::Other, err.to_string()),
        }
    }

    async fn list_with_delimiter(&self, prefix: &str) -> IoResult<Vec<StoreEntry>> {
        let dir = self.full_path(prefix);
        let result = self
            .store
            .list_with_delimiter(Some(&dir))
            .await
            .map_err(Self::map_error)?;

        let mut entries: Vec<StoreEntry> = result
            .common_prefixes
            .iter()
            .map(|p| StoreEntry::container(format!("{}/", self.strip_prefix(p))))
            .chain(
                result
                    .objects
                    .iter()
                    .map(|meta| StoreEntry::leaf(self.strip_prefix(&meta.location))),
            )
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn list_flat(&self, prefix: &str, delimiter: &str) -> IoResult<Vec<StoreEntry>> {
        // Object paths are segment-based; list the enclosing directory and
        // filter on the raw string prefix.
        let dir = match prefix.rfind('/') {
            Some(idx) => self.full_path(&prefix[..idx]),
            None => self.full_path(""),
        };
        let metas: Vec<_> = self
            .store
            .list(Some(&dir))
            .try_collect()
            .await
            .map_err(Self::map_error)?;
        let mut keys: Vec<String> = metas
            .iter()
            .map(|meta| self.strip_prefix(&meta.location))
            .collect();
        keys.sort();
        Ok(group_by_delimiter(
            keys.iter().map(String::as_str),
            prefix,
            delimiter,
        ))
    }
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ObjectStore for S3ObjectStore {
    fn list<'a>(
        &'a self,
        prefix: &'a str,
        delimiter: &'a str,
        _continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListResult> {
        Box::pin(async move {
            // object_store pages internally; one call returns everything
            let entries = if delimiter == "/" && (prefix.is_empty() || prefix.ends_with('/')) {
                self.list_with_delimiter(prefix).await?
            } else {
                self.list_flat(prefix, delimiter).await?
            };
            Ok(ListResult {
                entries,
                continuation_token: None,
            })
        })
    }

    fn open_reader<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectReader> {
        Box::pin(async move {
            let path = self.full_path(key);
            let result = self.store.get(&path).await.map_err(Self::map_error)?;
            let stream = result.into_stream().map_err(Self::map_error);
            Ok(Box::new(StreamReader::new(stream)) as ObjectReader)
        })
    }

    fn open_writer<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectWriter> {
        Box::pin(async move {
            let path = self.full_path(key);
            // Multipart upload completes on shutdown; dropping aborts it
            let writer = BufWriter::new(Arc::clone(&self.store), path);
            Ok(Box::new(writer) as ObjectWriter)
        })
    }

    fn attributes<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectAttributes> {
        Box::pin(async move {
            let path = self.full_path(key);
            let meta = self.store.head(&path).await.map_err(Self::map_error)?;

            let fingerprint = match &meta.e_tag {
                Some(tag) => ContentFingerprint::from_etag(tag),
                None => ContentFingerprint::new(
                    FingerprintAlgorithm::ETag,
                    format!("{}-{}", meta.size, meta.last_modified.timestamp_millis()),
                ),
            };

            Ok(ObjectAttributes {
                key: key.to_string(),
                size_bytes: meta.size as u64,
                fingerprint,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use object_store::PutPayload;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn backed_store(prefix: &str) -> (Arc<InMemory>, S3ObjectStore) {
        let backing = Arc::new(InMemory::new());
        let store = S3ObjectStore::from_store(backing.clone(), prefix.to_string());
        (backing, store)
    }

    #[test]
    fn test_full_path_with_prefix() {
        let (_, store) = backed_store("metadata/edan");
        assert_eq!(
            store.full_path("nmah/00.txt").to_string(),
            "metadata/edan/nmah/00.txt"
        );
    }

    #[test]
    fn test_strip_prefix() {
        let (_, store) = backed_store("metadata/edan");
        let full = ObjectPath::from("metadata/edan/nmah/00.txt");
        assert_eq!(store.strip_prefix(&full), "nmah/00.txt");
    }

    #[tokio::test]
    async fn test_list_with_delimiter_synthesizes_containers() {
        let (backing, store) = backed_store("");
        for key in ["nmah/00.txt", "nmah/01.txt", "saam/00.txt"] {
            backing
                .put(&ObjectPath::from(key), PutPayload::from_static(b"{}"))
                .await
                .unwrap();
        }

        let root = store.list("", "/", None).await.unwrap();
        assert_eq!(
            root.entries,
            vec![StoreEntry::container("nmah/"), StoreEntry::container("saam/")]
        );

        let unit = store.list("nmah/", "/", None).await.unwrap();
        assert_eq!(unit.entries.len(), 2);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_, store) = backed_store("mirror");

        let mut writer = store.open_writer("nmah/00.txt").await.unwrap();
        writer.write_all(b"{\"id\":1}\n").await.unwrap();
        writer.shutdown().await.unwrap();

        let mut reader = store.open_reader("nmah/00.txt").await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"{\"id\":1}\n");

        // `InMemory` tags objects with a counter, not a digest
        let attrs = store.attributes("nmah/00.txt").await.unwrap();
        assert_eq!(attrs.size_bytes, out.len() as u64);
        assert_eq!(attrs.fingerprint.algorithm, FingerprintAlgorithm::ETag);
    }
}
