//! Byte-level codecs: compression and record framing

pub mod lines;
pub mod compress;

pub use self::lines::{LineCodec, LineFrame};
pub use self::compress::{Bzip2Codec, ZstdCodec};

use crate::error::ConfigError;
use crate::store::ObjectReader;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::Result as IoResult;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

pub type CodecFuture<'a, T> = Pin<Box<dyn Future<Output = IoResult<T>> + Send + 'a>>;

/// Byte counts for one compression run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// A streaming compression codec
pub trait CompressionCodec: Send + Sync {
    /// Key suffix marking data written by this codec
    fn suffix(&self) -> &'static str;

    /// Compress everything from `reader` into `writer`, then shut the
    /// writer down. A store writer commits on shutdown, so a run that
    /// fails or is dropped part way leaves no target behind.
    fn compress<'a>(
        &'a self,
        reader: &'a mut (dyn AsyncRead + Send + Unpin),
        writer: &'a mut (dyn AsyncWrite + Send + Unpin),
    ) -> CodecFuture<'a, CompressStats>;

    /// Wrap `reader` so it yields decompressed bytes
    fn decompressing_reader(&self, reader: ObjectReader) -> ObjectReader;
}

/// Compression formats a mirror can write and a stream can read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressionFormat {
    /// `.bz2`, the format of existing Open Access mirrors
    #[default]
    Bzip2,
    /// `.zst`
    Zstd,
}

impl CompressionFormat {
    pub const ALL: [CompressionFormat; 2] = [CompressionFormat::Bzip2, CompressionFormat::Zstd];

    pub fn suffix(self) -> &'static str {
        match self {
            CompressionFormat::Bzip2 => ".bz2",
            CompressionFormat::Zstd => ".zst",
        }
    }

    /// Format implied by a key's suffix
    pub fn for_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|format| key.ends_with(format.suffix()))
    }

    pub fn codec(self) -> Arc<dyn CompressionCodec> {
        match self {
            CompressionFormat::Bzip2 => Arc::new(Bzip2Codec),
            CompressionFormat::Zstd => Arc::new(ZstdCodec::default()),
        }
    }
}

impl FromStr for CompressionFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bzip2" | "bz2" => Ok(CompressionFormat::Bzip2),
            "zstd" | "zst" => Ok(CompressionFormat::Zstd),
            _ => Err(ConfigError::InvalidValue {
                name: "compression",
                value: s.to_string(),
            }),
        }
    }
}

/// Target key for a compressed copy of `key`
pub fn compressed_key(key: &str, format: CompressionFormat) -> String {
    format!("{}{}", key, format.suffix())
}

/// Decoder for a leaf, chosen by its key suffix
pub fn codec_for_key(key: &str) -> Option<Arc<dyn CompressionCodec>> {
    CompressionFormat::for_key(key).map(CompressionFormat::codec)
}
