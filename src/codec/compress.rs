//! Streaming bzip2 and zstd over `async-compression`
//!
//! Encoding copies the source into an encoder wrapped around the target
//! writer. Decoding buffers the object reader and accepts concatenated
//! streams, as written by parallel compressors.

use super::{CodecFuture, CompressStats, CompressionCodec};
use crate::store::ObjectReader;
use async_compression::tokio::bufread::{BzDecoder, ZstdDecoder};
use async_compression::tokio::write::{BzEncoder, ZstdEncoder};
use async_compression::Level;
use std::io::Result as IoResult;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::io::InspectWriter;

/// zstd's own default level
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Copy `reader` into `encoder` and finish the compressed stream
async fn encode_all<E>(reader: &mut (dyn AsyncRead + Send + Unpin), encoder: &mut E) -> IoResult<u64>
where
    E: AsyncWrite + Unpin,
{
    let bytes_in = tokio::io::copy(reader, encoder).await?;
    encoder.shutdown().await?;
    Ok(bytes_in)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Bzip2Codec;

impl CompressionCodec for Bzip2Codec {
    fn suffix(&self) -> &'static str {
        ".bz2"
    }

    fn compress<'a>(
        &'a self,
        reader: &'a mut (dyn AsyncRead + Send + Unpin),
        writer: &'a mut (dyn AsyncWrite + Send + Unpin),
    ) -> CodecFuture<'a, CompressStats> {
        Box::pin(async move {
            let mut bytes_out = 0u64;
            let counted = InspectWriter::new(writer, |chunk: &[u8]| bytes_out += chunk.len() as u64);
            let mut encoder = BzEncoder::new(counted);
            let bytes_in = encode_all(reader, &mut encoder).await?;
            drop(encoder);
            Ok(CompressStats { bytes_in, bytes_out })
        })
    }

    fn decompressing_reader(&self, reader: ObjectReader) -> ObjectReader {
        let mut decoder = BzDecoder::new(BufReader::new(reader));
        decoder.multiple_members(true);
        Box::new(decoder)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        ZstdCodec { level }
    }

    pub fn level(&self) -> i32 {
        self.level
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::new(DEFAULT_ZSTD_LEVEL)
    }
}

impl CompressionCodec for ZstdCodec {
    fn suffix(&self) -> &'static str {
        ".zst"
    }

    fn compress<'a>(
        &'a self,
        reader: &'a mut (dyn AsyncRead + Send + Unpin),
        writer: &'a mut (dyn AsyncWrite + Send + Unpin),
    ) -> CodecFuture<'a, CompressStats> {
        Box::pin(async move {
            let mut bytes_out = 0u64;
            let counted = InspectWriter::new(writer, |chunk: &[u8]| bytes_out += chunk.len() as u64);
            let mut encoder = ZstdEncoder::with_quality(counted, Level::Precise(self.level));
            let bytes_in = encode_all(reader, &mut encoder).await?;
            drop(encoder);
            Ok(CompressStats { bytes_in, bytes_out })
        })
    }

    fn decompressing_reader(&self, reader: ObjectReader) -> ObjectReader {
        let mut decoder = ZstdDecoder::new(BufReader::new(reader));
        decoder.multiple_members(true);
        Box::new(decoder)
    }
}
