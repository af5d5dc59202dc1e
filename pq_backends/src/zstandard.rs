use pq_backend_api::{BackendError, BackendResult, Compressor};

/// Zstandard compressor producing `.zst` files.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    /// Compressor with an explicit level.
    #[must_use]
    pub const fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::with_level(zstd::DEFAULT_COMPRESSION_LEVEL)
    }
}

impl Compressor for ZstdCompressor {
    fn id(&self) -> &'static str {
        "zstd"
    }

    fn suffix(&self) -> &'static str {
        "zst"
    }

    fn compress(&self, data: &[u8]) -> BackendResult<Vec<u8>> {
        zstd::encode_all(data, self.level)
            .map_err(|err| BackendError::message(format!("zstd compression failed: {err}")))
    }

    fn decompress(&self, data: &[u8]) -> BackendResult<Vec<u8>> {
        zstd::decode_all(data)
            .map_err(|err| BackendError::message(format!("zstd decompression failed: {err}")))
    }
}
