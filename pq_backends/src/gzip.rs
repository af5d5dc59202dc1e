use std::io::{Read, Write};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use pq_backend_api::{BackendError, BackendResult, Compressor};

/// Gzip compressor producing `.gz` files.
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: u32,
}

impl GzipCompressor {
    /// Compressor with an explicit level (0-9).
    #[must_use]
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::with_level(9)
    }
}

impl Compressor for GzipCompressor {
    fn id(&self) -> &'static str {
        "gzip"
    }

    fn suffix(&self) -> &'static str {
        "gz"
    }

    fn compress(&self, data: &[u8]) -> BackendResult<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(data)
            .map_err(|err| BackendError::message(format!("gzip compression failed: {err}")))?;
        encoder
            .finish()
            .map_err(|err| BackendError::message(format!("gzip compression failed: {err}")))
    }

    fn decompress(&self, data: &[u8]) -> BackendResult<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|err| BackendError::message(format!("gzip decompression failed: {err}")))?;
        Ok(decompressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restores_original_bytes() {
        let compressor = GzipCompressor::default();
        let input = b"diff --git a/x b/x\n".repeat(64);
        let packed = compressor.compress(&input).expect("compress");
        assert!(packed.len() < input.len());
        assert_eq!(compressor.decompress(&packed).expect("decompress"), input);
    }

    #[test]
    fn rejects_garbage() {
        let compressor = GzipCompressor::default();
        assert!(compressor.decompress(b"not gzip").is_err());
    }
}
