mod gzip;
mod zstandard;

pub use gzip::GzipCompressor;
pub use zstandard::ZstdCompressor;

use pq_backend_api::CompressorRegistry;

/// Build a compressor registry populated with the default compressors.
#[must_use]
pub fn default_registry() -> CompressorRegistry {
    let mut registry = CompressorRegistry::new();
    registry.register(GzipCompressor::default());
    registry.register(ZstdCompressor::default());
    registry
}
