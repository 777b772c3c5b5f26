//! Reading storage containers out of a world save: NBT decoding, Anvil region files,
//! and the scanner that feeds the registry.

pub mod nbt;
pub mod region;
pub mod scanner;

use thiserror::Error;

use crate::registry::RegistryError;
use crate::validation::ValidationError;

pub use region::RegionFile;
pub use scanner::{import_region, scan_region, RegionImport, RegionScan, ScanOptions, ScannedStorage};

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk {index}: invalid NBT: {source}")]
    Nbt {
        index: usize,
        #[source]
        source: nbt::NbtError,
    },

    #[error("chunk {index}: decompression failed: {source}")]
    Decompress {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("chunk {index}: unsupported compression type {kind}")]
    UnsupportedCompression { index: usize, kind: u8 },

    #[error("chunk {index}: stored in an external .mcc file")]
    ExternalChunk { index: usize },

    #[error("chunk {index}: data runs past end of file")]
    TruncatedChunk { index: usize },

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}
