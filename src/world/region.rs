//! Anvil region files (`r.<x>.<z>.mca`): a 32x32 grid of chunks, each stored as a
//! compressed NBT blob addressed through an 8 KiB header.

use std::io::Read;
use std::path::Path;

use flate2::read::{GzDecoder, ZlibDecoder};
use log::warn;

use super::nbt::{self, Tag};
use super::WorldError;

pub const SECTOR_BYTES: usize = 4096;
/// Location table (1024 x u32) followed by the timestamp table (1024 x u32).
pub const HEADER_BYTES: usize = 2 * SECTOR_BYTES;
pub const CHUNKS_PER_REGION: usize = 1024;

/// Flag in the compression byte marking a chunk stored in a separate `.mcc` file.
const EXTERNAL_CHUNK_FLAG: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zlib,
    Uncompressed,
}

impl Compression {
    fn from_byte(kind: u8) -> Option<Self> {
        match kind {
            1 => Some(Compression::Gzip),
            2 => Some(Compression::Zlib),
            3 => Some(Compression::Uncompressed),
            _ => None,
        }
    }
}

/// A region file held in memory.
pub struct RegionFile {
    name: String,
    data: Vec<u8>,
}

impl RegionFile {
    pub fn open(path: &Path) -> Result<Self, WorldError> {
        let data = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::from_bytes(name, data))
    }

    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        let name = name.into();
        if data.len() < HEADER_BYTES {
            warn!(
                "region {} is {} bytes, shorter than its header; treating as empty",
                name,
                data.len()
            );
        }
        Self { name, data }
    }

    /// File name without directory, e.g. `r.0.-1.mca`.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn location(&self, index: usize) -> Option<(usize, usize)> {
        if self.data.len() < HEADER_BYTES || index >= CHUNKS_PER_REGION {
            return None;
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.data[index * 4..index * 4 + 4]);
        let entry = u32::from_be_bytes(raw);
        let offset = (entry >> 8) as usize;
        let sectors = (entry & 0xFF) as usize;
        if offset == 0 || sectors == 0 {
            None
        } else {
            Some((offset, sectors))
        }
    }

    /// Header slots (0..1024) that point at chunk data.
    pub fn present_chunks(&self) -> Vec<usize> {
        (0..CHUNKS_PER_REGION)
            .filter(|i| self.location(*i).is_some())
            .collect()
    }

    /// Decode the chunk at header slot `index`. `Ok(None)` for an absent chunk.
    pub fn read_chunk(&self, index: usize) -> Result<Option<Tag>, WorldError> {
        let Some((offset, _)) = self.location(index) else {
            return Ok(None);
        };
        let start = offset * SECTOR_BYTES;
        let header = self
            .data
            .get(start..start + 5)
            .ok_or(WorldError::TruncatedChunk { index })?;
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if length == 0 {
            return Ok(None);
        }
        let kind = header[4];
        if kind & EXTERNAL_CHUNK_FLAG != 0 {
            return Err(WorldError::ExternalChunk { index });
        }
        let compression =
            Compression::from_byte(kind).ok_or(WorldError::UnsupportedCompression { index, kind })?;
        // `length` counts the compression byte.
        let payload = self
            .data
            .get(start + 5..start + 4 + length)
            .ok_or(WorldError::TruncatedChunk { index })?;

        let raw = match compression {
            Compression::Uncompressed => payload.to_vec(),
            Compression::Gzip => inflate(GzDecoder::new(payload), index)?,
            Compression::Zlib => inflate(ZlibDecoder::new(payload), index)?,
        };
        let (_, root) = nbt::from_bytes(&raw).map_err(|source| WorldError::Nbt { index, source })?;
        Ok(Some(root))
    }

    /// Every present chunk with its decode result, in header order.
    pub fn chunks(&self) -> impl Iterator<Item = (usize, Result<Tag, WorldError>)> + '_ {
        self.present_chunks()
            .into_iter()
            .filter_map(move |index| match self.read_chunk(index) {
                Ok(Some(tag)) => Some((index, Ok(tag))),
                Ok(None) => None,
                Err(err) => Some((index, Err(err))),
            })
    }
}

fn inflate<R: Read>(mut decoder: R, index: usize) -> Result<Vec<u8>, WorldError> {
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|source| WorldError::Decompress { index, source })?;
    Ok(out)
}
