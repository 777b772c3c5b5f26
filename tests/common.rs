//! Test utilities & fixtures.
//! Builds small synthetic region files so scanner tests need no real world save.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chestlocator::world::nbt::{self, Tag};
use chestlocator::world::region::{HEADER_BYTES, SECTOR_BYTES};
use flate2::write::ZlibEncoder;
use flate2::Compression;

pub fn compound(entries: Vec<(&str, Tag)>) -> Tag {
    Tag::Compound(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<BTreeMap<_, _>>(),
    )
}

pub fn string(s: &str) -> Tag {
    Tag::String(s.to_string())
}

/// `{id, Count, Slot}` item compound.
pub fn item(id: &str, count: i8, slot: i8) -> Tag {
    compound(vec![
        ("id", string(id)),
        ("Count", Tag::Byte(count)),
        ("Slot", Tag::Byte(slot)),
    ])
}

/// Block entity at `(x, y, z)`; `items` of `None` leaves the item list out entirely.
pub fn block_entity(id: &str, at: (i32, i32, i32), items: Option<Vec<Tag>>) -> Tag {
    let mut entries = vec![
        ("id", string(id)),
        ("x", Tag::Int(at.0)),
        ("y", Tag::Int(at.1)),
        ("z", Tag::Int(at.2)),
    ];
    if let Some(items) = items {
        entries.push(("Items", Tag::List(items)));
    }
    compound(entries)
}

/// Chunk in the current layout: block entities at the root.
pub fn chunk(block_entities: Vec<Tag>) -> Tag {
    compound(vec![
        ("DataVersion", Tag::Int(3700)),
        ("block_entities", Tag::List(block_entities)),
    ])
}

/// Region file image from `(header slot, compression byte, payload)`; payloads must
/// already be compressed as declared.
#[allow(dead_code)]
pub fn build_region(chunks: &[(usize, u8, Vec<u8>)]) -> Vec<u8> {
    let mut out = vec![0u8; HEADER_BYTES];
    for (index, kind, payload) in chunks {
        let offset = out.len() / SECTOR_BYTES;
        let mut body = Vec::with_capacity(payload.len() + 5);
        body.extend_from_slice(&((payload.len() + 1) as u32).to_be_bytes());
        body.push(*kind);
        body.extend_from_slice(payload);
        let sectors = body.len().div_ceil(SECTOR_BYTES);
        body.resize(sectors * SECTOR_BYTES, 0);
        let entry = ((offset as u32) << 8) | (sectors.min(255) as u32);
        out[index * 4..index * 4 + 4].copy_from_slice(&entry.to_be_bytes());
        out.extend_from_slice(&body);
    }
    out
}

/// Write `chunks` (header slot, chunk tag) as a zlib-compressed region file.
#[allow(dead_code)] // not every test binary writes regions
pub fn write_region(dir: &Path, name: &str, chunks: Vec<(usize, Tag)>) -> PathBuf {
    write_region_with_kind(dir, name, 2, chunks)
}

/// Like `write_region`, but every chunk header carries compression byte `kind`
/// (the payload is still zlib).
#[allow(dead_code)]
pub fn write_region_with_kind(dir: &Path, name: &str, kind: u8, chunks: Vec<(usize, Tag)>) -> PathBuf {
    let payloads: Vec<(usize, u8, Vec<u8>)> = chunks
        .into_iter()
        .map(|(index, tag)| {
            let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
            enc.write_all(&nbt::to_bytes("", &tag)).unwrap();
            (index, kind, enc.finish().unwrap())
        })
        .collect();
    let path = dir.join(name);
    std::fs::write(&path, build_region(&payloads)).unwrap();
    path
}
