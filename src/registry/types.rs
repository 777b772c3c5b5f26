use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const STORAGE_SCHEMA_VERSION: u8 = 1;
pub const SLOT_SCHEMA_VERSION: u8 = 1;

/// World-block coordinate of a container.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coordinate {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Order-preserving 12-byte key: each axis is sign-flipped then written big-endian,
    /// so byte order matches numeric (x, y, z) order.
    pub fn index_key(&self) -> [u8; 12] {
        let mut key = [0u8; 12];
        for (chunk, axis) in key.chunks_exact_mut(4).zip([self.x, self.y, self.z]) {
            chunk.copy_from_slice(&((axis as u32) ^ 0x8000_0000).to_be_bytes());
        }
        key
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

impl From<(i32, i32, i32)> for Coordinate {
    fn from((x, y, z): (i32, i32, i32)) -> Self {
        Self::new(x, y, z)
    }
}

/// Provenance and denormalized fields supplied on every upsert. An upsert replaces
/// all of these on the stored record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageMetadata {
    /// Region file the container was read from, e.g. `r.0.0.mca`.
    pub region_file: Option<String>,
    /// Chunk slot within the region file (0..1024).
    pub chunk_index: Option<u32>,
    /// Block-entity or entity type, e.g. `minecraft:chest`.
    pub entity_id: Option<String>,
    /// Owning faction or organization label.
    pub owner_label: Option<String>,
    /// Relevance/activity flag set by downstream tooling.
    pub relevant: Option<bool>,
    pub world_name: Option<String>,
    /// Opaque source representation kept for lossless round-trips.
    pub raw_state: Option<Vec<u8>>,
}

impl StorageMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, region_file: impl Into<String>, chunk_index: u32) -> Self {
        self.region_file = Some(region_file.into());
        self.chunk_index = Some(chunk_index);
        self
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_owner_label(mut self, owner_label: impl Into<String>) -> Self {
        self.owner_label = Some(owner_label.into());
        self
    }

    pub fn with_relevant(mut self, relevant: bool) -> Self {
        self.relevant = Some(relevant);
        self
    }

    pub fn with_world_name(mut self, world_name: impl Into<String>) -> Self {
        self.world_name = Some(world_name.into());
        self
    }

    pub fn with_raw_state(mut self, raw_state: Vec<u8>) -> Self {
        self.raw_state = Some(raw_state);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageRecord {
    pub id: u64,
    pub location: Coordinate,
    pub metadata: StorageMetadata,
    pub updated_at: DateTime<Utc>,
    /// Number of slot rows currently owned by this record. Slot keys are
    /// `storage_id ++ 0..slot_count`, which lets transactions address them directly.
    pub slot_count: u32,
    pub schema_version: u8,
}

impl StorageRecord {
    pub(crate) fn new(id: u64, location: Coordinate, metadata: StorageMetadata) -> Self {
        Self {
            id,
            location,
            metadata,
            updated_at: Utc::now(),
            slot_count: 0,
            schema_version: STORAGE_SCHEMA_VERSION,
        }
    }

    /// Human label used by the CLI listing: entity id without the namespace.
    pub fn kind(&self) -> &str {
        match self.metadata.entity_id.as_deref() {
            Some(id) => id.rsplit(':').next().unwrap_or(id),
            None => "unknown",
        }
    }
}

/// One slot of an inventory as supplied to `replace_inventory`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotDescriptor {
    pub slot: i32,
    pub item_id: String,
    pub count: i32,
    pub display_name: String,
    pub raw_item_state: Option<Vec<u8>>,
}

impl SlotDescriptor {
    pub fn new(slot: i32, item_id: impl Into<String>, count: i32) -> Self {
        let item_id = item_id.into();
        let display_name = item_id
            .rsplit(':')
            .next()
            .unwrap_or(item_id.as_str())
            .to_string();
        Self {
            slot,
            item_id,
            count,
            display_name,
            raw_item_state: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_raw_item_state(mut self, raw: Vec<u8>) -> Self {
        self.raw_item_state = Some(raw);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotEntry {
    pub id: u64,
    pub storage_id: u64,
    /// Position within the sequence passed to the last `replace_inventory`.
    pub position: u32,
    pub slot: i32,
    pub item_id: String,
    pub count: i32,
    pub display_name: String,
    pub raw_item_state: Option<Vec<u8>>,
    pub schema_version: u8,
}

impl SlotEntry {
    pub(crate) fn from_descriptor(
        id: u64,
        storage_id: u64,
        position: u32,
        descriptor: &SlotDescriptor,
    ) -> Self {
        Self {
            id,
            storage_id,
            position,
            slot: descriptor.slot,
            item_id: descriptor.item_id.clone(),
            count: descriptor.count,
            display_name: descriptor.display_name.clone(),
            raw_item_state: descriptor.raw_item_state.clone(),
            schema_version: SLOT_SCHEMA_VERSION,
        }
    }
}

/// A storage record together with its slots, in replaced order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageWithSlots {
    pub record: StorageRecord,
    pub slots: Vec<SlotEntry>,
}

impl StorageWithSlots {
    pub fn total_items(&self) -> i64 {
        self.slots.iter().map(|s| s.count as i64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_key_preserves_numeric_order() {
        let mut coords = vec![
            Coordinate::new(10, 64, -5),
            Coordinate::new(-10, 64, -5),
            Coordinate::new(0, -64, 0),
            Coordinate::new(i32::MIN, 0, 0),
            Coordinate::new(i32::MAX, 0, 0),
            Coordinate::new(0, 0, 1),
        ];
        let mut by_key = coords.clone();
        by_key.sort_by_key(|c| c.index_key());
        coords.sort();
        assert_eq!(coords, by_key);
    }

    #[test]
    fn descriptor_defaults_display_name_to_bare_id() {
        let d = SlotDescriptor::new(0, "minecraft:diamond", 3);
        assert_eq!(d.display_name, "diamond");
        let named = d.with_display_name("Shiny");
        assert_eq!(named.display_name, "Shiny");
    }

    #[test]
    fn record_kind_strips_namespace() {
        let meta = StorageMetadata::new().with_entity_id("minecraft:barrel");
        let record = StorageRecord::new(1, Coordinate::new(0, 0, 0), meta);
        assert_eq!(record.kind(), "barrel");
    }
}
