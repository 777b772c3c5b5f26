//! Storage registry: container records keyed by world coordinate, their inventory
//! slots, and an item index for "where is X" queries. Backed by sled.

pub mod errors;
pub mod storage;
pub mod types;

pub use errors::RegistryError;
pub use storage::{ItemMatches, Registry, RegistryBuilder, RegistryStats, Result};
pub use types::{
    Coordinate, SlotDescriptor, SlotEntry, StorageMetadata, StorageRecord, StorageWithSlots,
};
