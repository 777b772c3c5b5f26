//! # Chestlocator - storage container registry for block-game worlds
//!
//! Chestlocator records every storage container (chests, barrels, shulker boxes, ...)
//! found in a world's region files, keyed by its block coordinate, together with the
//! container's inventory. It answers two questions quickly:
//!
//! - what is inside the container at `(x, y, z)`?
//! - which containers hold a given item?
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chestlocator::registry::{Coordinate, Registry, SlotDescriptor, StorageMetadata};
//!
//! fn main() -> Result<(), chestlocator::registry::RegistryError> {
//!     let registry = Registry::open("data/registry")?;
//!     let record = registry.upsert_storage(
//!         Coordinate::new(10, 64, -5),
//!         StorageMetadata::new().with_region("r.0.0.mca", 0).with_entity_id("minecraft:chest"),
//!     )?;
//!     registry.replace_inventory(record.id, &[SlotDescriptor::new(0, "minecraft:diamond", 3)])?;
//!
//!     for hit in registry.find_by_item("minecraft:diamond") {
//!         let (storage, slot) = hit?;
//!         println!("{} x{} at {}", slot.item_id, slot.count, storage.location);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`registry`] - sled-backed records, slots, coordinate and item indexes
//! - [`world`] - NBT decoding, Anvil region files, and the import scanner
//! - [`config`] - `chestlocator.toml` loading and defaults
//! - [`validation`] - input checks run before any write
//! - [`metrics`] - process-wide counters for writes and scans
//! - [`logutil`] - log-safe rendering of strings taken from world data
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Region files   │ ← r.<x>.<z>.mca
//! └─────────────────┘
//!          │  world::scanner (one blocking task per file)
//! ┌─────────────────┐
//! │    Registry     │ ← upsert / replace / delete in sled transactions
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Lookups       │ ← by coordinate, by item
//! └─────────────────┘
//! ```

pub mod config;
pub mod logutil;
pub mod metrics;
pub mod registry;
pub mod validation;
pub mod world;
