use std::path::PathBuf;

use chrono::Utc;
use log::{debug, trace};
use sled::transaction::{ConflictableTransactionResult, TransactionResult, TransactionalTree};
use sled::{IVec, Transactional};

use crate::config::RegistryConfig;
use crate::metrics;
use crate::registry::errors::{abort, RegistryError};
use crate::registry::types::{
    Coordinate, SlotDescriptor, SlotEntry, StorageMetadata, StorageRecord, StorageWithSlots,
    SLOT_SCHEMA_VERSION, STORAGE_SCHEMA_VERSION,
};
use crate::validation::{validate_item_id, validate_slots};

pub type Result<T> = std::result::Result<T, RegistryError>;

const TREE_STORAGES: &str = "storages";
const TREE_COORDS: &str = "coords";
const TREE_SLOTS: &str = "slots";
const TREE_ITEMS: &str = "items";

/// Separator between the item id and the storage/position suffix in the item index.
const ITEM_KEY_SEPARATOR: u8 = 0;

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn slot_key(storage_id: u64, position: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&storage_id.to_be_bytes());
    key[8..].copy_from_slice(&position.to_be_bytes());
    key
}

fn item_prefix(item_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(item_id.len() + 1);
    key.extend_from_slice(item_id.as_bytes());
    key.push(ITEM_KEY_SEPARATOR);
    key
}

fn item_key(item_id: &str, storage_id: u64, position: u32) -> Vec<u8> {
    let mut key = item_prefix(item_id);
    key.extend_from_slice(&slot_key(storage_id, position));
    key
}

fn decode_id(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| RegistryError::Corrupt(format!("id of {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

/// Split the `storage_id ++ position` suffix off an item index key.
fn decode_item_suffix(key: &[u8], prefix_len: usize) -> Result<(u64, u32)> {
    let suffix = key.get(prefix_len..).unwrap_or_default();
    if suffix.len() != 12 {
        return Err(RegistryError::Corrupt(format!(
            "item index suffix of {} bytes",
            suffix.len()
        )));
    }
    let storage_id = decode_id(&suffix[..8])?;
    let mut position = [0u8; 4];
    position.copy_from_slice(&suffix[8..]);
    Ok((storage_id, u32::from_be_bytes(position)))
}

fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode_record(bytes: &[u8]) -> Result<StorageRecord> {
    let record: StorageRecord = bincode::deserialize(bytes)?;
    if record.schema_version != STORAGE_SCHEMA_VERSION {
        return Err(RegistryError::SchemaMismatch {
            entity: "storage",
            expected: STORAGE_SCHEMA_VERSION,
            found: record.schema_version,
        });
    }
    Ok(record)
}

fn decode_slot(bytes: &[u8]) -> Result<SlotEntry> {
    let slot: SlotEntry = bincode::deserialize(bytes)?;
    if slot.schema_version != SLOT_SCHEMA_VERSION {
        return Err(RegistryError::SchemaMismatch {
            entity: "slot",
            expected: SLOT_SCHEMA_VERSION,
            found: slot.schema_version,
        });
    }
    Ok(slot)
}

/// Read a record and all of its slots inside an open transaction.
fn read_storage(
    storages: &TransactionalTree,
    slots: &TransactionalTree,
    storage_id: u64,
) -> ConflictableTransactionResult<Option<StorageWithSlots>, RegistryError> {
    let Some(raw) = storages.get(id_key(storage_id))? else {
        return Ok(None);
    };
    let record = decode_record(&raw).map_err(abort)?;
    let mut entries = Vec::with_capacity(record.slot_count as usize);
    for position in 0..record.slot_count {
        let Some(raw_slot) = slots.get(slot_key(storage_id, position))? else {
            return Err(abort(RegistryError::Corrupt(format!(
                "storage {} is missing slot position {}",
                storage_id, position
            ))));
        };
        entries.push(decode_slot(&raw_slot).map_err(abort)?);
    }
    Ok(Some(StorageWithSlots {
        record,
        slots: entries,
    }))
}

/// Remove every slot row and item index entry owned by `record`.
fn remove_slots(
    slots: &TransactionalTree,
    items: &TransactionalTree,
    record: &StorageRecord,
) -> ConflictableTransactionResult<(), RegistryError> {
    for position in 0..record.slot_count {
        if let Some(old) = slots.remove(&slot_key(record.id, position)[..])? {
            let old = decode_slot(&old).map_err(abort)?;
            items.remove(item_key(&old.item_id, record.id, position))?;
        }
    }
    Ok(())
}

/// Builder so callers and tests can pick a path, a throwaway store, or tuning knobs.
pub struct RegistryBuilder {
    path: Option<PathBuf>,
    max_upsert_retries: u32,
    flush_every_write: bool,
}

impl RegistryBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            max_upsert_retries: RegistryConfig::default().max_upsert_retries,
            flush_every_write: true,
        }
    }

    /// In-memory store removed on drop (used by tests).
    pub fn temporary() -> Self {
        Self {
            path: None,
            max_upsert_retries: RegistryConfig::default().max_upsert_retries,
            flush_every_write: false,
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self {
            path: Some(PathBuf::from(&config.db_path)),
            max_upsert_retries: config.max_upsert_retries,
            flush_every_write: config.flush_every_write,
        }
    }

    pub fn max_upsert_retries(mut self, retries: u32) -> Self {
        self.max_upsert_retries = retries;
        self
    }

    pub fn flush_every_write(mut self, flush: bool) -> Self {
        self.flush_every_write = flush;
        self
    }

    pub fn open(self) -> Result<Registry> {
        let db = match &self.path {
            Some(path) => {
                std::fs::create_dir_all(path)?;
                sled::open(path)?
            }
            None => sled::Config::new().temporary(true).open()?,
        };
        Ok(Registry {
            storages: db.open_tree(TREE_STORAGES)?,
            coords: db.open_tree(TREE_COORDS)?,
            slots: db.open_tree(TREE_SLOTS)?,
            items: db.open_tree(TREE_ITEMS)?,
            db,
            max_upsert_retries: self.max_upsert_retries,
            flush_every_write: self.flush_every_write,
        })
    }
}

/// Record and slot totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub storages: usize,
    pub slots: usize,
    pub indexed_items: usize,
}

/// Sled-backed registry of storage containers keyed by coordinate.
///
/// Four trees make up the schema:
/// - `storages`: id -> record
/// - `coords`: unique (x, y, z) index -> id
/// - `slots`: `storage_id ++ position` -> slot (prefix doubles as the storage index)
/// - `items`: `item_id ++ NUL ++ storage_id ++ position` -> slot id
///
/// Every write touches the trees it needs inside a single serializable transaction,
/// so the coordinate uniqueness rule and slot cascade hold under concurrent writers.
pub struct Registry {
    db: sled::Db,
    storages: sled::Tree,
    coords: sled::Tree,
    slots: sled::Tree,
    items: sled::Tree,
    max_upsert_retries: u32,
    flush_every_write: bool,
}

impl Registry {
    /// Open (or create) the registry rooted at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        RegistryBuilder::new(path).open()
    }

    pub fn open_with_config(config: &RegistryConfig) -> Result<Self> {
        RegistryBuilder::from_config(config).open()
    }

    /// Throwaway in-memory registry.
    pub fn temporary() -> Result<Self> {
        RegistryBuilder::temporary().open()
    }

    fn after_write(&self) -> Result<()> {
        if self.flush_every_write {
            self.db.flush()?;
        }
        Ok(())
    }

    /// Insert a new record at `location`. Aborts with `ConstraintViolation` if the
    /// coordinate index already holds an entry.
    fn insert_new(
        &self,
        id: u64,
        location: Coordinate,
        metadata: &StorageMetadata,
    ) -> Result<StorageRecord> {
        let coord_key = location.index_key();
        let record = StorageRecord::new(id, location, metadata.clone());
        let bytes = serialize(&record)?;
        let result: TransactionResult<(), RegistryError> = (&self.storages, &self.coords)
            .transaction(|(storages, coords)| {
                if coords.get(coord_key)?.is_some() {
                    return Err(abort(RegistryError::ConstraintViolation(format!(
                        "a storage already exists at {}",
                        location
                    ))));
                }
                coords.insert(&coord_key[..], &id_key(id)[..])?;
                storages.insert(&id_key(id)[..], bytes.clone())?;
                Ok(())
            });
        result?;
        Ok(record)
    }

    /// Overwrite the metadata of the record at `location`, keeping its identity and slots.
    fn update_existing(
        &self,
        location: Coordinate,
        metadata: &StorageMetadata,
    ) -> Result<Option<StorageRecord>> {
        let coord_key = location.index_key();
        let result: TransactionResult<Option<StorageRecord>, RegistryError> =
            (&self.storages, &self.coords).transaction(|(storages, coords)| {
                let Some(id_bytes) = coords.get(coord_key)? else {
                    return Ok(None);
                };
                let id = decode_id(&id_bytes).map_err(abort)?;
                let Some(raw) = storages.get(id_key(id))? else {
                    return Err(abort(RegistryError::Corrupt(format!(
                        "coordinate {} points at missing storage {}",
                        location, id
                    ))));
                };
                let mut record = decode_record(&raw).map_err(abort)?;
                record.metadata = metadata.clone();
                record.updated_at = Utc::now();
                storages.insert(&id_key(id)[..], serialize(&record).map_err(abort)?)?;
                Ok(Some(record))
            });
        Ok(result?)
    }

    /// Insert or update the storage at `location`.
    ///
    /// An existing record keeps its id and slots and takes the new metadata. A new
    /// coordinate gets a freshly generated id. When a concurrent writer claims the
    /// coordinate between our lookup and insert, the coordinate index rejects the
    /// insert and the call falls back to updating the winner's record.
    pub fn upsert_storage(
        &self,
        location: Coordinate,
        metadata: StorageMetadata,
    ) -> Result<StorageRecord> {
        let mut races = 0u32;
        loop {
            if let Some(record) = self.update_existing(location, &metadata)? {
                metrics::inc_storages_updated();
                debug!("storage {} at {} updated", record.id, location);
                self.after_write()?;
                return Ok(record);
            }
            let id = self.db.generate_id()?;
            match self.insert_new(id, location, &metadata) {
                Ok(record) => {
                    metrics::inc_storages_created();
                    debug!("storage {} created at {}", record.id, location);
                    self.after_write()?;
                    return Ok(record);
                }
                Err(err) if err.is_constraint_violation() && races < self.max_upsert_retries => {
                    races += 1;
                    metrics::inc_upsert_races();
                    debug!(
                        "lost insert race at {} (attempt {}), retrying as update",
                        location, races
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Atomically replace the full slot set of `storage_id` with `slots`, in order.
    pub fn replace_inventory(&self, storage_id: u64, slots: &[SlotDescriptor]) -> Result<()> {
        validate_slots(slots)?;
        let mut prepared: Vec<(SlotEntry, Vec<u8>)> = Vec::with_capacity(slots.len());
        for (position, descriptor) in slots.iter().enumerate() {
            let entry =
                SlotEntry::from_descriptor(self.db.generate_id()?, storage_id, position as u32, descriptor);
            let bytes = serialize(&entry)?;
            prepared.push((entry, bytes));
        }
        let slot_count = prepared.len() as u32;

        let result: TransactionResult<(), RegistryError> =
            (&self.storages, &self.slots, &self.items).transaction(|(storages, slot_tree, items)| {
                let Some(raw) = storages.get(id_key(storage_id))? else {
                    return Err(abort(RegistryError::NotFound(storage_id)));
                };
                let mut record = decode_record(&raw).map_err(abort)?;
                remove_slots(slot_tree, items, &record)?;
                for (entry, bytes) in &prepared {
                    slot_tree.insert(&slot_key(storage_id, entry.position)[..], bytes.clone())?;
                    items.insert(
                        item_key(&entry.item_id, storage_id, entry.position),
                        &id_key(entry.id)[..],
                    )?;
                }
                record.slot_count = slot_count;
                record.updated_at = Utc::now();
                storages.insert(&id_key(storage_id)[..], serialize(&record).map_err(abort)?)?;
                Ok(())
            });
        result?;

        metrics::observe_inventory_replaced(slots.len());
        debug!("storage {} inventory replaced ({} slots)", storage_id, slot_count);
        self.after_write()
    }

    /// Remove a storage and, in the same transaction, its coordinate entry, slots and
    /// item index entries. Returns `false` when the id was already absent.
    pub fn delete_storage(&self, storage_id: u64) -> Result<bool> {
        let result: TransactionResult<bool, RegistryError> =
            (&self.storages, &self.coords, &self.slots, &self.items).transaction(
                |(storages, coords, slot_tree, items)| {
                    let Some(raw) = storages.remove(&id_key(storage_id)[..])? else {
                        return Ok(false);
                    };
                    let record = decode_record(&raw).map_err(abort)?;
                    let coord_key = record.location.index_key();
                    if let Some(owner) = coords.get(coord_key)? {
                        if decode_id(&owner).map_err(abort)? == storage_id {
                            coords.remove(&coord_key[..])?;
                        }
                    }
                    remove_slots(slot_tree, items, &record)?;
                    Ok(true)
                },
            );
        let removed = result?;
        if removed {
            metrics::inc_storages_deleted();
            debug!("storage {} deleted", storage_id);
            self.after_write()?;
        } else {
            trace!("delete of absent storage {} ignored", storage_id);
        }
        Ok(removed)
    }

    /// Point lookup through the coordinate index. Record and slots come from one
    /// transaction, so a concurrent inventory replacement is seen whole or not at all.
    pub fn find_by_coordinate(&self, location: Coordinate) -> Result<Option<StorageWithSlots>> {
        let coord_key = location.index_key();
        let result: TransactionResult<Option<StorageWithSlots>, RegistryError> =
            (&self.storages, &self.coords, &self.slots).transaction(
                |(storages, coords, slot_tree)| {
                    let Some(id_bytes) = coords.get(coord_key)? else {
                        return Ok(None);
                    };
                    let id = decode_id(&id_bytes).map_err(abort)?;
                    read_storage(storages, slot_tree, id)
                },
            );
        Ok(result?)
    }

    pub fn get_storage(&self, storage_id: u64) -> Result<Option<StorageWithSlots>> {
        let result: TransactionResult<Option<StorageWithSlots>, RegistryError> =
            (&self.storages, &self.slots)
                .transaction(|(storages, slot_tree)| read_storage(storages, slot_tree, storage_id));
        Ok(result?)
    }

    /// Lazily enumerate `(record, slot)` pairs holding `item_id`, via the item index.
    /// Each call starts a fresh scan of current state. An id that could never have
    /// been stored yields nothing.
    pub fn find_by_item(&self, item_id: &str) -> ItemMatches {
        let prefix = item_prefix(item_id);
        let iter = match validate_item_id(item_id, 0) {
            Ok(()) => Some(self.items.scan_prefix(&prefix)),
            Err(err) => {
                debug!("item search for invalid id: {}", err);
                None
            }
        };
        ItemMatches {
            item_id: item_id.to_string(),
            prefix_len: prefix.len(),
            iter,
            storages: self.storages.clone(),
            slots: self.slots.clone(),
        }
    }

    /// Lazily iterate every storage record in id order.
    pub fn storages(&self) -> impl Iterator<Item = Result<StorageRecord>> + '_ {
        self.storages
            .iter()
            .values()
            .map(|value| value.map_err(RegistryError::from).and_then(|v| decode_record(&v)))
    }

    /// Records attributed to `region_file`. Full scan; meant for maintenance passes.
    pub fn storages_in_region(&self, region_file: &str) -> Result<Vec<StorageRecord>> {
        let mut found = Vec::new();
        for record in self.storages() {
            let record = record?;
            if record.metadata.region_file.as_deref() == Some(region_file) {
                found.push(record);
            }
        }
        Ok(found)
    }

    pub fn len(&self) -> usize {
        self.storages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storages.is_empty()
    }

    pub fn count_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            storages: self.storages.len(),
            slots: self.slots.len(),
            indexed_items: self.items.len(),
        }
    }

    /// Drop every record, slot and index entry. Not atomic across trees: run it only
    /// when no other writer is active (fresh imports).
    pub fn clear(&self) -> Result<()> {
        self.items.clear()?;
        self.slots.clear()?;
        self.coords.clear()?;
        self.storages.clear()?;
        self.db.flush()?;
        debug!("registry cleared");
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// Cursor over item index matches. Entries whose storage or slot changed after the
/// index was read are skipped, so every yielded pair reflects live state.
pub struct ItemMatches {
    item_id: String,
    prefix_len: usize,
    // None when the searched id fails validation.
    iter: Option<sled::Iter>,
    storages: sled::Tree,
    slots: sled::Tree,
}

impl ItemMatches {
    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    fn resolve(&self, storage_id: u64, position: u32) -> Result<Option<(StorageRecord, SlotEntry)>> {
        let item_id = self.item_id.as_str();
        let result: TransactionResult<Option<(StorageRecord, SlotEntry)>, RegistryError> =
            (&self.storages, &self.slots).transaction(|(storages, slot_tree)| {
                let Some(raw) = storages.get(id_key(storage_id))? else {
                    return Ok(None);
                };
                let record = decode_record(&raw).map_err(abort)?;
                if position >= record.slot_count {
                    return Ok(None);
                }
                let Some(raw_slot) = slot_tree.get(slot_key(storage_id, position))? else {
                    return Ok(None);
                };
                let slot = decode_slot(&raw_slot).map_err(abort)?;
                if slot.item_id != item_id {
                    return Ok(None);
                }
                Ok(Some((record, slot)))
            });
        Ok(result?)
    }
}

impl Iterator for ItemMatches {
    type Item = Result<(StorageRecord, SlotEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (key, _): (IVec, IVec) = match self.iter.as_mut()?.next()? {
                Ok(pair) => pair,
                Err(err) => return Some(Err(err.into())),
            };
            let (storage_id, position) = match decode_item_suffix(&key, self.prefix_len) {
                Ok(decoded) => decoded,
                Err(err) => return Some(Err(err)),
            };
            match self.resolve(storage_id, position) {
                Ok(Some(found)) => return Some(Ok(found)),
                Ok(None) => {
                    trace!("skipping stale item index entry for storage {}", storage_id);
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::temporary().expect("registry")
    }

    #[test]
    fn upsert_twice_keeps_identity() {
        let reg = registry();
        let at = Coordinate::new(1, 2, 3);
        let first = reg
            .upsert_storage(at, StorageMetadata::new().with_entity_id("minecraft:chest"))
            .expect("first upsert");
        let second = reg
            .upsert_storage(at, StorageMetadata::new().with_entity_id("minecraft:barrel"))
            .expect("second upsert");
        assert_eq!(first.id, second.id);
        assert_eq!(reg.len(), 1);
        let stored = reg.find_by_coordinate(at).expect("lookup").expect("present");
        assert_eq!(stored.record.metadata.entity_id.as_deref(), Some("minecraft:barrel"));
    }

    #[test]
    fn replace_inventory_rejects_unknown_storage() {
        let reg = registry();
        let err = reg
            .replace_inventory(999, &[SlotDescriptor::new(0, "minecraft:stone", 1)])
            .expect_err("missing storage");
        assert!(matches!(err, RegistryError::NotFound(999)));
    }

    #[test]
    fn replace_inventory_validates_before_writing() {
        let reg = registry();
        let rec = reg
            .upsert_storage(Coordinate::new(0, 0, 0), StorageMetadata::new())
            .expect("upsert");
        reg.replace_inventory(rec.id, &[SlotDescriptor::new(0, "minecraft:stone", 1)])
            .expect("replace");
        let err = reg
            .replace_inventory(rec.id, &[SlotDescriptor::new(0, "minecraft:stone", -1)])
            .expect_err("negative count");
        assert!(matches!(err, RegistryError::Validation(_)));
        let stored = reg.get_storage(rec.id).expect("get").expect("present");
        assert_eq!(stored.slots.len(), 1);
        assert_eq!(stored.slots[0].count, 1);
    }

    #[test]
    fn item_index_key_layout() {
        let key = item_key("minecraft:dirt", 5, 2);
        let prefix_len = item_prefix("minecraft:dirt").len();
        assert_eq!(decode_item_suffix(&key, prefix_len).unwrap(), (5, 2));
        assert!(decode_item_suffix(&key[..key.len() - 1], prefix_len).is_err());
    }

    #[test]
    fn delete_is_idempotent() {
        let reg = registry();
        let rec = reg
            .upsert_storage(Coordinate::new(4, 5, 6), StorageMetadata::new())
            .expect("upsert");
        assert!(reg.delete_storage(rec.id).expect("delete"));
        assert!(!reg.delete_storage(rec.id).expect("second delete"));
        assert!(reg.is_empty());
    }

    #[test]
    fn stats_track_slots_and_index() {
        let reg = registry();
        let rec = reg
            .upsert_storage(Coordinate::new(4, 5, 6), StorageMetadata::new())
            .expect("upsert");
        reg.replace_inventory(
            rec.id,
            &[
                SlotDescriptor::new(0, "minecraft:stone", 1),
                SlotDescriptor::new(1, "minecraft:stone", 5),
            ],
        )
        .expect("replace");
        assert_eq!(
            reg.stats(),
            RegistryStats {
                storages: 1,
                slots: 2,
                indexed_items: 2
            }
        );
        reg.clear().expect("clear");
        assert_eq!(reg.stats(), RegistryStats::default());
    }

    #[test]
    fn find_by_item_with_nul_in_id_matches_nothing() {
        let reg = registry();
        let rec = reg
            .upsert_storage(Coordinate::new(7, 8, 9), StorageMetadata::new())
            .expect("upsert");
        reg.replace_inventory(rec.id, &[SlotDescriptor::new(0, "minecraft:stone", 1)])
            .expect("replace");

        // The trailing NUL would otherwise reach into the storage-id bytes of the key.
        let mut hits = reg.find_by_item("minecraft:stone\0");
        assert!(hits.next().is_none());
        assert_eq!(reg.find_by_item("bad\0id").count(), 0);
        assert_eq!(reg.find_by_item("").count(), 0);
        assert_eq!(reg.find_by_item("minecraft:stone").count(), 1);
    }
}
