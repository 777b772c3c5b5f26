//! Finds storage block entities in region files, normalizes them into registry
//! input, and imports them one region file at a time.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use serde_json::Value;

use super::nbt::Tag;
use super::region::RegionFile;
use super::WorldError;
use crate::config::ScanConfig;
use crate::logutil::escape_log;
use crate::metrics;
use crate::registry::{Coordinate, Registry, RegistryError, SlotDescriptor, StorageMetadata};
use crate::validation::{validate_slot, validate_slots, ValidationError};

const DEFAULT_NAMESPACE: &str = "minecraft:";
const SHULKER_BOX_SUFFIX: &str = "_shulker_box";

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Lower-cased, namespaced id prefixes counted as storage.
    pub storage_ids: Vec<String>,
    pub skip_loot_only: bool,
    pub world_name: Option<String>,
    /// Delete records attributed to a region file that the new scan no longer finds.
    pub prune: bool,
}

impl ScanOptions {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            storage_ids: config.storage_ids.iter().map(|id| normalize_id(id)).collect(),
            skip_loot_only: config.skip_loot_only,
            world_name: config.world_name.clone(),
            prune: false,
        }
    }

    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from_config(&ScanConfig::default())
    }
}

/// One container ready for `upsert_storage` + `replace_inventory`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedStorage {
    pub location: Coordinate,
    pub metadata: StorageMetadata,
    pub slots: Vec<SlotDescriptor>,
}

#[derive(Debug, Default)]
pub struct RegionScan {
    pub region_file: String,
    pub chunks: u64,
    pub chunk_errors: u64,
    /// Header slots whose chunk could not be read. Their containers are unknown, not gone.
    pub failed_chunks: HashSet<usize>,
    /// Storage entities dropped by normalization (missing coordinates and similar).
    pub rejected: u64,
    pub storages: Vec<ScannedStorage>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegionImport {
    pub region_file: String,
    pub chunks: u64,
    pub chunk_errors: u64,
    pub storages_imported: u64,
    pub storage_errors: u64,
    pub slots_written: u64,
    pub pruned: u64,
}

/// Lower-case an id and add the default namespace when it has none.
pub fn normalize_id(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    if lower.contains(':') {
        lower
    } else {
        format!("{}{}", DEFAULT_NAMESPACE, lower)
    }
}

fn strip_namespace(id: &str) -> &str {
    id.rsplit(':').next().unwrap_or(id)
}

pub fn is_storage_entity_id(entity_id: &str, storage_ids: &[String]) -> bool {
    let id = normalize_id(entity_id);
    id.ends_with(SHULKER_BOX_SUFFIX) || storage_ids.iter().any(|prefix| id.starts_with(prefix.as_str()))
}

/// Containers that have only a loot table and no item list were never opened; their
/// contents do not exist yet.
pub fn should_save_storage(entity: &Tag) -> bool {
    if entity.get_any(&["Items", "items"]).is_some() {
        return true;
    }
    entity.get("LootTable").is_none()
}

/// Block entity list of a chunk, for both the pre-1.18 (`Level.TileEntities`) and
/// current (`block_entities`) layouts.
pub fn block_entities(chunk: &Tag) -> &[Tag] {
    let level = chunk.get_any(&["Level", "level"]).unwrap_or(chunk);
    ["BlockEntities", "block_entities", "TileEntities"]
        .iter()
        .find_map(|key| level.get(key).and_then(Tag::as_list))
        .unwrap_or(&[])
}

fn axis(entity: &Tag, name: char, keys: &[&str]) -> Result<i32, ValidationError> {
    let value = entity
        .get_any(keys)
        .and_then(Tag::as_i64)
        .ok_or(ValidationError::MissingCoordinate { axis: name })?;
    i32::try_from(value).map_err(|_| ValidationError::InvalidCoordinate {
        input: value.to_string(),
        reason: format!("{} axis out of range", name),
    })
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

// Chat text components: plain strings, `{"text": .., "extra": [..]}` objects, or arrays.
fn flatten_text(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => out.push_str(s),
        Value::Array(parts) => parts.iter().for_each(|p| flatten_text(p, out)),
        Value::Object(map) => {
            if let Some(text) = map.get("text") {
                flatten_text(text, out);
            }
            if let Some(extra) = map.get("extra") {
                flatten_text(extra, out);
            }
        }
        _ => {}
    }
}

fn text_component(tag: &Tag) -> Option<String> {
    let value: Value = match tag {
        Tag::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())),
        other => serde_json::to_value(other).ok()?,
    };
    let mut out = String::new();
    flatten_text(&value, &mut out);
    let out = out.trim().to_string();
    (!out.is_empty()).then_some(out)
}

fn display_name(item: &Tag) -> Option<String> {
    let legacy = item
        .get("tag")
        .and_then(|t| t.get("display"))
        .and_then(|d| d.get("Name"));
    let component = item
        .get_any(&["components", "Components"])
        .and_then(|c| c.get_any(&["minecraft:custom_name", "custom_name"]));
    legacy.or(component).and_then(text_component)
}

fn normalize_item(item: &Tag, position: usize) -> Option<SlotDescriptor> {
    item.as_compound()?;
    let raw_id = item.get_any(&["id", "Name"]).and_then(Tag::as_str)?;
    if raw_id.trim().is_empty() {
        return None;
    }
    let item_id = normalize_id(raw_id);
    let count = item
        .get_any(&["Count", "count"])
        .and_then(Tag::as_i64)
        .map(clamp_i32)
        .unwrap_or(1);
    let slot = item
        .get_any(&["Slot", "slot"])
        .and_then(Tag::as_i64)
        .map(clamp_i32)
        .unwrap_or_else(|| clamp_i32(position as i64));
    let name = display_name(item).unwrap_or_else(|| strip_namespace(&item_id).to_string());
    let mut descriptor = SlotDescriptor::new(slot, item_id, count).with_display_name(name);
    if let Ok(raw) = serde_json::to_vec(item) {
        descriptor = descriptor.with_raw_item_state(raw);
    }
    // Damaged stacks (negative slot or count) are dropped so the rest of the container still imports.
    if let Err(err) = validate_slot(&descriptor, position) {
        warn!("dropping item {}: {}", escape_log(raw_id), err);
        return None;
    }
    Some(descriptor)
}

/// Turn one storage block entity into registry input.
pub fn normalize(
    entity: &Tag,
    region_file: &str,
    chunk_index: usize,
    options: &ScanOptions,
) -> Result<ScannedStorage, ValidationError> {
    let location = Coordinate::new(
        axis(entity, 'x', &["x", "X"])?,
        axis(entity, 'y', &["y", "Y"])?,
        axis(entity, 'z', &["z", "Z"])?,
    );
    let entity_id = entity
        .get_any(&["id", "Id", "ID"])
        .and_then(Tag::as_str)
        .map(normalize_id)
        .unwrap_or_default();

    let slots = entity
        .get_any(&["Items", "items"])
        .and_then(Tag::as_list)
        .unwrap_or(&[])
        .iter()
        .enumerate()
        .filter_map(|(position, item)| normalize_item(item, position))
        .collect();

    let mut metadata = StorageMetadata::new()
        .with_region(region_file, chunk_index as u32)
        .with_entity_id(entity_id);
    if let Some(world) = &options.world_name {
        metadata = metadata.with_world_name(world.clone());
    }
    if let Ok(raw) = serde_json::to_vec(entity) {
        metadata = metadata.with_raw_state(raw);
    }

    Ok(ScannedStorage {
        location,
        metadata,
        slots,
    })
}

/// Extract every storage container from a region. Chunk and entity failures are
/// logged and counted, never fatal.
pub fn scan_region(region: &RegionFile, options: &ScanOptions) -> RegionScan {
    let mut scan = RegionScan {
        region_file: region.name().to_string(),
        ..RegionScan::default()
    };
    for (index, chunk) in region.chunks() {
        scan.chunks += 1;
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!("{}: skipping chunk: {}", region.name(), err);
                scan.chunk_errors += 1;
                scan.failed_chunks.insert(index);
                continue;
            }
        };
        for entity in block_entities(&chunk) {
            let Some(id) = entity.get_any(&["id", "Id", "ID"]).and_then(Tag::as_str) else {
                continue;
            };
            if !is_storage_entity_id(id, &options.storage_ids) {
                continue;
            }
            if options.skip_loot_only && !should_save_storage(entity) {
                debug!("{}: skipping unopened loot container {}", region.name(), escape_log(id));
                continue;
            }
            match normalize(entity, region.name(), index, options) {
                Ok(storage) => scan.storages.push(storage),
                Err(err) => {
                    warn!(
                        "{}: chunk {}: skipping {}: {}",
                        region.name(),
                        index,
                        escape_log(id),
                        err
                    );
                    scan.rejected += 1;
                }
            }
        }
    }
    scan
}

/// Scan one region file and write its storages into `registry`.
pub fn import_region(
    registry: &Registry,
    path: &Path,
    options: &ScanOptions,
) -> Result<RegionImport, WorldError> {
    let region = RegionFile::open(path)?;
    let scan = scan_region(&region, options);
    let mut report = RegionImport {
        region_file: scan.region_file.clone(),
        chunks: scan.chunks,
        chunk_errors: scan.chunk_errors,
        storage_errors: scan.rejected,
        ..RegionImport::default()
    };

    let scanned: HashSet<Coordinate> = scan.storages.iter().map(|s| s.location).collect();
    for storage in scan.storages {
        let slot_count = storage.slots.len() as u64;
        // Checked before the upsert so a rejected inventory leaves the stored record untouched.
        let result = validate_slots(&storage.slots)
            .map_err(RegistryError::from)
            .and_then(|()| registry.upsert_storage(storage.location, storage.metadata))
            .and_then(|record| registry.replace_inventory(record.id, &storage.slots));
        match result {
            Ok(()) => {
                report.storages_imported += 1;
                report.slots_written += slot_count;
            }
            Err(err) => {
                error!(
                    "{}: failed to store container at {}: {}",
                    report.region_file, storage.location, err
                );
                report.storage_errors += 1;
            }
        }
    }

    if options.prune {
        for record in registry.storages_in_region(&report.region_file)? {
            if scanned.contains(&record.location) {
                continue;
            }
            let unreadable = record
                .metadata
                .chunk_index
                .is_some_and(|index| scan.failed_chunks.contains(&(index as usize)));
            if unreadable {
                debug!(
                    "{}: keeping storage {} at {}, its chunk could not be read",
                    report.region_file, record.id, record.location
                );
                continue;
            }
            if registry.delete_storage(record.id)? {
                debug!("{}: pruned storage {} at {}", report.region_file, record.id, record.location);
                report.pruned += 1;
            }
        }
    }

    registry.flush()?;
    metrics::record_region_scan(
        &report.region_file,
        report.chunks,
        report.chunk_errors,
        report.storages_imported,
        report.storage_errors,
    );
    info!(
        "{}: {} storages ({} slots) from {} chunks; {} chunk errors, {} storage errors, {} pruned",
        report.region_file,
        report.storages_imported,
        report.slots_written,
        report.chunks,
        report.chunk_errors,
        report.storage_errors,
        report.pruned
    );
    Ok(report)
}

/// `*.mca` files directly under `dir`, sorted by name.
pub fn find_region_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "mca") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
