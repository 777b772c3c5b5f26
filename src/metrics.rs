//! Process-wide counters for registry writes and region scans.
//! Read by the CLI after an import; cheap enough to bump on every operation.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

static STORAGES_CREATED: AtomicU64 = AtomicU64::new(0);
static STORAGES_UPDATED: AtomicU64 = AtomicU64::new(0);
static UPSERT_RACES: AtomicU64 = AtomicU64::new(0);
static INVENTORIES_REPLACED: AtomicU64 = AtomicU64::new(0);
static SLOTS_WRITTEN: AtomicU64 = AtomicU64::new(0);
static STORAGES_DELETED: AtomicU64 = AtomicU64::new(0);

static REGION_COUNTERS: OnceLock<Mutex<HashMap<String, RegionCounter>>> = OnceLock::new();

pub fn inc_storages_created() {
    STORAGES_CREATED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_storages_updated() {
    STORAGES_UPDATED.fetch_add(1, Ordering::Relaxed);
}

/// An insert lost the coordinate race and fell back to an update.
pub fn inc_upsert_races() {
    UPSERT_RACES.fetch_add(1, Ordering::Relaxed);
}

pub fn observe_inventory_replaced(slots: usize) {
    INVENTORIES_REPLACED.fetch_add(1, Ordering::Relaxed);
    SLOTS_WRITTEN.fetch_add(slots as u64, Ordering::Relaxed);
}

pub fn inc_storages_deleted() {
    STORAGES_DELETED.fetch_add(1, Ordering::Relaxed);
}

/// Per-region-file scan totals, accumulated across imports in this process.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegionCounter {
    pub scans: u64,
    pub chunks: u64,
    pub chunk_errors: u64,
    pub storages: u64,
    pub storage_errors: u64,
}

fn region_counter_lock() -> &'static Mutex<HashMap<String, RegionCounter>> {
    REGION_COUNTERS.get_or_init(|| Mutex::new(HashMap::new()))
}

pub fn record_region_scan(
    region: &str,
    chunks: u64,
    chunk_errors: u64,
    storages: u64,
    storage_errors: u64,
) -> RegionCounter {
    let mut guard = region_counter_lock()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let counter = guard.entry(region.to_string()).or_default();
    counter.scans = counter.scans.saturating_add(1);
    counter.chunks = counter.chunks.saturating_add(chunks);
    counter.chunk_errors = counter.chunk_errors.saturating_add(chunk_errors);
    counter.storages = counter.storages.saturating_add(storages);
    counter.storage_errors = counter.storage_errors.saturating_add(storage_errors);
    *counter
}

pub fn region_counters_snapshot() -> HashMap<String, RegionCounter> {
    region_counter_lock()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub storages_created: u64,
    pub storages_updated: u64,
    pub upsert_races: u64,
    pub inventories_replaced: u64,
    pub slots_written: u64,
    pub storages_deleted: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        storages_created: STORAGES_CREATED.load(Ordering::Relaxed),
        storages_updated: STORAGES_UPDATED.load(Ordering::Relaxed),
        upsert_races: UPSERT_RACES.load(Ordering::Relaxed),
        inventories_replaced: INVENTORIES_REPLACED.load(Ordering::Relaxed),
        slots_written: SLOTS_WRITTEN.load(Ordering::Relaxed),
        storages_deleted: STORAGES_DELETED.load(Ordering::Relaxed),
    }
}
