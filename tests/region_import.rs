//! Integration tests for scanning synthetic region files into the registry.

mod common;

use chestlocator::registry::{Coordinate, RegistryBuilder, RegistryStats};
use chestlocator::world::nbt::Tag;
use chestlocator::world::scanner::find_region_files;
use chestlocator::world::{import_region, RegionFile, ScanOptions};
use common::{block_entity, chunk, compound, item, string, write_region, write_region_with_kind};
use tempfile::tempdir;

fn village_chunk() -> Tag {
    let mut loot_only = block_entity("minecraft:chest", (20, 70, 20), None);
    if let Tag::Compound(map) = &mut loot_only {
        map.insert("LootTable".to_string(), string("minecraft:chests/village/village_weaponsmith"));
    }
    chunk(vec![
        block_entity(
            "minecraft:chest",
            (10, 64, -5),
            Some(vec![item("minecraft:diamond", 3, 0), item("minecraft:torch", 12, 1)]),
        ),
        loot_only,
        compound(vec![
            ("id", string("minecraft:sign")),
            ("x", Tag::Int(11)),
            ("y", Tag::Int(64)),
            ("z", Tag::Int(-5)),
        ]),
    ])
}

#[test]
fn test_import_keeps_only_real_storage() {
    let tmp = tempdir().unwrap();
    let path = write_region(tmp.path(), "r.0.-1.mca", vec![(3, village_chunk())]);
    let registry = RegistryBuilder::temporary().open().unwrap();

    let report = import_region(&registry, &path, &ScanOptions::default()).unwrap();
    assert_eq!(report.region_file, "r.0.-1.mca");
    assert_eq!(report.chunks, 1);
    assert_eq!(report.chunk_errors, 0);
    assert_eq!(report.storages_imported, 1);
    assert_eq!(report.slots_written, 2);
    assert_eq!(registry.len(), 1);

    let found = registry
        .find_by_coordinate(Coordinate::new(10, 64, -5))
        .unwrap()
        .unwrap();
    assert_eq!(found.record.metadata.region_file.as_deref(), Some("r.0.-1.mca"));
    assert_eq!(found.record.metadata.chunk_index, Some(3));
    assert_eq!(found.record.kind(), "chest");
    assert_eq!(found.slots[0].item_id, "minecraft:diamond");
    assert_eq!(found.slots[1].count, 12);
    assert!(registry
        .find_by_coordinate(Coordinate::new(20, 70, 20))
        .unwrap()
        .is_none());
}

#[test]
fn test_reimport_is_idempotent() {
    let tmp = tempdir().unwrap();
    let path = write_region(tmp.path(), "r.0.0.mca", vec![(0, village_chunk())]);
    let registry = RegistryBuilder::temporary().open().unwrap();

    import_region(&registry, &path, &ScanOptions::default()).unwrap();
    let before = registry
        .find_by_coordinate(Coordinate::new(10, 64, -5))
        .unwrap()
        .unwrap();
    import_region(&registry, &path, &ScanOptions::default()).unwrap();
    let after = registry
        .find_by_coordinate(Coordinate::new(10, 64, -5))
        .unwrap()
        .unwrap();

    assert_eq!(before.record.id, after.record.id);
    assert_eq!(
        registry.stats(),
        RegistryStats {
            storages: 1,
            slots: 2,
            indexed_items: 2
        }
    );
    assert_eq!(registry.find_by_item("minecraft:torch").count(), 1);
}

#[test]
fn test_prune_removes_vanished_storage() {
    let tmp = tempdir().unwrap();
    let registry = RegistryBuilder::temporary().open().unwrap();
    let two_barrels = chunk(vec![
        block_entity("minecraft:barrel", (1, 60, 1), Some(vec![item("minecraft:wheat", 9, 0)])),
        block_entity("minecraft:barrel", (2, 60, 1), Some(vec![item("minecraft:wheat", 5, 0)])),
    ]);
    let path = write_region(tmp.path(), "r.0.0.mca", vec![(0, two_barrels)]);
    import_region(&registry, &path, &ScanOptions::default()).unwrap();
    assert_eq!(registry.len(), 2);

    let one_barrel = chunk(vec![block_entity(
        "minecraft:barrel",
        (1, 60, 1),
        Some(vec![item("minecraft:wheat", 9, 0)]),
    )]);
    let path = write_region(tmp.path(), "r.0.0.mca", vec![(0, one_barrel)]);

    // Without pruning the stale record stays.
    let report = import_region(&registry, &path, &ScanOptions::default()).unwrap();
    assert_eq!(report.pruned, 0);
    assert_eq!(registry.len(), 2);

    let report = import_region(&registry, &path, &ScanOptions::default().with_prune(true)).unwrap();
    assert_eq!(report.pruned, 1);
    assert_eq!(registry.len(), 1);
    assert!(registry
        .find_by_coordinate(Coordinate::new(2, 60, 1))
        .unwrap()
        .is_none());
    assert_eq!(registry.find_by_item("minecraft:wheat").count(), 1);
}

#[test]
fn test_prune_keeps_storage_in_unreadable_chunk() {
    let tmp = tempdir().unwrap();
    let registry = RegistryBuilder::temporary().open().unwrap();
    let chest = || {
        chunk(vec![block_entity(
            "minecraft:chest",
            (1, 60, 1),
            Some(vec![item("minecraft:emerald", 4, 0)]),
        )])
    };
    let path = write_region(tmp.path(), "r.0.0.mca", vec![(0, chest())]);
    import_region(&registry, &path, &ScanOptions::default()).unwrap();
    assert_eq!(registry.len(), 1);

    // Same chunk, now flagged as stored in an external .mcc file.
    let path = write_region_with_kind(tmp.path(), "r.0.0.mca", 0x82, vec![(0, chest())]);
    let report = import_region(&registry, &path, &ScanOptions::default().with_prune(true)).unwrap();
    assert_eq!(report.chunk_errors, 1);
    assert_eq!(report.pruned, 0);
    assert_eq!(registry.len(), 1);
    let kept = registry
        .find_by_coordinate(Coordinate::new(1, 60, 1))
        .unwrap()
        .unwrap();
    assert_eq!(kept.slots[0].item_id, "minecraft:emerald");
    assert_eq!(registry.find_by_item("minecraft:emerald").count(), 1);
}

#[test]
fn test_damaged_item_does_not_split_metadata_from_slots() {
    let tmp = tempdir().unwrap();
    let registry = RegistryBuilder::temporary().open().unwrap();
    let path = write_region(
        tmp.path(),
        "r.0.0.mca",
        vec![(
            0,
            chunk(vec![block_entity(
                "minecraft:chest",
                (3, 70, 3),
                Some(vec![item("minecraft:bread", 2, 0)]),
            )]),
        )],
    );
    import_region(&registry, &path, &ScanOptions::default()).unwrap();

    let rescanned = chunk(vec![block_entity(
        "minecraft:chest",
        (3, 70, 3),
        Some(vec![
            item("minecraft:apple", 5, 0),
            item("minecraft:rotten_flesh", -1, 1),
            item("minecraft:stick", 1, -3),
        ]),
    )]);
    let path = write_region(tmp.path(), "r.0.0.mca", vec![(0, rescanned)]);
    let report = import_region(&registry, &path, &ScanOptions::default()).unwrap();
    assert_eq!(report.storage_errors, 0);
    assert_eq!(report.storages_imported, 1);
    assert_eq!(report.slots_written, 1);

    let found = registry
        .find_by_coordinate(Coordinate::new(3, 70, 3))
        .unwrap()
        .unwrap();
    let items: Vec<&str> = found.slots.iter().map(|s| s.item_id.as_str()).collect();
    assert_eq!(items, vec!["minecraft:apple"]);
    let raw = found.record.metadata.raw_state.as_deref().unwrap();
    assert!(String::from_utf8_lossy(raw).contains("minecraft:apple"));
    assert_eq!(registry.find_by_item("minecraft:bread").count(), 0);
    assert_eq!(registry.find_by_item("minecraft:rotten_flesh").count(), 0);
}

#[test]
fn test_bad_entities_and_chunks_do_not_abort_the_file() {
    let tmp = tempdir().unwrap();
    let no_y = compound(vec![
        ("id", string("minecraft:hopper")),
        ("x", Tag::Int(0)),
        ("z", Tag::Int(0)),
        ("Items", Tag::List(vec![])),
    ]);
    let good = block_entity("minecraft:lime_shulker_box", (5, 5, 5), Some(vec![item("minecraft:cake", 1, 0)]));
    let legacy = compound(vec![(
        "Level",
        compound(vec![(
            "TileEntities",
            Tag::List(vec![block_entity("Furnace", (6, 6, 6), Some(vec![]))]),
        )]),
    )]);
    let path = write_region(
        tmp.path(),
        "r.1.1.mca",
        vec![(0, chunk(vec![no_y, good])), (1, legacy)],
    );
    // Corrupt a third chunk by hand: header slot 2 points past end of file.
    let mut bytes = std::fs::read(&path).unwrap();
    let bogus: u32 = (400 << 8) | 1;
    bytes[8..12].copy_from_slice(&bogus.to_be_bytes());
    std::fs::write(&path, bytes).unwrap();

    let registry = RegistryBuilder::temporary().open().unwrap();
    let report = import_region(&registry, &path, &ScanOptions::default()).unwrap();
    assert_eq!(report.chunks, 3);
    assert_eq!(report.chunk_errors, 1);
    assert_eq!(report.storage_errors, 1);
    assert_eq!(report.storages_imported, 2);

    let furnace = registry
        .find_by_coordinate(Coordinate::new(6, 6, 6))
        .unwrap()
        .unwrap();
    assert_eq!(furnace.record.metadata.entity_id.as_deref(), Some("minecraft:furnace"));
    assert_eq!(registry.find_by_item("minecraft:cake").count(), 1);
}

#[test]
fn test_region_files_are_listed_in_order() {
    let tmp = tempdir().unwrap();
    write_region(tmp.path(), "r.1.0.mca", vec![]);
    write_region(tmp.path(), "r.0.0.mca", vec![]);
    std::fs::write(tmp.path().join("notes.txt"), "not a region").unwrap();

    let files = find_region_files(tmp.path()).unwrap();
    let names: Vec<_> = files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["r.0.0.mca", "r.1.0.mca"]);

    let empty = RegionFile::open(&files[0]).unwrap();
    assert!(empty.present_chunks().is_empty());
}
