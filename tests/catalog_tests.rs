//! Catalogue Persistence Tests
//!
//! Tests for:
//! - Save / load through a service reproduces the registered key set
//! - Loading never fills the cache directly; handles are rebuilt lazily
//! - Resident metadata (access counts) is carried into the file
//! - Corrupt catalogues are rejected

mod common;

use std::collections::HashSet;
use std::io::Cursor;

use common::{MockFactory, material, service_config};
use myth_pipeline_cache::pipeline::{CullMode, RasterizerKey};
use myth_pipeline_cache::{CacheError, CacheService, Catalog, PipelineConfigKey};

fn populated_service() -> CacheService<MockFactory> {
    let service = CacheService::new(service_config(16), MockFactory::new()).unwrap();
    service.register_material(material("Rock")).unwrap();
    service
        .register_material(
            material("Foliage")
                .to_builder()
                .define("ALPHA_TEST", "1")
                .rasterizer(RasterizerKey {
                    cull_mode: CullMode::None,
                    ..RasterizerKey::default()
                })
                .build()
                .unwrap(),
        )
        .unwrap();
    service.register_material(material("Water")).unwrap();
    service.get_or_create("Rock").unwrap();
    service.get_or_create("Rock").unwrap();
    service
}

fn registered_keys(service: &CacheService<MockFactory>) -> HashSet<PipelineConfigKey> {
    service
        .registered_materials()
        .into_iter()
        .map(|m| m.key)
        .collect()
}

// ============================================================================
// Round trip
// ============================================================================

#[test]
fn saved_keys_load_into_fresh_service() -> anyhow::Result<()> {
    let source = populated_service();
    let mut bytes = Vec::new();
    assert_eq!(source.save_catalog(&mut bytes)?, 3);

    let target = CacheService::new(service_config(16), MockFactory::new())?;
    assert_eq!(target.load_catalog(&mut Cursor::new(&bytes))?, 3);
    assert_eq!(registered_keys(&target), registered_keys(&source));
    Ok(())
}

#[test]
fn loaded_keys_are_built_lazily() {
    let source = populated_service();
    let mut bytes = Vec::new();
    source.save_catalog(&mut bytes).unwrap();

    let target = CacheService::new(service_config(16), MockFactory::new()).unwrap();
    target.load_catalog(&mut bytes.as_slice()).unwrap();

    let report = target.flush_precompile_queue();
    assert_eq!(report.requested, 3);
    assert_eq!(report.compiled, 3);
    assert_eq!(target.cache().len(), 3);
    assert!(target.get_or_create("Foliage").unwrap().was_cached);
}

#[test]
fn resident_metadata_is_persisted() -> anyhow::Result<()> {
    let source = populated_service();
    let mut bytes = Vec::new();
    source.save_catalog(&mut bytes)?;

    let catalog = Catalog::read_from(&mut bytes.as_slice())?;
    let names: Vec<_> = catalog
        .entries
        .iter()
        .map(|e| e.key.material_name())
        .collect();
    assert_eq!(names, ["Foliage", "Rock", "Water"]);

    let rock = &catalog.entries[1];
    assert_eq!(rock.access_count, 2);
    assert_eq!(catalog.entries[0].access_count, 0);
    Ok(())
}

// ============================================================================
// Corruption
// ============================================================================

#[test]
fn truncated_catalogue_is_rejected() {
    let source = populated_service();
    let mut bytes = Vec::new();
    source.save_catalog(&mut bytes).unwrap();
    bytes.truncate(bytes.len() - 5);

    let target = CacheService::new(service_config(16), MockFactory::new()).unwrap();
    assert!(target.load_catalog(&mut bytes.as_slice()).is_err());
}

#[test]
fn foreign_file_is_rejected() {
    let target = CacheService::new(service_config(16), MockFactory::new()).unwrap();
    let err = target
        .load_catalog(&mut b"GIF89a not a catalogue".as_slice())
        .unwrap_err();
    assert!(matches!(err, CacheError::CatalogFormat(_)));
    assert!(target.registered_materials().is_empty());
}

#[test]
fn invalid_key_in_catalogue_is_rejected() {
    let source = populated_service();
    let mut bytes = Vec::new();
    source.save_catalog(&mut bytes).unwrap();
    let at = bytes.windows(4).position(|w| w == b"Rock").unwrap();
    bytes[at..at + 4].copy_from_slice(b"    ");

    let target = CacheService::new(service_config(16), MockFactory::new()).unwrap();
    let err = target.load_catalog(&mut bytes.as_slice()).unwrap_err();
    assert!(matches!(err, CacheError::CatalogFormat(_)));
    assert!(target.registered_materials().is_empty());
}
