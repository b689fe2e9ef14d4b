//! Cache Service Tests
//!
//! Tests for:
//! - Registration semantics (new / identical / re-keyed / update)
//! - Name-based lookup, default keys and descriptor-built keys
//! - Unregister / remove / clear lifecycle
//! - Stale references when a material changes mid-creation
//! - Frame-budget shrinking and optimization passes
//! - Background precompilation and cancellation
//! - Statistics export

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{MockFactory, material, service_config};
use myth_pipeline_cache::{
    CacheError, CacheService, CacheServiceConfig, CancellationToken, FrameBudgetSignal,
    PipelineConfigKey, RenderEngineHooks,
};

fn service(capacity: usize) -> CacheService<MockFactory> {
    CacheService::new(service_config(capacity), MockFactory::new()).unwrap()
}

// ============================================================================
// End-to-end
// ============================================================================

#[test]
fn register_then_miss_then_hit() {
    let service = CacheService::new(
        service_config(16),
        MockFactory::with_delay(Duration::from_millis(20)),
    )
    .unwrap();
    let reg = service.register_material(material("X")).unwrap();
    assert!(reg.is_new && !reg.was_updated);

    let miss = service.get_or_create("X").unwrap();
    assert!(!miss.was_cached);
    assert!(miss.creation_duration_ms >= 20.0);

    let hit = service.get_or_create("X").unwrap();
    assert!(hit.was_cached);
    assert!(Arc::ptr_eq(&miss.handle, &hit.handle));
    assert_eq!(hit.creation_duration_ms, 0.0);
    assert!(hit.lookup_duration_ms < miss.lookup_duration_ms / 4.0);
    assert_eq!(service.factory().created(), 1);
}

#[test]
fn unknown_material_gets_default_key() {
    let service = service(16);
    let result = service.get_or_create("Fallback").unwrap();
    assert!(!result.was_cached);
    assert_eq!(result.handle.material, "Fallback");

    let key = service.material_key("Fallback").unwrap();
    assert_eq!(key, PipelineConfigKey::default_for_material("Fallback").unwrap());
    assert!(service.get_or_create("Fallback").unwrap().was_cached);
}

#[test]
fn empty_material_name_is_invalid() {
    let service = service(4);
    assert!(matches!(
        service.get_or_create(""),
        Err(CacheError::InvalidArgument(_))
    ));
    assert!(matches!(
        service.create_from_descriptor("M", "", "ps", None),
        Err(CacheError::InvalidArgument(_))
    ));
}

#[test]
fn create_from_descriptor_overrides_shaders() {
    let service = service(16);
    let base = material("Base")
        .to_builder()
        .define("SKINNED", "1")
        .build()
        .unwrap();

    let result = service
        .create_from_descriptor("Skinned", "skin_vs", "lit_ps", Some(&base))
        .unwrap();
    assert!(!result.was_cached);

    let key = service.material_key("Skinned").unwrap();
    assert_eq!(key.shaders().vertex, "skin_vs");
    assert_eq!(key.shaders().pixel, "lit_ps");
    assert_eq!(key.macros(), base.macros());

    assert!(
        service
            .create_from_descriptor("Skinned", "skin_vs", "lit_ps", Some(&base))
            .unwrap()
            .was_cached
    );
}

#[test]
fn factory_failure_reaches_caller() {
    let service = CacheService::new(service_config(4), MockFactory::failing("Broken")).unwrap();
    service.register_material(material("Broken")).unwrap();
    let err = service.get_or_create("Broken").unwrap_err();
    assert!(err.is_creation_failure());
    assert_eq!(service.statistics().cache.entries, 0);
}

// ============================================================================
// Registration lifecycle
// ============================================================================

#[test]
fn identical_registration_is_noop() {
    let service = service(4);
    service.register_material(material("M")).unwrap();
    let again = service.register_material(material("M")).unwrap();
    assert!(!again.is_new && !again.was_updated);
}

#[test]
fn rekey_keeps_old_entry_until_evicted() {
    let service = service(4);
    let v1 = material("M");
    service.register_material(v1.clone()).unwrap();
    service.get_or_create("M").unwrap();

    let v2 = v1.to_builder().define("FOG", "1").build().unwrap();
    let reg = service.register_material(v2.clone()).unwrap();
    assert!(reg.was_updated);
    assert!(service.cache().contains(&v1));

    let result = service.get_or_create("M").unwrap();
    assert!(!result.was_cached);
    assert_eq!(service.material_key("M"), Some(v2));
}

#[test]
fn update_material_disposes_old_entry() {
    let service = service(4);
    let v1 = material("M");
    service.register_material(v1.clone()).unwrap();
    service.get_or_create("M").unwrap();

    let v2 = v1.to_builder().define("FOG", "1").build().unwrap();
    assert!(service.update_material(v2).unwrap().was_updated);
    assert!(!service.cache().contains(&v1));
    assert_eq!(service.factory().released(), 1);
}

#[test]
fn unregister_removes_mapping_and_entry() {
    let service = service(4);
    service.register_material(material("M")).unwrap();
    service.get_or_create("M").unwrap();

    assert!(service.unregister_material("M"));
    assert!(!service.unregister_material("M"));
    assert!(service.material_key("M").is_none());
    assert_eq!(service.factory().released(), 1);

    // Re-requesting falls back to a default key and misses.
    assert!(!service.get_or_create("M").unwrap().was_cached);
}

#[test]
fn remove_keeps_registration() {
    let service = service(4);
    service.register_material(material("M")).unwrap();
    service.get_or_create("M").unwrap();

    assert!(service.remove("M"));
    assert!(!service.remove("M"));
    assert!(service.material_key("M").is_some());
    assert!(!service.get_or_create("M").unwrap().was_cached);
}

#[test]
fn clear_disposes_everything_once() {
    let service = service(8);
    for name in ["A", "B", "C"] {
        service.register_material(material(name)).unwrap();
        service.get_or_create(name).unwrap();
    }
    assert_eq!(service.clear(), 3);
    assert_eq!(service.factory().released(), 3);
    assert_eq!(service.statistics().registered_materials, 3);
    assert_eq!(service.statistics().cache.hits, 0);
}

#[test]
fn unregister_during_creation_is_stale() {
    let (factory, started, proceed) = MockFactory::gated();
    let service = Arc::new(CacheService::new(service_config(4), factory).unwrap());
    service.register_material(material("Volatile")).unwrap();

    let request = {
        let service = service.clone();
        thread::spawn(move || service.get_or_create("Volatile").map(|r| r.was_cached))
    };
    started.recv().unwrap();
    assert!(service.unregister_material("Volatile"));
    proceed.send(()).unwrap();

    let result = request.join().unwrap();
    assert!(matches!(result, Err(CacheError::StaleReference(name)) if name == "Volatile"));
    assert!(service.cache().is_empty());
    assert_eq!(service.statistics().stale_references, 1);
}

// ============================================================================
// Capacity management
// ============================================================================

#[test]
fn resize_shrinks_to_exact_capacity() {
    let service = service(8);
    for name in ["A", "B", "C", "D"] {
        service.get_or_create(name).unwrap();
    }
    service.resize(2).unwrap();
    let stats = service.statistics();
    assert_eq!((stats.cache.entries, stats.cache.capacity), (2, 2));
    assert!(matches!(
        service.resize(0),
        Err(CacheError::InvalidConfiguration(_))
    ));
}

#[test]
fn over_budget_frames_shrink_capacity() {
    let config = CacheServiceConfig {
        budget_shrink_step: 4,
        min_capacity: 6,
        pressure_cooldown_frames: 2,
        ..service_config(12)
    };
    let service = CacheService::new(config, MockFactory::new()).unwrap();

    let over = FrameBudgetSignal::from_timing(22.0, 16.6);
    service.on_frame_budget(over);
    assert_eq!(service.cache().capacity(), 8);
    service.on_frame_budget(over);
    assert_eq!(service.cache().capacity(), 6);
    assert!(service.under_budget_pressure());

    let ok = FrameBudgetSignal::from_timing(8.0, 16.6);
    service.on_frame_budget(ok);
    service.on_frame_budget(ok);
    assert!(!service.under_budget_pressure());
    assert_eq!(service.statistics().over_budget_frames, 2);
}

#[test]
fn budget_channel_signals_apply_on_tick() {
    let service = service(64);
    let sender = service.budget_sender();
    sender
        .send(FrameBudgetSignal::from_timing(40.0, 16.6))
        .unwrap();
    assert_eq!(service.cache().capacity(), 64);

    service.on_maintenance_tick();
    assert_eq!(service.cache().capacity(), 48);
}

#[test]
fn pressure_query_applies_queued_signals() {
    let service = service(64);
    service
        .budget_sender()
        .send(FrameBudgetSignal::from_timing(33.0, 16.6))
        .unwrap();

    assert!(service.under_budget_pressure());
    assert_eq!(service.cache().capacity(), 48);
}

#[test]
fn optimization_grows_full_cache() {
    let service = service(4);
    for name in ["A", "B", "C", "D"] {
        service.get_or_create(name).unwrap();
    }
    let report = service.optimize_cache().unwrap();
    assert!(!report.skipped_under_pressure);
    assert_eq!(report.previous_capacity, 4);
    assert_eq!(report.new_capacity, 5);
    assert_eq!(service.cache().capacity(), 5);
}

#[test]
fn optimization_is_skipped_under_pressure() {
    let service = service(4);
    for name in ["A", "B", "C", "D"] {
        service.get_or_create(name).unwrap();
    }
    service.on_frame_budget(FrameBudgetSignal::from_timing(30.0, 16.6));
    let report = service.optimize_cache().unwrap();
    assert!(report.skipped_under_pressure);
    assert_eq!(report.new_capacity, report.previous_capacity);
}

#[test]
fn low_hit_rate_is_reported() {
    let config = CacheServiceConfig {
        min_lookups_for_hit_rate: 4,
        ..service_config(64)
    };
    let service = CacheService::new(config, MockFactory::new()).unwrap();
    for name in ["A", "B", "C", "D", "E"] {
        service.get_or_create(name).unwrap();
    }
    assert!(service.optimize_cache().unwrap().low_hit_rate);
}

// ============================================================================
// Precompilation
// ============================================================================

#[test]
fn precompile_all_populates_cache() {
    let service = service(16);
    for name in ["A", "B", "C", "D", "E", "F"] {
        service.register_material(material(name)).unwrap();
    }
    service.get_or_create("A").unwrap();

    let report = service.precompile_all(&CancellationToken::new());
    assert_eq!(report.requested, 6);
    assert_eq!(report.compiled, 5);
    assert_eq!(report.already_cached, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(service.cache().len(), 6);
    assert_eq!(service.statistics().precompiled, 5);
}

#[test]
fn precompile_failures_do_not_abort_batch() {
    let service = CacheService::new(service_config(16), MockFactory::failing("C")).unwrap();
    for name in ["A", "B", "C", "D"] {
        service.register_material(material(name)).unwrap();
    }
    let report = service.precompile_all(&CancellationToken::new());
    assert_eq!(report.compiled, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(service.statistics().precompile_failures, 1);
}

#[test]
fn cancelled_precompile_starts_nothing() {
    let service = service(16);
    for name in ["A", "B", "C"] {
        service.register_material(material(name)).unwrap();
    }
    let token = CancellationToken::new();
    token.cancel();
    let report = service.precompile_all(&token);
    assert_eq!(report.cancelled, 3);
    assert_eq!(service.factory().calls(), 0);
}

#[test]
fn registration_queue_precompiles_in_batches() {
    let config = CacheServiceConfig {
        precompile_on_register: true,
        precompile_batch_size: 2,
        ..service_config(16)
    };
    let service = CacheService::new(config, MockFactory::new()).unwrap();
    for name in ["A", "B", "C", "D", "E"] {
        service.register_material(material(name)).unwrap();
    }
    assert_eq!(service.statistics().pending_precompile, 1);

    let report = service.flush_precompile_queue();
    assert_eq!(report.requested, 5);
    assert_eq!(report.compiled + report.already_cached, 5);
    assert_eq!(service.cache().len(), 5);
    assert!(service.get_or_create("E").unwrap().was_cached);
}

#[test]
fn unregistered_material_leaves_precompile_queue() {
    let config = CacheServiceConfig {
        precompile_on_register: true,
        ..service_config(16)
    };
    let service = CacheService::new(config, MockFactory::new()).unwrap();
    service.register_material(material("Gone")).unwrap();
    assert_eq!(service.statistics().pending_precompile, 1);

    assert!(service.unregister_material("Gone"));
    assert_eq!(service.statistics().pending_precompile, 0);

    let report = service.flush_precompile_queue();
    assert_eq!(report.requested, 0);
    assert_eq!(service.factory().calls(), 0);
    assert!(service.cache().is_empty());
}

#[test]
fn rekeyed_material_precompiles_only_current_key() {
    let config = CacheServiceConfig {
        precompile_on_register: true,
        ..service_config(16)
    };
    let service = CacheService::new(config, MockFactory::new()).unwrap();
    let first = material("Skin");
    let second = first.to_builder().define("SSS", "1").build().unwrap();
    service.register_material(first.clone()).unwrap();
    service.register_material(second.clone()).unwrap();

    let report = service.flush_precompile_queue();
    assert_eq!(report.compiled, 1);
    assert!(service.cache().contains(&second));
    assert!(!service.cache().contains(&first));
}

#[test]
fn unregister_during_background_build_discards_entry() {
    let (factory, started, proceed) = MockFactory::gated();
    let config = CacheServiceConfig {
        precompile_on_register: true,
        precompile_batch_size: 1,
        ..service_config(16)
    };
    let service = CacheService::new(config, factory).unwrap();
    service.register_material(material("Transient")).unwrap();

    started.recv().unwrap();
    assert!(service.unregister_material("Transient"));
    proceed.send(()).unwrap();

    let report = service.flush_precompile_queue();
    assert_eq!(report.stale, 1);
    assert_eq!(report.compiled, 0);
    assert!(service.cache().is_empty());
    assert_eq!(service.factory().released(), 1);
}

// ============================================================================
// Statistics
// ============================================================================

#[test]
fn statistics_serialize_to_json() {
    let service = service(16);
    service.get_or_create("A").unwrap();
    service.get_or_create("A").unwrap();

    let stats = service.statistics();
    assert_eq!(stats.registered_materials, 1);
    assert!(stats.memory_mb > 0.0);

    let json = stats.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["entries"], 1);
    assert_eq!(value["hits"], 1);
    assert_eq!(value["misses"], 1);
    assert_eq!(value["registered_materials"], 1);
}
