//! Integration tests for the checkpoint/restore resource registry.
//!
//! These tests verify notification order, idempotent registration, weak
//! references to registered resources and aggregation of callback failures.

mod common;

use std::sync::Arc;

use aws_lambda_runtime_client::crac::{self, Resource, ResourceRegistry};
use aws_lambda_runtime_client::report::{LambdaError, RapidErrorType};
use aws_lambda_runtime_client::{BoxError, RuntimeError, SNAPSTART_HOOK_EXIT_CODE};
use proptest::prelude::*;

use common::*;

// =============================================================================
// Notification Order
// =============================================================================

#[test]
fn test_before_checkpoint_visits_newest_first() {
    let log = call_log();
    let registry = ResourceRegistry::new();
    let a = RecordingResource::new("a", &log);
    let b = RecordingResource::new("b", &log);
    let c = RecordingResource::new("c", &log);
    registry.register(&a);
    registry.register(&b);
    registry.register(&c);

    registry.notify_before_checkpoint().unwrap();
    registry.notify_after_restore().unwrap();

    assert_eq!(entries(&log, "before:"), ["c", "b", "a"]);
    assert_eq!(entries(&log, "after:"), ["a", "b", "c"]);
}

#[test]
fn test_empty_registry_notifies_nothing() {
    let registry = ResourceRegistry::new();
    assert!(registry.is_empty());
    assert!(registry.notify_before_checkpoint().is_ok());
    assert!(registry.notify_after_restore().is_ok());
}

// =============================================================================
// Registration
// =============================================================================

#[test]
fn test_reregistration_keeps_original_position() {
    let log = call_log();
    let registry = ResourceRegistry::new();
    let a = RecordingResource::new("a", &log);
    let b = RecordingResource::new("b", &log);
    registry.register(&a);
    registry.register(&b);
    registry.register(&a);

    assert_eq!(registry.len(), 2);
    registry.notify_after_restore().unwrap();
    assert_eq!(entries(&log, "after:"), ["a", "b"]);
}

#[test]
fn test_dropped_resource_is_not_notified() {
    let log = call_log();
    let registry = ResourceRegistry::new();
    let kept = RecordingResource::new("kept", &log);
    let dropped = RecordingResource::new("dropped", &log);
    registry.register(&kept);
    registry.register(&dropped);
    drop(dropped);

    assert_eq!(registry.len(), 1);
    registry.notify_before_checkpoint().unwrap();
    assert_eq!(entries(&log, "before:"), ["kept"]);
}

#[test]
fn test_dropped_failing_resource_does_not_fail_sweep() {
    let log = call_log();
    let registry = ResourceRegistry::new();
    let healthy = RecordingResource::new("healthy", &log);
    let broken = RecordingResource::failing_before("broken", &log);
    registry.register(&healthy);
    registry.register(&broken);
    drop(broken);

    assert!(registry.notify_before_checkpoint().is_ok());
    assert_eq!(entries(&log, "before:"), ["healthy"]);
}

#[test]
fn test_registry_does_not_keep_resources_alive() {
    let log = call_log();
    let registry = ResourceRegistry::new();
    let resource = RecordingResource::new("a", &log);
    registry.register(&resource);
    assert_eq!(Arc::strong_count(&resource), 1);
}

#[test]
fn test_deregistered_resource_is_not_notified() {
    let log = call_log();
    let registry = ResourceRegistry::new();
    let a = RecordingResource::new("a", &log);
    let b = RecordingResource::new("b", &log);
    registry.register(&a);
    registry.register(&b);

    assert!(registry.deregister(&a));
    assert!(!registry.deregister(&a));
    registry.notify_after_restore().unwrap();
    assert_eq!(entries(&log, "after:"), ["b"]);
}

#[test]
fn test_global_context_is_shared() {
    let first = crac::global_context();
    let second = crac::global_context();
    assert!(Arc::ptr_eq(&first, &second));
}

// =============================================================================
// Failure Aggregation
// =============================================================================

#[test]
fn test_failures_are_collected_and_every_resource_runs() {
    let log = call_log();
    let registry = ResourceRegistry::new();
    let a = RecordingResource::failing_before("a", &log);
    let b = RecordingResource::new("b", &log);
    let c = RecordingResource::failing_before("c", &log);
    registry.register(&a);
    registry.register(&b);
    registry.register(&c);

    let error = registry.notify_before_checkpoint().unwrap_err();
    assert_eq!(entries(&log, "before:"), ["c", "b", "a"]);
    let messages: Vec<String> = error.suppressed().iter().map(|e| e.to_string()).collect();
    assert_eq!(messages, ["c refused checkpoint", "a refused checkpoint"]);

    let report = LambdaError::before_checkpoint(&error);
    assert_eq!(report.error_type, RapidErrorType::BeforeCheckpointError);
    assert_eq!(report.error_request.error_type, "CheckpointError");

    let runtime_error = RuntimeError::from(error);
    assert_eq!(runtime_error.exit_code(), SNAPSTART_HOOK_EXIT_CODE);
}

#[test]
fn test_restore_failures_are_collected() {
    let log = call_log();
    let registry = ResourceRegistry::new();
    let a = RecordingResource::failing_after("a", &log);
    let b = RecordingResource::new("b", &log);
    registry.register(&a);
    registry.register(&b);

    let error = registry.notify_after_restore().unwrap_err();
    assert_eq!(error.suppressed().len(), 1);
    assert_eq!(entries(&log, "after:"), ["a", "b"]);
}

#[test]
fn test_nested_registry_failures_are_flattened() {
    let log = call_log();
    let parent = ResourceRegistry::new();
    let child = Arc::new(ResourceRegistry::new());
    let x = RecordingResource::failing_before("x", &log);
    let y = RecordingResource::failing_before("y", &log);
    let z = RecordingResource::failing_before("z", &log);
    child.register(&x);
    child.register(&y);
    parent.register(&child);
    parent.register(&z);

    let error = parent.notify_before_checkpoint().unwrap_err();
    assert_eq!(entries(&log, "before:"), ["z", "y", "x"]);
    assert_eq!(error.suppressed().len(), 3);
}

struct Spawner {
    registry_log: CallLog,
    spawned: parking_lot::Mutex<Vec<Arc<RecordingResource>>>,
}

impl Resource for Spawner {
    fn before_checkpoint(&self, context: &ResourceRegistry) -> Result<(), BoxError> {
        let child = RecordingResource::new("late", &self.registry_log);
        context.register(&child);
        self.spawned.lock().push(child);
        Ok(())
    }

    fn after_restore(&self, _context: &ResourceRegistry) -> Result<(), BoxError> {
        Ok(())
    }
}

#[test]
fn test_resource_registered_during_sweep_waits_for_next_sweep() {
    let log = call_log();
    let registry = ResourceRegistry::new();
    let spawner = Arc::new(Spawner {
        registry_log: log.clone(),
        spawned: parking_lot::Mutex::new(Vec::new()),
    });
    registry.register(&spawner);

    registry.notify_before_checkpoint().unwrap();
    assert!(entries(&log, "before:").is_empty());
    assert_eq!(registry.len(), 2);

    registry.notify_after_restore().unwrap();
    assert_eq!(entries(&log, "after:"), ["late"]);
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn test_notification_order_mirrors_registration(names in resource_names_strategy()) {
        let log = call_log();
        let registry = ResourceRegistry::new();
        let resources: Vec<_> = names.iter().map(|n| RecordingResource::new(n.clone(), &log)).collect();
        for resource in &resources {
            registry.register(resource);
        }

        registry.notify_before_checkpoint().unwrap();
        registry.notify_after_restore().unwrap();

        let mut reversed = names.clone();
        reversed.reverse();
        prop_assert_eq!(entries(&log, "before:"), reversed);
        prop_assert_eq!(entries(&log, "after:"), names);
    }

    #[test]
    fn test_each_resource_notified_once(names in resource_names_strategy(), repeats in 1usize..4) {
        let log = call_log();
        let registry = ResourceRegistry::new();
        let resources: Vec<_> = names.iter().map(|n| RecordingResource::new(n.clone(), &log)).collect();
        for _ in 0..repeats {
            for resource in &resources {
                registry.register(resource);
            }
        }

        prop_assert_eq!(registry.len(), names.len());
        registry.notify_after_restore().unwrap();
        prop_assert_eq!(entries(&log, "after:"), names);
    }

    #[test]
    fn test_every_failure_is_reported(resources in failing_resources_strategy()) {
        let log = call_log();
        let registry = ResourceRegistry::new();
        let registered: Vec<_> = resources
            .iter()
            .map(|(name, fails)| {
                if *fails {
                    RecordingResource::failing_before(name.clone(), &log)
                } else {
                    RecordingResource::new(name.clone(), &log)
                }
            })
            .collect();
        for resource in &registered {
            registry.register(resource);
        }

        let expected_failures = resources.iter().filter(|(_, fails)| *fails).count();
        let result = registry.notify_before_checkpoint();
        prop_assert_eq!(entries(&log, "before:").len(), resources.len());
        match result {
            Ok(()) => prop_assert_eq!(expected_failures, 0),
            Err(error) => prop_assert_eq!(error.suppressed().len(), expected_failures),
        }
    }
}
