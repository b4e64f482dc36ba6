//! Shared test utilities for integration tests.
//!
//! This module provides resources that record their callbacks, handler
//! fixtures and proptest strategies used across integration tests.

#![allow(dead_code)] // These utilities are used by other integration test files

use std::sync::Arc;

use aws_lambda_runtime_client::config::INIT_TYPE_SNAP_START;
use aws_lambda_runtime_client::crac::{Resource, ResourceRegistry};
use aws_lambda_runtime_client::{BoxError, LambdaEnvironment};
use parking_lot::Mutex;
use proptest::prelude::*;

// =============================================================================
// Recording Resources
// =============================================================================

/// Callback log shared between resources.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Creates an empty callback log.
pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// A resource that appends `before:<name>` / `after:<name>` to a log and can
/// be told to fail either callback.
pub struct RecordingResource {
    name: String,
    log: CallLog,
    fail_before: bool,
    fail_after: bool,
}

impl RecordingResource {
    pub fn new(name: impl Into<String>, log: &CallLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            log: log.clone(),
            fail_before: false,
            fail_after: false,
        })
    }

    pub fn failing_before(name: impl Into<String>, log: &CallLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            log: log.clone(),
            fail_before: true,
            fail_after: false,
        })
    }

    pub fn failing_after(name: impl Into<String>, log: &CallLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            log: log.clone(),
            fail_before: false,
            fail_after: true,
        })
    }
}

impl Resource for RecordingResource {
    fn before_checkpoint(&self, _context: &ResourceRegistry) -> Result<(), BoxError> {
        self.log.lock().push(format!("before:{}", self.name));
        if self.fail_before {
            return Err(format!("{} refused checkpoint", self.name).into());
        }
        Ok(())
    }

    fn after_restore(&self, _context: &ResourceRegistry) -> Result<(), BoxError> {
        self.log.lock().push(format!("after:{}", self.name));
        if self.fail_after {
            return Err(format!("{} refused restore", self.name).into());
        }
        Ok(())
    }
}

/// Returns the entries of `log` with the given prefix, prefix stripped.
pub fn entries(log: &CallLog, prefix: &str) -> Vec<String> {
    log.lock()
        .iter()
        .filter_map(|entry| entry.strip_prefix(prefix).map(str::to_string))
        .collect()
}

// =============================================================================
// Environments
// =============================================================================

/// An on-demand function environment.
pub fn test_environment() -> LambdaEnvironment {
    LambdaEnvironment {
        function_name: Some("test-function".to_string()),
        function_version: Some("$LATEST".to_string()),
        log_group_name: Some("/aws/lambda/test-function".to_string()),
        log_stream_name: Some("2026/10/16/[$LATEST]abc".to_string()),
        ..Default::default()
    }
}

/// A SnapStart function environment.
pub fn snap_start_environment() -> LambdaEnvironment {
    LambdaEnvironment {
        initialization_type: Some(INIT_TYPE_SNAP_START.to_string()),
        ..test_environment()
    }
}

// =============================================================================
// Proptest Strategies
// =============================================================================

/// Strategy for a list of distinct resource names.
pub fn resource_names_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set("[a-z][a-z0-9]{0,7}", 1..16)
        .prop_map(|names| names.into_iter().collect())
}

/// Strategy for a list of resource names paired with a failure flag.
pub fn failing_resources_strategy() -> impl Strategy<Value = Vec<(String, bool)>> {
    resource_names_strategy().prop_flat_map(|names| {
        let len = names.len();
        (Just(names), prop::collection::vec(any::<bool>(), len))
            .prop_map(|(names, flags)| names.into_iter().zip(flags).collect())
    })
}
