use std::sync::Arc;

use parking_lot::RwLock;

use super::ResourceRegistry;

static GLOBAL: RwLock<Option<Arc<ResourceRegistry>>> = RwLock::new(None);

/// Creates the process-wide registry if it does not exist yet and returns it.
pub fn init() -> Arc<ResourceRegistry> {
    if let Some(registry) = GLOBAL.read().as_ref() {
        return registry.clone();
    }
    let mut slot = GLOBAL.write();
    slot.get_or_insert_with(|| {
        tracing::debug!("Created global resource registry");
        Arc::new(ResourceRegistry::new())
    })
    .clone()
}

/// Returns the process-wide registry, creating it on first use.
pub fn global_context() -> Arc<ResourceRegistry> {
    init()
}

/// Discards the process-wide registry so the next call to [`init`] starts
/// from an empty one. Handles obtained earlier stay valid but are detached.
pub fn reset_for_tests() {
    GLOBAL.write().take();
}
