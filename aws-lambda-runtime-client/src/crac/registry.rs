use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::ReentrantMutex;

use super::{CheckpointError, Resource, RestoreError};
use crate::error::BoxError;

/// An ordered, weakly-referencing collection of [`Resource`]s.
///
/// Each resource receives a sequence number on first registration.
/// [`notify_before_checkpoint`](Self::notify_before_checkpoint) visits live
/// resources in descending sequence order and
/// [`notify_after_restore`](Self::notify_after_restore) in ascending order.
///
/// All operations on one registry are serialized by a re-entrant lock, so a
/// resource may register further resources from inside its own callback.
/// Resources registered during a sweep are not visited by that sweep.
///
/// A registry is itself a [`Resource`]; registering a child registry with a
/// parent forwards the parent's notifications to the child's resources.
pub struct ResourceRegistry {
    state: ReentrantMutex<RefCell<State>>,
}

#[derive(Default)]
struct State {
    next_sequence: u64,
    entries: Vec<Entry>,
}

struct Entry {
    resource: Weak<dyn Resource>,
    sequence: u64,
}

impl Entry {
    fn is(&self, ptr: *const ()) -> bool {
        Weak::as_ptr(&self.resource) as *const () == ptr
    }
}

impl State {
    fn prune(&mut self) {
        self.entries.retain(|entry| entry.resource.strong_count() > 0);
    }
}

impl ResourceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(State::default())),
        }
    }

    /// Registers a resource.
    ///
    /// Registering a resource that is already present keeps its original
    /// sequence number.
    pub fn register<R>(&self, resource: &Arc<R>)
    where
        R: Resource + 'static,
    {
        let weak: Weak<R> = Arc::downgrade(resource);
        self.insert(weak);
    }

    /// Registers a type-erased resource.
    pub fn register_dyn(&self, resource: &Arc<dyn Resource>) {
        self.insert(Arc::downgrade(resource));
    }

    fn insert(&self, resource: Weak<dyn Resource>) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.prune();

        let ptr = Weak::as_ptr(&resource) as *const ();
        if state.entries.iter().any(|entry| entry.is(ptr)) {
            return;
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.entries.push(Entry { resource, sequence });
        tracing::trace!(sequence, "Registered checkpoint resource");
    }

    /// Removes a resource. Returns true if it was registered.
    pub fn deregister<R>(&self, resource: &Arc<R>) -> bool
    where
        R: Resource + ?Sized,
    {
        let ptr = Arc::as_ptr(resource) as *const ();
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let before = state.entries.len();
        state.entries.retain(|entry| !entry.is(ptr));
        state.prune();
        state.entries.len() < before
    }

    /// Returns the number of live registered resources.
    pub fn len(&self) -> usize {
        let guard = self.state.lock();
        let state = guard.borrow();
        state
            .entries
            .iter()
            .filter(|entry| entry.resource.strong_count() > 0)
            .count()
    }

    /// Returns true if no live resource is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notifies every live resource that a checkpoint is about to be taken.
    ///
    /// Resources are visited in reverse registration order. A failing
    /// resource does not stop the sweep; all failures are returned together.
    pub fn notify_before_checkpoint(&self) -> Result<(), CheckpointError> {
        let _guard = self.state.lock();
        let mut errors = CheckpointError::default();
        for (sequence, resource) in self.live_resources().into_iter().rev() {
            if let Err(error) = resource.before_checkpoint(self) {
                tracing::debug!(sequence, error = %error, "Resource failed before checkpoint");
                errors.absorb(error);
            }
        }
        errors.into_result()
    }

    /// Notifies every live resource that the environment has been restored.
    ///
    /// Resources are visited in registration order.
    pub fn notify_after_restore(&self) -> Result<(), RestoreError> {
        let _guard = self.state.lock();
        let mut errors = RestoreError::default();
        for (sequence, resource) in self.live_resources() {
            if let Err(error) = resource.after_restore(self) {
                tracing::debug!(sequence, error = %error, "Resource failed after restore");
                errors.absorb(error);
            }
        }
        errors.into_result()
    }

    /// Snapshot of live resources in ascending sequence order. The borrow is
    /// released before returning so callbacks can re-enter the registry.
    fn live_resources(&self) -> Vec<(u64, Arc<dyn Resource>)> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.prune();
        state
            .entries
            .iter()
            .filter_map(|entry| entry.resource.upgrade().map(|r| (entry.sequence, r)))
            .collect()
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl Resource for ResourceRegistry {
    fn before_checkpoint(&self, _context: &ResourceRegistry) -> Result<(), BoxError> {
        self.notify_before_checkpoint()
            .map_err(|e| Box::new(e) as BoxError)
    }

    fn after_restore(&self, _context: &ResourceRegistry) -> Result<(), BoxError> {
        self.notify_after_restore().map_err(|e| Box::new(e) as BoxError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                log: log.clone(),
                fail: false,
            })
        }

        fn failing(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                log: log.clone(),
                fail: true,
            })
        }
    }

    impl Resource for Recorder {
        fn before_checkpoint(&self, _context: &ResourceRegistry) -> Result<(), BoxError> {
            self.log.lock().push(format!("before:{}", self.name));
            if self.fail {
                return Err(format!("{} failed", self.name).into());
            }
            Ok(())
        }

        fn after_restore(&self, _context: &ResourceRegistry) -> Result<(), BoxError> {
            self.log.lock().push(format!("after:{}", self.name));
            if self.fail {
                return Err(format!("{} failed", self.name).into());
            }
            Ok(())
        }
    }

    #[test]
    fn test_checkpoint_reverse_and_restore_forward() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ResourceRegistry::new();
        let a = Recorder::new("a", &log);
        let b = Recorder::new("b", &log);
        let c = Recorder::new("c", &log);
        registry.register(&a);
        registry.register(&b);
        registry.register(&c);

        registry.notify_before_checkpoint().unwrap();
        registry.notify_after_restore().unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "before:c", "before:b", "before:a", "after:a", "after:b", "after:c"
            ]
        );
    }

    #[test]
    fn test_register_is_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ResourceRegistry::new();
        let a = Recorder::new("a", &log);
        let b = Recorder::new("b", &log);
        registry.register(&a);
        registry.register(&b);
        registry.register(&a);

        assert_eq!(registry.len(), 2);
        registry.notify_after_restore().unwrap();
        assert_eq!(*log.lock(), vec!["after:a", "after:b"]);
    }

    #[test]
    fn test_concrete_and_erased_handles_share_one_entry() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ResourceRegistry::new();
        let a = Recorder::new("a", &log);
        let erased: Arc<dyn Resource> = a.clone();
        registry.register(&a);
        registry.register_dyn(&erased);

        assert_eq!(registry.len(), 1);
        registry.notify_before_checkpoint().unwrap();
        assert_eq!(*log.lock(), vec!["before:a"]);
    }

    #[test]
    fn test_dropped_resource_is_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ResourceRegistry::new();
        let a = Recorder::new("a", &log);
        let b = Recorder::new("b", &log);
        registry.register(&a);
        registry.register(&b);
        drop(a);

        assert_eq!(registry.len(), 1);
        registry.notify_before_checkpoint().unwrap();
        assert_eq!(*log.lock(), vec!["before:b"]);
    }

    #[test]
    fn test_deregister() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ResourceRegistry::new();
        let a = Recorder::new("a", &log);
        registry.register(&a);

        assert!(registry.deregister(&a));
        assert!(!registry.deregister(&a));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_failures_are_aggregated_without_short_circuit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ResourceRegistry::new();
        let a = Recorder::failing("a", &log);
        let b = Recorder::new("b", &log);
        let c = Recorder::failing("c", &log);
        registry.register(&a);
        registry.register(&b);
        registry.register(&c);

        let err = registry.notify_before_checkpoint().unwrap_err();
        let messages: Vec<String> = err.suppressed().iter().map(|e| e.to_string()).collect();
        assert_eq!(messages, vec!["c failed", "a failed"]);
        assert_eq!(log.lock().len(), 3);
    }

    #[test]
    fn test_nested_registry_failures_are_flattened() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let parent = ResourceRegistry::new();
        let child = Arc::new(ResourceRegistry::new());
        let a = Recorder::failing("a", &log);
        let b = Recorder::failing("b", &log);
        child.register(&a);
        child.register(&b);
        parent.register(&child);

        let err = parent.notify_after_restore().unwrap_err();
        assert_eq!(err.suppressed().len(), 2);
        assert!(err.suppressed().iter().all(|e| !e.is::<RestoreError>()));
    }

    struct SelfRegistering {
        extra: Arc<Mutex<Option<Arc<dyn Resource>>>>,
    }

    impl Resource for SelfRegistering {
        fn before_checkpoint(&self, context: &ResourceRegistry) -> Result<(), BoxError> {
            if let Some(extra) = self.extra.lock().as_ref() {
                context.register_dyn(extra);
            }
            Ok(())
        }

        fn after_restore(&self, _context: &ResourceRegistry) -> Result<(), BoxError> {
            Ok(())
        }
    }

    #[test]
    fn test_callback_may_register_reentrantly() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ResourceRegistry::new();
        let late: Arc<dyn Resource> = Recorder::new("late", &log);
        let first = Arc::new(SelfRegistering {
            extra: Arc::new(Mutex::new(Some(late.clone()))),
        });
        registry.register(&first);

        registry.notify_before_checkpoint().unwrap();
        assert!(log.lock().is_empty());
        assert_eq!(registry.len(), 2);

        registry.notify_after_restore().unwrap();
        assert_eq!(*log.lock(), vec!["after:late"]);
    }
}
