use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::TypeIndex;

/// Change notification published by the type registry after its write lock
/// has been released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    TypesAdded {
        indices: Vec<TypeIndex>,
    },
    TypesRemoved {
        path: String,
        indices: Vec<TypeIndex>,
    },
    PathRenamed {
        old_path: String,
        new_path: String,
        indices: Vec<TypeIndex>,
    },
    Reset {
        epoch: u64,
    },
}

pub type RegistryHook = Arc<dyn Fn(&RegistryEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub(crate) struct EventBus {
    next_id: AtomicU64,
    hooks: Mutex<Vec<(SubscriptionId, RegistryHook)>>,
}

impl EventBus {
    pub(crate) fn subscribe(&self, hook: RegistryHook) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.hooks.lock().push((id, hook));
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut hooks = self.hooks.lock();
        let before = hooks.len();
        hooks.retain(|(existing, _)| *existing != id);
        hooks.len() != before
    }

    /// Hooks run on a snapshot so a hook may subscribe, unsubscribe or call
    /// back into the registry.
    pub(crate) fn broadcast(&self, event: &RegistryEvent) {
        let hooks: Vec<RegistryHook> = self
            .hooks
            .lock()
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        for hook in hooks {
            hook(event);
        }
    }
}
