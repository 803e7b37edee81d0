use std::sync::Arc;

use super::object::{same_instance, ServiceObject};

// ---------------------------------------------------------------------------
// ServiceState
// ---------------------------------------------------------------------------

/// Binding state of a service instance tracked by a facade.
///
/// State machine: Unregistered -> Registered -> Binding -> Bound. Destroying
/// an instance drops it from tracking, which reads back as `Unregistered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Not tracked by the facade.
    Unregistered,
    /// Tracked, not (yet) handed to a runtime.
    Registered,
    /// Descriptor handed to the runtime, registration not yet confirmed.
    Binding,
    /// Descriptor registered with the attached runtime.
    Bound,
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// One tracked service instance.
#[derive(Clone)]
pub struct ServiceEntry {
    /// Unique per insertion; a re-registered instance gets a new id.
    pub id: u64,
    pub instance: Arc<dyn ServiceObject>,
    pub dependencies: Vec<String>,
    pub state: ServiceState,
}

/// Locally owned service instances, in registration order.
///
/// Instances are keyed by pointer identity: the same `Arc` registered twice
/// is one entry. Not synchronized; the facade guards it with a mutex.
#[derive(Default)]
pub struct ServiceRegistry {
    entries: Vec<ServiceEntry>,
    next_id: u64,
}

/// A `Registered -> Binding` claim taken by [`ServiceRegistry::claim_bind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindClaim {
    pub id: u64,
    pub dependencies: Vec<String>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, instance: &Arc<dyn ServiceObject>) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| same_instance(&entry.instance, instance))
    }

    /// Track `instance`. Returns `false` if it was already tracked, in which
    /// case nothing changes.
    pub fn insert(&mut self, instance: Arc<dyn ServiceObject>, dependencies: Vec<String>) -> bool {
        if self.position(&instance).is_some() {
            return false;
        }
        self.next_id += 1;
        self.entries.push(ServiceEntry {
            id: self.next_id,
            instance,
            dependencies,
            state: ServiceState::Registered,
        });
        true
    }

    #[must_use]
    pub fn state(&self, instance: &Arc<dyn ServiceObject>) -> ServiceState {
        self.position(instance)
            .map_or(ServiceState::Unregistered, |idx| self.entries[idx].state)
    }

    /// Dependencies recorded when `instance` was first registered.
    #[must_use]
    pub fn dependencies(&self, instance: &Arc<dyn ServiceObject>) -> Option<Vec<String>> {
        self.position(instance)
            .map(|idx| self.entries[idx].dependencies.clone())
    }

    /// Moves a tracked instance from `from` to `to`. Returns `false` (and
    /// changes nothing) if the instance is untracked or not in `from`.
    pub fn transition(
        &mut self,
        instance: &Arc<dyn ServiceObject>,
        from: ServiceState,
        to: ServiceState,
    ) -> bool {
        match self.position(instance) {
            Some(idx) if self.entries[idx].state == from => {
                self.entries[idx].state = to;
                true
            }
            _ => false,
        }
    }

    /// Moves `instance` from `Registered` to `Binding`. Returns `None` if it is
    /// untracked or in any other state.
    pub fn claim_bind(&mut self, instance: &Arc<dyn ServiceObject>) -> Option<BindClaim> {
        let idx = self.position(instance)?;
        let entry = &mut self.entries[idx];
        if entry.state != ServiceState::Registered {
            return None;
        }
        entry.state = ServiceState::Binding;
        Some(BindClaim {
            id: entry.id,
            dependencies: entry.dependencies.clone(),
        })
    }

    /// Settles the claim `id` as `Bound` or back to `Registered`. Returns
    /// `false` if the claimed entry is no longer tracked.
    pub fn finish_bind(&mut self, id: u64, bound: bool) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.id == id && entry.state == ServiceState::Binding)
        else {
            return false;
        };
        entry.state = if bound {
            ServiceState::Bound
        } else {
            ServiceState::Registered
        };
        true
    }

    /// Stops tracking `instance`, returning its entry.
    pub fn remove(&mut self, instance: &Arc<dyn ServiceObject>) -> Option<ServiceEntry> {
        self.position(instance).map(|idx| self.entries.remove(idx))
    }

    /// Entries currently in `state`, in registration order.
    #[must_use]
    pub fn in_state(&self, state: ServiceState) -> Vec<ServiceEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.state == state)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
