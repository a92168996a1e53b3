use common::WorkloadGroup;

/// Name every tenant backend workload group carries.
pub const TENANT_BACKEND_NAME: &str = "bfl";
/// Tenant namespaces are `user-space-<user>`.
pub const TENANT_NAMESPACE_PREFIX: &str = "user-space";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Update,
    Delete,
    Generic,
}

/// A lifecycle event for an object of type `T`.
#[derive(Debug, Clone, PartialEq)]
pub enum Event<T> {
    Create(T),
    Update { old: T, new: T },
    Delete(T),
    Generic(T),
}

impl<T> Event<T> {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Create(_) => EventKind::Create,
            Event::Update { .. } => EventKind::Update,
            Event::Delete(_) => EventKind::Delete,
            Event::Generic(_) => EventKind::Generic,
        }
    }

    /// The object the event is about; the new state for updates.
    pub fn object(&self) -> &T {
        match self {
            Event::Create(o) | Event::Delete(o) | Event::Generic(o) => o,
            Event::Update { new, .. } => new,
        }
    }
}

type Accept<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Lets only "object appeared" events through. Creates are additionally
/// checked by the optional acceptance predicate.
pub struct CreateOnly<T> {
    accept: Option<Accept<T>>,
}

impl<T> CreateOnly<T> {
    pub fn all() -> Self {
        Self { accept: None }
    }

    pub fn with(accept: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            accept: Some(Box::new(accept)),
        }
    }

    pub fn admits(&self, event: &Event<T>) -> bool {
        match event {
            Event::Create(obj) => self.accept.as_ref().is_none_or(|f| f(obj)),
            Event::Update { .. } | Event::Delete(_) | Event::Generic(_) => false,
        }
    }
}

impl CreateOnly<WorkloadGroup> {
    pub fn tenant_backends() -> Self {
        Self::with(|g: &WorkloadGroup| {
            is_tenant_backend(&g.metadata.namespace, &g.metadata.name)
        })
    }
}

pub fn is_tenant_backend(namespace: &str, name: &str) -> bool {
    name == TENANT_BACKEND_NAME && namespace.starts_with(TENANT_NAMESPACE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Node, ObjectMeta};

    fn group(ns: &str, name: &str) -> WorkloadGroup {
        WorkloadGroup::new(ObjectMeta::new(ns, name))
    }

    #[test]
    fn only_creates_pass() {
        let filter = CreateOnly::<Node>::all();
        let node = Node::with_internal_ip("n", "10.0.0.1");
        assert!(filter.admits(&Event::Create(node.clone())));
        assert!(!filter.admits(&Event::Update {
            old: node.clone(),
            new: node.clone()
        }));
        assert!(!filter.admits(&Event::Delete(node.clone())));
        assert!(!filter.admits(&Event::Generic(node)));
    }

    #[test]
    fn tenant_filter_rejects_every_non_create() {
        let filter = CreateOnly::tenant_backends();
        let g = group("user-space-alice", "bfl");
        for event in [
            Event::Update {
                old: g.clone(),
                new: g.clone(),
            },
            Event::Delete(g.clone()),
            Event::Generic(g.clone()),
        ] {
            assert!(!filter.admits(&event), "{:?} must be rejected", event.kind());
        }
        assert!(filter.admits(&Event::Create(g)));
    }

    #[test]
    fn tenant_filter_checks_name_and_namespace() {
        let filter = CreateOnly::tenant_backends();
        assert!(!filter.admits(&Event::Create(group("user-space-alice", "bfl-2"))));
        assert!(!filter.admits(&Event::Create(group("user-system-alice", "bfl"))));
        assert!(!filter.admits(&Event::Create(group("default", "bfl"))));
        assert!(filter.admits(&Event::Create(group("user-space-bob", "bfl"))));
    }

    #[test]
    fn object_of_update_is_new_state() {
        let ev = Event::Update { old: 1, new: 2 };
        assert_eq!(*ev.object(), 2);
        assert_eq!(ev.kind(), EventKind::Update);
    }
}
