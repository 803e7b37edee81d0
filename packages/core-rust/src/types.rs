use serde::{Deserialize, Serialize};

/// Dynamic value carried as action parameters, results, and event payloads.
///
/// Serialization and transport are the broker runtime's concern; the adapter
/// only moves these values between the runtime and service members.
pub use serde_json::Value;

/// A service as reported by the broker runtime's registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service name (the text before the first `.` of an action name).
    pub name: String,
    /// Whether at least one instance is currently able to accept calls.
    pub available: bool,
}

impl ServiceInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, available: bool) -> Self {
        Self {
            name: name.into(),
            available,
        }
    }
}

/// Filter passed to `resolve_services`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFilter {
    /// Only return services that are currently available.
    pub only_available: bool,
    /// Only return services hosted on the local node.
    pub only_local: bool,
}

impl ServiceFilter {
    /// Filter used by the call router's fail-fast check.
    #[must_use]
    pub fn available() -> Self {
        Self {
            only_available: true,
            only_local: false,
        }
    }
}

/// Descriptor of a node known to the broker runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub id: String,
    /// Broker namespace the node belongs to. Nodes only see peers in the
    /// same namespace.
    #[serde(default)]
    pub namespace: String,
    /// `true` for the node this process runs.
    pub local: bool,
    /// `false` once the node has disconnected or stopped.
    pub available: bool,
    /// Host the node runs on, when the runtime knows it.
    pub hostname: Option<String>,
    /// Names of the services hosted on the node.
    pub services: Vec<String>,
}

impl NodeInfo {
    /// Creates an available remote node with no services.
    #[must_use]
    pub fn remote(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            namespace: String::new(),
            local: false,
            available: true,
            hostname: None,
            services: Vec::new(),
        }
    }

    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}
