//! Configuration for the adapter, the in-process broker, and logging.
//!
//! Every struct has a `Default` matching the built-in defaults and derives
//! `clap::Args`, so values can come from flags or environment variables.

use std::time::Duration;

use clap::{Args, Parser};

use crate::logging::LoggingConfig;

/// Default wait applied by `wait_and_call`.
pub const DEFAULT_WAIT_FOR_SERVICES_TIMEOUT_MS: u64 = 10_000;

// ---------------------------------------------------------------------------
// AdapterConfig
// ---------------------------------------------------------------------------

/// Settings consumed by the broker adapter and its call router.
#[derive(Debug, Clone, Args)]
pub struct AdapterConfig {
    /// Maximum time `wait_and_call` waits for its target service, in
    /// milliseconds. 0 selects the default.
    #[arg(
        long = "wait-for-services-timeout",
        env = "WAIT_FOR_SERVICES_TIMEOUT",
        default_value_t = DEFAULT_WAIT_FOR_SERVICES_TIMEOUT_MS
    )]
    pub wait_for_services_timeout_ms: u64,
}

impl AdapterConfig {
    /// Effective availability wait for `wait_and_call`.
    #[must_use]
    pub fn wait_for_services_timeout(&self) -> Duration {
        match self.wait_for_services_timeout_ms {
            0 => Duration::from_millis(DEFAULT_WAIT_FOR_SERVICES_TIMEOUT_MS),
            ms => Duration::from_millis(ms),
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            wait_for_services_timeout_ms: DEFAULT_WAIT_FOR_SERVICES_TIMEOUT_MS,
        }
    }
}

// ---------------------------------------------------------------------------
// BrokerSettings
// ---------------------------------------------------------------------------

/// Settings for the in-process `LocalBroker`.
#[derive(Debug, Clone, Args)]
pub struct BrokerSettings {
    /// Node identifier. Generated from the process id when unset.
    #[arg(long = "node-id", env = "NODE_ID")]
    pub node_id: Option<String>,
    /// Namespace of this node. Peers announced in another namespace are
    /// ignored.
    #[arg(long = "namespace", env = "BROKER_NAMESPACE", default_value = "")]
    pub namespace: String,
    /// Per-call timeout in seconds. 0 disables it.
    #[arg(long = "request-timeout", env = "REQUEST_TIMEOUT", default_value_t = 60)]
    pub request_timeout_secs: u64,
    /// Deepest allowed chain of nested calls.
    #[arg(long = "max-call-level", env = "MAX_CALL_LEVEL", default_value_t = 100)]
    pub max_call_level: u32,
    /// How long a starting service waits for each dependency, in milliseconds.
    #[arg(long = "dependency-timeout", env = "DEPENDENCY_TIMEOUT", default_value_t = 10_000)]
    pub dependency_timeout_ms: u64,
}

impl BrokerSettings {
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    #[must_use]
    pub fn dependency_timeout(&self) -> Duration {
        Duration::from_millis(self.dependency_timeout_ms)
    }

    /// Configured node id, or `node-<pid>`.
    #[must_use]
    pub fn resolved_node_id(&self) -> String {
        self.node_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("node-{}", std::process::id()))
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            node_id: None,
            namespace: String::new(),
            request_timeout_secs: 60,
            max_call_level: 100,
            dependency_timeout_ms: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// NodeConfig
// ---------------------------------------------------------------------------

/// Complete node configuration, parsed from flags and the environment.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "brokerlink-node")]
pub struct NodeConfig {
    #[command(flatten)]
    pub adapter: AdapterConfig,
    #[command(flatten)]
    pub broker: BrokerSettings,
    #[command(flatten)]
    pub logging: LoggingConfig,
}

impl NodeConfig {
    /// Builds the configuration from environment variables only.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable holds an unparsable value.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::try_parse_from(["brokerlink-node"])?)
    }
}
