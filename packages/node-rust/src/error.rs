/// Errors surfaced by the call router and the service facade.
///
/// The adapter only creates errors at its own boundary checks. Failures from
/// the runtime or from service members travel through `Call` untouched, so
/// `downcast_ref` on the inner `anyhow::Error` still sees the original type.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("service not available: {service}")]
    ServiceUnavailable { service: String },
    #[error("dependent service `{service}` not available after {timeout_ms}ms")]
    DependencyUnavailable { service: String, timeout_ms: u64 },
    #[error("no broker runtime attached: cannot {operation}")]
    NoRuntimeAttached { operation: &'static str },
    #[error("broker adapter was dropped before dispatch")]
    AdapterDropped,
    #[error(transparent)]
    Call(#[from] anyhow::Error),
}

impl BrokerError {
    /// Returns the member or runtime error carried by `Call`.
    #[must_use]
    pub fn as_call_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Call(err) => Some(err),
            _ => None,
        }
    }
}
