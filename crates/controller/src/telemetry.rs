use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use keychain_config::NetworkConfig;

/// Install the global subscriber. `RUST_LOG` wins over `level` when set.
pub fn init_tracing(level: &str, json: bool) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{level},keychain=debug")))
        .unwrap_or_else(|_| EnvFilter::new("info,keychain=debug"));

    let json_layer = json.then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .json()
    });
    let text_layer = (!json).then(|| fmt::layer().with_target(true).with_level(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| TelemetryError::InitError(e.to_string()))?;

    Ok(())
}

pub fn init_from_config(network: &NetworkConfig) -> Result<(), TelemetryError> {
    init_tracing(&network.log_level, network.json_logs)
}

/// Correlation ID tagging every log line of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(uuid::Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Span context for one `execute` request
#[derive(Debug, Clone)]
pub struct ExecutionSpan {
    pub correlation_id: CorrelationId,
    pub origin: String,
    pub address: String,
}

impl ExecutionSpan {
    pub fn new(origin: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            origin: origin.into(),
            address: address.into(),
        }
    }

    /// Span to instrument the request future with
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "execute",
            correlation_id = %self.correlation_id,
            origin = %self.origin,
            address = %self.address,
        )
    }

    /// Enter the span on the current thread (synchronous sections only)
    pub fn enter(&self) -> tracing::span::EnteredSpan {
        self.span().entered()
    }
}

/// Log an error against the request that produced it
pub trait ErrorContext {
    fn with_correlation_id(self, correlation_id: CorrelationId) -> Self;
}

impl<T, E> ErrorContext for Result<T, E>
where
    E: std::fmt::Display,
{
    fn with_correlation_id(self, correlation_id: CorrelationId) -> Self {
        self.map_err(|e| {
            tracing::error!(
                correlation_id = %correlation_id,
                error = %e,
                "request failed"
            );
            e
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("tracing initialization error: {0}")]
    InitError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_generation() {
        let id1 = CorrelationId::new();
        let id2 = CorrelationId::new();

        assert_ne!(id1, id2);
        assert_eq!(id1.as_str().len(), 36);
    }

    #[test]
    fn test_execution_span_fields() {
        let span = ExecutionSpan::new("https://game.example", "0xacc");

        assert_eq!(span.origin, "https://game.example");
        assert_eq!(span.address, "0xacc");
        let _entered = span.enter();
    }

    #[test]
    fn test_error_context_passes_error_through() {
        let result: Result<(), String> = Err("boom".to_string());
        assert_eq!(
            result.with_correlation_id(CorrelationId::new()),
            Err("boom".to_string())
        );
    }
}
