//! Configuration validation

use crate::{ChainConfig, ConfigError, ControllerConfig, Result, StorageBackend};
use std::collections::HashSet;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the entire controller configuration, reporting every problem
pub fn validate_config(config: &ControllerConfig) -> Result<()> {
    let mut errors = Vec::new();

    // Validate network config
    if let Err(e) = validate_log_level(&config.network.log_level) {
        errors.push(e);
    }

    // Validate chains
    if config.chains.is_empty() {
        errors.push(ValidationError::new("chains", "at least one chain is required"));
    }

    for (chain_name, chain_config) in &config.chains {
        if let Err(e) = validate_chain_config(chain_config) {
            errors.push(ValidationError::new(format!("chains.{chain_name}"), e));
        }
    }

    let chain_ids: HashSet<_> = config.chains.values().map(|c| &c.chain_id).collect();
    if chain_ids.len() != config.chains.len() {
        errors.push(ValidationError::new("chains", "duplicate chain IDs found"));
    }

    if !config.chains.contains_key(&config.default_chain) {
        errors.push(ValidationError::new(
            "default_chain",
            format!("chain '{}' not found in chains config", config.default_chain),
        ));
    }

    // Validate paymaster config
    if config.paymaster.enabled {
        match &config.paymaster.url {
            Some(url) => {
                if let Err(e) = validate_url(url) {
                    errors.push(ValidationError::new("paymaster.url", e));
                }
            }
            None => errors.push(ValidationError::new(
                "paymaster.url",
                "paymaster url is required when the paymaster is enabled",
            )),
        }
    }

    // Validate backend config
    if let Err(e) = validate_url(&config.backend.url) {
        errors.push(ValidationError::new("backend.url", e));
    }

    // Validate session config
    if config.session.ttl_secs == 0 {
        errors.push(ValidationError::new("session.ttl_secs", "must be greater than 0"));
    }

    if config.session.sensitive_methods.iter().any(|m| m.trim().is_empty()) {
        errors.push(ValidationError::new(
            "session.sensitive_methods",
            "method names must not be empty",
        ));
    }

    // Validate account config
    if let Some(class_hash) = &config.account.latest_class_hash {
        if let Err(e) = validate_felt_hex(class_hash) {
            errors.push(ValidationError::new("account.latest_class_hash", e));
        }
    }

    if let Err(e) = validate_felt_hex(&config.account.webauthn_class_hash) {
        errors.push(ValidationError::new("account.webauthn_class_hash", e));
    }

    if config.account.introspection_entrypoint.trim().is_empty() {
        errors.push(ValidationError::new(
            "account.introspection_entrypoint",
            "entrypoint is required",
        ));
    }

    if config.account.registration_entrypoint.trim().is_empty() {
        errors.push(ValidationError::new(
            "account.registration_entrypoint",
            "entrypoint is required",
        ));
    }

    // Validate execution config
    if config.execution.fee_multiplier.is_nan() || config.execution.fee_multiplier < 1.0 {
        errors.push(ValidationError::new(
            "execution.fee_multiplier",
            "must be at least 1.0",
        ));
    }

    if config.execution.outside_execution_window_secs == 0 {
        errors.push(ValidationError::new(
            "execution.outside_execution_window_secs",
            "must be greater than 0",
        ));
    }

    if config.execution.poll_initial_ms == 0 {
        errors.push(ValidationError::new(
            "execution.poll_initial_ms",
            "must be greater than 0",
        ));
    }

    if config.execution.poll_max_ms < config.execution.poll_initial_ms {
        errors.push(ValidationError::new(
            "execution.poll_max_ms",
            "must not be below poll_initial_ms",
        ));
    }

    if config.execution.finality_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "execution.finality_timeout_secs",
            "must be greater than 0",
        ));
    }

    // Validate approval config
    if config.approval.headless_ttl_secs == 0 {
        errors.push(ValidationError::new(
            "approval.headless_ttl_secs",
            "must be greater than 0",
        ));
    }

    if config.approval.webauthn_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "approval.webauthn_timeout_ms",
            "must be greater than 0",
        ));
    }

    if config.approval.password_rounds == 0 {
        errors.push(ValidationError::new(
            "approval.password_rounds",
            "must be greater than 0",
        ));
    }

    // Validate storage config
    if config.storage.backend == StorageBackend::Sqlite
        && config.storage.path.as_deref().map_or(true, |p| p.trim().is_empty())
    {
        errors.push(ValidationError::new(
            "storage.path",
            "database path is required for sqlite storage",
        ));
    }

    // Return all errors if any were found
    if !errors.is_empty() {
        let error_msg = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ConfigError::ValidationError(error_msg));
    }

    Ok(())
}

/// Validate a chain configuration
pub fn validate_chain_config(chain: &ChainConfig) -> std::result::Result<(), String> {
    if chain.chain_id.is_empty() {
        return Err("chain_id is required".to_string());
    }

    if chain.rpc_url.is_empty() {
        return Err("rpc_url is required".to_string());
    }

    validate_url(&chain.rpc_url)?;

    if chain.timeout_ms == 0 {
        return Err("timeout_ms must be greater than 0".to_string());
    }

    Ok(())
}

/// Validate a URL
pub fn validate_url(url: &str) -> std::result::Result<(), String> {
    if url.is_empty() {
        return Err("URL cannot be empty".to_string());
    }

    // Basic URL validation - check for scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err("URL must start with http:// or https://".to_string());
    }

    Ok(())
}

/// Validate a `0x`-prefixed field element of at most 64 hex digits
pub fn validate_felt_hex(value: &str) -> std::result::Result<(), String> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| format!("'{value}' must start with 0x"))?;

    if digits.is_empty() || digits.len() > 64 {
        return Err(format!("'{value}' must have 1 to 64 hex digits"));
    }

    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("'{value}' is not hexadecimal"));
    }

    Ok(())
}

/// Validate log level
fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new(
            "network.log_level",
            format!(
                "invalid log level '{level}', must be one of: trace, debug, info, warn, error"
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NetworkConfig, PaymasterConfig, StorageConfig};

    #[test]
    fn test_presets_are_valid() {
        assert!(validate_config(&ControllerConfig::mainnet()).is_ok());
        assert!(validate_config(&ControllerConfig::sepolia()).is_ok());
        assert!(validate_config(&ControllerConfig::local()).is_ok());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = ControllerConfig {
            network: NetworkConfig {
                log_level: "invalid".to_string(),
                ..Default::default()
            },
            ..ControllerConfig::local()
        };

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = ControllerConfig::local();
        config.default_chain = "missing".to_string();
        config.paymaster = PaymasterConfig {
            enabled: true,
            url: None,
            ..Default::default()
        };
        config.storage = StorageConfig {
            backend: StorageBackend::Sqlite,
            path: None,
        };
        config.execution.fee_multiplier = 0.5;

        let Err(ConfigError::ValidationError(message)) = validate_config(&config) else {
            panic!("expected validation error");
        };
        for field in [
            "default_chain",
            "paymaster.url",
            "storage.path",
            "execution.fee_multiplier",
        ] {
            assert!(message.contains(field), "missing {field} in {message}");
        }
    }

    #[test]
    fn test_validate_chain_config() {
        let valid_chain = ChainConfig {
            chain_id: "SN_SEPOLIA".to_string(),
            rpc_url: "https://rpc.example".to_string(),
            timeout_ms: 30000,
        };

        assert!(validate_chain_config(&valid_chain).is_ok());

        let invalid_chain = ChainConfig {
            chain_id: "".to_string(),
            ..valid_chain.clone()
        };

        assert!(validate_chain_config(&invalid_chain).is_err());
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com").is_ok());
        assert!(validate_url("http://localhost:5050").is_ok());

        assert!(validate_url("").is_err());
        assert!(validate_url("not-a-url").is_err());
        assert!(validate_url("ws://example.com").is_err());
    }

    #[test]
    fn test_validate_felt_hex() {
        assert!(validate_felt_hex("0x0").is_ok());
        assert!(validate_felt_hex(&format!("0x{}", "f".repeat(64))).is_ok());

        assert!(validate_felt_hex("123").is_err());
        assert!(validate_felt_hex("0x").is_err());
        assert!(validate_felt_hex("0xzz").is_err());
        assert!(validate_felt_hex(&format!("0x{}", "1".repeat(65))).is_err());
    }
}
