//! Configuration loading from multiple sources

use crate::{validate_config, ConfigError, ControllerConfig, Result};
use anyhow::Context;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use std::path::Path;
use tracing::debug;

/// Environment variable prefix, e.g. `KEYCHAIN_NETWORK__LOG_LEVEL=debug`
pub const ENV_PREFIX: &str = "KEYCHAIN";

/// Configuration loader with support for multiple formats and sources
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    ///
    /// Supports TOML, YAML, and JSON formats based on file extension
    pub fn from_file(path: &Path) -> Result<ControllerConfig> {
        let content = std::fs::read_to_string(path)?;

        match Self::format_of(path)? {
            FileFormat::Toml => Self::from_toml(&content),
            FileFormat::Yaml => Self::from_yaml(&content),
            _ => Self::from_json(&content),
        }
    }

    fn format_of(path: &Path) -> Result<FileFormat> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| ConfigError::LoadError("No file extension found".to_string()))?;

        match extension {
            "toml" => Ok(FileFormat::Toml),
            "yaml" | "yml" => Ok(FileFormat::Yaml),
            "json" => Ok(FileFormat::Json),
            _ => Err(ConfigError::LoadError(format!(
                "Unsupported file extension: {}",
                extension
            ))),
        }
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<ControllerConfig> {
        toml::from_str(content).map_err(ConfigError::from)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(content: &str) -> Result<ControllerConfig> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Load configuration from JSON string
    pub fn from_json(content: &str) -> Result<ControllerConfig> {
        serde_json::from_str(content).map_err(ConfigError::from)
    }

    /// Load configuration from `KEYCHAIN_`-prefixed environment variables
    pub fn from_env() -> Result<ControllerConfig> {
        Self::from_env_with_prefix(ENV_PREFIX)
    }

    /// Load configuration from environment variables with custom prefix
    ///
    /// Nested keys are separated by a double underscore:
    /// `KEYCHAIN_EXECUTION__FEE_MULTIPLIER=2.0`
    pub fn from_env_with_prefix(prefix: &str) -> Result<ControllerConfig> {
        Self::builder().add_env(prefix).build()
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Values are merged key by key, so an override only replaces the
    /// fields it names.
    pub fn from_file_with_env(path: &Path, env_prefix: &str) -> Result<ControllerConfig> {
        Self::builder()
            .add_file(path, true)?
            .add_env(env_prefix)
            .build()
    }

    /// Build configuration using the config crate's builder pattern
    pub fn builder() -> ConfigLoaderBuilder {
        ConfigLoaderBuilder {
            builder: Config::builder(),
        }
    }

    /// Load, apply env overrides and validate. Without a path, the local
    /// preset is the base.
    pub fn load(path: Option<&Path>) -> anyhow::Result<ControllerConfig> {
        let config = match path {
            Some(path) => Self::from_file_with_env(path, ENV_PREFIX)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => Self::builder()
                .add_defaults(&ControllerConfig::local())
                .context("serializing default config")?
                .add_env(ENV_PREFIX)
                .build()
                .context("loading config from environment")?,
        };

        validate_config(&config).context("invalid controller config")?;
        debug!(
            environment = ?config.network.environment,
            default_chain = %config.default_chain,
            "controller config loaded"
        );
        Ok(config)
    }
}

/// Builder for complex configuration loading scenarios
pub struct ConfigLoaderBuilder {
    builder: ConfigBuilder<config::builder::DefaultState>,
}

impl ConfigLoaderBuilder {
    /// Add a configuration file source
    pub fn add_file(mut self, path: &Path, required: bool) -> Result<Self> {
        let format = ConfigLoader::format_of(path)?;
        self.builder = self
            .builder
            .add_source(File::from(path).format(format).required(required));
        Ok(self)
    }

    /// Use a full config as the lowest-priority source
    pub fn add_defaults(mut self, defaults: &ControllerConfig) -> Result<Self> {
        let json = serde_json::to_string(defaults)?;
        self.builder = self
            .builder
            .add_source(File::from_str(&json, FileFormat::Json));
        Ok(self)
    }

    /// Add environment variable source with prefix
    pub fn add_env(mut self, prefix: &str) -> Self {
        self.builder = self.builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("session.sensitive_methods")
                .try_parsing(true),
        );
        self
    }

    /// Set a default value for a key
    pub fn set_default(mut self, key: &str, value: &str) -> Result<Self> {
        self.builder = self.builder.set_default(key, value)?;
        Ok(self)
    }

    /// Build the final configuration
    pub fn build(self) -> Result<ControllerConfig> {
        let config = self.builder.build()?;
        config.try_deserialize().map_err(ConfigError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Environment, StorageBackend};
    use std::io::Write;

    const TOML: &str = r#"
        default_chain = "sepolia"

        [network]
        environment = "sepolia"
        log_level = "debug"

        [chains.sepolia]
        chain_id = "SN_SEPOLIA"
        rpc_url = "https://rpc.sepolia.example"

        [paymaster]
        enabled = true
        url = "https://paymaster.example"

        [backend]
        url = "https://api.example"

        [execution]
        fee_multiplier = 2.0

        [storage]
        backend = "sqlite"
        path = "/tmp/keychain.db"
    "#;

    #[test]
    fn test_load_from_toml() {
        let config = ConfigLoader::from_toml(TOML).unwrap();
        assert_eq!(config.network.environment, Environment::Sepolia);
        assert_eq!(config.default_chain_config().unwrap().chain_id, "SN_SEPOLIA");
        assert_eq!(config.execution.fee_multiplier, 2.0);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        // unspecified sections fall back to defaults
        assert_eq!(config.approval.headless_ttl_secs, 300);
    }

    #[test]
    fn test_load_from_yaml() {
        let yaml = r#"
network:
  environment: mainnet
default_chain: mainnet
chains:
  mainnet:
    chain_id: SN_MAIN
    rpc_url: "https://rpc.example"
session:
  ttl_secs: 3600
  sensitive_methods:
    - approve
"#;

        let config = ConfigLoader::from_yaml(yaml).unwrap();
        assert_eq!(config.session.ttl_secs, 3600);
        assert_eq!(config.session.sensitive_methods, vec!["approve".to_string()]);
        assert_eq!(config.chains["mainnet"].timeout_ms, 30000);
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"
{
  "network": { "environment": "local", "log_level": "warn" },
  "default_chain": "local",
  "chains": { "local": { "chain_id": "SN_KATANA", "rpc_url": "http://localhost:5050" } },
  "approval": { "headless_ttl_secs": 60 }
}
        "#;

        let config = ConfigLoader::from_json(json).unwrap();
        assert_eq!(config.network.log_level, "warn");
        assert_eq!(config.approval.headless_ttl_secs, 60);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(TOML.as_bytes()).unwrap();

        let config = ConfigLoader::from_file(file.path()).unwrap();
        assert_eq!(config.network.log_level, "debug");

        let config = ConfigLoader::load(Some(file.path())).unwrap();
        assert_eq!(config.paymaster.url.as_deref(), Some("https://paymaster.example"));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new()
            .suffix(".ini")
            .tempfile()
            .unwrap();
        assert!(matches!(
            ConfigLoader::from_file(file.path()),
            Err(ConfigError::LoadError(_))
        ));
    }

    #[test]
    fn test_builder_defaults_and_overrides() {
        let config = ConfigLoader::builder()
            .add_defaults(&ControllerConfig::mainnet())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(config.default_chain, "mainnet");
        assert_eq!(config.paymaster.url, ControllerConfig::mainnet().paymaster.url);

        let config = ConfigLoader::builder()
            .set_default("execution.fee_multiplier", "3.0")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(config.execution.fee_multiplier, 3.0);
        assert_eq!(config.default_chain, "local");
    }
}
