//! Core configuration structures for the Keychain account controller

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Network configuration
    pub network: NetworkConfig,

    /// Chain configurations by name
    pub chains: HashMap<String, ChainConfig>,

    /// Name of the chain used on connect
    pub default_chain: String,

    /// Paymaster relay configuration
    pub paymaster: PaymasterConfig,

    /// Account backend configuration
    pub backend: BackendConfig,

    /// Session policy configuration
    pub session: SessionConfig,

    /// Account sync configuration
    pub account: AccountConfig,

    /// Execution pipeline configuration
    pub execution: ExecutionConfig,

    /// Interactive and headless approval configuration
    pub approval: ApprovalConfig,

    /// Persistent storage configuration
    pub storage: StorageConfig,
}

/// Network environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Environment type (mainnet, sepolia, local)
    pub environment: Environment,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[serde(default = "default_true")]
    pub json_logs: bool,
}

/// Environment types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Mainnet,
    Sepolia,
    Local,
}

/// Configuration for a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain identifier (e.g. "SN_MAIN")
    pub chain_id: String,

    /// JSON-RPC endpoint URL
    pub rpc_url: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Paymaster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymasterConfig {
    /// Try sponsored execution before paying fees from the account
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Paymaster relay URL
    #[serde(default)]
    pub url: Option<String>,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Account backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend API base URL
    pub url: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session lifetime in seconds
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,

    /// Methods that always need interactive consent
    #[serde(default = "default_sensitive_methods")]
    pub sensitive_methods: Vec<String>,
}

/// Account configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Latest account class hash; older deployments are flagged stale
    #[serde(default)]
    pub latest_class_hash: Option<String>,

    /// Class hash of the WebAuthn signer, first element of its signatures
    #[serde(default = "default_webauthn_class_hash")]
    pub webauthn_class_hash: String,

    /// Minimum spacing between syncs in milliseconds
    #[serde(default = "default_sync_debounce_ms")]
    pub sync_debounce_ms: u64,

    /// Background sync interval in seconds (0 disables it)
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Entrypoint answering whether a public key is registered
    #[serde(default = "default_introspection_entrypoint")]
    pub introspection_entrypoint: String,

    /// Entrypoint adding a plugin key to the account
    #[serde(default = "default_registration_entrypoint")]
    pub registration_entrypoint: String,

    /// Sign and cache a key registration when a deployed account connects
    #[serde(default = "default_true")]
    pub register_on_connect: bool,
}

/// Execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Multiplier applied to estimated fees
    #[serde(default = "default_fee_multiplier")]
    pub fee_multiplier: f64,

    /// Validity window of sponsored outside executions in seconds
    #[serde(default = "default_outside_execution_window_secs")]
    pub outside_execution_window_secs: u64,

    /// First receipt poll delay in milliseconds
    #[serde(default = "default_poll_initial_ms")]
    pub poll_initial_ms: u64,

    /// Receipt poll delay cap in milliseconds
    #[serde(default = "default_poll_max_ms")]
    pub poll_max_ms: u64,

    /// Give up on finality after this many seconds
    #[serde(default = "default_finality_timeout_secs")]
    pub finality_timeout_secs: u64,
}

/// Approval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Headless approval lifetime in seconds
    #[serde(default = "default_headless_ttl_secs")]
    pub headless_ttl_secs: u64,

    /// WebAuthn ceremony timeout in milliseconds
    #[serde(default = "default_webauthn_timeout_ms")]
    pub webauthn_timeout_ms: u64,

    /// PBKDF2 rounds for password credentials
    #[serde(default = "default_password_rounds")]
    pub password_rounds: u32,
}

/// Storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,

    /// Database path, required for sqlite
    #[serde(default)]
    pub path: Option<String>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_session_ttl_secs() -> u64 {
    7 * 24 * 60 * 60 // 7 days
}

fn default_sensitive_methods() -> Vec<String> {
    [
        "approve",
        "increase_allowance",
        "increaseAllowance",
        "set_approval_for_all",
        "setApprovalForAll",
    ]
    .iter()
    .map(|m| m.to_string())
    .collect()
}

fn default_webauthn_class_hash() -> String {
    "0x0".to_string()
}

fn default_sync_debounce_ms() -> u64 {
    5000
}

fn default_sync_interval_secs() -> u64 {
    60
}

fn default_introspection_entrypoint() -> String {
    "is_public_key_registered".to_string()
}

fn default_registration_entrypoint() -> String {
    "add_public_key".to_string()
}

fn default_fee_multiplier() -> f64 {
    1.5
}

fn default_outside_execution_window_secs() -> u64 {
    600 // 10 minutes
}

fn default_poll_initial_ms() -> u64 {
    500
}

fn default_poll_max_ms() -> u64 {
    5000
}

fn default_finality_timeout_secs() -> u64 {
    180
}

fn default_headless_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_webauthn_timeout_ms() -> u64 {
    60000
}

fn default_password_rounds() -> u32 {
    100_000
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Memory
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::local()
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Local,
            log_level: default_log_level(),
            json_logs: default_true(),
        }
    }
}

impl Default for PaymasterConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            url: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            sensitive_methods: default_sensitive_methods(),
        }
    }
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            latest_class_hash: None,
            webauthn_class_hash: default_webauthn_class_hash(),
            sync_debounce_ms: default_sync_debounce_ms(),
            sync_interval_secs: default_sync_interval_secs(),
            introspection_entrypoint: default_introspection_entrypoint(),
            registration_entrypoint: default_registration_entrypoint(),
            register_on_connect: true,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            fee_multiplier: default_fee_multiplier(),
            outside_execution_window_secs: default_outside_execution_window_secs(),
            poll_initial_ms: default_poll_initial_ms(),
            poll_max_ms: default_poll_max_ms(),
            finality_timeout_secs: default_finality_timeout_secs(),
        }
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            headless_ttl_secs: default_headless_ttl_secs(),
            webauthn_timeout_ms: default_webauthn_timeout_ms(),
            password_rounds: default_password_rounds(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: None,
        }
    }
}

impl ControllerConfig {
    fn preset(
        environment: Environment,
        name: &str,
        chain_id: &str,
        rpc_url: &str,
        paymaster_url: Option<&str>,
        backend_url: &str,
    ) -> Self {
        let mut chains = HashMap::new();
        chains.insert(
            name.to_string(),
            ChainConfig {
                chain_id: chain_id.to_string(),
                rpc_url: rpc_url.to_string(),
                timeout_ms: default_timeout_ms(),
            },
        );

        Self {
            network: NetworkConfig {
                environment,
                ..NetworkConfig::default()
            },
            chains,
            default_chain: name.to_string(),
            paymaster: PaymasterConfig {
                enabled: paymaster_url.is_some(),
                url: paymaster_url.map(str::to_string),
                ..PaymasterConfig::default()
            },
            backend: BackendConfig {
                url: backend_url.to_string(),
                ..BackendConfig::default()
            },
            session: SessionConfig::default(),
            account: AccountConfig::default(),
            execution: ExecutionConfig::default(),
            approval: ApprovalConfig::default(),
            storage: StorageConfig::default(),
        }
    }

    pub fn mainnet() -> Self {
        Self::preset(
            Environment::Mainnet,
            "mainnet",
            "SN_MAIN",
            "https://api.cartridge.gg/x/starknet/mainnet",
            Some("https://api.cartridge.gg/x/starknet/mainnet"),
            "https://api.cartridge.gg",
        )
    }

    pub fn sepolia() -> Self {
        Self::preset(
            Environment::Sepolia,
            "sepolia",
            "SN_SEPOLIA",
            "https://api.cartridge.gg/x/starknet/sepolia",
            Some("https://api.cartridge.gg/x/starknet/sepolia"),
            "https://api.cartridge.gg",
        )
    }

    /// Local devnet, no paymaster
    pub fn local() -> Self {
        let mut config = Self::preset(
            Environment::Local,
            "local",
            "SN_KATANA",
            "http://localhost:5050",
            None,
            "http://localhost:8000",
        );
        config.network.json_logs = false;
        config.network.log_level = "debug".to_string();
        config
    }

    /// Configuration of the default chain
    pub fn default_chain_config(&self) -> Option<&ChainConfig> {
        self.chains.get(&self.default_chain)
    }

    /// Look a chain up by name or by chain id
    pub fn chain(&self, name_or_id: &str) -> Option<&ChainConfig> {
        self.chains
            .get(name_or_id)
            .or_else(|| self.chains.values().find(|c| c.chain_id == name_or_id))
    }
}

impl ChainConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl AccountConfig {
    pub fn sync_debounce(&self) -> Duration {
        Duration::from_millis(self.sync_debounce_ms)
    }

    /// `None` when background sync is disabled
    pub fn sync_interval(&self) -> Option<Duration> {
        (self.sync_interval_secs > 0).then(|| Duration::from_secs(self.sync_interval_secs))
    }
}

impl ExecutionConfig {
    pub fn outside_execution_window(&self) -> Duration {
        Duration::from_secs(self.outside_execution_window_secs)
    }
}

impl ApprovalConfig {
    pub fn headless_ttl(&self) -> Duration {
        Duration::from_secs(self.headless_ttl_secs)
    }

    pub fn webauthn_timeout(&self) -> Duration {
        Duration::from_millis(self.webauthn_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_point_at_their_chain() {
        let mainnet = ControllerConfig::mainnet();
        assert_eq!(mainnet.default_chain_config().unwrap().chain_id, "SN_MAIN");
        assert!(mainnet.paymaster.enabled);

        let local = ControllerConfig::local();
        assert_eq!(local.network.environment, Environment::Local);
        assert!(!local.paymaster.enabled);
        assert!(local.paymaster.url.is_none());
    }

    #[test]
    fn test_chain_lookup_by_name_or_id() {
        let config = ControllerConfig::sepolia();
        assert!(config.chain("sepolia").is_some());
        assert_eq!(config.chain("SN_SEPOLIA").unwrap().rpc_url, config.chains["sepolia"].rpc_url);
        assert!(config.chain("SN_MAIN").is_none());
    }

    #[test]
    fn test_zero_sync_interval_disables_sync() {
        let account = AccountConfig {
            sync_interval_secs: 0,
            ..AccountConfig::default()
        };
        assert!(account.sync_interval().is_none());
    }
}
