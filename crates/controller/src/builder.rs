use std::sync::Arc;
use std::time::Duration;

use keychain_account::AccountSettings;
use keychain_config::{validate_config, ConfigError, ControllerConfig, StorageBackend, StorageConfig};
use keychain_executor::ExecutorSettings;
use keychain_provider::{
    BackendApi, ChainProvider, HttpBackend, HttpPaymaster, JsonRpcProvider, Paymaster, WaitOptions,
};
use keychain_session::SessionSettings;
use keychain_signer::{
    Authenticator, ChainHasher, ExternalWallet, SignerContext, StarkCurve, StarknetCurve,
    StarknetHasher,
};
use keychain_store::{InMemoryStore, SqliteStore, Storage, StoreError};
use keychain_types::Felt;

use crate::controller::Controller;

// ═══════════════════════════════════════════════════════════════════════════
// PROVIDER FACTORY
// ═══════════════════════════════════════════════════════════════════════════

/// Opens a chain provider for an RPC URL; used by `switch_chain`
pub trait ProviderFactory: Send + Sync {
    fn connect(&self, rpc_url: &str) -> Arc<dyn ChainProvider>;
}

impl<F> ProviderFactory for F
where
    F: Fn(&str) -> Arc<dyn ChainProvider> + Send + Sync,
{
    fn connect(&self, rpc_url: &str) -> Arc<dyn ChainProvider> {
        self(rpc_url)
    }
}

/// JSON-RPC providers with a fixed request timeout
#[derive(Debug, Clone)]
pub struct JsonRpcProviders {
    pub timeout: Duration,
}

impl ProviderFactory for JsonRpcProviders {
    fn connect(&self, rpc_url: &str) -> Arc<dyn ChainProvider> {
        Arc::new(JsonRpcProvider::new(rpc_url).with_timeout(self.timeout))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SETTINGS
// ═══════════════════════════════════════════════════════════════════════════

/// Per-component settings derived from a [`ControllerConfig`]
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub account: AccountSettings,
    pub session: SessionSettings,
    pub executor: ExecutorSettings,
    /// Background sync period, `None` to disable
    pub sync_interval: Option<Duration>,
    /// Cache a plugin-key registration when a deployed account connects
    pub register_on_connect: bool,
    pub headless_ttl: Duration,
    pub webauthn_class_hash: Felt,
    pub webauthn_timeout: Duration,
    pub password_rounds: u32,
}

impl ControllerSettings {
    pub fn from_config(config: &ControllerConfig) -> Result<Self, ConfigError> {
        let parse_felt = |field: &str, value: &str| {
            Felt::from_hex(value)
                .map_err(|e| ConfigError::ValidationError(format!("{field}: {e}")))
        };

        let latest_class_hash = config
            .account
            .latest_class_hash
            .as_deref()
            .map(|hash| parse_felt("account.latest_class_hash", hash))
            .transpose()?;
        let webauthn_class_hash =
            parse_felt("account.webauthn_class_hash", &config.account.webauthn_class_hash)?;

        let wait = WaitOptions {
            initial_delay: Duration::from_millis(config.execution.poll_initial_ms),
            max_delay: Duration::from_millis(config.execution.poll_max_ms),
            timeout: Duration::from_secs(config.execution.finality_timeout_secs),
        };

        Ok(Self {
            account: AccountSettings {
                latest_class_hash,
                sync_debounce: config.account.sync_debounce(),
                introspection_entrypoint: config.account.introspection_entrypoint.clone(),
                wait: wait.clone(),
            },
            session: SessionSettings {
                ttl: config.session.ttl(),
                sensitive_methods: config.session.sensitive_methods.clone(),
            },
            executor: ExecutorSettings {
                fee_multiplier: config.execution.fee_multiplier,
                outside_execution_window: config.execution.outside_execution_window(),
                use_paymaster: config.paymaster.enabled,
                registration_entrypoint: config.account.registration_entrypoint.clone(),
                wait,
            },
            sync_interval: config.account.sync_interval(),
            register_on_connect: config.account.register_on_connect,
            headless_ttl: config.approval.headless_ttl(),
            webauthn_class_hash,
            webauthn_timeout: config.approval.webauthn_timeout(),
            password_rounds: config.approval.password_rounds,
        })
    }
}

/// Open the configured store, migrating older key layouts
pub async fn open_storage(config: &StorageConfig) -> Result<Storage, StoreError> {
    match config.backend {
        StorageBackend::Memory => Storage::open(Arc::new(InMemoryStore::new())).await,
        StorageBackend::Sqlite => {
            let path = config.path.as_deref().ok_or_else(|| {
                StoreError::ConnectionError("sqlite storage needs a path".to_string())
            })?;
            Storage::open(Arc::new(SqliteStore::new(path).await?)).await
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════

/// Builder error
#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
}

/// Builder for [`Controller`].
///
/// Storage is required. The curve and the hasher default to the Starknet
/// ones. The chain provider, backend and paymaster default to HTTP clients
/// pointed at the URLs in the config; an explicitly supplied paymaster is
/// always used.
pub struct ControllerBuilder {
    config: ControllerConfig,
    storage: Option<Storage>,
    provider: Option<Arc<dyn ChainProvider>>,
    providers: Option<Arc<dyn ProviderFactory>>,
    backend: Option<Arc<dyn BackendApi>>,
    paymaster: Option<Arc<dyn Paymaster>>,
    curve: Option<Arc<dyn StarkCurve>>,
    hasher: Option<Arc<dyn ChainHasher>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    wallet: Option<Arc<dyn ExternalWallet>>,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self {
            config: ControllerConfig::default(),
            storage: None,
            provider: None,
            providers: None,
            backend: None,
            paymaster: None,
            curve: None,
            hasher: None,
            authenticator: None,
            wallet: None,
        }
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Provider for the default chain
    pub fn with_provider(mut self, provider: Arc<dyn ChainProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_provider_factory(mut self, providers: Arc<dyn ProviderFactory>) -> Self {
        self.providers = Some(providers);
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn BackendApi>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_paymaster(mut self, paymaster: Arc<dyn Paymaster>) -> Self {
        self.paymaster = Some(paymaster);
        self
    }

    pub fn with_curve(mut self, curve: Arc<dyn StarkCurve>) -> Self {
        self.curve = Some(curve);
        self
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn ChainHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_wallet(mut self, wallet: Arc<dyn ExternalWallet>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn build(self) -> Result<Controller, BuilderError> {
        validate_config(&self.config)?;
        let mut settings = ControllerSettings::from_config(&self.config)?;

        let storage = self.storage.ok_or_else(|| BuilderError::MissingField {
            field: "storage".to_string(),
        })?;
        let curve = self
            .curve
            .unwrap_or_else(|| Arc::new(StarknetCurve) as Arc<dyn StarkCurve>);
        let hasher = self
            .hasher
            .unwrap_or_else(|| Arc::new(StarknetHasher) as Arc<dyn ChainHasher>);

        let chain = self
            .config
            .default_chain_config()
            .cloned()
            .ok_or_else(|| BuilderError::MissingField {
                field: "default_chain".to_string(),
            })?;

        let providers = self.providers.unwrap_or_else(|| {
            Arc::new(JsonRpcProviders {
                timeout: chain.timeout(),
            })
        });
        let provider = self
            .provider
            .unwrap_or_else(|| providers.connect(&chain.rpc_url));

        let backend = self.backend.unwrap_or_else(|| {
            Arc::new(
                HttpBackend::new(self.config.backend.url.clone())
                    .with_timeout(Duration::from_millis(self.config.backend.timeout_ms)),
            )
        });

        let paymaster = match self.paymaster {
            Some(paymaster) => {
                settings.executor.use_paymaster = true;
                Some(paymaster)
            }
            None => match (&self.config.paymaster.url, self.config.paymaster.enabled) {
                (Some(url), true) => Some(Arc::new(
                    HttpPaymaster::new(url.clone())
                        .with_timeout(Duration::from_millis(self.config.paymaster.timeout_ms)),
                ) as Arc<dyn Paymaster>),
                _ => None,
            },
        };

        let mut signer_context = SignerContext::new(curve)
            .with_webauthn_class_hash(settings.webauthn_class_hash)
            .with_webauthn_timeout(settings.webauthn_timeout)
            .with_password_rounds(settings.password_rounds);
        if let Some(authenticator) = self.authenticator {
            signer_context = signer_context.with_authenticator(authenticator);
        }
        if let Some(wallet) = self.wallet {
            signer_context = signer_context.with_wallet(wallet);
        }

        Ok(Controller::new(
            self.config,
            settings,
            storage,
            chain.chain_id,
            chain.rpc_url,
            provider,
            providers,
            backend,
            paymaster,
            signer_context,
            hasher,
        ))
    }
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keychain_provider::{MockBackend, MockChainProvider};
    use keychain_signer::{MockCurve, MockHasher};

    #[test]
    fn test_settings_follow_config() {
        let mut config = ControllerConfig::local();
        config.account.latest_class_hash = Some("0xc1a55".to_string());
        config.account.sync_interval_secs = 0;
        config.execution.poll_initial_ms = 7;

        let settings = ControllerSettings::from_config(&config).unwrap();
        assert_eq!(settings.account.latest_class_hash, Some(Felt::from_u64(0xc1a55)));
        assert_eq!(settings.sync_interval, None);
        assert_eq!(settings.executor.wait.initial_delay, Duration::from_millis(7));
        assert!(!settings.executor.use_paymaster);
        assert_eq!(settings.headless_ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_bad_class_hash_rejected() {
        let mut config = ControllerConfig::local();
        config.account.webauthn_class_hash = "0xnothex".to_string();
        assert!(matches!(
            ControllerSettings::from_config(&config),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_builder_missing_fields() {
        let result = ControllerBuilder::new().build();

        match result {
            Err(BuilderError::MissingField { field }) => assert_eq!(field, "storage"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("builder should require storage"),
        }
    }

    #[tokio::test]
    async fn test_builder_with_mocks() {
        let controller = ControllerBuilder::new()
            .with_storage(open_storage(&StorageConfig::default()).await.unwrap())
            .with_provider(Arc::new(MockChainProvider::new("SN_KATANA")))
            .with_backend(Arc::new(MockBackend::new()))
            .with_curve(Arc::new(MockCurve))
            .with_hasher(Arc::new(MockHasher))
            .build()
            .unwrap();

        assert_eq!(controller.chain_id().await, "SN_KATANA");
        assert!(controller.address().await.is_none());
    }
}
