use keychain_provider::ChainProvider;
use keychain_store::{keys, Storage};
use keychain_types::Felt;
use std::sync::Arc;
use tracing::debug;

use crate::error::AccountError;

/// Locally cached account nonce.
///
/// Reads go through to the chain and never return less than the chain
/// nonce. Writes happen ahead of confirmation, right after a submission, so
/// back-to-back executions do not reuse a nonce while the chain lags.
#[derive(Clone)]
pub struct NonceCache {
    storage: Storage,
    provider: Arc<dyn ChainProvider>,
    address: Felt,
    chain_id: String,
}

impl NonceCache {
    pub fn new(
        storage: Storage,
        provider: Arc<dyn ChainProvider>,
        address: Felt,
        chain_id: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            provider,
            address,
            chain_id: chain_id.into(),
        }
    }

    fn key(&self) -> String {
        keys::nonce(&self.address, &self.chain_id)
    }

    pub async fn cached(&self) -> Result<Option<u64>, AccountError> {
        Ok(self.storage.get_json(&self.key()).await?)
    }

    /// `max(cached, chain)`, written back when the chain is ahead
    pub async fn current(&self) -> Result<u64, AccountError> {
        let chain = self.provider.get_nonce(self.address).await?;
        let cached = self.cached().await?;

        match cached {
            Some(cached) if cached >= chain => Ok(cached),
            _ => {
                if cached.is_some() {
                    debug!(address = %self.address, chain_nonce = chain, ?cached, "nonce cache behind chain");
                }
                self.storage.set_json(&self.key(), &chain).await?;
                Ok(chain)
            }
        }
    }

    /// Write-ahead after a submission
    pub async fn advance_to(&self, nonce: u64) -> Result<(), AccountError> {
        debug!(address = %self.address, chain_id = %self.chain_id, nonce, "nonce advanced");
        self.storage.set_json(&self.key(), &nonce).await?;
        Ok(())
    }

    /// Forget the cache so the next read re-derives from chain
    pub async fn reset(&self) -> Result<(), AccountError> {
        debug!(address = %self.address, chain_id = %self.chain_id, "nonce cache reset");
        self.storage.remove(&self.key()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keychain_provider::MockChainProvider;
    use keychain_store::InMemoryStore;

    fn cache(provider: &MockChainProvider) -> NonceCache {
        NonceCache::new(
            Storage::new(Arc::new(InMemoryStore::new())),
            Arc::new(provider.clone()),
            Felt::from_u64(0xa),
            "SN_TEST",
        )
    }

    #[tokio::test]
    async fn test_read_through_never_behind_chain() {
        let provider = MockChainProvider::new("SN_TEST");
        provider.set_nonce(Felt::from_u64(0xa), 5).await;
        let nonces = cache(&provider);

        assert_eq!(nonces.current().await.unwrap(), 5);
        assert_eq!(nonces.cached().await.unwrap(), Some(5));

        nonces.advance_to(7).await.unwrap();
        assert_eq!(nonces.current().await.unwrap(), 7);

        provider.set_nonce(Felt::from_u64(0xa), 9).await;
        assert_eq!(nonces.current().await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_reset_rederives_from_chain() {
        let provider = MockChainProvider::new("SN_TEST");
        provider.set_nonce(Felt::from_u64(0xa), 2).await;
        let nonces = cache(&provider);

        nonces.advance_to(6).await.unwrap();
        nonces.reset().await.unwrap();
        assert_eq!(nonces.cached().await.unwrap(), None);
        assert_eq!(nonces.current().await.unwrap(), 2);
    }
}
