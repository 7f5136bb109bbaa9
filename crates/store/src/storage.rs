use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use keychain_types::{Felt, STORAGE_VERSION};

use crate::keys;
use crate::migration::{migrate, MigrationOutcome};
use crate::store::{KeyValueStore, StoreError};

/// JSON-typed view over a [`KeyValueStore`]
#[derive(Clone)]
pub struct Storage {
    inner: Arc<dyn KeyValueStore>,
}

impl Storage {
    /// Wrap a store without touching its layout
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Self {
        Self { inner }
    }

    /// Wrap a store and bring its layout up to the current version
    pub async fn open(inner: Arc<dyn KeyValueStore>) -> Result<Self, StoreError> {
        let outcome = migrate(inner.as_ref()).await?;
        if outcome != MigrationOutcome::UpToDate {
            debug!(?outcome, version = STORAGE_VERSION, "storage layout prepared");
        }
        Ok(Self { inner })
    }

    pub fn raw(&self) -> &dyn KeyValueStore {
        self.inner.as_ref()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.inner.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.inner.set(key, &raw).await
    }

    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key).await
    }

    pub async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .inner
            .keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    pub async fn version(&self) -> Result<Option<String>, StoreError> {
        self.get_json(keys::VERSION).await
    }

    pub async fn active_address(&self) -> Result<Option<Felt>, StoreError> {
        self.get_json(keys::ACTIVE).await
    }

    pub async fn set_active_address(&self, address: &Felt) -> Result<(), StoreError> {
        self.set_json(keys::ACTIVE, &address.to_fixed_hex()).await
    }

    /// Drop the active pointer and every key scoped to `address`
    pub async fn forget_account(&self, address: &Felt) -> Result<usize, StoreError> {
        let mut removed = 0;
        for key in self.inner.keys().await? {
            if keys::is_scoped_to(&key, address) {
                self.inner.remove(&key).await?;
                removed += 1;
            }
        }
        if self.active_address().await? == Some(*address) {
            self.inner.remove(keys::ACTIVE).await?;
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}
