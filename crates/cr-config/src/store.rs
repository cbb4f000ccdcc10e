//! `SettingsStore`: the in-process settings facade backing the settings-vault
//! `MasterKeyVault` backend.
//!
//! The production settings store (Postgres-backed, with change
//! notification) is an external collaborator; database entity mapping is
//! out of scope here. `InMemorySettingsStore` is the only implementation in
//! this crate and exists for composing and testing `cr-crypto`'s settings
//! vault.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

/// Facade over a named key/value settings backend.
///
/// Mirrors the narrow slice of the platform's settings facade that the
/// master-key vault depends on: a single named read, with no schema
/// beyond "setting name to string value".
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read a named setting, returning `Ok(None)` if it has never been set.
    async fn get_secret(&self, name: &str) -> Result<Option<String>>;

    /// Write a named setting, overwriting any previous value.
    async fn set_secret(&self, name: &str, value: String) -> Result<()>;
}

/// In-memory `SettingsStore` used for tests and for composing the
/// settings-vault backend without a database dependency.
#[derive(Clone, Default)]
pub struct InMemorySettingsStore {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemorySettingsStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a store pre-populated with a single setting.
    #[must_use]
    pub fn with_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        let store = Self::new();
        store
            .values
            .try_write()
            .expect("fresh store is never contended")
            .insert(name.into(), value.into());
        store
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn get_secret(&self, name: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(name).cloned())
    }

    async fn set_secret(&self, name: &str, value: String) -> Result<()> {
        self.values.write().await.insert(name.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_setting_returns_none() {
        let store = InMemorySettingsStore::new();
        assert_eq!(store.get_secret("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = InMemorySettingsStore::new();
        store
            .set_secret("cr.encrypt.master_key", "value".to_string())
            .await
            .unwrap();
        assert_eq!(
            store.get_secret("cr.encrypt.master_key").await.unwrap(),
            Some("value".to_string())
        );
    }

    #[tokio::test]
    async fn with_value_seeds_initial_state() {
        let store = InMemorySettingsStore::with_value("k", "v");
        assert_eq!(store.get_secret("k").await.unwrap(), Some("v".to_string()));
    }
}
