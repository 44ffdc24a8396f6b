// Key management for deployment signers
// Supports encrypted keystores and environment variables; keys are never part of the config

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

pub mod evm;
pub mod storage;

pub use evm::EvmKey;
pub use storage::{EncryptedKeystore, KeyStorage, KeystoreError, MemoryKeyStorage};

/// Errors that can occur during key management operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Invalid key format: {0}")]
    InvalidFormat(String),

    #[error("Keystore error: {0}")]
    Keystore(#[from] KeystoreError),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Resolves signer keys by id from the environment or the encrypted keystore
pub struct KeyManager {
    storage: Box<dyn KeyStorage>,
    key_cache: HashMap<String, EvmKey>,
    config: KeyManagerConfig,
}

/// Configuration for the key manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyManagerConfig {
    /// Directory for keystore files
    pub keystore_dir: PathBuf,
    /// Whether to allow environment variable keys
    pub allow_env_keys: bool,
    /// Environment variable prefix (e.g., "HARNESS_KEY_")
    pub env_prefix: String,
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self {
            keystore_dir: PathBuf::from("~/.pickle-harness/keys"),
            allow_env_keys: true,
            env_prefix: "HARNESS_KEY_".to_string(),
        }
    }
}

impl KeyManager {
    /// Create a key manager backed by the encrypted keystore directory
    pub fn new(config: KeyManagerConfig) -> Result<Self, KeyError> {
        let keystore_dir = shellexpand::tilde(&config.keystore_dir.to_string_lossy()).to_string();
        let storage = Box::new(EncryptedKeystore::new(PathBuf::from(keystore_dir))?);

        Ok(Self::with_storage(config, storage))
    }

    pub fn with_storage(config: KeyManagerConfig, storage: Box<dyn KeyStorage>) -> Self {
        Self {
            storage,
            key_cache: HashMap::new(),
            config,
        }
    }

    /// Environment variable consulted for `key_id`
    pub fn env_var_name(&self, key_id: &str) -> String {
        format!(
            "{}{}",
            self.config.env_prefix,
            key_id.to_uppercase().replace(['-', '.'], "_")
        )
    }

    /// Load a key: cache, then environment, then the keystore (needs the password)
    pub async fn load_key(&mut self, key_id: &str, password: Option<&str>) -> Result<EvmKey, KeyError> {
        if let Some(key) = self.key_cache.get(key_id) {
            return Ok(key.clone());
        }

        if self.config.allow_env_keys {
            if let Ok(key) = self.load_from_env(key_id) {
                self.key_cache.insert(key_id.to_string(), key.clone());
                return Ok(key);
            }
        }

        let password = password.ok_or_else(|| KeyError::Keystore(KeystoreError::InvalidPassword))?;
        let key = self.storage.load_key(key_id, password).await?;
        self.key_cache.insert(key_id.to_string(), key.clone());
        Ok(key)
    }

    /// Store a key with encryption
    pub async fn store_key(&mut self, key_id: &str, key: EvmKey, password: &str) -> Result<(), KeyError> {
        self.storage.store_key(key_id, &key, password).await?;
        self.key_cache.insert(key_id.to_string(), key);
        Ok(())
    }

    /// Remove a key from storage
    pub async fn remove_key(&mut self, key_id: &str) -> Result<(), KeyError> {
        self.storage.remove_key(key_id).await?;
        self.key_cache.remove(key_id);
        Ok(())
    }

    /// List all stored key ids
    pub async fn list_keys(&self) -> Result<Vec<String>, KeyError> {
        self.storage.list_keys().await
    }

    /// Load a key from its environment variable
    pub fn load_from_env(&self, key_id: &str) -> Result<EvmKey, KeyError> {
        let env_var = self.env_var_name(key_id);
        let key_data = std::env::var(&env_var).map_err(|_| KeyError::EnvVarNotFound(env_var.clone()))?;
        EvmKey::from_env_string(&key_data)
    }

    /// Export a cached key (address:hexkey) for backup
    pub fn export_key(&self, key_id: &str) -> Result<String, KeyError> {
        self.key_cache
            .get(key_id)
            .map(EvmKey::to_export_string)
            .ok_or_else(|| KeyError::NotFound(key_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn memory_manager(prefix: &str) -> KeyManager {
        let config = KeyManagerConfig {
            keystore_dir: PathBuf::from("/unused"),
            allow_env_keys: true,
            env_prefix: prefix.to_string(),
        };
        KeyManager::with_storage(config, Box::new(MemoryKeyStorage::new()))
    }

    #[test]
    fn test_env_var_naming() {
        let manager = memory_manager("HARNESS_KEY_");
        assert_eq!(manager.env_var_name("prev-admin"), "HARNESS_KEY_PREV_ADMIN");
    }

    #[tokio::test]
    async fn test_store_and_reload() {
        let mut manager = memory_manager("HARNESS_TEST_STORE_");
        let key = EvmKey::from_env_string(TEST_KEY).unwrap();

        manager.store_key("deployer", key.clone(), "pw").await.unwrap();
        assert_eq!(manager.list_keys().await.unwrap(), vec!["deployer".to_string()]);

        let loaded = manager.load_key("deployer", Some("pw")).await.unwrap();
        assert_eq!(loaded.address, key.address);
        assert!(manager.export_key("deployer").unwrap().ends_with(TEST_KEY));

        manager.remove_key("deployer").await.unwrap();
        assert!(manager.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_env_key_takes_precedence() {
        let mut manager = memory_manager("HARNESS_TEST_ENV_");
        std::env::set_var("HARNESS_TEST_ENV_PREV_ADMIN", TEST_KEY);

        let key = manager.load_key("prev-admin", None).await.unwrap();
        assert_eq!(
            key.address.to_string().to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        std::env::remove_var("HARNESS_TEST_ENV_PREV_ADMIN");
    }

    #[tokio::test]
    async fn test_missing_key_without_password() {
        let mut manager = memory_manager("HARNESS_TEST_MISSING_");
        assert!(manager.load_key("nobody", None).await.is_err());
    }
}
