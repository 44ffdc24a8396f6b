// Encrypted key storage implementation
use super::{EvmKey, KeyError};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use argon2::{password_hash::SaltString, Argon2, PasswordHasher};
use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Errors specific to keystore operations
#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Corrupted keystore file")]
    CorruptedFile,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Trait for key storage backends
#[async_trait]
pub trait KeyStorage: Send + Sync {
    /// Load and decrypt a key by id
    async fn load_key(&self, key_id: &str, password: &str) -> Result<EvmKey, KeyError>;

    /// Store a key with encryption
    async fn store_key(&self, key_id: &str, key: &EvmKey, password: &str) -> Result<(), KeyError>;

    /// Remove a key
    async fn remove_key(&self, key_id: &str) -> Result<(), KeyError>;

    /// List all available keys
    async fn list_keys(&self) -> Result<Vec<String>, KeyError>;
}

/// Encrypted keystore file format
#[derive(Debug, Serialize, Deserialize)]
struct KeystoreFile {
    /// Version of the keystore format
    version: u32,
    /// Key id this file belongs to
    key_id: String,
    /// Address of the key, readable without the password
    address: String,
    /// Encrypted key data
    ciphertext: Vec<u8>,
    /// Nonce used for encryption
    nonce: Vec<u8>,
    /// Salt for key derivation
    salt: String,
}

/// Encrypted keystore implementation (AES-256-GCM, Argon2 key derivation)
pub struct EncryptedKeystore {
    keystore_dir: PathBuf,
}

impl EncryptedKeystore {
    pub fn new<P: AsRef<Path>>(keystore_dir: P) -> Result<Self, KeystoreError> {
        let keystore_dir = keystore_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&keystore_dir)?;

        Ok(Self { keystore_dir })
    }

    fn get_keystore_path(&self, key_id: &str) -> PathBuf {
        self.keystore_dir.join(format!("{}.json", key_id))
    }

    /// Derive encryption key from password
    fn derive_key(password: &str, salt: &str) -> Result<[u8; 32], KeystoreError> {
        let salt = SaltString::from_b64(salt)
            .map_err(|e| KeystoreError::Encryption(format!("Invalid salt: {}", e)))?;

        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| KeystoreError::Encryption(format!("Key derivation failed: {}", e)))?;

        let hash = password_hash
            .hash
            .ok_or_else(|| KeystoreError::Encryption("Key derivation produced no output".to_string()))?;
        let hash_bytes = hash.as_bytes();
        if hash_bytes.len() < 32 {
            return Err(KeystoreError::Encryption("Derived key too short".to_string()));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&hash_bytes[..32]);
        Ok(key)
    }

    fn encrypt_key(key_data: &[u8], password: &str) -> Result<KeystoreFile, KeystoreError> {
        let salt = SaltString::generate(&mut OsRng);

        let key = Self::derive_key(password, salt.as_str())?;
        let key = Key::<Aes256Gcm>::from_slice(&key);

        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = Aes256Gcm::new(key)
            .encrypt(nonce, key_data)
            .map_err(|e| KeystoreError::Encryption(format!("Encryption failed: {}", e)))?;

        Ok(KeystoreFile {
            version: 1,
            key_id: String::new(),
            address: String::new(),
            ciphertext,
            nonce: nonce_bytes.to_vec(),
            salt: salt.to_string(),
        })
    }

    fn decrypt_key(keystore: &KeystoreFile, password: &str) -> Result<Vec<u8>, KeystoreError> {
        let key = Self::derive_key(password, &keystore.salt)?;
        let key = Key::<Aes256Gcm>::from_slice(&key);

        if keystore.nonce.len() != 12 {
            return Err(KeystoreError::CorruptedFile);
        }
        let nonce = Nonce::from_slice(&keystore.nonce);

        Aes256Gcm::new(key)
            .decrypt(nonce, keystore.ciphertext.as_ref())
            .map_err(|_| KeystoreError::InvalidPassword)
    }
}

#[async_trait]
impl KeyStorage for EncryptedKeystore {
    async fn load_key(&self, key_id: &str, password: &str) -> Result<EvmKey, KeyError> {
        let path = self.get_keystore_path(key_id);

        let data = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| KeyError::NotFound(key_id.to_string()))?;

        let keystore: KeystoreFile = serde_json::from_str(&data)
            .map_err(|e| KeyError::Keystore(KeystoreError::Serialization(e.to_string())))?;

        let plaintext = Self::decrypt_key(&keystore, password)?;
        let key: EvmKey = serde_json::from_slice(&plaintext)
            .map_err(|e| KeyError::Serialization(e.to_string()))?;
        key.validate()?;
        Ok(key)
    }

    async fn store_key(&self, key_id: &str, key: &EvmKey, password: &str) -> Result<(), KeyError> {
        let key_data = serde_json::to_vec(key).map_err(|e| KeyError::Serialization(e.to_string()))?;

        let mut keystore = Self::encrypt_key(&key_data, password)?;
        keystore.key_id = key_id.to_string();
        keystore.address = key.address.to_string();

        let data = serde_json::to_string_pretty(&keystore)
            .map_err(|e| KeyError::Serialization(e.to_string()))?;
        tokio::fs::write(self.get_keystore_path(key_id), data).await?;

        Ok(())
    }

    async fn remove_key(&self, key_id: &str) -> Result<(), KeyError> {
        tokio::fs::remove_file(self.get_keystore_path(key_id))
            .await
            .map_err(|_| KeyError::NotFound(key_id.to_string()))
    }

    async fn list_keys(&self) -> Result<Vec<String>, KeyError> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.keystore_dir).await?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(key_id) = name.strip_suffix(".json") {
                    keys.push(key_id.to_string());
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

/// In-memory storage for testing
#[derive(Default)]
pub struct MemoryKeyStorage {
    keys: Mutex<HashMap<String, (EvmKey, String)>>,
}

impl MemoryKeyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (EvmKey, String)>>, KeyError> {
        self.keys
            .lock()
            .map_err(|_| KeyError::Crypto("memory keystore poisoned".to_string()))
    }
}

#[async_trait]
impl KeyStorage for MemoryKeyStorage {
    async fn load_key(&self, key_id: &str, password: &str) -> Result<EvmKey, KeyError> {
        let keys = self.lock()?;
        let (key, stored_password) = keys
            .get(key_id)
            .ok_or_else(|| KeyError::NotFound(key_id.to_string()))?;
        if stored_password != password {
            return Err(KeyError::Keystore(KeystoreError::InvalidPassword));
        }
        Ok(key.clone())
    }

    async fn store_key(&self, key_id: &str, key: &EvmKey, password: &str) -> Result<(), KeyError> {
        self.lock()?
            .insert(key_id.to_string(), (key.clone(), password.to_string()));
        Ok(())
    }

    async fn remove_key(&self, key_id: &str) -> Result<(), KeyError> {
        self.lock()?
            .remove(key_id)
            .map(|_| ())
            .ok_or_else(|| KeyError::NotFound(key_id.to_string()))
    }

    async fn list_keys(&self) -> Result<Vec<String>, KeyError> {
        let mut keys: Vec<String> = self.lock()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_key() -> EvmKey {
        EvmKey::from_private_key(vec![7; 32]).unwrap()
    }

    #[tokio::test]
    async fn test_encrypted_keystore_round_trip() {
        let temp_dir = tempdir().unwrap();
        let keystore = EncryptedKeystore::new(temp_dir.path()).unwrap();
        let key = test_key();

        keystore.store_key("prev-admin", &key, "correct horse").await.unwrap();
        assert_eq!(keystore.list_keys().await.unwrap(), vec!["prev-admin".to_string()]);

        let loaded = keystore.load_key("prev-admin", "correct horse").await.unwrap();
        assert_eq!(loaded.address, key.address);
        assert_eq!(loaded.private_key, key.private_key);

        let wrong = keystore.load_key("prev-admin", "battery staple").await;
        assert!(matches!(wrong, Err(KeyError::Keystore(KeystoreError::InvalidPassword))));

        keystore.remove_key("prev-admin").await.unwrap();
        assert!(keystore.list_keys().await.unwrap().is_empty());
    }

    #[test]
    fn test_encryption_decryption() {
        let data = b"test key data";
        let keystore_file = EncryptedKeystore::encrypt_key(data, "secure_password").unwrap();

        let decrypted = EncryptedKeystore::decrypt_key(&keystore_file, "secure_password").unwrap();
        assert_eq!(decrypted, data);

        assert!(EncryptedKeystore::decrypt_key(&keystore_file, "wrong_password").is_err());
    }

    #[tokio::test]
    async fn test_memory_storage_checks_password() {
        let storage = MemoryKeyStorage::new();
        storage.store_key("a", &test_key(), "pw").await.unwrap();
        assert!(storage.load_key("a", "pw").await.is_ok());
        assert!(storage.load_key("a", "nope").await.is_err());
        assert!(storage.remove_key("b").await.is_err());
    }
}
