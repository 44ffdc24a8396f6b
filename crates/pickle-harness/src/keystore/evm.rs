// EVM account keys (secp256k1, keccak-256 addresses)
use super::KeyError;
use alloy::primitives::{keccak256, Address};
use alloy::signers::local::PrivateKeySigner;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvmKey {
    /// Account address derived from the public key
    pub address: Address,
    /// Private key bytes (32 bytes)
    pub private_key: Vec<u8>,
    /// Uncompressed public key (65 bytes)
    pub public_key: Vec<u8>,
}

impl EvmKey {
    pub fn from_private_key(private_key: Vec<u8>) -> Result<Self, KeyError> {
        if private_key.len() != 32 {
            return Err(KeyError::InvalidFormat("Private key must be 32 bytes".to_string()));
        }

        let public_key = Self::derive_public_key(&private_key)?;
        let address = Self::derive_address(&public_key);

        Ok(Self {
            address,
            private_key,
            public_key,
        })
    }

    /// Parse `hexPrivateKey`, `0xhexPrivateKey` or `address:hexPrivateKey`.
    /// When an address is given it must match the key.
    pub fn from_env_string(env_str: &str) -> Result<Self, KeyError> {
        let (expected, hex_key) = match env_str.trim().split_once(':') {
            Some((address, key)) => {
                let address = address
                    .parse::<Address>()
                    .map_err(|e| KeyError::InvalidFormat(format!("Invalid address: {}", e)))?;
                (Some(address), key)
            }
            None => (None, env_str.trim()),
        };

        let hex_key = hex_key.strip_prefix("0x").unwrap_or(hex_key);
        let private_key = hex::decode(hex_key)
            .map_err(|e| KeyError::InvalidFormat(format!("Invalid hex key: {}", e)))?;

        let key = Self::from_private_key(private_key)?;
        if let Some(expected) = expected {
            if expected != key.address {
                return Err(KeyError::InvalidFormat(format!(
                    "Key belongs to {}, not {}",
                    key.address, expected
                )));
            }
        }
        Ok(key)
    }

    /// Export key as `address:hexPrivateKey`
    pub fn to_export_string(&self) -> String {
        format!("{}:{}", self.address, hex::encode(&self.private_key))
    }

    /// Signer for locally signed transactions
    pub fn signer(&self) -> Result<PrivateKeySigner, KeyError> {
        PrivateKeySigner::from_slice(&self.private_key)
            .map_err(|e| KeyError::Crypto(format!("Invalid private key: {}", e)))
    }

    /// Check that the stored public key and address match the private key
    pub fn validate(&self) -> Result<(), KeyError> {
        let public_key = Self::derive_public_key(&self.private_key)?;
        if public_key != self.public_key {
            return Err(KeyError::InvalidFormat("Public key does not match private key".to_string()));
        }
        if Self::derive_address(&public_key) != self.address {
            return Err(KeyError::InvalidFormat("Address does not match public key".to_string()));
        }
        Ok(())
    }

    fn derive_public_key(private_key: &[u8]) -> Result<Vec<u8>, KeyError> {
        let secp = secp256k1::Secp256k1::new();
        let secret_key = secp256k1::SecretKey::from_slice(private_key)
            .map_err(|e| KeyError::Crypto(format!("Invalid private key: {}", e)))?;
        let public_key = secp256k1::PublicKey::from_secret_key(&secp, &secret_key);
        Ok(public_key.serialize_uncompressed().to_vec())
    }

    /// Last 20 bytes of keccak256(x || y)
    fn derive_address(public_key: &[u8]) -> Address {
        let hash = keccak256(&public_key[1..]);
        Address::from_slice(&hash[12..])
    }
}
