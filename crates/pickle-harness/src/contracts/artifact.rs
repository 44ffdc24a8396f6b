// Compiled contract artifacts (hardhat / foundry JSON) and deployment
use std::path::{Path, PathBuf};

use alloy::primitives::{keccak256, Address, Bytes};
use serde_json::Value;
use tracing::{debug, info};

use crate::chains::{Chain, ChainError, TxReceipt, TxRequest};
use crate::config::ArtifactConfig;
use crate::error::HarnessError;

/// Marker appended to placeholder bytecode so it can never be mistaken for EVM code
const PLACEHOLDER_TAG: &[u8] = b"pickle-harness:placeholder";

/// Creation bytecode for a named contract
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub name: String,
    pub bytecode: Bytes,
}

impl Artifact {
    /// Parse a hardhat artifact (`"bytecode": "0x…"`) or a foundry one
    /// (`"bytecode": { "object": "0x…" }`)
    pub fn from_json(name: &str, content: &str) -> Result<Self, HarnessError> {
        let json: Value = serde_json::from_str(content)
            .map_err(|e| HarnessError::Artifact(format!("{}: {}", name, e)))?;

        let bytecode = match json.get("bytecode") {
            Some(Value::String(code)) => code.as_str(),
            Some(Value::Object(object)) => object
                .get("object")
                .and_then(Value::as_str)
                .ok_or_else(|| HarnessError::Artifact(format!("{}: bytecode.object missing", name)))?,
            _ => return Err(HarnessError::Artifact(format!("{}: no bytecode field", name))),
        };

        let digits = bytecode.strip_prefix("0x").unwrap_or(bytecode);
        if digits.is_empty() {
            return Err(HarnessError::Artifact(format!(
                "{}: empty bytecode (abstract contract or interface?)",
                name
            )));
        }
        let bytecode = hex::decode(digits)
            .map_err(|e| HarnessError::Artifact(format!("{}: invalid bytecode hex: {}", name, e)))?;

        Ok(Self {
            name: name.to_string(),
            bytecode: Bytes::from(bytecode),
        })
    }

    /// Deterministic stand-in bytecode, recognised by the simulated chain
    pub fn placeholder(name: &str) -> Self {
        let mut bytecode = keccak256(contract_name(name).as_bytes()).to_vec();
        bytecode.extend_from_slice(PLACEHOLDER_TAG);
        Self {
            name: name.to_string(),
            bytecode: Bytes::from(bytecode),
        }
    }

    /// Creation data: bytecode followed by ABI-encoded constructor arguments
    pub fn deploy_data(&self, constructor_args: &[u8]) -> Bytes {
        let mut data = self.bytecode.to_vec();
        data.extend_from_slice(constructor_args);
        Bytes::from(data)
    }

    /// Deploy from `from` and wait for the receipt
    pub async fn deploy(
        &self,
        chain: &dyn Chain,
        from: Address,
        constructor_args: &[u8],
    ) -> Result<(Address, TxReceipt), ChainError> {
        debug!("Deploying {} ({} bytes of code) from {}", self.name, self.bytecode.len(), from);
        let receipt = chain
            .send_transaction(TxRequest::create(from, self.deploy_data(constructor_args)))
            .await?;
        let address = receipt
            .contract_address
            .ok_or_else(|| ChainError::Decode(format!("{} receipt has no contract address", self.name)))?;
        info!("{} deployed at {}", contract_name(&self.name), address);
        Ok((address, receipt))
    }
}

/// Where artifacts come from
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactStore {
    /// A hardhat `artifacts/` tree or foundry `out/` tree
    Directory(PathBuf),
    /// Placeholder bytecode for the simulated chain
    Placeholder,
}

impl ArtifactStore {
    pub fn from_config(config: &ArtifactConfig) -> Self {
        if config.placeholder {
            ArtifactStore::Placeholder
        } else {
            ArtifactStore::Directory(PathBuf::from(
                shellexpand::tilde(&config.dir.to_string_lossy()).to_string(),
            ))
        }
    }

    /// Load by plain name (`ControllerV4`) or fully qualified name
    /// (`src/polygon/pickle-token.sol:PickleToken`)
    pub fn load(&self, name: &str) -> Result<Artifact, HarnessError> {
        match self {
            ArtifactStore::Placeholder => Ok(Artifact::placeholder(name)),
            ArtifactStore::Directory(dir) => {
                let path = match name.split_once(':') {
                    Some((source, contract)) => dir.join(source).join(format!("{}.json", contract)),
                    None => find_artifact(dir, &format!("{}.json", name))?.ok_or_else(|| {
                        HarnessError::Artifact(format!("{} not found under {}", name, dir.display()))
                    })?,
                };
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| HarnessError::Artifact(format!("{}: {}", path.display(), e)))?;
                Artifact::from_json(name, &content)
            }
        }
    }
}

/// `src/polygon/masterchef.sol:MasterChef` -> `MasterChef`
pub fn contract_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn find_artifact(dir: &Path, file_name: &str) -> Result<Option<PathBuf>, HarnessError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| HarnessError::Artifact(format!("{}: {}", dir.display(), e)))?;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_artifact(&path, file_name)? {
                return Ok(Some(found));
            }
        } else if path.file_name().and_then(|f| f.to_str()) == Some(file_name) {
            return Ok(Some(path));
        }
    }
    Ok(None)
}
