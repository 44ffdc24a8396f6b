use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde_json::json;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::NetworkConfig;

/// Local fork node (hardhat / anvil) for rehearsals and integration runs
pub struct LocalNode {
    pub rpc_endpoint: String,
    child: Option<Child>,
}

impl LocalNode {
    /// Use whatever already answers on `rpc_endpoint`
    pub fn external(rpc_endpoint: impl Into<String>) -> Self {
        Self {
            rpc_endpoint: rpc_endpoint.into(),
            child: None,
        }
    }

    /// Make sure a node answers on the configured endpoint, spawning the
    /// configured command when nothing does
    pub async fn ensure(network: &NetworkConfig) -> Result<Self> {
        let mut node = Self::external(network.rpc_endpoint.clone());
        if node.is_running().await {
            return Ok(node);
        }

        let Some(spawn) = &network.node else {
            return Err(anyhow!(
                "No node answers on {} and no [network.node] command is configured",
                network.rpc_endpoint
            ));
        };

        info!("Starting local node: {} {}", spawn.command, spawn.args.join(" "));
        let child = Command::new(&spawn.command)
            .args(&spawn.args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| anyhow!("Failed to start {}: {}", spawn.command, e))?;
        node.child = Some(child);

        node.wait_for_ready(Duration::from_secs(spawn.startup_timeout_secs)).await?;
        info!("Local node is ready at {}", node.rpc_endpoint);
        Ok(node)
    }

    /// Poll `eth_chainId` until the node answers
    pub async fn wait_for_ready(&self, timeout: Duration) -> Result<u64> {
        let start_time = Instant::now();

        while start_time.elapsed() < timeout {
            if let Ok(chain_id) = self.chain_id().await {
                return Ok(chain_id);
            }
            sleep(Duration::from_millis(500)).await;
        }

        Err(anyhow!(
            "Node at {} did not become ready within {} seconds",
            self.rpc_endpoint,
            timeout.as_secs()
        ))
    }

    pub async fn is_running(&self) -> bool {
        self.chain_id().await.is_ok()
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let client = reqwest::Client::new();
        let body: serde_json::Value = client
            .post(&self.rpc_endpoint)
            .timeout(Duration::from_secs(5))
            .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "eth_chainId", "params": [] }))
            .send()
            .await?
            .json()
            .await?;

        let quantity = body
            .get("result")
            .and_then(|r| r.as_str())
            .ok_or_else(|| anyhow!("Could not parse chain id from response"))?;
        u64::from_str_radix(quantity.trim_start_matches("0x"), 16)
            .map_err(|e| anyhow!("Could not parse chain id as u64: {}", e))
    }

    /// Whether this handle started (and will stop) the node process
    pub fn is_managed(&self) -> bool {
        self.child.is_some()
    }
}

impl Drop for LocalNode {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                warn!("Failed to stop local node: {}", e);
            }
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_external_node_ready() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "eth_chainId" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": "0x7a69"
            })))
            .mount(&server)
            .await;

        let network = NetworkConfig {
            rpc_endpoint: server.uri(),
            chain_id: None,
            node: None,
        };
        let node = LocalNode::ensure(&network).await.unwrap();
        assert!(!node.is_managed());
        assert_eq!(node.chain_id().await.unwrap(), 31_337);
    }

    #[tokio::test]
    async fn test_nothing_running_without_command() {
        let network = NetworkConfig {
            rpc_endpoint: "http://127.0.0.1:9".to_string(),
            chain_id: None,
            node: None,
        };
        assert!(LocalNode::ensure(&network).await.is_err());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let network = NetworkConfig {
            rpc_endpoint: "http://127.0.0.1:9".to_string(),
            chain_id: None,
            node: Some(NodeConfig {
                command: "definitely-not-a-fork-node".to_string(),
                args: vec![],
                startup_timeout_secs: 1,
            }),
        };
        let err = LocalNode::ensure(&network).await.err().unwrap();
        assert!(err.to_string().contains("Failed to start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_chatty_node_is_not_blocked_on_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("past-stderr");
        // well past a pipe buffer, then leave a trace
        let script = format!(
            "head -c 262144 /dev/zero >&2 && touch {} && sleep 30",
            marker.display()
        );
        let network = NetworkConfig {
            rpc_endpoint: "http://127.0.0.1:9".to_string(),
            chain_id: None,
            node: Some(NodeConfig {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), script],
                startup_timeout_secs: 2,
            }),
        };

        let err = LocalNode::ensure(&network).await.err().unwrap();
        assert!(err.to_string().contains("did not become ready"));
        assert!(marker.exists());
    }
}
