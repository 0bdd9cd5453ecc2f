// src/ledger/eth.rs
// JSON-RPC client for the ledger contract on an Ethereum development chain

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{abi, validate_submission, LedgerClient, LedgerError, LedgerReceipt, STORE_HASH_SIGNATURE};

#[derive(Debug, Clone)]
pub struct EthLedgerSettings {
    pub rpc_url: String,
    /// Truffle build artifact; its `networks` map gives the deployed address.
    pub artifact_path: PathBuf,
    /// Skips artifact lookup when set.
    pub contract_address: Option<String>,
    /// Sending account; first of `eth_accounts` when unset.
    pub account: Option<String>,
    pub gas: u64,
    pub request_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub receipt_attempts: u32,
}

impl Default for EthLedgerSettings {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:7545".into(),
            artifact_path: PathBuf::from("./blockchain/build/contracts/SecureFinLedger.json"),
            contract_address: None,
            account: None,
            gas: 3_000_000,
            request_timeout: Duration::from_secs(30),
            receipt_poll_interval: Duration::from_millis(500),
            receipt_attempts: 20,
        }
    }
}

impl EthLedgerSettings {
    /// Longest a single `submit` can run: the send plus every receipt poll
    /// timing out, with the poll interval slept between attempts.
    pub fn max_submit_duration(&self) -> Duration {
        let attempts = self.receipt_attempts.max(1);
        self.request_timeout * (attempts + 1) + self.receipt_poll_interval * attempts
    }
}

/// Everything resolved at connect time; fixed for the life of the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub network_id: String,
    pub contract_address: String,
    pub sender: String,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: JsonValue,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<JsonValue>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ContractArtifact {
    #[serde(default)]
    networks: HashMap<String, NetworkEntry>,
}

#[derive(Debug, Deserialize)]
struct NetworkEntry {
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: Option<String>,
    block_number: Option<String>,
    status: Option<String>,
}

/// Address recorded for `network_id` in a Truffle artifact, if deployed there.
pub fn resolve_contract_address(artifact_json: &str, network_id: &str) -> Result<Option<String>, LedgerError> {
    let artifact: ContractArtifact = serde_json::from_str(artifact_json)
        .map_err(|e| LedgerError::InvalidResponse(format!("contract artifact: {}", e)))?;
    Ok(artifact
        .networks
        .get(network_id)
        .and_then(|n| n.address.clone())
        .filter(|a| !a.is_empty()))
}

pub fn parse_quantity(value: &str) -> Result<u64, LedgerError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(digits, 16)
        .map_err(|_| LedgerError::InvalidResponse(format!("bad quantity {:?}", value)))
}

pub struct EthLedgerClient {
    http: reqwest::Client,
    settings: EthLedgerSettings,
    deployment: Option<Deployment>,
    next_id: AtomicU64,
}

impl EthLedgerClient {
    /// Resolve network id, contract address and sending account.
    ///
    /// Resolution failures are logged and leave the client disconnected rather
    /// than failing startup; submissions then fail with `LedgerError::Connection`.
    pub async fn connect(settings: EthLedgerSettings) -> Result<Self, LedgerError> {
        let mut client = Self::disconnected(settings)?;
        match client.resolve_deployment().await {
            Ok(deployment) => {
                info!(
                    "✅ Connected to ledger contract at {} (network {}, sender {})",
                    deployment.contract_address, deployment.network_id, deployment.sender
                );
                client.deployment = Some(deployment);
            }
            Err(e) => {
                error!("❌ Ledger connection error: {}", e);
            }
        }
        Ok(client)
    }

    /// A client that never resolved a deployment.
    pub fn disconnected(settings: EthLedgerSettings) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            http,
            settings,
            deployment: None,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn deployment(&self) -> Option<&Deployment> {
        self.deployment.as_ref()
    }

    async fn resolve_deployment(&self) -> Result<Deployment, LedgerError> {
        let network_id = self
            .call("net_version", json!([]))
            .await?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LedgerError::InvalidResponse("net_version is not a string".into()))?;

        let contract_address = match &self.settings.contract_address {
            Some(addr) => addr.clone(),
            None => {
                let path = &self.settings.artifact_path;
                let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                    LedgerError::Connection(format!(
                        "contract build file {} not readable ({}); run truffle migrate first",
                        path.display(),
                        e
                    ))
                })?;
                resolve_contract_address(&raw, &network_id)?.ok_or_else(|| {
                    LedgerError::Connection(format!("smart contract not deployed to network {}", network_id))
                })?
            }
        };

        let sender = match &self.settings.account {
            Some(acct) => acct.clone(),
            None => {
                let accounts: Vec<String> = serde_json::from_value(self.call("eth_accounts", json!([])).await?)
                    .map_err(|e| LedgerError::InvalidResponse(format!("eth_accounts: {}", e)))?;
                accounts
                    .into_iter()
                    .next()
                    .ok_or_else(|| LedgerError::Connection("node exposes no unlocked accounts".into()))?
            }
        };

        Ok(Deployment {
            network_id,
            contract_address,
            sender,
        })
    }

    async fn call(&self, method: &str, params: JsonValue) -> Result<JsonValue, LedgerError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        debug!("ledger rpc -> {}", method);
        let response: JsonRpcResponse = self
            .http
            .post(&self.settings.rpc_url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(LedgerError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(response.result.unwrap_or(JsonValue::Null))
    }

    async fn await_receipt(&self, tx_hash: &str) -> Result<LedgerReceipt, LedgerError> {
        let attempts = self.settings.receipt_attempts.max(1);
        for attempt in 1..=attempts {
            let raw = self.call("eth_getTransactionReceipt", json!([tx_hash])).await?;
            if !raw.is_null() {
                let receipt: RawReceipt = serde_json::from_value(raw)
                    .map_err(|e| LedgerError::InvalidResponse(format!("receipt: {}", e)))?;
                if receipt.status.as_deref() == Some("0x0") {
                    return Err(LedgerError::Reverted {
                        tx_hash: tx_hash.to_string(),
                    });
                }
                // a receipt without a block number is still pending
                if let Some(block) = receipt.block_number.as_deref() {
                    return Ok(LedgerReceipt {
                        tx_hash: receipt.transaction_hash.unwrap_or_else(|| tx_hash.to_string()),
                        block_number: parse_quantity(block)?,
                    });
                }
            }
            debug!("receipt for {} not ready (poll {}/{})", tx_hash, attempt, attempts);
            tokio::time::sleep(self.settings.receipt_poll_interval).await;
        }
        warn!("no receipt for {} after {} polls", tx_hash, attempts);
        Err(LedgerError::ReceiptTimeout {
            tx_hash: tx_hash.to_string(),
            attempts,
        })
    }
}

#[async_trait]
impl LedgerClient for EthLedgerClient {
    async fn submit(&self, transaction_id: &str, digest: &str) -> Result<LedgerReceipt, LedgerError> {
        validate_submission(transaction_id, digest)?;
        let deployment = self.deployment.as_ref().ok_or_else(|| {
            LedgerError::Connection("smart contract not connected".into())
        })?;

        let data = abi::encode_call(STORE_HASH_SIGNATURE, &[transaction_id, digest]);
        let tx = json!({
            "from": deployment.sender,
            "to": deployment.contract_address,
            "gas": format!("{:#x}", self.settings.gas),
            "data": data,
        });

        let tx_hash = self
            .call("eth_sendTransaction", json!([tx]))
            .await?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LedgerError::InvalidResponse("eth_sendTransaction returned no hash".into()))?;
        info!("⛓️  Submitted anchor for {} as ledger tx {}", transaction_id, tx_hash);

        self.await_receipt(&tx_hash).await
    }

    fn is_connected(&self) -> bool {
        self.deployment.is_some()
    }

    fn describe(&self) -> String {
        match &self.deployment {
            Some(d) => format!("rpc {} contract {} (network {})", self.settings.rpc_url, d.contract_address, d.network_id),
            None => format!("rpc {} (not connected)", self.settings.rpc_url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTIFACT: &str = r#"{
        "contractName": "SecureFinLedger",
        "abi": [],
        "networks": {
            "5777": { "address": "0x1234000000000000000000000000000000005678" },
            "1337": { "address": "" }
        }
    }"#;

    #[test]
    fn artifact_address_by_network() {
        assert_eq!(
            resolve_contract_address(ARTIFACT, "5777").unwrap().as_deref(),
            Some("0x1234000000000000000000000000000000005678")
        );
        assert_eq!(resolve_contract_address(ARTIFACT, "1").unwrap(), None);
        assert_eq!(resolve_contract_address(ARTIFACT, "1337").unwrap(), None);
    }

    #[test]
    fn artifact_without_networks_resolves_nothing() {
        assert_eq!(resolve_contract_address(r#"{"abi": []}"#, "5777").unwrap(), None);
        assert!(resolve_contract_address("not json", "5777").is_err());
    }

    #[test]
    fn quantities_are_hex() {
        assert_eq!(parse_quantity("0x1a").unwrap(), 26);
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[tokio::test]
    async fn disconnected_client_reports_connection_error() {
        let client = EthLedgerClient::disconnected(EthLedgerSettings::default()).unwrap();
        assert!(!client.is_connected());
        let err = client.submit("TXN_1", &"ab".repeat(32)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Connection(_)));
    }

    #[tokio::test]
    async fn rejects_malformed_digest_before_network() {
        let client = EthLedgerClient::disconnected(EthLedgerSettings::default()).unwrap();
        let err = client.submit("TXN_1", "not-a-digest").await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
        let err = client.submit("  ", &"ab".repeat(32)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }
}
