// tests/eth_ledger.rs
// EthLedgerClient against a stub JSON-RPC node served by axum on a random port.
use axum::extract::Extension;
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use parking_lot::Mutex;
use securefin_node::ledger::abi::encode_call;
use securefin_node::ledger::{EthLedgerClient, EthLedgerSettings, LedgerClient, LedgerError, STORE_HASH_SIGNATURE};
use serde_json::{json, Value};
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CONTRACT: &str = "0x00000000000000000000000000000000c0ffee00";
const SENDER: &str = "0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1";
const LEDGER_TX: &str = "0x5e1d3a76fbf824220eafc8c7d7b3d5d9c0b1f0e2e8f2a0a1b2c3d4e5f6a7b8c9";

#[derive(Default)]
struct StubNode {
    network_id: &'static str,
    revert: bool,
    rpc_error: bool,
    pending_polls: AtomicU32,
    sent: Mutex<Vec<Value>>,
}

async fn rpc(Extension(node): Extension<Arc<StubNode>>, Json(req): Json<Value>) -> Json<Value> {
    let id = req["id"].clone();
    let method = req["method"].as_str().unwrap_or_default();
    let result = match method {
        "net_version" => json!(node.network_id),
        "eth_accounts" => json!([SENDER, "0xffcf8fdee72ac11b5c542428b35eef5769c409f0"]),
        "eth_sendTransaction" => {
            if node.rpc_error {
                return Json(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32000, "message": "sender account not recognized" }
                }));
            }
            node.sent.lock().push(req["params"][0].clone());
            json!(LEDGER_TX)
        }
        "eth_getTransactionReceipt" => {
            if node.pending_polls.load(Ordering::SeqCst) > 0 {
                node.pending_polls.fetch_sub(1, Ordering::SeqCst);
                Value::Null
            } else {
                json!({
                    "transactionHash": LEDGER_TX,
                    "blockNumber": "0x2a",
                    "status": if node.revert { "0x0" } else { "0x1" },
                })
            }
        }
        _ => Value::Null,
    };
    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

fn spawn_node(node: Arc<StubNode>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/", post(rpc)).layer(Extension(node));
    let server = axum::Server::from_tcp(listener).unwrap().serve(app.into_make_service());
    tokio::spawn(server);
    addr
}

fn settings(addr: SocketAddr, artifact_path: std::path::PathBuf) -> EthLedgerSettings {
    EthLedgerSettings {
        rpc_url: format!("http://{}", addr),
        artifact_path,
        receipt_poll_interval: Duration::from_millis(10),
        receipt_attempts: 5,
        request_timeout: Duration::from_secs(5),
        ..EthLedgerSettings::default()
    }
}

fn write_artifact(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("SecureFinLedger.json");
    let artifact = json!({
        "contractName": "SecureFinLedger",
        "networks": { "5777": { "address": CONTRACT } }
    });
    std::fs::write(&path, artifact.to_string()).unwrap();
    path
}

fn digest() -> String {
    "ab".repeat(32)
}

#[tokio::test]
async fn submits_call_and_waits_for_receipt() {
    let node = Arc::new(StubNode {
        network_id: "5777",
        pending_polls: AtomicU32::new(2),
        ..StubNode::default()
    });
    let addr = spawn_node(node.clone());
    let dir = tempfile::tempdir().unwrap();
    let client = EthLedgerClient::connect(settings(addr, write_artifact(&dir))).await.unwrap();

    assert!(client.is_connected());
    let deployment = client.deployment().unwrap();
    assert_eq!(deployment.network_id, "5777");
    assert_eq!(deployment.contract_address, CONTRACT);
    assert_eq!(deployment.sender, SENDER);

    let receipt = client.submit("TXN_1", &digest()).await.unwrap();
    assert_eq!(receipt.tx_hash, LEDGER_TX);
    assert_eq!(receipt.block_number, 42);

    let sent = node.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["from"], SENDER);
    assert_eq!(sent[0]["to"], CONTRACT);
    assert_eq!(sent[0]["gas"], "0x2dc6c0");
    assert_eq!(sent[0]["data"], encode_call(STORE_HASH_SIGNATURE, &["TXN_1", digest().as_str()]).as_str());
}

#[tokio::test]
async fn reverted_receipt_is_an_error() {
    let node = Arc::new(StubNode {
        network_id: "5777",
        revert: true,
        ..StubNode::default()
    });
    let addr = spawn_node(node);
    let dir = tempfile::tempdir().unwrap();
    let client = EthLedgerClient::connect(settings(addr, write_artifact(&dir))).await.unwrap();

    let err = client.submit("TXN_1", &digest()).await.unwrap_err();
    assert!(matches!(err, LedgerError::Reverted { tx_hash } if tx_hash == LEDGER_TX));
}

#[tokio::test]
async fn rpc_error_is_surfaced() {
    let node = Arc::new(StubNode {
        network_id: "5777",
        rpc_error: true,
        ..StubNode::default()
    });
    let addr = spawn_node(node);
    let dir = tempfile::tempdir().unwrap();
    let client = EthLedgerClient::connect(settings(addr, write_artifact(&dir))).await.unwrap();

    let err = client.submit("TXN_1", &digest()).await.unwrap_err();
    assert!(matches!(err, LedgerError::Rpc { code: -32000, .. }));
    assert!(err.to_string().contains("sender account not recognized"));
}

#[tokio::test]
async fn receipt_polling_gives_up() {
    let node = Arc::new(StubNode {
        network_id: "5777",
        pending_polls: AtomicU32::new(100),
        ..StubNode::default()
    });
    let addr = spawn_node(node);
    let dir = tempfile::tempdir().unwrap();
    let client = EthLedgerClient::connect(settings(addr, write_artifact(&dir))).await.unwrap();

    let err = client.submit("TXN_1", &digest()).await.unwrap_err();
    assert!(matches!(err, LedgerError::ReceiptTimeout { attempts: 5, .. }));
}

#[tokio::test]
async fn undeployed_network_leaves_client_disconnected() {
    let node = Arc::new(StubNode {
        network_id: "1",
        ..StubNode::default()
    });
    let addr = spawn_node(node.clone());
    let dir = tempfile::tempdir().unwrap();
    let client = EthLedgerClient::connect(settings(addr, write_artifact(&dir))).await.unwrap();

    assert!(!client.is_connected());
    let err = client.submit("TXN_1", &digest()).await.unwrap_err();
    assert!(matches!(err, LedgerError::Connection(_)));
    assert!(node.sent.lock().is_empty());
}

#[tokio::test]
async fn configured_address_skips_artifact() {
    let node = Arc::new(StubNode {
        network_id: "999",
        ..StubNode::default()
    });
    let addr = spawn_node(node);
    let mut cfg = settings(addr, "/nonexistent/artifact.json".into());
    cfg.contract_address = Some(CONTRACT.to_string());
    cfg.account = Some("0x1111111111111111111111111111111111111111".to_string());
    let client = EthLedgerClient::connect(cfg).await.unwrap();

    let deployment = client.deployment().unwrap();
    assert_eq!(deployment.contract_address, CONTRACT);
    assert_eq!(deployment.sender, "0x1111111111111111111111111111111111111111");
}
