//! Ledger clients: submit `(transactionId, digest)` pairs to the anchoring contract.
//!
//! The workflow only sees [`LedgerClient`]. [`EthLedgerClient`] talks JSON-RPC to
//! a development chain (Ganache/Truffle); [`SimulatedLedger`] mints receipts in
//! process so the node can run without a chain.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod abi;
pub mod eth;
pub mod simulated;

pub use eth::{EthLedgerClient, EthLedgerSettings};
pub use simulated::SimulatedLedger;

/// Contract method called for every anchoring.
pub const STORE_HASH_SIGNATURE: &str = "storeTransactionHash(string,string)";

/// Confirmation of a submitted ledger call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerReceipt {
    pub tx_hash: String,
    pub block_number: u64,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The contract was never located, or the node could not be reached at startup.
    #[error("ledger not connected: {0}")]
    Connection(String),

    #[error("invalid ledger input: {0}")]
    InvalidInput(String),

    #[error("ledger transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("ledger rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("invalid ledger response: {0}")]
    InvalidResponse(String),

    #[error("ledger transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    #[error("no receipt for ledger transaction {tx_hash} after {attempts} polls")]
    ReceiptTimeout { tx_hash: String, attempts: u32 },

    #[error("ledger submission failed: {0}")]
    Submission(String),
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit one anchoring call. Not idempotent: every call is a new ledger transaction.
    async fn submit(&self, transaction_id: &str, digest: &str) -> Result<LedgerReceipt, LedgerError>;

    /// Whether a contract deployment was resolved.
    fn is_connected(&self) -> bool;

    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerMode {
    Rpc,
    Simulated,
}

impl LedgerMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "rpc" | "eth" | "ganache" => Some(LedgerMode::Rpc),
            "simulated" | "sim" | "mock" => Some(LedgerMode::Simulated),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerMode::Rpc => "rpc",
            LedgerMode::Simulated => "simulated",
        }
    }
}

/// Shared input checks for every client.
pub(crate) fn validate_submission(transaction_id: &str, digest: &str) -> Result<(), LedgerError> {
    if transaction_id.trim().is_empty() {
        return Err(LedgerError::InvalidInput("transaction id is empty".into()));
    }
    if !crate::digest::is_hex_digest(digest) {
        return Err(LedgerError::InvalidInput(format!(
            "digest must be 32 hex-encoded bytes, got {:?}",
            digest
        )));
    }
    Ok(())
}
