// src/ledger/simulated.rs
// In-process ledger: deterministic receipts without a chain

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

use super::{validate_submission, LedgerClient, LedgerError, LedgerReceipt};

/// Mints one block per submission. Failure and latency can be injected,
/// and every accepted submission is counted.
pub struct SimulatedLedger {
    next_block: AtomicU64,
    submissions: AtomicU64,
    failure: Mutex<Option<String>>,
    latency: Duration,
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self {
            next_block: AtomicU64::new(1),
            submissions: AtomicU64::new(0),
            failure: Mutex::new(None),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every submission fails with `message` until [`SimulatedLedger::recover`].
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    pub fn recover(&self) {
        *self.failure.lock() = None;
    }

    /// Submissions that reached the ledger, failed ones included.
    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn submit(&self, transaction_id: &str, digest: &str) -> Result<LedgerReceipt, LedgerError> {
        validate_submission(transaction_id, digest)?;
        self.submissions.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let failure = self.failure.lock().clone();
        if let Some(message) = failure {
            return Err(LedgerError::Submission(message));
        }

        let block_number = self.next_block.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(transaction_id.as_bytes());
        hasher.update(digest.as_bytes());
        hasher.update(block_number.to_be_bytes());
        let tx_hash = format!("0x{}", hex::encode(hasher.finalize()));

        info!("🧪 Simulated ledger anchored {} in block {}", transaction_id, block_number);
        Ok(LedgerReceipt { tx_hash, block_number })
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "simulated".to_string()
    }
}
