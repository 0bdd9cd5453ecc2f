// src/anchor_service.rs
// Transaction anchoring: digest a record, submit it to the ledger, persist the receipt.

use chrono::{Duration, Utc};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::digest::DigestScheme;
use crate::ledger::{LedgerClient, LedgerError};
use crate::model::{Transaction, TransactionPatch, TransactionStatus, TransactionType};
use crate::storage::{Precondition, StoreError, TransactionStore};

/// What to do when verify is asked about an id the store has never seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPolicy {
    /// Create a demo placeholder record and anchor it.
    CreatePlaceholder,
    /// Fail with `NotFound`.
    Reject,
}

impl MissingPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "create" | "upsert" | "placeholder" => Some(MissingPolicy::CreatePlaceholder),
            "reject" | "error" => Some(MissingPolicy::Reject),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MissingPolicy::CreatePlaceholder => "create",
            MissingPolicy::Reject => "reject",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnchorOptions {
    pub missing: MissingPolicy,
    pub digest: DigestScheme,
    /// A claim older than this may be taken over by a new request.
    pub claim_timeout: Duration,
}

impl Default for AnchorOptions {
    fn default() -> Self {
        Self {
            missing: MissingPolicy::CreatePlaceholder,
            digest: DigestScheme::Content,
            claim_timeout: Duration::seconds(900),
        }
    }
}

#[derive(Debug, Error)]
pub enum AnchorError {
    #[error("{0}")]
    Validation(String),

    #[error("transaction {0} not found")]
    NotFound(String),

    #[error("anchoring already in progress for {0}")]
    InProgress(String),

    #[error("{0}")]
    Connection(String),

    #[error(transparent)]
    Ledger(LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<LedgerError> for AnchorError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Connection(msg) => AnchorError::Connection(msg),
            other => AnchorError::Ledger(other),
        }
    }
}

/// Proof of anchoring returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    pub transaction_id: String,
    pub tx_hash: String,
    pub block_number: u64,
    pub blockchain_hash: String,
    /// The record was anchored by an earlier request; nothing was submitted.
    pub already_verified: bool,
}

impl VerifyOutcome {
    fn from_anchored(tx: &Transaction, already_verified: bool) -> Self {
        Self {
            transaction_id: tx.transaction_id.clone(),
            tx_hash: tx.tx_hash.clone(),
            block_number: tx.block_number.unwrap_or_default(),
            blockchain_hash: tx.blockchain_hash.clone(),
            already_verified,
        }
    }
}

/// Anchoring workflow with its store and ledger injected.
pub struct AnchorService {
    store: Arc<dyn TransactionStore>,
    ledger: Arc<dyn LedgerClient>,
    options: AnchorOptions,
}

impl AnchorService {
    pub fn new(store: Arc<dyn TransactionStore>, ledger: Arc<dyn LedgerClient>, options: AnchorOptions) -> Self {
        Self { store, ledger, options }
    }

    pub fn options(&self) -> &AnchorOptions {
        &self.options
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    /// Anchor `transaction_id`, or return its existing receipt.
    ///
    /// Steps:
    /// 1. locate the record (or create a placeholder, per policy)
    /// 2. short-circuit if a receipt is already stored
    /// 3. claim the record with the new digest (compare-and-set)
    /// 4. submit to the ledger
    /// 5. persist the receipt, or release the claim on failure
    ///
    /// Only the request holding the claim talks to the ledger, so concurrent
    /// calls for one id produce at most one submission.
    pub async fn verify(&self, transaction_id: &str) -> Result<VerifyOutcome, AnchorError> {
        let id = transaction_id.trim();
        if id.is_empty() {
            return Err(AnchorError::Validation("Transaction ID is required".into()));
        }

        // Step 1
        let tx = self.locate(id).await?;

        // Step 2
        if tx.is_anchored() {
            info!("Transaction {} already anchored in block {:?}", id, tx.block_number);
            return Ok(VerifyOutcome::from_anchored(&tx, true));
        }

        // Step 3
        let now = Utc::now();
        let digest = self.options.digest.compute(&tx, now);
        let unclaimed = Precondition::Unclaimed {
            stale_before: now - self.options.claim_timeout,
        };
        let claim = TransactionPatch::claim(&digest.hash, digest.nonce.clone(), now);
        let claimed = match self.store.update_if(id, &unclaimed, claim).await {
            Ok(tx) => tx,
            Err(StoreError::PreconditionFailed(_)) => return self.lost_claim(id).await,
            Err(e) => return Err(e.into()),
        };

        // Step 4
        info!("🔗 Anchoring {} with digest {}", id, digest.hash);
        let submitted = self.ledger.submit(id, &digest.hash).await;

        // Step 5
        let held = Precondition::ClaimedWith(digest.hash.clone());
        match submitted {
            Ok(receipt) => {
                let status = (claimed.status == TransactionStatus::Pending).then_some(TransactionStatus::Confirmed);
                let patch = TransactionPatch::confirm(&receipt.tx_hash, receipt.block_number, Utc::now(), status);
                let anchored = self.store.update_if(id, &held, patch).await.map_err(|e| {
                    error!(
                        "❌ Ledger tx {} for {} succeeded but receipt was not persisted: {}",
                        receipt.tx_hash, id, e
                    );
                    e
                })?;
                info!("✅ Anchored {} in block {} (tx {})", id, receipt.block_number, receipt.tx_hash);
                Ok(VerifyOutcome::from_anchored(&anchored, false))
            }
            Err(e) => {
                warn!("⚠️  Ledger submission for {} failed: {}", id, e);
                if let Err(release_err) = self.store.update_if(id, &held, TransactionPatch::release()).await {
                    error!("Failed to release anchoring claim on {}: {}", id, release_err);
                }
                Err(e.into())
            }
        }
    }

    async fn locate(&self, id: &str) -> Result<Transaction, AnchorError> {
        if let Some(tx) = self.store.find_by_id(id).await? {
            return Ok(tx);
        }
        match self.options.missing {
            MissingPolicy::Reject => Err(AnchorError::NotFound(id.to_string())),
            MissingPolicy::CreatePlaceholder => match self.store.create(placeholder(id)).await {
                Ok(tx) => {
                    info!("Created placeholder transaction {} for verification", id);
                    Ok(tx)
                }
                // a concurrent request created it first; use theirs
                Err(StoreError::DuplicateKey(_)) => self
                    .store
                    .find_by_id(id)
                    .await?
                    .ok_or_else(|| AnchorError::NotFound(id.to_string())),
                Err(e) => Err(e.into()),
            },
        }
    }

    async fn lost_claim(&self, id: &str) -> Result<VerifyOutcome, AnchorError> {
        let current = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| AnchorError::NotFound(id.to_string()))?;
        if current.is_anchored() {
            return Ok(VerifyOutcome::from_anchored(&current, true));
        }
        Err(AnchorError::InProgress(id.to_string()))
    }
}

/// Demo record for an id only the dashboard's mock data knows about.
fn placeholder(id: &str) -> Transaction {
    let mut rng = rand::thread_rng();
    let kind = if rng.gen_bool(0.5) {
        TransactionType::Income
    } else {
        TransactionType::Expense
    };
    let mut tx = Transaction::new(id, "demo", kind, rng.gen_range(0..10_000) as f64);
    tx.category = "General".into();
    tx.description = "Demo Transaction".into();
    tx
}
