// Storage abstraction layer - transaction and user records over memory or sled
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::model::{Transaction, TransactionPatch, User};

pub mod memory;
pub mod sled_store;

// Re-exports
pub use memory::MemoryStore;
pub use sled_store::SledStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("immutable field: {0}")]
    Immutable(String),

    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Guard evaluated against the stored record inside an atomic update.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    Always,
    /// No receipt yet, and either no claim or a claim started before `stale_before`.
    Unclaimed { stale_before: DateTime<Utc> },
    /// No receipt yet and the outstanding claim carries exactly this digest.
    ClaimedWith(String),
}

impl Precondition {
    pub fn holds(&self, tx: &Transaction) -> bool {
        match self {
            Precondition::Always => true,
            Precondition::Unclaimed { stale_before } => {
                if tx.is_anchored() {
                    return false;
                }
                if !tx.is_anchoring() {
                    return true;
                }
                match tx.anchoring_started_at {
                    Some(started) => started < *stale_before,
                    None => true,
                }
            }
            Precondition::ClaimedWith(digest) => tx.is_anchoring() && tx.blockchain_hash == *digest,
        }
    }
}

/// Transaction records keyed by `transactionId`, indexed by `userId`.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn find_by_id(&self, transaction_id: &str) -> Result<Option<Transaction>, StoreError>;

    /// Insert a new record. Fails with `DuplicateKey` if the id exists.
    async fn create(&self, tx: Transaction) -> Result<Transaction, StoreError>;

    /// Atomic compare-and-set: apply `patch` only if `precondition` holds on the stored record.
    async fn update_if(
        &self,
        transaction_id: &str,
        precondition: &Precondition,
        patch: TransactionPatch,
    ) -> Result<Transaction, StoreError>;

    /// Newest first, at most `limit` records.
    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Transaction>, StoreError>;

    async fn update_fields(&self, transaction_id: &str, patch: TransactionPatch) -> Result<Transaction, StoreError> {
        self.update_if(transaction_id, &Precondition::Always, patch).await
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Fails with `DuplicateKey` if the id or the email is taken.
    async fn create(&self, user: User) -> Result<User, StoreError>;
}

/// Storage mode enum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    Memory,
    Sled,
}

impl StorageMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" | "inmemory" => Some(StorageMode::Memory),
            "sled" | "disk" => Some(StorageMode::Sled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Memory => "memory",
            StorageMode::Sled => "sled",
        }
    }
}

/// Both halves of a backend, sharing one underlying handle.
#[derive(Clone)]
pub struct Stores {
    pub transactions: Arc<dyn TransactionStore>,
    pub users: Arc<dyn UserStore>,
}

/// Create storage backend based on mode
pub fn create_storage(mode: &StorageMode, sled_path: &str) -> Result<Stores, StoreError> {
    match mode {
        StorageMode::Memory => {
            let store = Arc::new(MemoryStore::new());
            Ok(Stores {
                transactions: store.clone(),
                users: store,
            })
        }
        StorageMode::Sled => {
            let store = Arc::new(SledStore::open(sled_path)?);
            Ok(Stores {
                transactions: store.clone(),
                users: store,
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behaviour every backend must share; run by each backend's tests.
    use super::*;
    use crate::model::{TransactionStatus, TransactionType};
    use chrono::Duration;

    fn tx_at(id: &str, user: &str, created_offset_secs: i64) -> Transaction {
        let mut tx = Transaction::new(id, user, TransactionType::Expense, 10.0);
        tx.created_at = Utc::now() + Duration::seconds(created_offset_secs);
        tx
    }

    pub async fn create_rejects_duplicates(store: &dyn TransactionStore) {
        store.create(tx_at("TXN_DUP", "u1", 0)).await.unwrap();
        let err = store.create(tx_at("TXN_DUP", "u2", 0)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_)));
        let kept = store.find_by_id("TXN_DUP").await.unwrap().unwrap();
        assert_eq!(kept.user_id, "u1");
    }

    pub async fn list_is_newest_first_and_capped(store: &dyn TransactionStore) {
        store.create(tx_at("TXN_OLD", "alice", -120)).await.unwrap();
        store.create(tx_at("TXN_NEW", "alice", 0)).await.unwrap();
        store.create(tx_at("TXN_MID", "alice", -60)).await.unwrap();
        store.create(tx_at("TXN_BOB", "bob", 10)).await.unwrap();

        let ids: Vec<String> = store
            .list_by_user("alice", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.transaction_id)
            .collect();
        assert_eq!(ids, vec!["TXN_NEW", "TXN_MID", "TXN_OLD"]);

        let capped = store.list_by_user("alice", 2).await.unwrap();
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].transaction_id, "TXN_NEW");
        assert!(store.list_by_user("carol", 10).await.unwrap().is_empty());
    }

    pub async fn claim_is_exclusive(store: &dyn TransactionStore) {
        store.create(tx_at("TXN_CAS", "u1", 0)).await.unwrap();
        let now = Utc::now();
        let unclaimed = Precondition::Unclaimed {
            stale_before: now - Duration::seconds(300),
        };

        let first = store
            .update_if("TXN_CAS", &unclaimed, TransactionPatch::claim("d1", None, now))
            .await
            .unwrap();
        assert_eq!(first.blockchain_hash, "d1");

        let second = store
            .update_if("TXN_CAS", &unclaimed, TransactionPatch::claim("d2", None, now))
            .await
            .unwrap_err();
        assert!(matches!(second, StoreError::PreconditionFailed(_)));

        let wrong = store
            .update_if(
                "TXN_CAS",
                &Precondition::ClaimedWith("d2".into()),
                TransactionPatch::confirm("0xaa", 1, now, None),
            )
            .await
            .unwrap_err();
        assert!(matches!(wrong, StoreError::PreconditionFailed(_)));

        let done = store
            .update_if(
                "TXN_CAS",
                &Precondition::ClaimedWith("d1".into()),
                TransactionPatch::confirm("0xaa", 1, now, Some(TransactionStatus::Confirmed)),
            )
            .await
            .unwrap();
        assert_eq!(done.tx_hash, "0xaa");
        assert_eq!(done.blockchain_hash, "d1");
    }

    pub async fn stale_claim_can_be_taken_over(store: &dyn TransactionStore) {
        store.create(tx_at("TXN_STALE", "u1", 0)).await.unwrap();
        let long_ago = Utc::now() - Duration::seconds(3600);
        store
            .update_fields("TXN_STALE", TransactionPatch::claim("old", None, long_ago))
            .await
            .unwrap();

        let unclaimed = Precondition::Unclaimed {
            stale_before: Utc::now() - Duration::seconds(300),
        };
        let taken = store
            .update_if("TXN_STALE", &unclaimed, TransactionPatch::claim("new", None, Utc::now()))
            .await
            .unwrap();
        assert_eq!(taken.blockchain_hash, "new");
    }

    pub async fn update_missing_is_not_found(store: &dyn TransactionStore) {
        let err = store
            .update_fields("TXN_NOPE", TransactionPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    pub async fn user_reassignment_moves_index(store: &dyn TransactionStore) {
        store.create(tx_at("TXN_MOVE", "alice", 0)).await.unwrap();
        store.create(tx_at("TXN_STAY", "alice", -30)).await.unwrap();
        let patch = TransactionPatch {
            user_id: Some("bob".into()),
            ..Default::default()
        };
        let moved = store.update_fields("TXN_MOVE", patch).await.unwrap();
        assert_eq!(moved.user_id, "bob");

        let alice: Vec<String> = store
            .list_by_user("alice", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.transaction_id)
            .collect();
        assert_eq!(alice, vec!["TXN_STAY"]);

        let bob = store.list_by_user("bob", 10).await.unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].transaction_id, "TXN_MOVE");
        assert_eq!(bob[0].user_id, "bob");

        // a second move back keeps exactly one index entry
        let back = TransactionPatch {
            user_id: Some("alice".into()),
            ..Default::default()
        };
        store.update_fields("TXN_MOVE", back).await.unwrap();
        assert_eq!(store.list_by_user("alice", 10).await.unwrap().len(), 2);
        assert!(store.list_by_user("bob", 10).await.unwrap().is_empty());
    }

    pub async fn users_unique_by_email(store: &dyn UserStore) {
        let user = User::new("u-1".into(), "Ada@Example.com", "h".into(), "Ada".into(), "L".into());
        store.create(user).await.unwrap();

        let clash = User::new("u-2".into(), "ada@example.com", "h".into(), "Eve".into(), "X".into());
        assert!(matches!(store.create(clash).await, Err(StoreError::DuplicateKey(_))));

        let found = store.find_by_email(" ADA@example.com").await.unwrap().unwrap();
        assert_eq!(found.user_id, "u-1");
        assert!(store.find_by_id("u-1").await.unwrap().is_some());
        assert!(store.find_by_id("u-2").await.unwrap().is_none());
    }
}
