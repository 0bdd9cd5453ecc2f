// In-memory storage for tests and throwaway demo nodes
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{Precondition, StoreError, TransactionStore, UserStore};
use crate::model::{normalize_email, Transaction, TransactionPatch, User};

#[derive(Default)]
struct Inner {
    // transaction_id -> (insertion sequence, record)
    transactions: HashMap<String, (u64, Transaction)>,
    next_seq: u64,
    users: HashMap<String, User>,
    emails: HashMap<String, String>,
}

/// Volatile store guarded by a single lock; every update is atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction_count(&self) -> usize {
        self.inner.read().transactions.len()
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn find_by_id(&self, transaction_id: &str) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .inner
            .read()
            .transactions
            .get(transaction_id)
            .map(|(_, tx)| tx.clone()))
    }

    async fn create(&self, tx: Transaction) -> Result<Transaction, StoreError> {
        let mut inner = self.inner.write();
        if inner.transactions.contains_key(&tx.transaction_id) {
            return Err(StoreError::DuplicateKey(tx.transaction_id));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .transactions
            .insert(tx.transaction_id.clone(), (seq, tx.clone()));
        Ok(tx)
    }

    async fn update_if(
        &self,
        transaction_id: &str,
        precondition: &Precondition,
        patch: TransactionPatch,
    ) -> Result<Transaction, StoreError> {
        let mut inner = self.inner.write();
        let (_, stored) = inner
            .transactions
            .get_mut(transaction_id)
            .ok_or_else(|| StoreError::NotFound(transaction_id.to_string()))?;

        if !precondition.holds(stored) {
            return Err(StoreError::PreconditionFailed(transaction_id.to_string()));
        }

        // apply to a copy so a rejected patch leaves the record untouched
        let mut updated = stored.clone();
        updated.apply(patch)?;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Transaction>, StoreError> {
        let inner = self.inner.read();
        let mut rows: Vec<&(u64, Transaction)> = inner
            .transactions
            .values()
            .filter(|(_, tx)| tx.user_id == user_id)
            .collect();
        rows.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| seq_b.cmp(seq_a))
        });
        Ok(rows.into_iter().take(limit).map(|(_, tx)| tx.clone()).collect())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().users.get(user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .emails
            .get(&normalize_email(email))
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn create(&self, user: User) -> Result<User, StoreError> {
        let mut inner = self.inner.write();
        let email = normalize_email(&user.email);
        if inner.users.contains_key(&user.user_id) {
            return Err(StoreError::DuplicateKey(user.user_id));
        }
        if inner.emails.contains_key(&email) {
            return Err(StoreError::DuplicateKey(email));
        }
        inner.emails.insert(email, user.user_id.clone());
        inner.users.insert(user.user_id.clone(), user.clone());
        Ok(user)
    }
}
