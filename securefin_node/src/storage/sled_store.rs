// src/storage/sled_store.rs
// sled-backed persistent store for transactions and users

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{abort, TransactionError};
use sled::{Db, Tree};
use std::thread::sleep;
use std::time::Duration;
use tracing::warn;

use super::{Precondition, StoreError, TransactionStore, UserStore};
use crate::model::{normalize_email, Transaction, TransactionPatch, User};

const TRANSACTIONS_TREE: &str = "transactions";
const USERS_TREE: &str = "users";

/// Durable store. Records are JSON under `txn:<id>`; the per-user index keys
/// sort by creation time so a reversed prefix scan yields newest first.
/// `idx:<id>` tracks each record's index entry so an owner change can move it.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    transactions: Tree,
    users: Tree,
}

impl SledStore {
    /// Open DB with retry/backoff (helps on transient locks)
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let mut attempt = 0u32;
        let max_attempts = 8u32;
        let mut wait = 250u64;
        let db = loop {
            match sled::open(path) {
                Ok(db) => break db,
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(StoreError::Backend(e));
                    }
                    warn!("open sled attempt {}/{} failed: {} - retrying in {}ms", attempt, max_attempts, e, wait);
                    sleep(Duration::from_millis(wait));
                    wait = std::cmp::min(wait * 2, 2000);
                }
            }
        };
        Self::from_db(db)
    }

    /// Throwaway database removed on drop.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        let transactions = db.open_tree(TRANSACTIONS_TREE)?;
        let users = db.open_tree(USERS_TREE)?;
        Ok(Self { db, transactions, users })
    }

    fn txn_key(transaction_id: &str) -> String {
        format!("txn:{}", transaction_id)
    }

    fn user_prefix(user_id: &str) -> String {
        // hex keeps ':' inside ids from bleeding into neighbouring prefixes
        format!("user:{}:", hex::encode(user_id.as_bytes()))
    }

    fn user_index_key(tx: &Transaction, seq: u64) -> String {
        let micros = tx.created_at.timestamp_micros().max(0);
        format!("{}{:020}:{:020}", Self::user_prefix(&tx.user_id), micros, seq)
    }

    /// Points at a record's current `user:` index entry.
    fn index_pointer_key(transaction_id: &str) -> String {
        format!("idx:{}", transaction_id)
    }

    fn user_key(user_id: &str) -> String {
        format!("user:{}", user_id)
    }

    fn email_key(email: &str) -> String {
        format!("email:{}", normalize_email(email))
    }

    /// flush to disk (optional but safer)
    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn load_transaction(&self, transaction_id: &str) -> Result<Option<Transaction>, StoreError> {
        match self.transactions.get(Self::txn_key(transaction_id))? {
            Some(ivec) => Ok(Some(decode(&ivec)?)),
            None => Ok(None),
        }
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(value)?)
}

fn settle<T>(result: Result<T, TransactionError<StoreError>>) -> Result<T, StoreError> {
    match result {
        Ok(v) => Ok(v),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(StoreError::Backend(e)),
    }
}

#[async_trait]
impl TransactionStore for SledStore {
    async fn find_by_id(&self, transaction_id: &str) -> Result<Option<Transaction>, StoreError> {
        self.load_transaction(transaction_id)
    }

    async fn create(&self, tx: Transaction) -> Result<Transaction, StoreError> {
        let key = Self::txn_key(&tx.transaction_id);
        let index_key = Self::user_index_key(&tx, self.db.generate_id()?);
        let pointer_key = Self::index_pointer_key(&tx.transaction_id);
        let bytes = encode(&tx)?;
        let id = tx.transaction_id.clone();

        settle(self.transactions.transaction(|t| {
            if t.get(key.as_bytes())?.is_some() {
                return abort(StoreError::DuplicateKey(id.clone()));
            }
            t.insert(key.as_bytes(), bytes.clone())?;
            t.insert(index_key.as_bytes(), id.as_bytes())?;
            t.insert(pointer_key.as_bytes(), index_key.as_bytes())?;
            Ok(())
        }))?;

        self.flush()?;
        Ok(tx)
    }

    async fn update_if(
        &self,
        transaction_id: &str,
        precondition: &Precondition,
        patch: TransactionPatch,
    ) -> Result<Transaction, StoreError> {
        let key = Self::txn_key(transaction_id);
        let pointer_key = Self::index_pointer_key(transaction_id);
        let seq = self.db.generate_id()?;
        let id = transaction_id.to_string();

        // record, index entry and pointer move together or not at all
        let updated = settle(self.transactions.transaction(|t| {
            let old = match t.get(key.as_bytes())? {
                Some(old) => old,
                None => return abort(StoreError::NotFound(id.clone())),
            };
            let mut tx: Transaction = decode(&old).or_else(abort)?;
            if !precondition.holds(&tx) {
                return abort(StoreError::PreconditionFailed(id.clone()));
            }

            let previous_owner = tx.user_id.clone();
            tx.apply(patch.clone()).or_else(abort)?;
            t.insert(key.as_bytes(), encode(&tx).or_else(abort)?)?;

            if tx.user_id != previous_owner {
                if let Some(stale) = t.get(pointer_key.as_bytes())? {
                    t.remove(stale)?;
                }
                let index_key = Self::user_index_key(&tx, seq);
                t.insert(index_key.as_bytes(), id.as_bytes())?;
                t.insert(pointer_key.as_bytes(), index_key.as_bytes())?;
            }
            Ok(tx)
        }))?;

        self.flush()?;
        Ok(updated)
    }

    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Transaction>, StoreError> {
        let mut out = Vec::new();
        for item in self.transactions.scan_prefix(Self::user_prefix(user_id)).rev() {
            if out.len() >= limit {
                break;
            }
            let (_, id) = item?;
            match self.load_transaction(&String::from_utf8_lossy(&id))? {
                Some(tx) if tx.user_id == user_id => out.push(tx),
                _ => {}
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl UserStore for SledStore {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        match self.users.get(Self::user_key(user_id))? {
            Some(ivec) => Ok(Some(decode(&ivec)?)),
            None => Ok(None),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        match self.users.get(Self::email_key(email))? {
            Some(id) => match self.users.get(Self::user_key(&String::from_utf8_lossy(&id)))? {
                Some(ivec) => Ok(Some(decode(&ivec)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn create(&self, user: User) -> Result<User, StoreError> {
        let key = Self::user_key(&user.user_id);
        let email_key = Self::email_key(&user.email);
        let bytes = encode(&user)?;
        let id = user.user_id.clone();
        let email = normalize_email(&user.email);

        settle(self.users.transaction(|t| {
            if t.get(key.as_bytes())?.is_some() {
                return abort(StoreError::DuplicateKey(id.clone()));
            }
            if t.get(email_key.as_bytes())?.is_some() {
                return abort(StoreError::DuplicateKey(email.clone()));
            }
            t.insert(key.as_bytes(), bytes.clone())?;
            t.insert(email_key.as_bytes(), id.as_bytes())?;
            Ok(())
        }))?;

        self.flush()?;
        Ok(user)
    }
}
