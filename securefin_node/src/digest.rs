// src/digest.rs
// Integrity digests submitted to the ledger

use chrono::{DateTime, SecondsFormat, Utc};
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest as _, Sha256};

use crate::model::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestScheme {
    /// sha256(transactionId ++ unix millis). Unique, but cannot be recomputed later.
    Timestamped,
    /// sha256(canonical business fields ++ nonce), nonce stored next to the hash.
    Content,
}

impl DigestScheme {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "timestamped" | "time" | "legacy" => Some(DigestScheme::Timestamped),
            "content" => Some(DigestScheme::Content),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DigestScheme::Timestamped => "timestamped",
            DigestScheme::Content => "content",
        }
    }

    pub fn compute(&self, tx: &Transaction, now: DateTime<Utc>) -> AnchorDigest {
        match self {
            DigestScheme::Timestamped => AnchorDigest {
                hash: timestamped_digest(&tx.transaction_id, now.timestamp_millis()),
                nonce: None,
            },
            DigestScheme::Content => {
                let nonce = random_nonce();
                AnchorDigest {
                    hash: content_digest(tx, &nonce),
                    nonce: Some(nonce),
                }
            }
        }
    }
}

/// A 32-byte digest (lowercase hex) and the nonce it was salted with, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorDigest {
    pub hash: String,
    pub nonce: Option<String>,
}

pub fn timestamped_digest(transaction_id: &str, unix_millis: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(transaction_id.as_bytes());
    hasher.update(unix_millis.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

// Field order here is the canonical order; changing it breaks old digests.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalFields<'a> {
    transaction_id: &'a str,
    user_id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    category: &'a str,
    amount: f64,
    currency: &'a str,
    description: &'a str,
    created_at: String,
}

fn canonical_bytes(tx: &Transaction) -> Vec<u8> {
    let fields = CanonicalFields {
        transaction_id: &tx.transaction_id,
        user_id: &tx.user_id,
        kind: tx.kind.as_str(),
        category: &tx.category,
        amount: tx.amount,
        currency: &tx.currency,
        description: &tx.description,
        created_at: tx.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
    };
    // plain struct of strings and a float: serialization cannot fail
    serde_json::to_vec(&fields).unwrap_or_default()
}

pub fn content_digest(tx: &Transaction, nonce: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(tx));
    hasher.update(nonce.as_bytes());
    hex::encode(hasher.finalize())
}

/// Recompute a content digest from the stored record.
///
/// `None` when the record carries no nonce (unanchored, or anchored with the
/// timestamped scheme), otherwise whether the stored hash still matches.
pub fn verify_content_digest(tx: &Transaction) -> Option<bool> {
    let nonce = tx.digest_nonce.as_deref()?;
    if tx.blockchain_hash.is_empty() {
        return None;
    }
    Some(content_digest(tx, nonce) == tx.blockchain_hash)
}

fn random_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// True for 32 bytes of hex, with or without a `0x` prefix.
pub fn is_hex_digest(s: &str) -> bool {
    let body = s.strip_prefix("0x").unwrap_or(s);
    body.len() == 64 && body.chars().all(|c| c.is_ascii_hexdigit())
}
