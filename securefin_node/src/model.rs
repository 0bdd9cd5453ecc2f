// src/model.rs
// Transaction and user records shared by the store, the anchoring workflow and the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    Expense,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "income",
            TransactionType::Expense => "expense",
            TransactionType::Transfer => "transfer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Pending,
    Confirmed,
    Failed,
    Reversed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    BankTransfer,
    Upi,
    Crypto,
    Wallet,
}

/// Request context captured when a transaction is created over HTTP.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMetadata {
    pub location: Option<String>,
    pub device_id: Option<String>,
    pub ip_address: Option<String>,
}

/// A user's financial transaction plus its anchoring state.
///
/// `blockchain_hash` is empty while the record is unanchored, holds the digest
/// while an anchoring claim is outstanding, and is frozen together with
/// `tx_hash`/`block_number` once the ledger receipt has been persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    #[serde(default)]
    pub category: String,
    pub amount: f64,
    pub currency: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub source_account: Option<String>,
    #[serde(default)]
    pub destination_account: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,

    #[serde(default)]
    pub fraud_flag: bool,
    #[serde(default)]
    pub fraud_reason: Option<String>,
    #[serde(default)]
    pub anomaly_score: Option<f64>,

    #[serde(default)]
    pub blockchain_hash: String,
    #[serde(default)]
    pub digest_nonce: Option<String>,
    #[serde(default)]
    pub anchoring_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub blockchain_confirmed: bool,
    #[serde(default)]
    pub tx_hash: String,
    #[serde(default)]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub verified_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub status: TransactionStatus,
    #[serde(default)]
    pub metadata: TransactionMetadata,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// New unanchored record with default currency and `pending` status.
    pub fn new(
        transaction_id: impl Into<String>,
        user_id: impl Into<String>,
        kind: TransactionType,
        amount: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            transaction_id: transaction_id.into(),
            user_id: user_id.into(),
            kind,
            category: String::new(),
            amount,
            currency: DEFAULT_CURRENCY.to_string(),
            description: String::new(),
            payment_method: None,
            source_account: None,
            destination_account: None,
            tags: Vec::new(),
            notes: None,
            attachments: Vec::new(),
            fraud_flag: false,
            fraud_reason: None,
            anomaly_score: None,
            blockchain_hash: String::new(),
            digest_nonce: None,
            anchoring_started_at: None,
            blockchain_confirmed: false,
            tx_hash: String::new(),
            block_number: None,
            verified_at: None,
            status: TransactionStatus::Pending,
            metadata: TransactionMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_anchored(&self) -> bool {
        !self.tx_hash.is_empty()
    }

    /// A claim is outstanding: digest written, receipt not yet persisted.
    pub fn is_anchoring(&self) -> bool {
        self.tx_hash.is_empty() && !self.blockchain_hash.is_empty()
    }

    /// Apply a partial update in place.
    ///
    /// Anchored records keep their digest, receipt and business attributes
    /// frozen, and no patch may leave a `tx_hash` without its `blockchain_hash`.
    pub fn apply(&mut self, patch: TransactionPatch) -> Result<(), StoreError> {
        if self.is_anchored() && (patch.touches_business_fields() || patch.touches_anchor_fields()) {
            return Err(StoreError::Immutable(format!(
                "transaction {} is anchored; business and anchoring fields are frozen",
                self.transaction_id
            )));
        }

        if let Some(v) = patch.user_id {
            self.user_id = v;
        }
        if let Some(v) = patch.kind {
            self.kind = v;
        }
        if let Some(v) = patch.category {
            self.category = v;
        }
        if let Some(v) = patch.amount {
            self.amount = v;
        }
        if let Some(v) = patch.currency {
            self.currency = v;
        }
        if let Some(v) = patch.description {
            self.description = v;
        }
        if let Some(v) = patch.tags {
            self.tags = v;
        }
        if let Some(v) = patch.notes {
            self.notes = v;
        }
        if let Some(v) = patch.fraud_flag {
            self.fraud_flag = v;
        }
        if let Some(v) = patch.fraud_reason {
            self.fraud_reason = v;
        }
        if let Some(v) = patch.anomaly_score {
            self.anomaly_score = v;
        }
        if let Some(v) = patch.blockchain_hash {
            self.blockchain_hash = v;
        }
        if let Some(v) = patch.digest_nonce {
            self.digest_nonce = v;
        }
        if let Some(v) = patch.anchoring_started_at {
            self.anchoring_started_at = v;
        }
        if let Some(v) = patch.tx_hash {
            self.tx_hash = v;
        }
        if let Some(v) = patch.block_number {
            self.block_number = v;
        }
        if let Some(v) = patch.verified_at {
            self.verified_at = v;
        }
        if let Some(v) = patch.blockchain_confirmed {
            self.blockchain_confirmed = v;
        }
        if let Some(v) = patch.status {
            self.status = v;
        }

        if !self.tx_hash.is_empty() && self.blockchain_hash.is_empty() {
            return Err(StoreError::Invalid(format!(
                "transaction {}: txHash requires a blockchainHash",
                self.transaction_id
            )));
        }

        self.updated_at = Utc::now();
        Ok(())
    }
}

pub const DEFAULT_CURRENCY: &str = "INR";

/// Partial update. `None` leaves a field untouched; nullable fields use a
/// nested `Option` so they can be cleared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionPatch {
    pub user_id: Option<String>,
    pub kind: Option<TransactionType>,
    pub category: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub notes: Option<Option<String>>,
    pub fraud_flag: Option<bool>,
    pub fraud_reason: Option<Option<String>>,
    pub anomaly_score: Option<Option<f64>>,
    pub blockchain_hash: Option<String>,
    pub digest_nonce: Option<Option<String>>,
    pub anchoring_started_at: Option<Option<DateTime<Utc>>>,
    pub tx_hash: Option<String>,
    pub block_number: Option<Option<u64>>,
    pub verified_at: Option<Option<DateTime<Utc>>>,
    pub blockchain_confirmed: Option<bool>,
    pub status: Option<TransactionStatus>,
}

impl TransactionPatch {
    /// Write an anchoring claim: the digest the ledger call is about to carry.
    pub fn claim(digest: &str, nonce: Option<String>, at: DateTime<Utc>) -> Self {
        Self {
            blockchain_hash: Some(digest.to_string()),
            digest_nonce: Some(nonce),
            anchoring_started_at: Some(Some(at)),
            ..Self::default()
        }
    }

    /// Drop an outstanding claim after a failed submission.
    pub fn release() -> Self {
        Self {
            blockchain_hash: Some(String::new()),
            digest_nonce: Some(None),
            anchoring_started_at: Some(None),
            ..Self::default()
        }
    }

    /// Persist a ledger receipt. `status` is only set when the record is pending.
    pub fn confirm(tx_hash: &str, block_number: u64, at: DateTime<Utc>, status: Option<TransactionStatus>) -> Self {
        Self {
            tx_hash: Some(tx_hash.to_string()),
            block_number: Some(Some(block_number)),
            verified_at: Some(Some(at)),
            anchoring_started_at: Some(None),
            blockchain_confirmed: Some(true),
            status,
            ..Self::default()
        }
    }

    fn touches_business_fields(&self) -> bool {
        self.user_id.is_some()
            || self.kind.is_some()
            || self.category.is_some()
            || self.amount.is_some()
            || self.currency.is_some()
            || self.description.is_some()
    }

    fn touches_anchor_fields(&self) -> bool {
        self.blockchain_hash.is_some()
            || self.digest_nonce.is_some()
            || self.tx_hash.is_some()
            || self.block_number.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Suspended,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    #[default]
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub two_factor_enabled: bool,
    pub notifications_enabled: bool,
    pub currency_preference: String,
    pub time_zone: String,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            two_factor_enabled: false,
            notifications_enabled: true,
            currency_preference: DEFAULT_CURRENCY.to_string(),
            time_zone: "IST".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: String,
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub mobile_number: Option<String>,
    pub preferred_language: String,
    #[serde(default)]
    pub account_status: AccountStatus,
    #[serde(default)]
    pub kyc_verified: bool,
    #[serde(default)]
    pub risk_profile: RiskProfile,
    #[serde(default)]
    pub blockchain_wallet: Option<String>,
    #[serde(default)]
    pub settings: UserSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(user_id: String, email: &str, password_hash: String, first_name: String, last_name: String) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            email: normalize_email(email),
            password_hash,
            first_name,
            last_name,
            mobile_number: None,
            preferred_language: "en".to_string(),
            account_status: AccountStatus::Active,
            kyc_verified: false,
            risk_profile: RiskProfile::Low,
            blockchain_wallet: None,
            settings: UserSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            user_id: self.user_id.clone(),
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            name: format!("{} {}", self.first_name, self.last_name).trim().to_string(),
            preferred_language: self.preferred_language.clone(),
            account_status: self.account_status,
            kyc_verified: self.kyc_verified,
            risk_profile: self.risk_profile,
            settings: self.settings.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Client-facing view of a [`User`]; never carries the password hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub name: String,
    pub preferred_language: String,
    pub account_status: AccountStatus,
    pub kyc_verified: bool,
    pub risk_profile: RiskProfile,
    pub settings: UserSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
