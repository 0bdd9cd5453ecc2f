pub mod client;
pub mod error;
pub mod types;

pub use client::SecureFinClient;
pub use error::{Result, SdkError};
pub use types::{
    AuthSession, Health, IntegrityReport, NewTransaction, Transaction, TransactionStatus, TransactionType, UserProfile,
    VerifyReceipt,
};

/// SDK version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::client::SecureFinClient;
    pub use crate::error::{Result, SdkError};
    pub use crate::types::*;
}
