//! Cryptographic utilities for MergePay
//!
//! HMAC signing and verification for inbound webhook streams.

pub mod hashing;

pub use hashing::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Hashing error: {0}")]
    Hashing(String),

    #[error("Verification error: {0}")]
    Verification(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
