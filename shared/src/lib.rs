//! Shared types and crypto utilities for MergePay backend services

pub mod crypto;
pub mod types;

pub use types::{ApiError, ApiResponse};
