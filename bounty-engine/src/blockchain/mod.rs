pub mod contracts;
pub mod escrow;
pub mod id;

pub use escrow::{EscrowAdapter, EscrowReader, OnChainBounty, OnChainStatus, TxOutcome};
