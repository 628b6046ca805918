pub mod allowlist;
pub mod bounty;
pub mod claim;
pub mod wallet;

pub use allowlist::AllowlistEntry;
pub use bounty::{Bounty, BountyStatus, Lifecycle, LifecycleState};
pub use claim::{ClaimStatus, PrClaim};
pub use wallet::{PgWalletDirectory, WalletDirectory};
