pub mod executor;
pub mod fee_ledger;
pub mod flight;
pub mod notifier;
pub mod reconciler;

pub use executor::PayoutExecutor;
pub use fee_ledger::FeeLedger;
pub use flight::{FlightGuard, FlightPermit};
pub use notifier::{Notification, Notifier};
