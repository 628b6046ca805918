pub mod events;
pub mod processor;

pub use events::{parse_event, GithubEvent};
pub use processor::{WebhookProcessor, WebhookSummary};
