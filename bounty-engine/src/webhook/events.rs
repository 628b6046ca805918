//! Typed GitHub webhook events.
//!
//! Events arrive as an event name header plus a JSON body. They parse into
//! one sealed enum that the processor matches exhaustively; anything outside
//! our vocabulary lands in `Unhandled`, which is an explicit no-op rather
//! than a default branch.

use serde::Deserialize;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub id: i64,
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub merged: bool,
    pub user: Account,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: PullRequest,
    pub repository: Repository,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketplacePurchase {
    pub account: Account,
    pub plan: Plan,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketplacePurchaseEvent {
    pub action: String,
    pub marketplace_purchase: MarketplacePurchase,
}

#[derive(Debug, Clone)]
pub enum GithubEvent {
    PullRequest(PullRequestEvent),
    MarketplacePurchase(MarketplacePurchaseEvent),
    Unhandled { event: String },
}

/// Parse a verified webhook body. Unknown event names are not an error;
/// they become `Unhandled` and get acknowledged upstream. Malformed bodies
/// for recognized events are a validation error (schema drift is worth a
/// loud failure).
pub fn parse_event(event_name: &str, body: &[u8]) -> EngineResult<GithubEvent> {
    match event_name {
        "pull_request" => serde_json::from_slice(body)
            .map(GithubEvent::PullRequest)
            .map_err(|e| EngineError::Validation(format!("malformed pull_request payload: {e}"))),
        "marketplace_purchase" => serde_json::from_slice(body)
            .map(GithubEvent::MarketplacePurchase)
            .map_err(|e| {
                EngineError::Validation(format!("malformed marketplace_purchase payload: {e}"))
            }),
        other => Ok(GithubEvent::Unhandled {
            event: other.to_string(),
        }),
    }
}

/// Extract `#123`-style issue references from PR title/body text, in order
/// of first appearance, deduplicated.
pub fn extract_issue_refs(text: &str) -> Vec<i64> {
    let mut refs = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'#' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end > start {
                if let Ok(number) = text[start..end].parse::<i64>() {
                    if number > 0 && !refs.contains(&number) {
                        refs.push(number);
                    }
                }
            }
            i = end;
        } else {
            i += 1;
        }
    }

    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    const PR_OPENED: &str = r#"{
        "action": "opened",
        "pull_request": {
            "number": 7,
            "title": "Fix the widget",
            "body": "This closes #42 and also touches #43.",
            "merged": false,
            "user": { "id": 2002, "login": "contributor" }
        },
        "repository": { "id": 123456789, "full_name": "acme/widgets" }
    }"#;

    const PR_MERGED: &str = r#"{
        "action": "closed",
        "pull_request": {
            "number": 7,
            "body": "fixes #42",
            "merged": true,
            "user": { "id": 2002, "login": "contributor" }
        },
        "repository": { "id": 123456789, "full_name": "acme/widgets" }
    }"#;

    #[test]
    fn test_parse_pull_request_opened() {
        let event = parse_event("pull_request", PR_OPENED.as_bytes()).unwrap();
        match event {
            GithubEvent::PullRequest(e) => {
                assert_eq!(e.action, "opened");
                assert_eq!(e.pull_request.number, 7);
                assert_eq!(e.pull_request.user.id, 2002);
                assert_eq!(e.repository.full_name, "acme/widgets");
                assert!(!e.pull_request.merged);
            }
            other => panic!("expected PullRequest, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_pull_request_merged() {
        let event = parse_event("pull_request", PR_MERGED.as_bytes()).unwrap();
        match event {
            GithubEvent::PullRequest(e) => {
                assert_eq!(e.action, "closed");
                assert!(e.pull_request.merged);
            }
            other => panic!("expected PullRequest, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_marketplace_purchase() {
        let body = r#"{
            "action": "purchased",
            "marketplace_purchase": {
                "account": { "id": 55, "login": "acme" },
                "plan": { "name": "team" }
            }
        }"#;

        let event = parse_event("marketplace_purchase", body.as_bytes()).unwrap();
        match event {
            GithubEvent::MarketplacePurchase(e) => {
                assert_eq!(e.action, "purchased");
                assert_eq!(e.marketplace_purchase.plan.name, "team");
            }
            other => panic!("expected MarketplacePurchase, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_is_unhandled_not_an_error() {
        let event = parse_event("workflow_run", b"{}").unwrap();
        match event {
            GithubEvent::Unhandled { event } => assert_eq!(event, "workflow_run"),
            other => panic!("expected Unhandled, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_recognized_event_is_an_error() {
        assert!(parse_event("pull_request", b"{\"action\":").is_err());
        assert!(parse_event("pull_request", b"{}").is_err());
    }

    #[test]
    fn test_extract_issue_refs() {
        assert_eq!(extract_issue_refs("closes #42"), vec![42]);
        assert_eq!(extract_issue_refs("fixes #42, resolves #43"), vec![42, 43]);
        assert_eq!(extract_issue_refs("see #42 and #42 again"), vec![42]);
        assert_eq!(extract_issue_refs("no refs here"), Vec::<i64>::new());
        assert_eq!(extract_issue_refs("#1 at the start"), vec![1]);
        assert_eq!(extract_issue_refs("trailing hash #"), Vec::<i64>::new());
        assert_eq!(extract_issue_refs("##7 double hash"), vec![7]);
    }
}
