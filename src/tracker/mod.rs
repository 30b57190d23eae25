//! Issue tracker collaborators.
//!
//! The orchestrator consumes two contracts:
//! - [`TicketProvider`]: fetch the ticket snapshot and its prior discussion
//! - [`ProgressSink`]: record a markdown progress document against the ticket
//!
//! [`LinearClient`] implements both against the Linear GraphQL API.
//! [`LogSink`] is a sink that only logs, used when posting is disabled.

mod linear;

pub use linear::LinearClient;

use async_trait::async_trait;

use crate::errors::TrackerError;
use crate::ticket::{Comment, Ticket, TicketId};

/// Appended to bodies cut down to fit a character budget.
pub const TRUNCATION_MARKER: &str = "\n\n… (truncated)";

/// Supplies ticket metadata and prior discussion.
#[async_trait]
pub trait TicketProvider: Send + Sync {
    async fn fetch_ticket(&self, id: &TicketId) -> Result<Ticket, TrackerError>;

    /// Comments in the order the tracker returns them (oldest first).
    async fn fetch_comments(&self, id: &TicketId) -> Result<Vec<Comment>, TrackerError>;
}

/// Durably records progress documents against a ticket.
///
/// Implementations never fail the caller: a `false` return means the document
/// was not recorded. Delivery is not idempotent.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn post_comment(&self, id: &TicketId, body: &str, internal_id: Option<&str>) -> bool;
}

/// Truncate `body` to at most `max_chars` characters, appending
/// [`TRUNCATION_MARKER`] when anything was cut.
pub fn truncate_body(body: &str, max_chars: usize) -> String {
    if body.chars().count() <= max_chars {
        return body.to_string();
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    if max_chars <= marker_len {
        return body.chars().take(max_chars).collect();
    }
    let mut out: String = body.chars().take(max_chars - marker_len).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// A sink that writes documents to the log instead of the tracker.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl ProgressSink for LogSink {
    async fn post_comment(&self, id: &TicketId, body: &str, _internal_id: Option<&str>) -> bool {
        tracing::info!(ticket = %id, chars = body.chars().count(), "progress document (not posted)");
        tracing::debug!(ticket = %id, "{}", body);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body_short_is_unchanged() {
        assert_eq!(truncate_body("hello", 100), "hello");
        assert_eq!(truncate_body("", 0), "");
    }

    #[test]
    fn test_truncate_body_exact_length_is_unchanged() {
        let body = "x".repeat(50);
        assert_eq!(truncate_body(&body, 50), body);
    }

    #[test]
    fn test_truncate_body_appends_marker_within_budget() {
        let body = "a".repeat(500);
        let out = truncate_body(&body, 100);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert_eq!(out.chars().count(), 100);
        assert!(out.starts_with("aaaa"));
    }

    #[test]
    fn test_truncate_body_respects_multibyte_chars() {
        let body = "é".repeat(300);
        let out = truncate_body(&body, 120);
        assert_eq!(out.chars().count(), 120);
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_truncate_body_tiny_budget_has_no_marker() {
        let out = truncate_body("abcdefghijklmnopqrstuvwxyz", 5);
        assert_eq!(out, "abcde");
    }

    #[tokio::test]
    async fn test_log_sink_always_succeeds() {
        let id = TicketId::parse("ENG-1").unwrap();
        assert!(LogSink.post_comment(&id, "body", None).await);
    }
}
