//! Ticket identity and the immutable context snapshot fetched once per run.

use crate::errors::InputError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static TICKET_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+-[0-9]+$").unwrap());

/// A tracker identifier of the form `<team-key>-<sequence>`, e.g. `ENG-123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TicketId {
    raw: String,
}

impl TicketId {
    /// Parse the trigger argument. Surrounding whitespace is ignored; an empty
    /// argument is a usage error, anything else not matching the format is a
    /// format error.
    pub fn parse(input: &str) -> Result<Self, InputError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(InputError::Missing);
        }
        if !is_valid_ticket_id(trimmed) {
            return Err(InputError::Malformed(trimmed.to_string()));
        }
        Ok(Self {
            raw: trimmed.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Strict format check: `[A-Za-z0-9]+-[0-9]+`, nothing else.
pub fn is_valid_ticket_id(s: &str) -> bool {
    TICKET_ID_REGEX.is_match(s)
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for TicketId {
    type Error = InputError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TicketId> for String {
    fn from(id: TicketId) -> Self {
        id.raw
    }
}

/// Ticket metadata as returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub identifier: TicketId,
    /// Opaque tracker id, used when addressing the ticket directly.
    pub internal_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub state: String,
    pub team: String,
    #[serde(default)]
    pub assignee: Option<String>,
}

/// A prior discussion entry on the ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub body: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}
