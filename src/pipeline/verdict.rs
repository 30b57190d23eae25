//! Reviewer verdict extraction.
//!
//! The reviewer ends its output with `VERDICT: APPROVED` or
//! `VERDICT: NEEDS_WORK`. Matching is case-insensitive, tolerates any
//! whitespace after the colon and requires the token to be a whole word.
//! The first marker in the text decides.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static VERDICT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bVERDICT:\s*(APPROVED|NEEDS_WORK)\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    NeedsWork,
    /// No marker found in the reviewer output.
    Unresolved,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Approved => "approved",
            Verdict::NeedsWork => "needs_work",
            Verdict::Unresolved => "unresolved",
        }
    }

    /// Canonical marker text, if the verdict has one.
    pub fn marker(self) -> Option<&'static str> {
        match self {
            Verdict::Approved => Some("VERDICT: APPROVED"),
            Verdict::NeedsWork => Some("VERDICT: NEEDS_WORK"),
            Verdict::Unresolved => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn token_to_verdict(token: &str) -> Verdict {
    if token.eq_ignore_ascii_case("APPROVED") {
        Verdict::Approved
    } else {
        Verdict::NeedsWork
    }
}

/// Extract the verdict from free-form reviewer output. Never fails.
pub fn parse_verdict(text: &str) -> Verdict {
    VERDICT_REGEX
        .captures(text)
        .and_then(|cap| cap.get(1))
        .map(|m| token_to_verdict(m.as_str()))
        .unwrap_or(Verdict::Unresolved)
}

/// True when the text carries markers that disagree with each other.
pub fn has_conflicting_markers(text: &str) -> bool {
    let mut verdicts = VERDICT_REGEX
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .map(|m| token_to_verdict(m.as_str()));
    match verdicts.next() {
        Some(first) => verdicts.any(|v| v != first),
        None => false,
    }
}
