//! Run history and the markdown documents posted to the tracker.
//!
//! A [`PhaseResult`] is recorded once per role invocation and never mutated.
//! [`RunReport`] aggregates them and renders the final summary; the
//! `render_*_document` functions render the per-phase progress documents.

use std::fmt::Write as _;
use std::time::Duration;
use uuid::Uuid;

use crate::pipeline::{PhaseKey, Role, Verdict, parse_verdict};
use crate::runner::StepOutput;
use crate::ticket::TicketId;
use crate::tracker::truncate_body;

pub const GLYPH_APPROVED: &str = "✅";
pub const GLYPH_NEEDS_WORK: &str = "⚠️";
pub const GLYPH_FAILED: &str = "❌";

/// One executed phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseResult {
    pub key: PhaseKey,
    pub output: String,
    pub exit_status: i32,
    pub duration: Duration,
    pub cost_usd: f64,
    pub error: Option<String>,
}

impl PhaseResult {
    pub fn from_step(key: PhaseKey, step: StepOutput) -> Self {
        Self {
            key,
            output: step.output,
            exit_status: step.exit_status,
            duration: step.duration,
            cost_usd: step.cost_usd,
            error: step.error,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_status == 0
    }

    /// Verdict carried by a reviewer phase; `None` for other roles.
    pub fn verdict(&self) -> Option<Verdict> {
        (self.key.role == Role::Reviewer).then(|| parse_verdict(&self.output))
    }

    /// Short failure reason for summaries.
    pub fn failure_reason(&self) -> String {
        match self.error.as_deref().map(str::trim) {
            Some(err) if !err.is_empty() => first_line(err).to_string(),
            _ => format!("exit status {}", self.exit_status),
        }
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Approved,
    /// Iteration cap reached without approval. Carries the last verdict.
    Incomplete(Verdict),
    Failed {
        phase: PhaseKey,
        reason: String,
        /// True when the failure happened inside the implement/review loop.
        partial: bool,
    },
}

impl RunStatus {
    pub fn glyph(&self) -> &'static str {
        match self {
            RunStatus::Approved => GLYPH_APPROVED,
            RunStatus::Incomplete(Verdict::NeedsWork) => GLYPH_NEEDS_WORK,
            RunStatus::Incomplete(_) | RunStatus::Failed { .. } => GLYPH_FAILED,
        }
    }

    pub fn label(&self) -> String {
        match self {
            RunStatus::Approved => "approved".to_string(),
            RunStatus::Incomplete(Verdict::NeedsWork) => "needs work".to_string(),
            RunStatus::Incomplete(_) => "incomplete: no verdict from reviewer".to_string(),
            RunStatus::Failed { phase, reason, .. } => {
                format!("failed at {}: {}", phase, reason)
            }
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, RunStatus::Approved)
    }
}

/// Aggregate of one `/assemble` run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub ticket: TicketId,
    pub title: String,
    pub status: RunStatus,
    /// Implement/review passes started (0 if the loop was never reached).
    pub iterations: u32,
    pub max_iterations: u32,
    pub phases: Vec<PhaseResult>,
}

impl RunReport {
    pub fn total_duration(&self) -> Duration {
        self.phases.iter().map(|p| p.duration).sum()
    }

    pub fn total_cost(&self) -> f64 {
        self.phases.iter().map(|p| p.cost_usd).sum()
    }

    /// Verdict of the most recent reviewer phase.
    pub fn last_verdict(&self) -> Option<Verdict> {
        self.phases.iter().rev().find_map(PhaseResult::verdict)
    }

    pub fn completed_phases(&self) -> usize {
        self.phases.iter().filter(|p| p.succeeded()).count()
    }

    /// 0 only for an approved run.
    pub fn exit_code(&self) -> i32 {
        if self.status.is_approved() { 0 } else { 1 }
    }

    /// One-line terminal notification.
    pub fn headline(&self) -> String {
        format!(
            "{} {} {} ({} iteration{}, {}, {})",
            self.status.glyph(),
            self.ticket,
            self.status.label(),
            self.iterations,
            if self.iterations == 1 { "" } else { "s" },
            format_duration(self.total_duration()),
            format_cost(self.total_cost()),
        )
    }

    /// Final summary document: status line, verdict, iterations and phase table.
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "## {} Assemble: {}",
            self.status.glyph(),
            self.status.label()
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "**Ticket:** {} {}", self.ticket, self.title);
        let _ = writeln!(
            out,
            "**Verdict:** {}",
            self.last_verdict()
                .map(|v| v.as_str())
                .unwrap_or("none")
        );
        let _ = writeln!(
            out,
            "**Iterations:** {} of {}",
            self.iterations, self.max_iterations
        );
        let _ = writeln!(out);
        self.write_phase_table(&mut out);
        let _ = writeln!(out);
        let _ = write!(out, "_Run {}_", self.run_id);
        out
    }

    /// Summary for a run aborted inside the implement/review loop.
    pub fn render_partial_failure(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## {} Assemble stopped early", GLYPH_FAILED);
        let _ = writeln!(out);
        let _ = writeln!(out, "**Ticket:** {} {}", self.ticket, self.title);
        let _ = writeln!(
            out,
            "**Completed:** {} of {} phases",
            self.completed_phases(),
            self.phases.len()
        );
        if let RunStatus::Failed { phase, reason, .. } = &self.status {
            let _ = writeln!(out, "**Failed phase:** {}", phase.label());
            let _ = writeln!(out, "**Reason:** {}", reason);
        }
        let _ = writeln!(
            out,
            "**Iterations:** {} of {}",
            self.iterations, self.max_iterations
        );
        let _ = writeln!(out);
        self.write_phase_table(&mut out);
        let _ = writeln!(out);
        let _ = write!(out, "_Run {}_", self.run_id);
        out
    }

    fn write_phase_table(&self, out: &mut String) {
        let _ = writeln!(out, "| Phase | Time | Cost | Result |");
        let _ = writeln!(out, "|---|---|---|---|");
        for phase in &self.phases {
            let result = if !phase.succeeded() {
                GLYPH_FAILED.to_string()
            } else {
                match phase.verdict() {
                    Some(Verdict::Approved) => format!("{} approved", GLYPH_APPROVED),
                    Some(Verdict::NeedsWork) => format!("{} needs work", GLYPH_NEEDS_WORK),
                    Some(Verdict::Unresolved) => format!("{} no verdict", GLYPH_FAILED),
                    None => GLYPH_APPROVED.to_string(),
                }
            };
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} |",
                phase.key,
                format_duration(phase.duration),
                format_cost(phase.cost_usd),
                result
            );
        }
        let _ = writeln!(
            out,
            "| **Total** | **{}** | **{}** | |",
            format_duration(self.total_duration()),
            format_cost(self.total_cost())
        );
    }
}

fn trailer(phase: &PhaseResult) -> String {
    format!(
        "_{} · {} · {}_",
        phase.key,
        format_duration(phase.duration),
        format_cost(phase.cost_usd)
    )
}

/// Progress document for a completed phase.
pub fn render_phase_document(phase: &PhaseResult, excerpt_chars: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## {} {}", phase.key.role.icon(), phase.key.label());
    let _ = writeln!(out);
    if let Some(verdict) = phase.verdict() {
        let _ = writeln!(out, "**Verdict:** {}", verdict);
        let _ = writeln!(out);
    }
    let body = phase.output.trim();
    if body.is_empty() {
        let _ = writeln!(out, "_(no output)_");
    } else {
        let _ = writeln!(out, "{}", truncate_body(body, excerpt_chars));
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "---");
    let _ = write!(out, "{}", trailer(phase));
    out
}

/// Error-specific progress document for a failed phase.
pub fn render_failure_document(phase: &PhaseResult, excerpt_chars: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## {} {} failed", GLYPH_FAILED, phase.key.label());
    let _ = writeln!(out);
    let _ = writeln!(out, "**Exit status:** {}", phase.exit_status);
    if let Some(err) = phase.error.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        let _ = writeln!(out);
        let _ = writeln!(out, "```");
        let _ = writeln!(out, "{}", truncate_body(err, excerpt_chars));
        let _ = writeln!(out, "```");
    }
    let partial = phase.output.trim();
    if !partial.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "**Partial output:**");
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", truncate_body(partial, excerpt_chars));
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "---");
    let _ = write!(out, "{}", trailer(phase));
    out
}

/// `45s`, `2m 5s`, `1h 3m`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

pub fn format_cost(usd: f64) -> String {
    format!("${:.2}", usd)
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(role: Role, iteration: u32, output: &str, exit_status: i32) -> PhaseResult {
        PhaseResult {
            key: PhaseKey::new(role, iteration),
            output: output.into(),
            exit_status,
            duration: Duration::from_secs(65),
            cost_usd: 0.25,
            error: (exit_status != 0).then(|| "agent crashed\nstack trace".to_string()),
        }
    }

    fn report(status: RunStatus, phases: Vec<PhaseResult>, iterations: u32) -> RunReport {
        RunReport {
            run_id: Uuid::nil(),
            ticket: TicketId::parse("ENG-42").unwrap(),
            title: "Fix login redirect".into(),
            status,
            iterations,
            max_iterations: 3,
            phases,
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3780)), "1h 3m");
    }

    #[test]
    fn test_format_cost() {
        assert_eq!(format_cost(0.0), "$0.00");
        assert_eq!(format_cost(1.234), "$1.23");
    }

    #[test]
    fn test_status_glyphs_and_labels() {
        assert_eq!(RunStatus::Approved.glyph(), GLYPH_APPROVED);
        assert_eq!(RunStatus::Incomplete(Verdict::NeedsWork).glyph(), GLYPH_NEEDS_WORK);
        assert_eq!(RunStatus::Incomplete(Verdict::Unresolved).glyph(), GLYPH_FAILED);
        assert_eq!(
            RunStatus::Incomplete(Verdict::Unresolved).label(),
            "incomplete: no verdict from reviewer"
        );
        let failed = RunStatus::Failed {
            phase: PhaseKey::new(Role::Worker, 2),
            reason: "boom".into(),
            partial: true,
        };
        assert_eq!(failed.glyph(), GLYPH_FAILED);
        assert_eq!(failed.label(), "failed at worker-2: boom");
    }

    #[test]
    fn test_totals_and_exit_code() {
        let r = report(
            RunStatus::Approved,
            vec![
                phase(Role::Scout, 1, "found it", 0),
                phase(Role::Planner, 1, "plan", 0),
            ],
            0,
        );
        assert_eq!(r.total_duration(), Duration::from_secs(130));
        assert!((r.total_cost() - 0.5).abs() < 1e-9);
        assert_eq!(r.exit_code(), 0);

        let incomplete = report(RunStatus::Incomplete(Verdict::NeedsWork), vec![], 3);
        assert_eq!(incomplete.exit_code(), 1);
    }

    #[test]
    fn test_last_verdict_uses_latest_review() {
        let r = report(
            RunStatus::Approved,
            vec![
                phase(Role::Reviewer, 1, "VERDICT: NEEDS_WORK", 0),
                phase(Role::Worker, 2, "fixed", 0),
                phase(Role::Reviewer, 2, "VERDICT: APPROVED", 0),
            ],
            2,
        );
        assert_eq!(r.last_verdict(), Some(Verdict::Approved));
    }

    #[test]
    fn test_render_summary_has_table_and_totals() {
        let r = report(
            RunStatus::Approved,
            vec![
                phase(Role::Scout, 1, "found it", 0),
                phase(Role::Planner, 1, "plan", 0),
                phase(Role::Worker, 1, "done", 0),
                phase(Role::Reviewer, 1, "LGTM\nVERDICT: APPROVED", 0),
            ],
            1,
        );
        let doc = r.render_summary();
        assert!(doc.starts_with("## ✅ Assemble: approved"));
        assert!(doc.contains("**Verdict:** approved"));
        assert!(doc.contains("**Iterations:** 1 of 3"));
        assert!(doc.contains("| scout | 1m 5s | $0.25 | ✅ |"));
        assert!(doc.contains("| reviewer-1 | 1m 5s | $0.25 | ✅ approved |"));
        assert!(doc.contains("| **Total** | **4m 20s** | **$1.00** | |"));
    }

    #[test]
    fn test_render_partial_failure_counts_phases() {
        let r = report(
            RunStatus::Failed {
                phase: PhaseKey::new(Role::Worker, 2),
                reason: "agent crashed".into(),
                partial: true,
            },
            vec![
                phase(Role::Scout, 1, "a", 0),
                phase(Role::Planner, 1, "b", 0),
                phase(Role::Worker, 1, "c", 0),
                phase(Role::Reviewer, 1, "VERDICT: NEEDS_WORK", 0),
                phase(Role::Worker, 2, "", 1),
            ],
            2,
        );
        let doc = r.render_partial_failure();
        assert!(doc.contains("**Completed:** 4 of 5 phases"));
        assert!(doc.contains("**Failed phase:** Implementation (iteration 2)"));
        assert!(doc.contains("**Reason:** agent crashed"));
        assert!(doc.contains("| worker-2 | 1m 5s | $0.25 | ❌ |"));
    }

    #[test]
    fn test_render_phase_document_truncates_and_has_trailer() {
        let p = phase(Role::Scout, 1, &"x".repeat(5000), 0);
        let doc = render_phase_document(&p, 200);
        assert!(doc.starts_with("## 🔍 Investigation"));
        assert!(doc.contains("… (truncated)"));
        assert!(doc.ends_with("_scout · 1m 5s · $0.25_"));
    }

    #[test]
    fn test_render_phase_document_shows_reviewer_verdict() {
        let p = phase(Role::Reviewer, 2, "Missing tests.\nVERDICT: NEEDS_WORK", 0);
        let doc = render_phase_document(&p, 3000);
        assert!(doc.contains("Review (iteration 2)"));
        assert!(doc.contains("**Verdict:** needs_work"));
        assert!(doc.contains("Missing tests."));
    }

    #[test]
    fn test_render_failure_document() {
        let p = phase(Role::Planner, 1, "", 2);
        let doc = render_failure_document(&p, 3000);
        assert!(doc.starts_with("## ❌ Plan failed"));
        assert!(doc.contains("**Exit status:** 2"));
        assert!(doc.contains("agent crashed"));
        assert!(!doc.contains("Partial output"));
    }

    #[test]
    fn test_failure_reason_falls_back_to_exit_status() {
        let mut p = phase(Role::Worker, 1, "", 4);
        assert_eq!(p.failure_reason(), "agent crashed");
        p.error = None;
        assert_eq!(p.failure_reason(), "exit status 4");
    }

    #[test]
    fn test_headline() {
        let r = report(RunStatus::Incomplete(Verdict::NeedsWork), vec![], 3);
        assert_eq!(r.headline(), "⚠️ ENG-42 needs work (3 iterations, 0s, $0.00)");
    }
}
