use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::pipeline::{PhaseKey, Verdict};
use crate::report::{RunReport, RunStatus, format_cost, format_duration};
use crate::ticket::Ticket;
use crate::ui::icons::{CHECK, CROSS, SPARKLE, THINKING, TICKET, TOOL, WARN};

/// Terminal UI for a pipeline run, rendered via `indicatif`.
///
/// Two bars are stacked vertically:
/// - Phase bar: phases completed out of the most the run can take
/// - Step bar: spinner for the running step with live agent activity
///
/// Output lines are routed through `MultiProgress` so they never tear the bars.
pub struct PipelineUI {
    multi: MultiProgress,
    phase_bar: ProgressBar,
    step_bar: ProgressBar,
    verbose: bool,
}

impl PipelineUI {
    /// Sized for scout + planner + `max_iterations` implement/review pairs.
    pub fn new(max_iterations: u32, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let phase_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let total = 2 + 2 * u64::from(max_iterations.max(1));
        let phase_bar = multi.add(ProgressBar::new(total));
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix("Phases");

        let step_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");
        let step_bar = multi.add(ProgressBar::new_spinner());
        step_bar.set_style(step_style);

        Self {
            multi,
            phase_bar,
            step_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` when the bars
    /// are hidden (stderr is not a terminal) or drawing fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.is_hidden() || self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn print_header(&self, ticket: &Ticket) {
        self.print_line("");
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line(format!(
            "{}{} {}",
            TICKET,
            style(&ticket.identifier).yellow().bold(),
            ticket.title
        ));
        self.print_line(format!(
            "   {} {}  {} {}",
            style("State:").dim(),
            ticket.state,
            style("Team:").dim(),
            ticket.team
        ));
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line("");
    }

    /// Point the bars at the phase about to run and start the spinner.
    pub fn start_phase(&self, key: &PhaseKey) {
        self.phase_bar
            .set_message(format!("{} {}", key.role.icon(), key.label()));
        self.step_bar.set_prefix(key.to_string());
        self.step_bar
            .set_message(format!("{}", style("(starting...)").dim()));
        self.step_bar.enable_steady_tick(Duration::from_millis(100));
    }

    /// Short status from the step runner. Printed in verbose mode.
    pub fn log_step(&self, msg: &str) {
        self.step_bar
            .set_message(format!("{}", style(format!("({})", msg)).dim()));
        if self.verbose {
            self.print_line(format!("    {} {}", style("→").dim(), style(msg).dim()));
        }
    }

    pub fn update_elapsed(&self, elapsed: Duration) {
        self.step_bar.set_message(format!(
            "{}",
            style(format!("({})", format_duration(elapsed))).dim()
        ));
    }

    pub fn show_tool_use(&self, description: &str) {
        self.step_bar
            .set_message(format!("{}{}", TOOL, style(description).yellow()));
        self.print_line(format!("    {}{}", TOOL, style(description).yellow()));
    }

    pub fn show_thinking(&self, snippet: &str) {
        self.step_bar
            .set_message(format!("{}", style(format!("{}{}", THINKING, snippet)).dim()));
        if self.verbose {
            self.print_line(format!("    {}{}", THINKING, style(snippet).dim()));
        }
    }

    pub fn phase_complete(
        &self,
        key: &PhaseKey,
        duration: Duration,
        cost_usd: f64,
        verdict: Option<Verdict>,
    ) {
        self.phase_bar.inc(1);
        let verdict = match verdict {
            Some(Verdict::Approved) => format!(" {}", style("approved").green().bold()),
            Some(Verdict::NeedsWork) => format!(" {}", style("needs work").yellow().bold()),
            Some(Verdict::Unresolved) => format!(" {}", style("no verdict").red()),
            None => String::new(),
        };
        self.print_line(format!(
            "{}{} {}{}",
            CHECK,
            style(key.label()).green().bold(),
            style(format!(
                "({}, {})",
                format_duration(duration),
                format_cost(cost_usd)
            ))
            .dim(),
            verdict
        ));
    }

    pub fn phase_failed(&self, key: &PhaseKey, reason: &str) {
        self.print_line(format!(
            "{}{} failed: {}",
            CROSS,
            style(key.label()).red().bold(),
            reason
        ));
    }

    /// Tear down the bars and print the run's single terminal notification.
    pub fn finish(&self, report: &RunReport) {
        self.step_bar.finish_and_clear();
        self.phase_bar.finish_and_clear();
        let headline = report.headline();
        let line = match report.status {
            RunStatus::Approved => format!("{}{}", SPARKLE, style(headline).green().bold()),
            RunStatus::Incomplete(Verdict::NeedsWork) => {
                format!("{}{}", WARN, style(headline).yellow().bold())
            }
            _ => format!("{}", style(headline).red().bold()),
        };
        self.print_line("");
        self.print_line(line);
    }

    /// Remove the bars without a banner, for runs that abort with an error.
    pub fn clear(&self) {
        self.step_bar.finish_and_clear();
        self.phase_bar.finish_and_clear();
    }
}

/// Terminal notification for runs that abort before a report exists.
pub fn print_error_banner(message: &str) {
    eprintln!("{}{}", CROSS, style(message).red().bold());
}
