use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::effects::EffectHandler;
use super::machine::{Next, PipelineSettings, RunMachine};
use super::role::{PhaseKey, Role};
use super::verdict::{has_conflicting_markers, parse_verdict};
use crate::errors::AssembleError;
use crate::report::RunReport;
use crate::runner::{StepOutput, StepRequest, StepRunner};
use crate::ticket::TicketId;
use crate::tracker::{ProgressSink, TicketProvider};
use crate::ui::PipelineUI;

/// Drives one ticket through scout, planner and the implement/review loop.
///
/// Validation and context fetch happen here; every decision after that is
/// delegated to [`RunMachine`]. Steps run strictly one at a time and each
/// transition's effects are delivered before the next step starts.
pub struct Orchestrator {
    provider: Arc<dyn TicketProvider>,
    runner: Arc<dyn StepRunner>,
    effects: EffectHandler,
    settings: PipelineSettings,
    ui: Option<Arc<PipelineUI>>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn TicketProvider>,
        runner: Arc<dyn StepRunner>,
        sink: Arc<dyn ProgressSink>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            provider,
            runner,
            effects: EffectHandler::new(sink),
            settings,
            ui: None,
        }
    }

    pub fn with_ui(mut self, ui: Arc<PipelineUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    /// Run the pipeline for a raw ticket argument.
    ///
    /// Errors only for problems that prevent the pipeline from starting
    /// (bad input, ticket fetch failure). Phase failures come back as a
    /// report with a failed status.
    pub async fn run(&self, raw_ticket: &str) -> Result<RunReport, AssembleError> {
        let id = TicketId::parse(raw_ticket)?;

        tracing::info!(ticket = %id, "fetching ticket");
        let ticket = self
            .provider
            .fetch_ticket(&id)
            .await
            .map_err(AssembleError::Context)?;

        let comments = match self.provider.fetch_comments(&id).await {
            Ok(comments) => comments,
            Err(e) => {
                tracing::warn!(ticket = %id, error = %e, "could not fetch comments, continuing without them");
                Vec::new()
            }
        };
        tracing::info!(ticket = %id, title = %ticket.title, comments = comments.len(), "ticket loaded");

        if let Some(ref ui) = self.ui {
            ui.print_header(&ticket);
        }

        let mut machine = RunMachine::new(Uuid::new_v4(), ticket, comments, self.settings);
        let mut transition = machine.begin().map_err(anyhow::Error::from)?;

        loop {
            self.effects.apply(machine.ticket(), transition.effects).await;
            match transition.next {
                Next::Run(request) => {
                    let output = self.execute(&request).await;
                    transition = machine.advance(output).map_err(anyhow::Error::from)?;
                }
                Next::Finish(report) => {
                    machine.mark_done();
                    tracing::info!(
                        ticket = %report.ticket,
                        status = %report.status.label(),
                        iterations = report.iterations,
                        phases = report.phases.len(),
                        "run finished"
                    );
                    return Ok(report);
                }
            }
        }
    }

    /// Run one step. Runner errors become a failed step with exit status -1.
    async fn execute(&self, request: &StepRequest) -> StepOutput {
        let key = PhaseKey::new(request.role, request.iteration);
        tracing::info!(phase = %key, "phase started");
        if let Some(ref ui) = self.ui {
            ui.start_phase(&key);
        }

        let started = Instant::now();
        let output = match self.runner.run(request).await {
            Ok(output) => output,
            Err(e) => StepOutput::failure(-1, format!("{:#}", e), started.elapsed()),
        };

        tracing::info!(
            phase = %key,
            exit_status = output.exit_status,
            duration_secs = output.duration.as_secs_f64(),
            cost_usd = output.cost_usd,
            "phase finished"
        );

        let verdict = (request.role == Role::Reviewer).then(|| parse_verdict(&output.output));
        if verdict.is_some() && has_conflicting_markers(&output.output) {
            tracing::warn!(phase = %key, "reviewer output has conflicting verdict markers, using the first");
        }

        if let Some(ref ui) = self.ui {
            if output.succeeded() {
                ui.phase_complete(&key, output.duration, output.cost_usd, verdict);
            } else {
                let reason = output
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("exit status {}", output.exit_status));
                ui.phase_failed(&key, &reason);
            }
        }
        output
    }
}
