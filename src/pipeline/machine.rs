//! The run state machine.
//!
//! `RunMachine` owns the run state for one ticket and decides what happens
//! after every phase. It performs no I/O: each step returns a [`Transition`]
//! holding the progress documents to emit, in order, and either the next step
//! to run or the finished [`RunReport`]. The async driver in
//! `orchestrator` executes both.

use thiserror::Error;
use uuid::Uuid;

use super::prompts;
use super::role::{PhaseKey, Role};
use super::verdict::{Verdict, parse_verdict};
use crate::report::{
    PhaseResult, RunReport, RunStatus, render_failure_document, render_phase_document,
};
use crate::runner::{StepOutput, StepRequest};
use crate::ticket::{Comment, Ticket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Context fetched, no step issued yet.
    Idle,
    Investigating,
    Planning,
    Implementing(u32),
    Reviewing(u32),
    Reporting,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Cap on implement/review pairs.
    pub max_iterations: u32,
    /// Character budget for output excerpts in progress documents.
    pub output_excerpt_chars: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            output_excerpt_chars: 3000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Phase,
    Failure,
    PartialFailure,
    Summary,
}

/// A markdown progress document bound for the ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub kind: DocumentKind,
    /// Human label, used when logging delivery failures.
    pub label: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    PostProgress(Document),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    Run(StepRequest),
    Finish(RunReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub effects: Vec<Effect>,
    pub next: Next,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("run already started")]
    AlreadyStarted,
    #[error("run has not started")]
    NotStarted,
    #[error("run already finished")]
    Finished,
}

pub struct RunMachine {
    run_id: Uuid,
    ticket: Ticket,
    comments: Vec<Comment>,
    settings: PipelineSettings,
    stage: Stage,
    iteration: u32,
    /// Set once by the planner; never regenerated.
    plan: Option<String>,
    worker_output: String,
    feedback: Option<String>,
    history: Vec<PhaseResult>,
}

impl RunMachine {
    pub fn new(
        run_id: Uuid,
        ticket: Ticket,
        comments: Vec<Comment>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            run_id,
            ticket,
            comments,
            settings: PipelineSettings {
                max_iterations: settings.max_iterations.max(1),
                ..settings
            },
            stage: Stage::Idle,
            iteration: 0,
            plan: None,
            worker_output: String::new(),
            feedback: None,
            history: Vec::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    pub fn plan(&self) -> Option<&str> {
        self.plan.as_deref()
    }

    /// Phase currently waiting on a step result.
    pub fn current_phase(&self) -> Option<PhaseKey> {
        match self.stage {
            Stage::Investigating => Some(PhaseKey::new(Role::Scout, 1)),
            Stage::Planning => Some(PhaseKey::new(Role::Planner, 1)),
            Stage::Implementing(i) => Some(PhaseKey::new(Role::Worker, i)),
            Stage::Reviewing(i) => Some(PhaseKey::new(Role::Reviewer, i)),
            Stage::Idle | Stage::Reporting | Stage::Done => None,
        }
    }

    /// Issue the investigation step.
    pub fn begin(&mut self) -> Result<Transition, StageError> {
        if self.stage != Stage::Idle {
            return Err(StageError::AlreadyStarted);
        }
        self.stage = Stage::Investigating;
        let prompt = prompts::scout_prompt(&self.ticket, &self.comments);
        Ok(self.run(Role::Scout, 1, prompt, Vec::new()))
    }

    /// Record the result of the current step and decide what comes next.
    pub fn advance(&mut self, step: StepOutput) -> Result<Transition, StageError> {
        let key = match self.stage {
            Stage::Idle => return Err(StageError::NotStarted),
            Stage::Reporting | Stage::Done => return Err(StageError::Finished),
            _ => self.current_phase().ok_or(StageError::Finished)?,
        };

        let phase = PhaseResult::from_step(key, step);
        self.history.push(phase.clone());

        if !phase.succeeded() {
            return Ok(self.fail(&phase));
        }

        let effects = vec![Effect::PostProgress(Document {
            kind: DocumentKind::Phase,
            label: key.label(),
            body: render_phase_document(&phase, self.settings.output_excerpt_chars),
        })];

        let transition = match self.stage {
            Stage::Investigating => {
                self.stage = Stage::Planning;
                let prompt = prompts::planner_prompt(&self.ticket, &phase.output);
                self.run(Role::Planner, 1, prompt, effects)
            }
            Stage::Planning => {
                self.plan = Some(phase.output);
                self.start_iteration(1, effects)
            }
            Stage::Implementing(i) => {
                self.worker_output = phase.output;
                self.stage = Stage::Reviewing(i);
                let prompt = prompts::reviewer_prompt(
                    &self.ticket,
                    self.plan.as_deref().unwrap_or_default(),
                    &self.worker_output,
                    i,
                    self.settings.max_iterations,
                );
                self.run(Role::Reviewer, i, prompt, effects)
            }
            Stage::Reviewing(i) => match parse_verdict(&phase.output) {
                Verdict::Approved => self.finish(RunStatus::Approved, effects),
                verdict if i >= self.settings.max_iterations => {
                    self.finish(RunStatus::Incomplete(verdict), effects)
                }
                _ => {
                    self.feedback = Some(phase.output);
                    self.start_iteration(i + 1, effects)
                }
            },
            Stage::Idle | Stage::Reporting | Stage::Done => return Err(StageError::Finished),
        };
        Ok(transition)
    }

    /// Called by the driver once the final effects have been delivered.
    pub fn mark_done(&mut self) {
        if self.stage == Stage::Reporting {
            self.stage = Stage::Done;
        }
    }

    fn start_iteration(&mut self, iteration: u32, effects: Vec<Effect>) -> Transition {
        self.iteration = iteration;
        self.stage = Stage::Implementing(iteration);
        let prompt = prompts::worker_prompt(
            &self.ticket,
            self.plan.as_deref().unwrap_or_default(),
            iteration,
            self.feedback.as_deref(),
        );
        self.run(Role::Worker, iteration, prompt, effects)
    }

    fn run(&self, role: Role, iteration: u32, prompt: String, effects: Vec<Effect>) -> Transition {
        Transition {
            effects,
            next: Next::Run(StepRequest {
                role,
                iteration,
                prompt,
            }),
        }
    }

    fn fail(&mut self, phase: &PhaseResult) -> Transition {
        let partial = phase.key.role.is_looped();
        let mut effects = vec![Effect::PostProgress(Document {
            kind: DocumentKind::Failure,
            label: phase.key.label(),
            body: render_failure_document(phase, self.settings.output_excerpt_chars),
        })];

        let report = self.report(RunStatus::Failed {
            phase: phase.key,
            reason: phase.failure_reason(),
            partial,
        });
        // A loop failure gets its own summary and suppresses the generic one.
        let (kind, body) = if partial {
            (DocumentKind::PartialFailure, report.render_partial_failure())
        } else {
            (DocumentKind::Summary, report.render_summary())
        };
        effects.push(Effect::PostProgress(Document {
            kind,
            label: "Run summary".to_string(),
            body,
        }));

        self.stage = Stage::Reporting;
        Transition {
            effects,
            next: Next::Finish(report),
        }
    }

    fn finish(&mut self, status: RunStatus, mut effects: Vec<Effect>) -> Transition {
        let report = self.report(status);
        effects.push(Effect::PostProgress(Document {
            kind: DocumentKind::Summary,
            label: "Run summary".to_string(),
            body: report.render_summary(),
        }));
        self.stage = Stage::Reporting;
        Transition {
            effects,
            next: Next::Finish(report),
        }
    }

    fn report(&self, status: RunStatus) -> RunReport {
        RunReport {
            run_id: self.run_id,
            ticket: self.ticket.identifier.clone(),
            title: self.ticket.title.clone(),
            status,
            iterations: self.iteration,
            max_iterations: self.settings.max_iterations,
            phases: self.history.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::TicketId;
    use std::time::Duration;

    fn ticket() -> Ticket {
        Ticket {
            identifier: TicketId::parse("ENG-42").unwrap(),
            internal_id: "uuid-42".into(),
            title: "Fix login redirect".into(),
            description: "Users land on /404 after login.".into(),
            state: "Todo".into(),
            team: "Engineering".into(),
            assignee: Some("ann".into()),
        }
    }

    fn machine() -> RunMachine {
        RunMachine::new(Uuid::nil(), ticket(), Vec::new(), PipelineSettings::default())
    }

    fn ok(text: &str) -> StepOutput {
        StepOutput::success(text, 0.1, Duration::from_secs(2))
    }

    fn expect_run(t: &Transition) -> &StepRequest {
        match &t.next {
            Next::Run(req) => req,
            Next::Finish(r) => panic!("expected another step, run finished: {:?}", r.status),
        }
    }

    fn expect_finish(t: Transition) -> RunReport {
        match t.next {
            Next::Finish(report) => report,
            Next::Run(req) => panic!("expected finish, got {:?}", req.role),
        }
    }

    fn kinds(t: &Transition) -> Vec<DocumentKind> {
        t.effects
            .iter()
            .map(|Effect::PostProgress(doc)| doc.kind)
            .collect()
    }

    /// Drive scout and planner to the start of the loop.
    fn to_loop(m: &mut RunMachine) -> Transition {
        m.begin().unwrap();
        m.advance(ok("investigation notes")).unwrap();
        m.advance(ok("1. change redirect\n2. add test")).unwrap()
    }

    #[test]
    fn test_begin_issues_scout_without_effects() {
        let mut m = machine();
        let t = m.begin().unwrap();
        assert!(t.effects.is_empty());
        let req = expect_run(&t);
        assert_eq!(req.role, Role::Scout);
        assert!(req.prompt.contains("ENG-42"));
        assert_eq!(m.stage(), Stage::Investigating);
        assert_eq!(m.begin(), Err(StageError::AlreadyStarted));
    }

    #[test]
    fn test_advance_before_begin_is_rejected() {
        let mut m = machine();
        assert_eq!(m.advance(ok("x")).unwrap_err(), StageError::NotStarted);
    }

    #[test]
    fn test_approved_first_iteration() {
        let mut m = machine();
        m.begin().unwrap();

        let t = m.advance(ok("investigation notes")).unwrap();
        assert_eq!(kinds(&t), vec![DocumentKind::Phase]);
        let req = expect_run(&t);
        assert_eq!(req.role, Role::Planner);
        assert!(req.prompt.contains("investigation notes"));

        let t = m.advance(ok("THE PLAN")).unwrap();
        let req = expect_run(&t);
        assert_eq!((req.role, req.iteration), (Role::Worker, 1));
        assert!(req.prompt.contains("THE PLAN"));
        assert_eq!(m.plan(), Some("THE PLAN"));

        let t = m.advance(ok("implemented")).unwrap();
        let req = expect_run(&t);
        assert_eq!((req.role, req.iteration), (Role::Reviewer, 1));
        assert!(req.prompt.contains("implemented"));
        assert!(req.prompt.contains("THE PLAN"));

        let t = m.advance(ok("Looks right.\nVERDICT: APPROVED")).unwrap();
        assert_eq!(kinds(&t), vec![DocumentKind::Phase, DocumentKind::Summary]);
        let report = expect_finish(t);
        assert_eq!(report.status, RunStatus::Approved);
        assert_eq!(report.iterations, 1);
        let keys: Vec<String> = report.phases.iter().map(|p| p.key.to_string()).collect();
        assert_eq!(keys, ["scout", "planner", "worker-1", "reviewer-1"]);
        assert_eq!(m.stage(), Stage::Reporting);

        m.mark_done();
        assert_eq!(m.stage(), Stage::Done);
        assert_eq!(m.advance(ok("late")).unwrap_err(), StageError::Finished);
    }

    #[test]
    fn test_needs_work_feeds_back_and_keeps_plan() {
        let mut m = machine();
        to_loop(&mut m);
        m.advance(ok("first attempt")).unwrap();
        let t = m
            .advance(ok("Missing logout test.\nVERDICT: NEEDS_WORK"))
            .unwrap();
        let req = expect_run(&t);
        assert_eq!((req.role, req.iteration), (Role::Worker, 2));
        assert!(req.prompt.contains("Missing logout test."));
        assert!(req.prompt.contains("1. change redirect"));
        assert_eq!(m.iteration(), 2);
        assert_eq!(m.plan(), Some("1. change redirect\n2. add test"));
    }

    #[test]
    fn test_approval_on_third_iteration() {
        let mut m = machine();
        to_loop(&mut m);
        for _ in 0..2 {
            m.advance(ok("work")).unwrap();
            m.advance(ok("VERDICT: NEEDS_WORK")).unwrap();
        }
        m.advance(ok("work")).unwrap();
        let report = expect_finish(m.advance(ok("VERDICT: APPROVED")).unwrap());
        assert_eq!(report.status, RunStatus::Approved);
        assert_eq!(report.iterations, 3);
        assert_eq!(report.phases.len(), 8);
    }

    #[test]
    fn test_cap_reached_without_verdict_is_incomplete() {
        let mut m = machine();
        to_loop(&mut m);
        let mut last = None;
        for i in 1..=3 {
            let t = m.advance(ok("work")).unwrap();
            assert_eq!(expect_run(&t).iteration, i);
            last = Some(m.advance(ok("I have some thoughts.")).unwrap());
        }
        let report = expect_finish(last.unwrap());
        assert_eq!(report.status, RunStatus::Incomplete(Verdict::Unresolved));
        assert_eq!(report.iterations, 3);
        assert_eq!(report.phases.len(), 8);
    }

    #[test]
    fn test_cap_reached_with_needs_work() {
        let settings = PipelineSettings {
            max_iterations: 1,
            ..PipelineSettings::default()
        };
        let mut m = RunMachine::new(Uuid::nil(), ticket(), Vec::new(), settings);
        to_loop(&mut m);
        m.advance(ok("work")).unwrap();
        let report = expect_finish(m.advance(ok("VERDICT: NEEDS_WORK")).unwrap());
        assert_eq!(report.status, RunStatus::Incomplete(Verdict::NeedsWork));
        assert_eq!(report.iterations, 1);
    }

    #[test]
    fn test_scout_failure_emits_failure_and_generic_summary() {
        let mut m = machine();
        m.begin().unwrap();
        let t = m
            .advance(StepOutput::failure(1, "rate limited", Duration::from_secs(1)))
            .unwrap();
        assert_eq!(kinds(&t), vec![DocumentKind::Failure, DocumentKind::Summary]);
        let report = expect_finish(t);
        assert_eq!(report.iterations, 0);
        assert_eq!(report.phases.len(), 1);
        match report.status {
            RunStatus::Failed {
                phase,
                reason,
                partial,
            } => {
                assert_eq!(phase, PhaseKey::new(Role::Scout, 1));
                assert_eq!(reason, "rate limited");
                assert!(!partial);
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn test_planner_failure_never_sets_plan() {
        let mut m = machine();
        m.begin().unwrap();
        m.advance(ok("notes")).unwrap();
        let report = expect_finish(
            m.advance(StepOutput::failure(2, "boom", Duration::ZERO))
                .unwrap(),
        );
        assert!(m.plan().is_none());
        assert!(matches!(report.status, RunStatus::Failed { partial: false, .. }));
    }

    #[test]
    fn test_worker_failure_on_second_iteration_is_partial() {
        let mut m = machine();
        to_loop(&mut m);
        m.advance(ok("work")).unwrap();
        m.advance(ok("VERDICT: NEEDS_WORK")).unwrap();
        let t = m
            .advance(StepOutput::failure(1, "crashed", Duration::ZERO))
            .unwrap();
        let docs = kinds(&t);
        assert_eq!(docs, vec![DocumentKind::Failure, DocumentKind::PartialFailure]);
        assert!(!docs.contains(&DocumentKind::Summary));
        let report = expect_finish(t);
        assert_eq!(report.iterations, 2);
        assert_eq!(report.phases.len(), 5);
        assert!(matches!(report.status, RunStatus::Failed { partial: true, .. }));
    }

    #[test]
    fn test_nonzero_exit_fails_even_with_output() {
        let mut m = machine();
        to_loop(&mut m);
        m.advance(ok("work")).unwrap();
        let step = StepOutput {
            exit_status: 137,
            ..ok("VERDICT: APPROVED")
        };
        let report = expect_finish(m.advance(step).unwrap());
        assert!(matches!(
            report.status,
            RunStatus::Failed { partial: true, .. }
        ));
    }

    #[test]
    fn test_zero_cap_is_clamped_to_one_pair() {
        let settings = PipelineSettings {
            max_iterations: 0,
            ..PipelineSettings::default()
        };
        let mut m = RunMachine::new(Uuid::nil(), ticket(), Vec::new(), settings);
        let t = to_loop(&mut m);
        assert_eq!(expect_run(&t).role, Role::Worker);
        m.advance(ok("work")).unwrap();
        let report = expect_finish(m.advance(ok("nope")).unwrap());
        assert_eq!(report.iterations, 1);
    }
}
