//! The scout → planner → worker/reviewer pipeline.
//!
//! - `role`: the four roles and iteration-qualified phase keys
//! - `prompts`: pure prompt builders per role
//! - `verdict`: reviewer verdict extraction
//! - `machine`: effect-free run state machine
//! - `effects`: delivery of progress documents
//! - `orchestrator`: async driver tying the collaborators together

pub mod effects;
pub mod machine;
pub mod orchestrator;
pub mod prompts;
mod role;
mod verdict;

pub use effects::EffectHandler;
pub use machine::{
    Document, DocumentKind, Effect, Next, PipelineSettings, RunMachine, Stage, StageError,
    Transition,
};
pub use orchestrator::Orchestrator;
pub use role::{PhaseKey, Role};
pub use verdict::{Verdict, has_conflicting_markers, parse_verdict};
