use serde::{Deserialize, Serialize};
use std::fmt;

/// The four fixed pipeline roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Investigates the ticket and surrounding code.
    Scout,
    /// Turns the investigation into a step-by-step plan.
    Planner,
    /// Implements the plan, or remediates review feedback.
    Worker,
    /// Reviews the implementation and emits a verdict.
    Reviewer,
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
            Role::Scout => "scout",
            Role::Planner => "planner",
            Role::Worker => "worker",
            Role::Reviewer => "reviewer",
        }
    }

    /// Human label used in progress documents.
    pub fn label(self) -> &'static str {
        match self {
            Role::Scout => "Investigation",
            Role::Planner => "Plan",
            Role::Worker => "Implementation",
            Role::Reviewer => "Review",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Role::Scout => "🔍",
            Role::Planner => "🗺️",
            Role::Worker => "🔨",
            Role::Reviewer => "🧐",
        }
    }

    /// Worker and reviewer run inside the implement/review loop.
    pub fn is_looped(self) -> bool {
        matches!(self, Role::Worker | Role::Reviewer)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifies one executed phase: the role, qualified by iteration inside the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhaseKey {
    pub role: Role,
    pub iteration: Option<u32>,
}

impl PhaseKey {
    pub fn new(role: Role, iteration: u32) -> Self {
        Self {
            role,
            iteration: role.is_looped().then_some(iteration),
        }
    }

    pub fn label(&self) -> String {
        match self.iteration {
            Some(i) => format!("{} (iteration {})", self.role.label(), i),
            None => self.role.label().to_string(),
        }
    }
}

impl fmt::Display for PhaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.iteration {
            Some(i) => write!(f, "{}-{}", self.role.name(), i),
            None => f.write_str(self.role.name()),
        }
    }
}
