//! Prompt assembly for each role.
//!
//! Every builder is a pure function of its inputs: the same ticket, prior
//! output and iteration always render the same text.

use crate::ticket::{Comment, Ticket};

/// Render prior discussion as `author (date): body` entries separated by
/// blank lines, or `None` when there is no discussion.
pub fn format_comments(comments: &[Comment]) -> String {
    if comments.is_empty() {
        return "None".to_string();
    }
    comments
        .iter()
        .map(|c| {
            format!(
                "{} ({}): {}",
                c.author,
                c.created_at.format("%Y-%m-%d %H:%M UTC"),
                c.body.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn ticket_heading(ticket: &Ticket) -> String {
    format!("{}: {}", ticket.identifier, ticket.title)
}

fn description_or_placeholder(ticket: &Ticket) -> &str {
    let trimmed = ticket.description.trim();
    if trimmed.is_empty() {
        "(no description provided)"
    } else {
        trimmed
    }
}

pub fn scout_prompt(ticket: &Ticket, comments: &[Comment]) -> String {
    format!(
        r#"You are the SCOUT for ticket {heading}.

## TICKET
Identifier: {id}
Title: {title}
State: {state}
Team: {team}
Assignee: {assignee}

## DESCRIPTION
{description}

## PRIOR DISCUSSION
{comments}

## TASK
Investigate this ticket in the current repository. Do not change any files.
Report:
1. What the ticket is actually asking for
2. The files, modules and functions involved
3. Existing behaviour and any relevant tests
4. Risks, unknowns and constraints the implementer must respect
"#,
        heading = ticket_heading(ticket),
        id = ticket.identifier,
        title = ticket.title,
        state = ticket.state,
        team = ticket.team,
        assignee = ticket.assignee.as_deref().unwrap_or("Unassigned"),
        description = description_or_placeholder(ticket),
        comments = format_comments(comments),
    )
}

pub fn planner_prompt(ticket: &Ticket, investigation: &str) -> String {
    format!(
        r#"You are the PLANNER for ticket {heading}.

## DESCRIPTION
{description}

## INVESTIGATION
{investigation}

## TASK
Write a concrete, numbered implementation plan based on the investigation.
Each step names the files to change and what to change in them, and the plan
ends with how the result will be verified (tests to add or run).
Do not change any files.
"#,
        heading = ticket_heading(ticket),
        description = description_or_placeholder(ticket),
        investigation = investigation,
    )
}

/// Worker prompt. Iteration 1 executes the whole plan; later iterations only
/// address the reviewer's feedback.
pub fn worker_prompt(
    ticket: &Ticket,
    plan: &str,
    iteration: u32,
    feedback: Option<&str>,
) -> String {
    if iteration <= 1 {
        return format!(
            r#"You are the WORKER for ticket {heading}.

## PLAN
{plan}

## TASK
This is iteration 1. Execute every step of the plan above in full.
Run the relevant tests and fix any failures before finishing.
Finish with a short summary of what you changed.
"#,
            heading = ticket_heading(ticket),
            plan = plan,
        );
    }

    format!(
        r#"You are the WORKER for ticket {heading}.

## PLAN
{plan}

## REVIEW FEEDBACK
{feedback}

## TASK
This is follow-up iteration #{iteration}. The plan has already been implemented.
Address only the issues raised in the review feedback above; do not redo work
that the reviewer did not flag. Run the relevant tests before finishing.
Finish with a short summary of what you changed.
"#,
        heading = ticket_heading(ticket),
        plan = plan,
        feedback = feedback
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or("(the reviewer gave no feedback text)"),
        iteration = iteration,
    )
}

pub fn reviewer_prompt(
    ticket: &Ticket,
    plan: &str,
    worker_output: &str,
    iteration: u32,
    max_iterations: u32,
) -> String {
    format!(
        r#"You are the REVIEWER for ticket {heading}.
Review round {iteration} of {max_iterations}.

## PLAN
{plan}

## WORKER REPORT
{worker_output}

## TASK
Inspect the changes in the repository against the plan and the ticket.
Check correctness, test coverage and anything the plan required but the
worker skipped. List every issue that must be fixed, most important first.

End your response with exactly one line containing the verdict marker:
VERDICT: APPROVED
or
VERDICT: NEEDS_WORK
"#,
        heading = ticket_heading(ticket),
        iteration = iteration,
        max_iterations = max_iterations,
        plan = plan,
        worker_output = worker_output,
    )
}
