//! Line-oriented commands typed at the terminal prompt.

use client_core::{SubmitOutcome, TransformError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    /// Plain text: the initial sentence, or a command once a derivation exists.
    Submit(String),
    Undo,
    Reset,
    /// Zero-based step index.
    Edit { index: usize, equation: String },
    Show,
    Dictate,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

pub const HELP_TEXT: &str = "\
Type a sentence to start a derivation, then type commands to transform it.
  :undo              remove the most recent step
  :edit N EQUATION   replace the equation of step N
  :show              print the derivation
  :dictate           toggle speech capture
  :reset             start over
  :quit              exit";

pub fn parse_line(line: &str) -> ReplCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ReplCommand::Empty;
    }
    let Some(directive) = trimmed.strip_prefix(':') else {
        return ReplCommand::Submit(trimmed.to_string());
    };

    let (name, rest) = directive
        .split_once(char::is_whitespace)
        .map(|(name, rest)| (name, rest.trim()))
        .unwrap_or((directive, ""));
    match name.to_ascii_lowercase().as_str() {
        "undo" => ReplCommand::Undo,
        "reset" => ReplCommand::Reset,
        "show" => ReplCommand::Show,
        "dictate" | "mic" => ReplCommand::Dictate,
        "help" | "h" | "?" => ReplCommand::Help,
        "quit" | "q" | "exit" => ReplCommand::Quit,
        "edit" => parse_edit(rest).unwrap_or_else(|| ReplCommand::Unknown(trimmed.to_string())),
        _ => ReplCommand::Unknown(trimmed.to_string()),
    }
}

/// `N EQUATION` with `N` one-based as shown in the step table.
fn parse_edit(rest: &str) -> Option<ReplCommand> {
    let (number, equation) = rest.split_once(char::is_whitespace)?;
    let position = number.parse::<usize>().ok()?;
    let index = position.checked_sub(1)?;
    Some(ReplCommand::Edit {
        index,
        equation: equation.trim().to_string(),
    })
}

/// User-facing line for a submission result. `None` when the history
/// re-render already says everything.
pub fn describe_outcome(outcome: &SubmitOutcome) -> Option<String> {
    match outcome {
        SubmitOutcome::Applied | SubmitOutcome::Ignored => None,
        SubmitOutcome::Failed(TransformError::TimedOut(limit)) => Some(format!(
            "The model did not answer within {}s; a placeholder step was added.",
            limit.as_secs()
        )),
        SubmitOutcome::Failed(err) => Some(format!(
            "Transformation failed ({err}); a placeholder step was added."
        )),
        SubmitOutcome::Undone { removed: true } => None,
        SubmitOutcome::Undone { removed: false } => Some("Nothing to undo.".to_string()),
        SubmitOutcome::Busy => {
            Some("A transformation is already in progress; wait for it to finish.".to_string())
        }
        SubmitOutcome::NotStarted => Some("Enter an initial sentence first.".to_string()),
        SubmitOutcome::AlreadyStarted => {
            Some("A derivation is already in progress; use :reset to start over.".to_string())
        }
        SubmitOutcome::Discarded => {
            Some("The session was reset; the late result was discarded.".to_string())
        }
    }
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
