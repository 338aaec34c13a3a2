//! Ordered log of derivation steps.
//!
//! The history only ever grows at the tail, shrinks at the tail (undo) or is
//! cleared wholesale. The first step is the root of the derivation and is
//! never removed by undo.

use shared::domain::Step;

use crate::normalize::normalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    /// No equation has been stated yet.
    Empty,
    /// At least the initial step exists.
    Editing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepHistory {
    steps: Vec<Step>,
}

impl StepHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<&Step> {
        self.steps.last()
    }

    pub fn mode(&self) -> HistoryMode {
        if self.steps.is_empty() {
            HistoryMode::Empty
        } else {
            HistoryMode::Editing
        }
    }

    pub fn can_undo(&self) -> bool {
        self.steps.len() > 1
    }

    /// Seeds the derivation with the converted initial equation.
    ///
    /// Panics if the history already has steps.
    pub fn start(&mut self, initial_equation_raw: &str, user_sentence: impl Into<String>) {
        self.seed(Step::new(normalize(initial_equation_raw), user_sentence));
    }

    /// Seeds the derivation with a placeholder the user is expected to retype.
    ///
    /// Panics if the history already has steps.
    pub fn start_failure(&mut self, placeholder: impl Into<String>, user_sentence: impl Into<String>) {
        self.seed(Step::new(placeholder, user_sentence));
    }

    /// Panics if the history is empty.
    pub fn append(&mut self, new_equation_raw: &str, command: impl Into<String>) {
        self.push(Step::new(normalize(new_equation_raw), command));
    }

    /// Panics if the history is empty.
    pub fn append_failure(&mut self, placeholder: impl Into<String>, command: impl Into<String>) {
        self.push(Step::new(placeholder, command));
    }

    /// Removes the most recent step unless it is the only one.
    pub fn undo(&mut self) -> bool {
        if !self.can_undo() {
            return false;
        }
        self.steps.pop();
        true
    }

    /// Replaces the equation text of one step verbatim. The text is not
    /// normalized: user edits are taken literally.
    ///
    /// Panics if `index` is out of range.
    pub fn edit_equation(&mut self, index: usize, text: impl Into<String>) {
        let len = self.steps.len();
        assert!(
            index < len,
            "edit_equation index {index} out of range for history of length {len}"
        );
        self.steps[index].equation = text.into();
    }

    pub fn reset(&mut self) {
        self.steps.clear();
    }

    fn seed(&mut self, step: Step) {
        assert!(
            self.steps.is_empty(),
            "cannot start a derivation on a history with {} steps",
            self.steps.len()
        );
        self.steps.push(step);
    }

    fn push(&mut self, step: Step) {
        assert!(
            !self.steps.is_empty(),
            "cannot append to a derivation that has not been started"
        );
        self.steps.push(step);
    }
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
