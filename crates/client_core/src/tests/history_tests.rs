use super::*;

fn started() -> StepHistory {
    let mut history = StepHistory::new();
    history.start(
        "\\(x^2+y^2=r^2\\)",
        "x squared plus y squared equals r squared",
    );
    history
}

#[test]
fn new_history_is_empty_mode() {
    let history = StepHistory::new();
    assert_eq!(history.mode(), HistoryMode::Empty);
    assert!(history.is_empty());
    assert!(!history.can_undo());
}

#[test]
fn start_normalizes_and_records_sentence() {
    let history = started();
    assert_eq!(history.mode(), HistoryMode::Editing);
    assert_eq!(
        history.steps(),
        &[Step::new(
            "x^2+y^2=r^2",
            "x squared plus y squared equals r squared"
        )]
    );
}

#[test]
fn undo_after_start_is_noop() {
    let mut history = started();
    assert!(!history.undo());
    assert_eq!(history.len(), 1);
}

#[test]
fn start_append_undo_restores_started_state() {
    let mut history = started();
    let snapshot = history.clone();

    history.append("$x^2 = r^2 - y^2$", "subtract y squared from both sides");
    assert_eq!(history.len(), 2);
    assert_eq!(
        history.last(),
        Some(&Step::new(
            "x^2 = r^2 - y^2",
            "subtract y squared from both sides"
        ))
    );

    assert!(history.undo());
    assert_eq!(history, snapshot);
}

#[test]
fn append_failure_keeps_placeholder_verbatim() {
    let mut history = started();
    history.append_failure("Error: Could not compute. Please edit.", "integrate");
    assert_eq!(
        history.last(),
        Some(&Step::new("Error: Could not compute. Please edit.", "integrate"))
    );
}

#[test]
fn edit_is_verbatim_and_survives_append() {
    let mut history = started();
    history.edit_equation(0, " $y=2x$ ");
    assert_eq!(history.steps()[0].equation, " $y=2x$ ");
    assert_eq!(
        history.steps()[0].command,
        "x squared plus y squared equals r squared"
    );

    history.append("y = 2x + 1", "add one");
    assert_eq!(history.steps()[0].equation, " $y=2x$ ");
    assert_eq!(history.len(), 2);
}

#[test]
fn start_failure_seeds_placeholder() {
    let mut history = StepHistory::new();
    history.start_failure("Error: Could not convert. Please type.", "gibberish");
    assert_eq!(history.len(), 1);
    assert_eq!(
        history.steps()[0].equation,
        "Error: Could not convert. Please type."
    );
}

#[test]
fn reset_clears_everything() {
    let mut history = started();
    history.append("a", "b");
    history.reset();
    assert!(history.is_empty());
    assert_eq!(history.mode(), HistoryMode::Empty);

    history.reset();
    assert!(history.is_empty());
}

#[test]
#[should_panic(expected = "out of range")]
fn edit_out_of_range_panics() {
    let mut history = started();
    history.edit_equation(1, "nope");
}

#[test]
#[should_panic(expected = "cannot start")]
fn start_on_started_history_panics() {
    let mut history = started();
    history.start("a", "b");
}

#[test]
#[should_panic(expected = "not been started")]
fn append_on_empty_history_panics() {
    let mut history = StepHistory::new();
    history.append("a", "b");
}

#[test]
fn undo_on_empty_history_is_noop() {
    let mut history = StepHistory::new();
    assert!(!history.undo());
}
