use super::*;
use crate::gateway::{ModelCallError, ModelRequest};
use async_trait::async_trait;
use shared::{domain::TransformMode, protocol::GenerateContentResponse};
use std::{
    collections::VecDeque,
    sync::{atomic::AtomicUsize, Mutex as StdMutex},
};
use tokio::sync::{mpsc, oneshot};

type Reply = Result<GenerateContentResponse, ModelCallError>;

fn text(raw: &str) -> Reply {
    Ok(GenerateContentResponse::from_text(raw))
}

/// Answers each call with the next queued reply.
struct ScriptedGateway {
    replies: StdMutex<VecDeque<Reply>>,
    requests: StdMutex<Vec<ModelRequest>>,
    calls: AtomicUsize,
}

impl ScriptedGateway {
    fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: StdMutex::new(replies.into_iter().collect()),
            requests: StdMutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn generate(&self, request: ModelRequest) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("requests").push(request);
        self.replies
            .lock()
            .expect("replies")
            .pop_front()
            .unwrap_or_else(|| Err(ModelCallError::transport("no scripted reply left")))
    }
}

/// Each call announces itself on `entered` and then waits for the next gate.
struct GatedGateway {
    gates: StdMutex<VecDeque<oneshot::Receiver<Reply>>>,
    entered: mpsc::UnboundedSender<()>,
    calls: AtomicUsize,
}

impl GatedGateway {
    fn new(
        gate_count: usize,
    ) -> (
        Arc<Self>,
        Vec<oneshot::Sender<Reply>>,
        mpsc::UnboundedReceiver<()>,
    ) {
        let (entered, entered_rx) = mpsc::unbounded_channel();
        let mut senders = Vec::new();
        let mut gates = VecDeque::new();
        for _ in 0..gate_count {
            let (tx, rx) = oneshot::channel();
            senders.push(tx);
            gates.push_back(rx);
        }
        let gateway = Arc::new(Self {
            gates: StdMutex::new(gates),
            entered,
            calls: AtomicUsize::new(0),
        });
        (gateway, senders, entered_rx)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelGateway for GatedGateway {
    async fn generate(&self, _request: ModelRequest) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().expect("gates").pop_front();
        let _ = self.entered.send(());
        match gate {
            Some(gate) => gate
                .await
                .unwrap_or_else(|_| Err(ModelCallError::transport("gate dropped"))),
            None => Err(ModelCallError::transport("no gate left")),
        }
    }
}

struct PanickingGateway;

#[async_trait]
impl ModelGateway for PanickingGateway {
    async fn generate(&self, _request: ModelRequest) -> Reply {
        panic!("model backend crashed");
    }
}

struct HangingGateway;

#[async_trait]
impl ModelGateway for HangingGateway {
    async fn generate(&self, _request: ModelRequest) -> Reply {
        std::future::pending::<Reply>().await
    }
}

#[derive(Default)]
struct FakeCapture {
    unavailable: bool,
    started: StdMutex<Vec<CaptureTarget>>,
    stops: AtomicUsize,
}

impl SpeechCapture for FakeCapture {
    fn is_available(&self) -> bool {
        !self.unavailable
    }

    fn start(&self, target: CaptureTarget) -> anyhow::Result<()> {
        self.started.lock().expect("started").push(target);
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn controller_with_capture(capture: Arc<FakeCapture>) -> Arc<SessionController> {
    SessionController::new_with_dependencies(
        ScriptedGateway::new([]),
        capture,
        SessionConfig::default(),
    )
}

async fn started_controller(gateway: Arc<ScriptedGateway>) -> Arc<SessionController> {
    let controller = SessionController::new(gateway);
    assert_eq!(
        controller
            .submit_initial("x squared plus y squared equals r squared")
            .await,
        SubmitOutcome::Applied
    );
    controller
}

#[tokio::test]
async fn initial_conversion_records_normalized_equation() {
    let gateway = ScriptedGateway::new([text("\\(x^2+y^2=r^2\\)")]);
    let controller = started_controller(gateway.clone()).await;

    assert_eq!(
        controller.steps().await,
        vec![Step::new(
            "x^2+y^2=r^2",
            "x squared plus y squared equals r squared"
        )]
    );
    assert_eq!(controller.phase().await, SessionPhase::IdleNonEmpty);

    let requests = gateway.requests.lock().expect("requests");
    assert_eq!(requests[0].mode, TransformMode::Initial);
    assert!(requests[0]
        .prompt
        .contains("x squared plus y squared equals r squared"));
}

#[tokio::test]
async fn refinement_appends_step_with_command() {
    let gateway = ScriptedGateway::new([
        text("\\(x^2+y^2=r^2\\)"),
        text("$x^2 = r^2 - y^2$"),
    ]);
    let controller = started_controller(gateway.clone()).await;

    let outcome = controller
        .submit_command("subtract y squared from both sides")
        .await;
    assert_eq!(outcome, SubmitOutcome::Applied);

    let steps = controller.steps().await;
    assert_eq!(steps.len(), 2);
    assert_eq!(
        steps[1],
        Step::new("x^2 = r^2 - y^2", "subtract y squared from both sides")
    );

    let requests = gateway.requests.lock().expect("requests");
    assert_eq!(requests[1].mode, TransformMode::Refine);
    assert!(requests[1].prompt.contains("Previous equation: \"x^2+y^2=r^2\""));
}

#[tokio::test]
async fn undo_directive_reverts_last_step() {
    let gateway = ScriptedGateway::new([
        text("\\(x^2+y^2=r^2\\)"),
        text("$x^2 = r^2 - y^2$"),
    ]);
    let controller = started_controller(gateway.clone()).await;
    controller
        .submit_command("subtract y squared from both sides")
        .await;

    let outcome = controller.submit_command("undo").await;
    assert_eq!(outcome, SubmitOutcome::Undone { removed: true });
    assert_eq!(
        controller.steps().await,
        vec![Step::new(
            "x^2+y^2=r^2",
            "x squared plus y squared equals r squared"
        )]
    );
    assert_eq!(gateway.calls(), 2);
}

#[tokio::test]
async fn failed_refinement_appends_placeholder() {
    let gateway = ScriptedGateway::new([
        text("\\(x^2+y^2=r^2\\)"),
        Err(ModelCallError {
            status: Some(500),
            body: "internal".to_string(),
        }),
    ]);
    let controller = started_controller(gateway).await;

    let outcome = controller
        .submit_command("subtract y squared from both sides")
        .await;
    assert_eq!(
        outcome,
        SubmitOutcome::Failed(TransformError::RequestFailed {
            status: Some(500),
            body: "internal".to_string(),
        })
    );

    let steps = controller.steps().await;
    assert_eq!(steps.len(), 2);
    assert_eq!(
        steps[1],
        Step::new(
            "Error: Could not compute. Please edit.",
            "subtract y squared from both sides"
        )
    );
    assert!(!controller.is_busy());
}

#[tokio::test]
async fn failed_initial_conversion_still_starts_derivation() {
    let gateway = ScriptedGateway::new([Ok(GenerateContentResponse::default())]);
    let controller = SessionController::new(gateway);

    let outcome = controller.submit_initial("something unparseable").await;
    assert_eq!(outcome, SubmitOutcome::Failed(TransformError::EmptyResult));
    assert_eq!(
        controller.steps().await,
        vec![Step::new(CONVERT_FAILURE_PLACEHOLDER, "something unparseable")]
    );
    assert_eq!(controller.phase().await, SessionPhase::IdleNonEmpty);
}

#[tokio::test]
async fn undo_substring_never_contacts_model() {
    let gateway = ScriptedGateway::new([text("a = b"), text("a - b = 0")]);
    let controller = started_controller(gateway.clone()).await;
    controller.submit_command("move b to the left").await;
    assert_eq!(gateway.calls(), 2);

    let outcome = controller.submit_command("  please Undo that ").await;
    assert_eq!(outcome, SubmitOutcome::Undone { removed: true });
    assert_eq!(gateway.calls(), 2);
    assert_eq!(controller.steps().await.len(), 1);

    let outcome = controller.submit_command("UNDO").await;
    assert_eq!(outcome, SubmitOutcome::Undone { removed: false });
    assert_eq!(controller.steps().await.len(), 1);
    assert_eq!(gateway.calls(), 2);
}

#[tokio::test]
async fn second_submission_while_busy_is_rejected() {
    let (gateway, mut gates, mut entered) = GatedGateway::new(2);
    let controller = SessionController::new(gateway.clone());

    let first_gate = gates.remove(0);
    first_gate.send(text("y = x")).expect("first gate");
    assert_eq!(controller.submit_initial("y equals x").await, SubmitOutcome::Applied);
    entered.recv().await.expect("first call entered");

    let pending = tokio::spawn({
        let controller = controller.clone();
        async move { controller.submit_command("double both sides").await }
    });
    entered.recv().await.expect("second call entered");
    assert_eq!(controller.phase().await, SessionPhase::Busy);

    assert_eq!(
        controller.submit_command("add one to both sides").await,
        SubmitOutcome::Busy
    );
    assert_eq!(
        controller.submit_initial("another equation").await,
        SubmitOutcome::Busy
    );
    assert_eq!(controller.steps().await.len(), 1);
    assert_eq!(gateway.calls(), 2);

    // Edits are independent of the busy gate.
    controller.edit_equation(0, "y=2x").await;

    let second_gate = gates.remove(0);
    second_gate.send(text("2y = 4x")).expect("second gate");
    assert_eq!(pending.await.expect("join"), SubmitOutcome::Applied);

    let steps = controller.steps().await;
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0], Step::new("y=2x", "y equals x"));
    assert_eq!(steps[1], Step::new("2y = 4x", "double both sides"));
    assert!(!controller.is_busy());
}

#[tokio::test]
async fn undo_directive_works_while_a_request_is_outstanding() {
    let (gateway, mut gates, mut entered) = GatedGateway::new(3);
    let controller = SessionController::new(gateway.clone());

    gates.remove(0).send(text("y = x")).expect("first gate");
    assert_eq!(controller.submit_initial("y equals x").await, SubmitOutcome::Applied);
    entered.recv().await.expect("first call entered");
    gates.remove(0).send(text("y = x + 1")).expect("second gate");
    assert_eq!(controller.submit_command("add one").await, SubmitOutcome::Applied);
    entered.recv().await.expect("second call entered");

    let pending = tokio::spawn({
        let controller = controller.clone();
        async move { controller.submit_command("double both sides").await }
    });
    entered.recv().await.expect("third call entered");
    assert_eq!(controller.phase().await, SessionPhase::Busy);

    assert_eq!(
        controller.submit_command("Undo").await,
        SubmitOutcome::Undone { removed: true }
    );
    assert_eq!(gateway.calls(), 3);
    assert_eq!(controller.steps().await, vec![Step::new("y = x", "y equals x")]);
    assert!(controller.is_busy());

    gates.remove(0).send(text("2y = 2x")).expect("third gate");
    assert_eq!(pending.await.expect("join"), SubmitOutcome::Applied);
    assert_eq!(
        controller.steps().await,
        vec![
            Step::new("y = x", "y equals x"),
            Step::new("2y = 2x", "double both sides"),
        ]
    );
    assert!(!controller.is_busy());
}

#[tokio::test]
async fn checked_edit_rejects_a_step_removed_by_undo() {
    let gateway = ScriptedGateway::new([text("y = x"), text("y = x + 1")]);
    let controller = started_controller(gateway).await;
    controller.submit_command("add one").await;
    assert_eq!(controller.steps().await.len(), 2);

    assert_eq!(
        controller.submit_command("undo that").await,
        SubmitOutcome::Undone { removed: true }
    );
    assert!(!controller.try_edit_equation(1, "x = 4").await);
    assert!(controller.try_edit_equation(0, "y = 3x").await);
    assert_eq!(controller.steps().await[0].equation, "y = 3x");
    assert_eq!(controller.steps().await.len(), 1);
}

#[tokio::test]
async fn edit_survives_later_append() {
    let gateway = ScriptedGateway::new([text("y = x"), text("y = x + 1")]);
    let controller = started_controller(gateway).await;

    controller.edit_equation(0, "y=2x").await;
    controller.submit_command("add one").await;

    let steps = controller.steps().await;
    assert_eq!(steps[0].equation, "y=2x");
    assert_eq!(steps[1].equation, "y = x + 1");
}

#[tokio::test]
async fn reset_during_request_discards_late_result() {
    let (gateway, mut gates, mut entered) = GatedGateway::new(1);
    let controller = SessionController::new(gateway);

    let pending = tokio::spawn({
        let controller = controller.clone();
        async move { controller.submit_initial("a equals b").await }
    });
    entered.recv().await.expect("call entered");

    controller.set_command_draft("half typed").await;
    controller.reset().await;
    gates.remove(0).send(text("a = b")).expect("gate");

    assert_eq!(pending.await.expect("join"), SubmitOutcome::Discarded);
    assert!(controller.steps().await.is_empty());
    assert_eq!(controller.drafts().await, PendingInput::default());
    assert_eq!(controller.phase().await, SessionPhase::IdleEmpty);
}

#[tokio::test]
async fn timed_out_request_records_placeholder_and_releases_busy() {
    let limit = Duration::from_millis(20);
    let controller = SessionController::new_with_dependencies(
        Arc::new(HangingGateway),
        Arc::new(MissingSpeechCapture),
        SessionConfig {
            request_timeout: Some(limit),
        },
    );

    let outcome = controller.submit_initial("x equals one").await;
    assert_eq!(outcome, SubmitOutcome::Failed(TransformError::TimedOut(limit)));
    assert_eq!(
        controller.steps().await[0].equation,
        CONVERT_FAILURE_PLACEHOLDER
    );
    assert!(!controller.is_busy());
}

#[tokio::test]
async fn panicking_gateway_does_not_leave_session_busy() {
    let controller = SessionController::new(Arc::new(PanickingGateway));

    let result = tokio::spawn({
        let controller = controller.clone();
        async move { controller.submit_initial("x equals one").await }
    })
    .await;
    assert!(result.expect_err("task must panic").is_panic());

    assert!(!controller.is_busy());
    assert_eq!(controller.phase().await, SessionPhase::IdleEmpty);
}

#[tokio::test]
async fn blank_and_out_of_order_submissions_are_rejected() {
    let gateway = ScriptedGateway::new([text("x = 1")]);
    let controller = SessionController::new(gateway.clone());

    assert_eq!(controller.submit_initial("   ").await, SubmitOutcome::Ignored);
    assert_eq!(controller.submit_command("").await, SubmitOutcome::Ignored);
    assert_eq!(
        controller.submit_command("square both sides").await,
        SubmitOutcome::NotStarted
    );
    assert_eq!(gateway.calls(), 0);

    assert_eq!(controller.submit_initial("x is one").await, SubmitOutcome::Applied);
    assert_eq!(
        controller.submit_initial("x is two").await,
        SubmitOutcome::AlreadyStarted
    );
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test]
async fn undo_button_keeps_first_step() {
    let gateway = ScriptedGateway::new([text("x = 1"), text("x + 1 = 2")]);
    let controller = started_controller(gateway).await;

    assert!(!controller.undo().await);
    controller.submit_command("add one").await;
    assert!(controller.undo().await);
    assert!(!controller.undo().await);
    assert_eq!(controller.steps().await.len(), 1);
}

#[tokio::test]
async fn draft_submission_clears_the_draft() {
    let gateway = ScriptedGateway::new([text("x = 1"), text("x^2 = 1")]);
    let controller = SessionController::new(gateway);

    controller.set_initial_draft("x is one").await;
    assert_eq!(controller.submit_initial_draft().await, SubmitOutcome::Applied);
    assert!(controller.drafts().await.initial.is_empty());

    controller.set_command_draft("square both sides").await;
    assert_eq!(controller.submit_command_draft().await, SubmitOutcome::Applied);
    assert!(controller.drafts().await.command.is_empty());
    assert_eq!(
        controller.steps().await[1],
        Step::new("x^2 = 1", "square both sides")
    );
}

#[tokio::test]
async fn dictation_without_capture_fails_visibly() {
    let controller = SessionController::new(ScriptedGateway::new([]));
    let mut events = controller.subscribe_events();

    let err = controller
        .start_dictation(CaptureTarget::Initial)
        .await
        .expect_err("must fail");
    assert_eq!(err, DictationError::Unavailable);
    assert_eq!(controller.capture_target().await, None);

    let event = events.recv().await.expect("event");
    assert_eq!(
        event,
        SessionEvent::Notice("Speech recognition is not available on this runtime.".to_string())
    );
}

#[tokio::test]
async fn transcript_fills_only_the_active_target() {
    let capture = Arc::new(FakeCapture::default());
    let controller = controller_with_capture(capture.clone());

    controller
        .start_dictation(CaptureTarget::Initial)
        .await
        .expect("start");
    controller
        .handle_capture_event(CaptureEvent::Transcript("x plus one".to_string()))
        .await;
    assert_eq!(controller.drafts().await.initial, "x plus one");
    assert!(controller.drafts().await.command.is_empty());

    controller
        .start_dictation(CaptureTarget::Command)
        .await
        .expect("retarget");
    assert_eq!(capture.stops.load(Ordering::SeqCst), 1);
    assert_eq!(
        *capture.started.lock().expect("started"),
        vec![CaptureTarget::Initial, CaptureTarget::Command]
    );

    controller
        .handle_capture_event(CaptureEvent::Transcript("square it".to_string()))
        .await;
    let drafts = controller.drafts().await;
    assert_eq!(drafts.initial, "x plus one");
    assert_eq!(drafts.command, "square it");

    controller.handle_capture_event(CaptureEvent::Ended).await;
    assert_eq!(controller.capture_target().await, None);
    controller
        .handle_capture_event(CaptureEvent::Transcript("late".to_string()))
        .await;
    assert_eq!(controller.drafts().await.command, "square it");
}

#[tokio::test]
async fn toggle_dictation_stops_when_listening() {
    let capture = Arc::new(FakeCapture::default());
    let controller = controller_with_capture(capture.clone());

    assert!(controller
        .toggle_dictation(CaptureTarget::Command)
        .await
        .expect("start"));
    assert_eq!(
        controller.capture_target().await,
        Some(CaptureTarget::Command)
    );
    assert!(!controller
        .toggle_dictation(CaptureTarget::Command)
        .await
        .expect("stop"));
    assert_eq!(controller.capture_target().await, None);
    assert_eq!(capture.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn capture_failure_clears_target() {
    let capture = Arc::new(FakeCapture::default());
    let controller = controller_with_capture(capture);

    controller
        .start_dictation(CaptureTarget::Initial)
        .await
        .expect("start");
    controller
        .handle_capture_event(CaptureEvent::Failed("no-speech".to_string()))
        .await;
    assert_eq!(controller.capture_target().await, None);
}

#[tokio::test]
async fn reset_cancels_capture_and_clears_drafts() {
    let capture = Arc::new(FakeCapture::default());
    let controller = controller_with_capture(capture.clone());

    controller.set_initial_draft("draft").await;
    controller
        .start_dictation(CaptureTarget::Initial)
        .await
        .expect("start");
    controller.reset().await;

    assert_eq!(controller.capture_target().await, None);
    assert_eq!(controller.drafts().await, PendingInput::default());
    assert_eq!(capture.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn submission_broadcasts_busy_transitions_and_history() {
    let gateway = ScriptedGateway::new([text("x = 1")]);
    let controller = SessionController::new(gateway);
    let mut events = controller.subscribe_events();

    controller.submit_initial("x is one").await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen.first(), Some(&SessionEvent::BusyChanged(true)));
    assert_eq!(seen.last(), Some(&SessionEvent::BusyChanged(false)));
    assert!(seen.contains(&SessionEvent::HistoryChanged(vec![Step::new(
        "x = 1", "x is one"
    )])));
}

#[tokio::test]
async fn out_of_order_submissions_do_not_toggle_busy() {
    let gateway = ScriptedGateway::new([text("x = 1")]);
    let controller = SessionController::new(gateway);
    let mut events = controller.subscribe_events();

    assert_eq!(
        controller.submit_command("square both sides").await,
        SubmitOutcome::NotStarted
    );
    assert!(events.try_recv().is_err());

    assert_eq!(controller.submit_initial("x is one").await, SubmitOutcome::Applied);
    while events.try_recv().is_ok() {}

    assert_eq!(
        controller.submit_initial("x is two").await,
        SubmitOutcome::AlreadyStarted
    );
    assert!(events.try_recv().is_err());
}
