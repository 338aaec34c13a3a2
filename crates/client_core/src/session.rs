//! Session controller: routes user intents to the step history and the
//! transformation client.
//!
//! At most one transformation is outstanding at a time. The busy flag is
//! claimed before the model call and released by [`BusyGuard`] when the
//! submission finishes, fails, panics or is dropped. The state lock is never
//! held across the model call, so edits, undo and reset stay responsive while
//! a request is in flight.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::domain::{CaptureTarget, Step};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    capture::{CaptureEvent, DictationError, MissingSpeechCapture, SpeechCapture},
    gateway::ModelGateway,
    history::{HistoryMode, StepHistory},
    transform::{TransformClient, TransformError, TransformRequest},
};

pub const CONVERT_FAILURE_PLACEHOLDER: &str = "Error: Could not convert. Please type.";
pub const COMPUTE_FAILURE_PLACEHOLDER: &str = "Error: Could not compute. Please edit.";

/// Any command containing this (case-insensitively) undoes locally.
/// Substring match: "redundo" triggers it too.
const UNDO_DIRECTIVE: &str = "undo";

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    IdleEmpty,
    IdleNonEmpty,
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The model answered and a step was recorded.
    Applied,
    /// The model call failed and a placeholder step was recorded.
    Failed(TransformError),
    /// The command was an undo directive and was handled locally.
    Undone { removed: bool },
    /// Blank input.
    Ignored,
    /// Another transformation is outstanding.
    Busy,
    /// A command was submitted before any equation exists.
    NotStarted,
    /// An initial equation was submitted after the derivation started.
    AlreadyStarted,
    /// The session was reset while the request was outstanding.
    Discarded,
}

/// Scratch text typed or dictated but not yet submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingInput {
    pub initial: String,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    HistoryChanged(Vec<Step>),
    BusyChanged(bool),
    DraftsChanged(PendingInput),
    CaptureChanged(Option<CaptureTarget>),
    Notice(String),
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Upper bound on a single model call. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
}

struct SessionState {
    history: StepHistory,
    drafts: PendingInput,
    capture_target: Option<CaptureTarget>,
    /// Bumped on reset so late completions from a discarded session are dropped.
    generation: u64,
}

pub struct SessionController {
    transformer: TransformClient,
    capture: Arc<dyn SpeechCapture>,
    config: SessionConfig,
    busy: AtomicBool,
    inner: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

struct BusyGuard<'a> {
    controller: &'a SessionController,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.controller.busy.store(false, Ordering::Release);
        self.controller.emit(SessionEvent::BusyChanged(false));
    }
}

impl SessionController {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Arc<Self> {
        Self::new_with_dependencies(
            gateway,
            Arc::new(MissingSpeechCapture),
            SessionConfig::default(),
        )
    }

    pub fn new_with_dependencies(
        gateway: Arc<dyn ModelGateway>,
        capture: Arc<dyn SpeechCapture>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            transformer: TransformClient::new(gateway),
            capture,
            config,
            busy: AtomicBool::new(false),
            inner: Mutex::new(SessionState {
                history: StepHistory::new(),
                drafts: PendingInput::default(),
                capture_target: None,
                generation: 0,
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn phase(&self) -> SessionPhase {
        if self.is_busy() {
            return SessionPhase::Busy;
        }
        match self.inner.lock().await.history.mode() {
            HistoryMode::Empty => SessionPhase::IdleEmpty,
            HistoryMode::Editing => SessionPhase::IdleNonEmpty,
        }
    }

    pub async fn steps(&self) -> Vec<Step> {
        self.inner.lock().await.history.steps().to_vec()
    }

    pub async fn drafts(&self) -> PendingInput {
        self.inner.lock().await.drafts.clone()
    }

    pub async fn capture_target(&self) -> Option<CaptureTarget> {
        self.inner.lock().await.capture_target
    }

    pub async fn set_initial_draft(&self, text: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.drafts.initial = text.into();
        self.emit(SessionEvent::DraftsChanged(inner.drafts.clone()));
    }

    pub async fn set_command_draft(&self, text: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.drafts.command = text.into();
        self.emit(SessionEvent::DraftsChanged(inner.drafts.clone()));
    }

    pub async fn submit_initial_draft(&self) -> SubmitOutcome {
        let sentence = self.inner.lock().await.drafts.initial.clone();
        self.submit_initial(&sentence).await
    }

    pub async fn submit_command_draft(&self) -> SubmitOutcome {
        let command = self.inner.lock().await.drafts.command.clone();
        self.submit_command(&command).await
    }

    /// Converts the user's opening sentence into the first step.
    pub async fn submit_initial(&self, sentence: &str) -> SubmitOutcome {
        if sentence.trim().is_empty() {
            return SubmitOutcome::Ignored;
        }
        // Checked again once busy is claimed; this early check keeps plain
        // rejections from flashing the busy state.
        if !self.inner.lock().await.history.is_empty() {
            return SubmitOutcome::AlreadyStarted;
        }
        let Some(_busy) = self.try_enter_busy() else {
            debug!("initial submission rejected while a transformation is outstanding");
            return SubmitOutcome::Busy;
        };

        let generation = {
            let inner = self.inner.lock().await;
            if !inner.history.is_empty() {
                return SubmitOutcome::AlreadyStarted;
            }
            inner.generation
        };

        info!(mode = "initial", "requesting transformation");
        let result = self
            .run_transform(TransformRequest::Initial {
                sentence: sentence.to_string(),
            })
            .await;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            info!("session was reset during initial conversion; dropping result");
            return SubmitOutcome::Discarded;
        }
        inner.drafts.initial.clear();
        let outcome = match result {
            Ok(raw) => {
                inner.history.start(&raw, sentence);
                SubmitOutcome::Applied
            }
            Err(err) => {
                warn!(%err, "initial conversion failed; recording placeholder step");
                inner
                    .history
                    .start_failure(CONVERT_FAILURE_PLACEHOLDER, sentence);
                SubmitOutcome::Failed(err)
            }
        };
        self.emit_state(&inner);
        outcome
    }

    /// Applies one command to the latest equation, or undoes locally when the
    /// command is an undo directive.
    pub async fn submit_command(&self, text: &str) -> SubmitOutcome {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return SubmitOutcome::Ignored;
        }

        if trimmed.to_lowercase().contains(UNDO_DIRECTIVE) {
            let mut inner = self.inner.lock().await;
            let removed = inner.history.undo();
            inner.drafts.command.clear();
            debug!(removed, "undo directive handled locally");
            self.emit_state(&inner);
            return SubmitOutcome::Undone { removed };
        }

        if self.inner.lock().await.history.is_empty() {
            return SubmitOutcome::NotStarted;
        }
        let Some(_busy) = self.try_enter_busy() else {
            debug!("command rejected while a transformation is outstanding");
            return SubmitOutcome::Busy;
        };

        let (generation, previous_equation) = {
            let inner = self.inner.lock().await;
            let Some(last) = inner.history.last() else {
                return SubmitOutcome::NotStarted;
            };
            (inner.generation, last.equation.clone())
        };

        info!(mode = "refine", "requesting transformation");
        let result = self
            .run_transform(TransformRequest::Refine {
                previous_equation,
                command: text.to_string(),
            })
            .await;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            info!("session was reset during refinement; dropping result");
            return SubmitOutcome::Discarded;
        }
        inner.drafts.command.clear();
        let outcome = match result {
            Ok(raw) => {
                inner.history.append(&raw, text);
                SubmitOutcome::Applied
            }
            Err(err) => {
                warn!(%err, "refinement failed; recording placeholder step");
                inner
                    .history
                    .append_failure(COMPUTE_FAILURE_PLACEHOLDER, text);
                SubmitOutcome::Failed(err)
            }
        };
        self.emit_state(&inner);
        outcome
    }

    pub async fn undo(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let removed = inner.history.undo();
        if removed {
            self.emit(SessionEvent::HistoryChanged(inner.history.steps().to_vec()));
        }
        removed
    }

    /// Replaces one step's equation verbatim. Allowed while a transformation
    /// is outstanding.
    ///
    /// Panics if `index` is out of range.
    pub async fn edit_equation(&self, index: usize, text: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.history.edit_equation(index, text);
        self.emit(SessionEvent::HistoryChanged(inner.history.steps().to_vec()));
    }

    /// Like [`Self::edit_equation`], but returns `false` instead of panicking
    /// when `index` no longer names a step.
    pub async fn try_edit_equation(&self, index: usize, text: impl Into<String>) -> bool {
        let mut inner = self.inner.lock().await;
        if index >= inner.history.len() {
            debug!(index, len = inner.history.len(), "edit rejected: no such step");
            return false;
        }
        inner.history.edit_equation(index, text);
        self.emit(SessionEvent::HistoryChanged(inner.history.steps().to_vec()));
        true
    }

    /// Start over: clears history and drafts and cancels any capture.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.history.reset();
        inner.drafts = PendingInput::default();
        inner.generation += 1;
        self.stop_active_capture(&mut inner);
        info!(generation = inner.generation, "session reset");
        self.emit_state(&inner);
    }

    /// Starts dictation into `target`, stopping any capture already running.
    pub async fn start_dictation(&self, target: CaptureTarget) -> Result<(), DictationError> {
        let mut inner = self.inner.lock().await;
        self.start_capture(&mut inner, target)
    }

    pub async fn stop_dictation(&self) -> Result<(), DictationError> {
        let mut inner = self.inner.lock().await;
        if inner.capture_target.take().is_none() {
            return Ok(());
        }
        self.emit(SessionEvent::CaptureChanged(None));
        self.capture
            .stop()
            .map_err(|err| DictationError::Capture(err.to_string()))
    }

    /// Microphone-button semantics: stops when listening, starts otherwise.
    /// Returns whether a capture is now active.
    pub async fn toggle_dictation(&self, target: CaptureTarget) -> Result<bool, DictationError> {
        let mut inner = self.inner.lock().await;
        if inner.capture_target.is_some() {
            self.stop_active_capture(&mut inner);
            return Ok(false);
        }
        self.start_capture(&mut inner, target)?;
        Ok(true)
    }

    pub async fn handle_capture_event(&self, event: CaptureEvent) {
        let mut inner = self.inner.lock().await;
        match event {
            CaptureEvent::Transcript(text) => match inner.capture_target {
                Some(CaptureTarget::Initial) => {
                    inner.drafts.initial = text;
                    self.emit(SessionEvent::DraftsChanged(inner.drafts.clone()));
                }
                Some(CaptureTarget::Command) => {
                    inner.drafts.command = text;
                    self.emit(SessionEvent::DraftsChanged(inner.drafts.clone()));
                }
                None => debug!("dropping transcript with no active capture target"),
            },
            CaptureEvent::Ended => {
                if inner.capture_target.take().is_some() {
                    self.emit(SessionEvent::CaptureChanged(None));
                }
            }
            CaptureEvent::Failed(reason) => {
                warn!(%reason, "speech capture failed");
                inner.capture_target = None;
                self.emit(SessionEvent::CaptureChanged(None));
                self.emit(SessionEvent::Notice(format!("Speech capture failed: {reason}")));
            }
        }
    }

    fn start_capture(
        &self,
        inner: &mut SessionState,
        target: CaptureTarget,
    ) -> Result<(), DictationError> {
        if !self.capture.is_available() {
            let err = DictationError::Unavailable;
            warn!("dictation requested but speech capture is unavailable");
            self.emit(SessionEvent::Notice(err.to_string()));
            return Err(err);
        }

        if let Some(active) = inner.capture_target {
            debug!(?active, ?target, "stopping active capture before retargeting");
            self.stop_active_capture(inner);
        }

        if let Err(err) = self.capture.start(target) {
            let err = DictationError::Capture(err.to_string());
            self.emit(SessionEvent::Notice(err.to_string()));
            return Err(err);
        }
        inner.capture_target = Some(target);
        self.emit(SessionEvent::CaptureChanged(Some(target)));
        Ok(())
    }

    fn stop_active_capture(&self, inner: &mut SessionState) {
        if inner.capture_target.take().is_none() {
            return;
        }
        if let Err(err) = self.capture.stop() {
            warn!(%err, "failed to stop speech capture");
        }
        self.emit(SessionEvent::CaptureChanged(None));
    }

    async fn run_transform(&self, request: TransformRequest) -> Result<String, TransformError> {
        match self.config.request_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.transformer.transform(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(TransformError::TimedOut(limit)),
                }
            }
            None => self.transformer.transform(&request).await,
        }
    }

    fn try_enter_busy(&self) -> Option<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.emit(SessionEvent::BusyChanged(true));
        Some(BusyGuard { controller: self })
    }

    fn emit_state(&self, inner: &SessionState) {
        self.emit(SessionEvent::HistoryChanged(inner.history.steps().to_vec()));
        self.emit(SessionEvent::DraftsChanged(inner.drafts.clone()));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
