//! Speech capture boundary. The engine itself lives outside the core; it is
//! driven through [`SpeechCapture`] and reports back with [`CaptureEvent`]s.

use anyhow::{anyhow, Result};
use shared::domain::CaptureTarget;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Transcript(String),
    Ended,
    Failed(String),
}

pub trait SpeechCapture: Send + Sync {
    fn is_available(&self) -> bool;
    fn start(&self, target: CaptureTarget) -> Result<()>;
    fn stop(&self) -> Result<()>;
}

pub struct MissingSpeechCapture;

impl SpeechCapture for MissingSpeechCapture {
    fn is_available(&self) -> bool {
        false
    }

    fn start(&self, _target: CaptureTarget) -> Result<()> {
        Err(anyhow!("speech capture backend is unavailable"))
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DictationError {
    #[error("Speech recognition is not available on this runtime.")]
    Unavailable,
    #[error("failed to control speech capture: {0}")]
    Capture(String),
}
