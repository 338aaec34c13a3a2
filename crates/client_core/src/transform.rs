use std::{sync::Arc, time::Duration};

use shared::domain::TransformMode;
use thiserror::Error;
use tracing::debug;

use crate::gateway::{ModelCallError, ModelGateway, ModelRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformRequest {
    /// Convert a spoken or typed sentence into the first equation.
    Initial { sentence: String },
    /// Apply a command to the most recent equation.
    Refine {
        previous_equation: String,
        command: String,
    },
}

impl TransformRequest {
    pub fn mode(&self) -> TransformMode {
        match self {
            Self::Initial { .. } => TransformMode::Initial,
            Self::Refine { .. } => TransformMode::Refine,
        }
    }

    pub fn prompt(&self) -> String {
        match self {
            Self::Initial { sentence } => format!(
                "You are a helpful math assistant. Your task is to convert a natural language \
                 sentence describing a mathematical equation into a valid LaTeX format.\n\
                 Sentence: \"{sentence}\"\n\
                 Return ONLY the resulting equation in valid LaTeX format. Do not include any \
                 explanation, text, or enclosing characters like '$'. For example, if the \
                 sentence is \"x squared plus y squared equals r squared\", return \
                 \"x^2 + y^2 = r^2\"."
            ),
            Self::Refine {
                previous_equation,
                command,
            } => format!(
                "You are a helpful math assistant. Your task is to perform an algebraic \
                 manipulation on a given LaTeX equation based on a natural language command.\n\
                 Previous equation: \"{previous_equation}\"\n\
                 Command: \"{command}\"\n\
                 Return ONLY the resulting new equation in valid LaTeX format. Do not include \
                 any explanation, text, or enclosing characters like '$'. For example, if the \
                 result is 'x=5', return exactly that."
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("model request failed (status {status:?}): {body}")]
    RequestFailed { status: Option<u16>, body: String },
    #[error("model response contained no candidate text")]
    EmptyResult,
    #[error("model request timed out after {0:?}")]
    TimedOut(Duration),
}

impl From<ModelCallError> for TransformError {
    fn from(value: ModelCallError) -> Self {
        Self::RequestFailed {
            status: value.status,
            body: value.body,
        }
    }
}

/// Turns a [`TransformRequest`] into raw model text. Output is returned
/// exactly as the model produced it; callers normalize.
#[derive(Clone)]
pub struct TransformClient {
    gateway: Arc<dyn ModelGateway>,
}

impl TransformClient {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self { gateway }
    }

    pub async fn transform(&self, request: &TransformRequest) -> Result<String, TransformError> {
        let mode = request.mode();
        let response = self
            .gateway
            .generate(ModelRequest {
                mode,
                prompt: request.prompt(),
            })
            .await?;

        let text = response
            .first_candidate_text()
            .ok_or(TransformError::EmptyResult)?;
        debug!(mode = mode.as_str(), "transformation produced candidate text");
        Ok(text.to_string())
    }
}

#[cfg(test)]
#[path = "tests/transform_tests.rs"]
mod tests;
