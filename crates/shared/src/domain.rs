use serde::{Deserialize, Serialize};

/// One row of a derivation: the equation and the instruction that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub equation: String,
    pub command: String,
}

impl Step {
    pub fn new(equation: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            equation: equation.into(),
            command: command.into(),
        }
    }
}

/// Pending input field a dictation transcript is routed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureTarget {
    Initial,
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformMode {
    Initial,
    Refine,
}

impl TransformMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Refine => "refine",
        }
    }
}
