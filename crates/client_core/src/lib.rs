//! Core of the stepwise equation builder: step history, model-output
//! normalization, the transformation client and the session controller that
//! ties them together.

pub mod capture;
pub mod gateway;
pub mod history;
pub mod normalize;
pub mod session;
pub mod transform;

pub use capture::{CaptureEvent, DictationError, MissingSpeechCapture, SpeechCapture};
pub use gateway::{
    DirectModelGateway, MissingModelGateway, ModelCallError, ModelGateway, ModelRequest,
    RelayModelGateway,
};
pub use history::{HistoryMode, StepHistory};
pub use normalize::normalize;
pub use session::{
    PendingInput, SessionConfig, SessionController, SessionEvent, SessionPhase, SubmitOutcome,
    COMPUTE_FAILURE_PLACEHOLDER, CONVERT_FAILURE_PLACEHOLDER,
};
pub use transform::{TransformClient, TransformError, TransformRequest};
