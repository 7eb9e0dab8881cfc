//! Wire shapes of the clinical backend's AI endpoints.

use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::findings::FindingsPayload;
use crate::overlay::Annotation;

/// Body of a successful analyze or detect call.
///
/// `findings` carries the classifier text or object (see
/// `crate::findings`); `annotation` is empty in findings mode and holds
/// the score-filtered detections in detection mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub findings: FindingsPayload,
    #[serde(default)]
    pub annotation: Vec<Annotation>,
}

/// Raw body of the generate endpoint.
///
/// The service reports upstream LLM failures as `{"error": ...}` with a
/// 200 status, so both fields are optional and `into_result` decides
/// what the body actually means.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateOutcome {
    #[serde(default)]
    pub report: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl GenerateOutcome {
    /// The report text, or the failure this body encodes. A body with
    /// neither field breaks the contract and is malformed.
    pub fn into_result(self) -> Result<String, ApiError> {
        match (self.report, self.error) {
            (Some(report), _) => Ok(report),
            (None, Some(error)) => Err(ApiError::Transport(format!(
                "report generation failed upstream: {error}"
            ))),
            (None, None) => Err(ApiError::MalformedResponse(
                "generate response carries neither report nor error field".into(),
            )),
        }
    }
}
