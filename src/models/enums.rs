use serde::{Deserialize, Serialize};

/// What the AI service is asked to do with an uploaded image.
///
/// `Findings` runs the pathology classifier and yields a label -> confidence
/// mapping. `Detection` runs the object detector and yields bounding boxes.
/// Only findings-mode results are persisted to the patient record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    Findings,
    Detection,
}

impl AnalysisMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisMode::Findings => "findings",
            AnalysisMode::Detection => "detection",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "findings" => Some(AnalysisMode::Findings),
            "detection" => Some(AnalysisMode::Detection),
            _ => None,
        }
    }

    /// AI endpoint path segment for this mode.
    pub fn endpoint(self) -> &'static str {
        match self {
            AnalysisMode::Findings => "analyze-image",
            AnalysisMode::Detection => "detect-objects",
        }
    }
}

impl std::fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The three patient-scoped dialogs the workspace can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogKind {
    Analysis,
    History,
    Report,
}

impl DialogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DialogKind::Analysis => "analysis",
            DialogKind::History => "history",
            DialogKind::Report => "report",
        }
    }
}

impl std::fmt::Display for DialogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_mode_round_trips_through_str() {
        for mode in [AnalysisMode::Findings, AnalysisMode::Detection] {
            assert_eq!(AnalysisMode::from_str(mode.as_str()), Some(mode));
        }
        assert_eq!(AnalysisMode::from_str("segmentation"), None);
    }

    #[test]
    fn analysis_mode_maps_to_distinct_endpoints() {
        assert_eq!(AnalysisMode::Findings.endpoint(), "analyze-image");
        assert_eq!(AnalysisMode::Detection.endpoint(), "detect-objects");
    }

    #[test]
    fn dialog_kind_serializes_snake_case() {
        let json = serde_json::to_string(&DialogKind::History).unwrap();
        assert_eq!(json, "\"history\"");
    }
}
