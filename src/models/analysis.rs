use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Stored AI analysis as the backend returns it.
///
/// `findings` is the raw findings text exactly as the AI service produced
/// it (see `crate::findings` for why that text may be pseudo-JSON);
/// `annotation` is a JSON string holding the serialized annotation list.
/// Both stay textual here so a record round-trips byte-for-byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: i64,
    pub patient_id: i64,
    pub findings: Option<String>,
    pub annotation: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Payload for persisting a new analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAnalysis {
    pub patient_id: i64,
    pub findings: Option<String>,
    pub annotation: Option<String>,
}
