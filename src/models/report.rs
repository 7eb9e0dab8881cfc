use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Stored report as the backend returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRecord {
    pub id: i64,
    pub content: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Payload for creating or updating a report.
///
/// The update endpoint takes the same shape as create, so one type covers
/// both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReport {
    pub patient_id: i64,
    pub content: Option<String>,
}
