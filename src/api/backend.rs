//! Backend service contracts and the scripted mock.
//!
//! The workflow modules never talk HTTP directly; they hold trait objects
//! for the three concerns the clinical backend covers. `HttpBackend` is
//! the production implementation, `MockBackend` the scripted one. The
//! mock is not `cfg(test)` so embedding shells can drive the workflows
//! without a live service.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::error::ApiError;
use super::types::AnalyzeResponse;
use crate::models::{AnalysisMode, AnalysisRecord, NewAnalysis, NewReport, ReportRecord};

// ---------------------------------------------------------------------------
// Upload payload
// ---------------------------------------------------------------------------

/// In-memory image selected for analysis.
///
/// Bytes sit behind an `Arc` so tickets and retries clone cheaply; the
/// payload of a chest film can run to megabytes.
#[derive(Debug, Clone)]
pub struct ImageFile {
    name: String,
    bytes: Arc<Vec<u8>>,
}

impl ImageFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes: Arc::new(bytes),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// Runs an uploaded image through the AI service.
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        file: &ImageFile,
        mode: AnalysisMode,
    ) -> Result<AnalyzeResponse, ApiError>;
}

/// Stored analyses: persistence and per-patient listing.
#[async_trait]
pub trait AnalysisArchive: Send + Sync {
    async fn create(&self, analysis: &NewAnalysis) -> Result<AnalysisRecord, ApiError>;

    async fn list_for_patient(&self, patient_id: i64) -> Result<Vec<AnalysisRecord>, ApiError>;
}

/// Report drafting: LLM generation plus create/update of stored reports.
#[async_trait]
pub trait ReportService: Send + Sync {
    async fn generate(&self, patient_id: i64, findings: &str) -> Result<String, ApiError>;

    async fn create(&self, report: &NewReport) -> Result<ReportRecord, ApiError>;

    async fn update(&self, report_id: i64, report: &NewReport)
        -> Result<ReportRecord, ApiError>;
}

// ---------------------------------------------------------------------------
// Scripted mock
// ---------------------------------------------------------------------------

/// Scripted implementation of all three contracts.
///
/// Responses are queued per operation with the `with_*` builders and
/// consumed in order; an unscripted call fails loudly instead of
/// inventing data. Captured request payloads and a call log support
/// assertions on what the workflows actually sent.
#[derive(Default)]
pub struct MockBackend {
    analyze_results: Mutex<VecDeque<Result<AnalyzeResponse, ApiError>>>,
    create_analysis_results: Mutex<VecDeque<Result<AnalysisRecord, ApiError>>>,
    history_results: Mutex<VecDeque<Result<Vec<AnalysisRecord>, ApiError>>>,
    generate_results: Mutex<VecDeque<Result<String, ApiError>>>,
    create_report_results: Mutex<VecDeque<Result<ReportRecord, ApiError>>>,
    update_report_results: Mutex<VecDeque<Result<ReportRecord, ApiError>>>,
    last_created_analysis: Mutex<Option<NewAnalysis>>,
    last_report_payload: Mutex<Option<NewReport>>,
    last_updated_report_id: Mutex<Option<i64>>,
    last_generate_findings: Mutex<Option<String>>,
    calls: Mutex<Vec<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_analyze(self, result: Result<AnalyzeResponse, ApiError>) -> Self {
        lock(&self.analyze_results).push_back(result);
        self
    }

    pub fn with_create_analysis(self, result: Result<AnalysisRecord, ApiError>) -> Self {
        lock(&self.create_analysis_results).push_back(result);
        self
    }

    pub fn with_history(self, result: Result<Vec<AnalysisRecord>, ApiError>) -> Self {
        lock(&self.history_results).push_back(result);
        self
    }

    pub fn with_generate(self, result: Result<String, ApiError>) -> Self {
        lock(&self.generate_results).push_back(result);
        self
    }

    pub fn with_create_report(self, result: Result<ReportRecord, ApiError>) -> Self {
        lock(&self.create_report_results).push_back(result);
        self
    }

    pub fn with_update_report(self, result: Result<ReportRecord, ApiError>) -> Self {
        lock(&self.update_report_results).push_back(result);
        self
    }

    /// Every call made so far, in order, as `"op"` or `"op arg"` strings.
    pub fn call_log(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// How many calls were made to the named operation.
    pub fn calls_to(&self, op: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(op))
            .count()
    }

    pub fn last_created_analysis(&self) -> Option<NewAnalysis> {
        lock(&self.last_created_analysis).clone()
    }

    pub fn last_report_payload(&self) -> Option<NewReport> {
        lock(&self.last_report_payload).clone()
    }

    pub fn last_updated_report_id(&self) -> Option<i64> {
        lock(&self.last_updated_report_id).clone()
    }

    pub fn last_generate_findings(&self) -> Option<String> {
        lock(&self.last_generate_findings).clone()
    }

    fn record_call(&self, call: impl Into<String>) {
        lock(&self.calls).push(call.into());
    }

    fn next<T>(
        queue: &Mutex<VecDeque<Result<T, ApiError>>>,
        op: &'static str,
    ) -> Result<T, ApiError> {
        lock(queue)
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::InvalidRequest(format!("mock: no scripted {op}"))))
    }
}

#[async_trait]
impl ImageAnalyzer for MockBackend {
    async fn analyze(
        &self,
        file: &ImageFile,
        mode: AnalysisMode,
    ) -> Result<AnalyzeResponse, ApiError> {
        self.record_call(format!("analyze {} {}", mode, file.name()));
        Self::next(&self.analyze_results, "analyze")
    }
}

#[async_trait]
impl AnalysisArchive for MockBackend {
    async fn create(&self, analysis: &NewAnalysis) -> Result<AnalysisRecord, ApiError> {
        self.record_call(format!("create_analysis {}", analysis.patient_id));
        *lock(&self.last_created_analysis) = Some(analysis.clone());
        Self::next(&self.create_analysis_results, "create_analysis")
    }

    async fn list_for_patient(&self, patient_id: i64) -> Result<Vec<AnalysisRecord>, ApiError> {
        self.record_call(format!("list_for_patient {patient_id}"));
        Self::next(&self.history_results, "list_for_patient")
    }
}

#[async_trait]
impl ReportService for MockBackend {
    async fn generate(&self, patient_id: i64, findings: &str) -> Result<String, ApiError> {
        self.record_call(format!("generate {patient_id}"));
        *lock(&self.last_generate_findings) = Some(findings.to_string());
        Self::next(&self.generate_results, "generate")
    }

    async fn create(&self, report: &NewReport) -> Result<ReportRecord, ApiError> {
        self.record_call(format!("create_report {}", report.patient_id));
        *lock(&self.last_report_payload) = Some(report.clone());
        Self::next(&self.create_report_results, "create_report")
    }

    async fn update(
        &self,
        report_id: i64,
        report: &NewReport,
    ) -> Result<ReportRecord, ApiError> {
        self.record_call(format!("update_report {report_id}"));
        *lock(&self.last_report_payload) = Some(report.clone());
        *lock(&self.last_updated_report_id) = Some(report_id);
        Self::next(&self.update_report_results, "update_report")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::FindingsPayload;

    fn make_analyze_response(findings: &str) -> AnalyzeResponse {
        AnalyzeResponse {
            findings: FindingsPayload::Text(findings.to_string()),
            annotation: Vec::new(),
        }
    }

    #[tokio::test]
    async fn scripted_responses_are_consumed_in_order() {
        let mock = MockBackend::new()
            .with_analyze(Ok(make_analyze_response("{'A': 0.9}")))
            .with_analyze(Err(ApiError::Transport("down".into())));
        let file = ImageFile::new("scan.png", vec![1, 2, 3]);

        assert!(mock.analyze(&file, AnalysisMode::Findings).await.is_ok());
        assert!(mock.analyze(&file, AnalysisMode::Findings).await.is_err());
        assert_eq!(mock.calls_to("analyze"), 2);
    }

    #[tokio::test]
    async fn unscripted_call_fails_instead_of_inventing_data() {
        let mock = MockBackend::new();
        let err = mock.list_for_patient(7).await.unwrap_err();
        match err {
            ApiError::InvalidRequest(msg) => assert!(msg.contains("list_for_patient")),
            other => panic!("Expected InvalidRequest, got: {other}"),
        }
    }

    #[tokio::test]
    async fn captures_request_payloads() {
        let mock = MockBackend::new().with_generate(Ok("Draft.".into()));
        mock.generate(3, "{'Pneumonia': 0.8}").await.unwrap();
        assert_eq!(mock.last_generate_findings().as_deref(), Some("{'Pneumonia': 0.8}"));
        assert_eq!(mock.call_log(), vec!["generate 3".to_string()]);
    }

    #[test]
    fn image_file_reports_emptiness() {
        assert!(ImageFile::new("empty.png", Vec::new()).is_empty());
        assert!(!ImageFile::new("scan.png", vec![0u8; 16]).is_empty());
    }
}
