//! Production HTTP client for the clinical backend.
//!
//! One client implements all three contracts against the FastAPI service:
//! AI endpoints under `/api/ai/`, stored analyses under `/api/analyses/`,
//! reports under `/api/reports/`. The records endpoints require a bearer
//! credential; issuing it is the embedding shell's job, this client only
//! attaches whatever was injected via `set_token`.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;

use super::backend::{AnalysisArchive, ImageAnalyzer, ImageFile, ReportService};
use super::error::ApiError;
use super::types::{AnalyzeResponse, GenerateOutcome};
use crate::config;
use crate::models::{AnalysisMode, AnalysisRecord, NewAnalysis, NewReport, ReportRecord};

pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
    token: RwLock<Option<String>>,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout_secs: config::REQUEST_TIMEOUT_SECS,
            token: RwLock::new(None),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.set_token(Some(token.into()));
        self
    }

    /// Replaces the bearer credential. `None` clears it; credentialed
    /// endpoints are still called and surface `Unauthorized` on 401/403.
    pub fn set_token(&self, token: Option<String>) {
        *self
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let token = self
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Turns a non-success status into the matching error, keeping the
    /// response body as detail.
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let detail = resp.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            Err(ApiError::Unauthorized(detail))
        } else {
            Err(ApiError::Http {
                status: status.as_u16(),
                detail,
            })
        }
    }
}

impl Default for HttpBackend {
    fn default() -> Self {
        Self::new(config::DEFAULT_BACKEND_URL)
    }
}

#[async_trait]
impl ImageAnalyzer for HttpBackend {
    async fn analyze(
        &self,
        file: &ImageFile,
        mode: AnalysisMode,
    ) -> Result<AnalyzeResponse, ApiError> {
        let url = self.endpoint(&format!("/api/ai/{}", mode.endpoint()));
        let part = multipart::Part::bytes(file.bytes().to_vec()).file_name(file.name().to_string());
        let form = multipart::Form::new().part("file", part);

        tracing::debug!(%url, file = file.name(), size = file.len(), "uploading image for analysis");
        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout())
            .multipart(form)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }
}

#[async_trait]
impl AnalysisArchive for HttpBackend {
    async fn create(&self, analysis: &NewAnalysis) -> Result<AnalysisRecord, ApiError> {
        let url = self.endpoint("/api/analyses/");
        let resp = self
            .authorized(self.client.post(&url))
            .timeout(self.timeout())
            .json(analysis)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn list_for_patient(&self, patient_id: i64) -> Result<Vec<AnalysisRecord>, ApiError> {
        let url = self.endpoint(&format!("/api/analyses/patient/{patient_id}"));
        let resp = self
            .authorized(self.client.get(&url))
            .timeout(self.timeout())
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }
}

#[async_trait]
impl ReportService for HttpBackend {
    async fn generate(&self, patient_id: i64, findings: &str) -> Result<String, ApiError> {
        let url = self.endpoint("/api/ai/generate-report");
        let patient_id = patient_id.to_string();
        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout())
            // The service takes these as query parameters, not a body.
            .query(&[("patient_id", patient_id.as_str()), ("findings", findings)])
            .send()
            .await?;
        let outcome: GenerateOutcome = Self::check(resp).await?.json().await?;
        outcome.into_result()
    }

    async fn create(&self, report: &NewReport) -> Result<ReportRecord, ApiError> {
        let url = self.endpoint("/api/reports/");
        let resp = self
            .authorized(self.client.post(&url))
            .timeout(self.timeout())
            .json(report)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn update(
        &self,
        report_id: i64,
        report: &NewReport,
    ) -> Result<ReportRecord, ApiError> {
        let url = self.endpoint(&format!("/api/reports/{report_id}"));
        let resp = self
            .authorized(self.client.put(&url))
            .timeout(self.timeout())
            .json(report)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slashes_from_base_url() {
        let backend = HttpBackend::new("http://localhost:8000/");
        assert_eq!(backend.base_url(), "http://localhost:8000");
        assert_eq!(
            backend.endpoint("/api/reports/"),
            "http://localhost:8000/api/reports/"
        );
    }

    #[test]
    fn mode_selects_the_matching_ai_endpoint() {
        let backend = HttpBackend::new("http://h");
        assert_eq!(
            backend.endpoint(&format!("/api/ai/{}", AnalysisMode::Findings.endpoint())),
            "http://h/api/ai/analyze-image"
        );
        assert_eq!(
            backend.endpoint(&format!("/api/ai/{}", AnalysisMode::Detection.endpoint())),
            "http://h/api/ai/detect-objects"
        );
    }

    #[test]
    fn token_can_be_set_replaced_and_cleared() {
        let backend = HttpBackend::new("http://h").with_token("abc");
        assert_eq!(backend.token.read().unwrap().as_deref(), Some("abc"));
        backend.set_token(Some("def".into()));
        assert_eq!(backend.token.read().unwrap().as_deref(), Some("def"));
        backend.set_token(None);
        assert!(backend.token.read().unwrap().is_none());
    }

    #[test]
    fn timeout_override_replaces_the_default() {
        let backend = HttpBackend::new("http://h");
        assert_eq!(
            backend.timeout(),
            Duration::from_secs(config::REQUEST_TIMEOUT_SECS)
        );

        let backend = HttpBackend::new("http://h").with_timeout(5);
        assert_eq!(backend.timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn check_maps_statuses_onto_the_error_taxonomy() {
        let ok = http::Response::builder().status(200).body("{}").unwrap();
        assert!(HttpBackend::check(reqwest::Response::from(ok)).await.is_ok());

        for denied in [401u16, 403] {
            let resp = http::Response::builder()
                .status(denied)
                .body("Not authenticated")
                .unwrap();
            match HttpBackend::check(reqwest::Response::from(resp))
                .await
                .unwrap_err()
            {
                ApiError::Unauthorized(detail) => assert_eq!(detail, "Not authenticated"),
                other => panic!("Expected Unauthorized, got: {other}"),
            }
        }

        let broken = http::Response::builder()
            .status(500)
            .body("Internal Server Error")
            .unwrap();
        match HttpBackend::check(reqwest::Response::from(broken))
            .await
            .unwrap_err()
        {
            ApiError::Http { status, detail } => {
                assert_eq!(status, 500);
                assert_eq!(detail, "Internal Server Error");
            }
            other => panic!("Expected Http, got: {other}"),
        }
    }
}
