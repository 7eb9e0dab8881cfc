//! Clinical backend client layer.
//!
//! Defines the contracts the workflow modules depend on (`ImageAnalyzer`,
//! `AnalysisArchive`, `ReportService`), the wire shapes of the AI
//! endpoints, and two implementations: `HttpBackend` for the real service
//! and `MockBackend` for scripted tests.

pub mod backend;
pub mod error;
pub mod http;
pub mod types;

pub use backend::{AnalysisArchive, ImageAnalyzer, ImageFile, MockBackend, ReportService};
pub use error::ApiError;
pub use http::HttpBackend;
pub use types::{AnalyzeResponse, GenerateOutcome};
