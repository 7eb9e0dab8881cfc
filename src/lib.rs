//! radassist: workflow core for an AI-assisted radiology assistant.
//!
//! The crate sits between a thin UI shell and the clinical backend and
//! owns the parts the shell should not: normalizing heterogeneous AI
//! findings payloads, mapping detection geometry onto overlays, driving
//! the analysis and report state machines, caching per-patient analysis
//! history, and keeping at most one patient dialog active at a time.
//! Backend access goes through trait seams with a real HTTP client and a
//! scripted mock side by side.

pub mod analysis; // Image analysis session + workflow driver
pub mod api; // Backend contracts, HTTP client, scripted mock
pub mod config;
pub mod findings; // Findings payload normalization
pub mod history; // Per-patient analysis history cache
pub mod models;
pub mod overlay; // Detection overlay geometry
pub mod report; // Report draft session + workflow driver
pub mod workspace; // Dialog exclusivity

use tracing_subscriber::EnvFilter;

pub use analysis::{AnalysisSession, AnalysisState, AnalysisWorkflow};
pub use api::{ApiError, HttpBackend, ImageFile, MockBackend};
pub use findings::{Finding, Findings};
pub use history::AnalysisHistory;
pub use models::{AnalysisMode, DialogKind};
pub use report::{Draft, ReportDraftSession, ReportState, ReportWorkflow};
pub use workspace::Workspace;

/// Initializes tracing for an embedding shell. `RUST_LOG` wins when set;
/// otherwise dependencies stay at warn and this crate logs at info.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} v{} logging initialized", config::APP_NAME, config::APP_VERSION);
}
