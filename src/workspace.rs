//! Patient workspace and dialog coordination.
//!
//! At most one of the three patient dialogs (analysis, history, report)
//! is active at a time, across all patients. Opening any dialog fully
//! resets whatever was active before, and every activation constructs a
//! fresh workflow, so no state leaks between patients or between visits
//! to the same dialog. The analysis history cache is the one deliberate
//! exception: it belongs to the workspace and survives dialog lifecycle,
//! since its invalidation is explicit.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::analysis::AnalysisWorkflow;
use crate::api::{AnalysisArchive, ImageAnalyzer, ReportService};
use crate::history::AnalysisHistory;
use crate::models::DialogKind;
use crate::report::ReportWorkflow;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Workspace lock poisoned")]
    LockPoisoned,
}

enum ActiveDialog {
    Analysis {
        patient_id: i64,
        workflow: Arc<AnalysisWorkflow>,
    },
    History {
        patient_id: i64,
    },
    Report {
        patient_id: i64,
        workflow: Arc<ReportWorkflow>,
    },
}

impl ActiveDialog {
    fn kind(&self) -> DialogKind {
        match self {
            ActiveDialog::Analysis { .. } => DialogKind::Analysis,
            ActiveDialog::History { .. } => DialogKind::History,
            ActiveDialog::Report { .. } => DialogKind::Report,
        }
    }

    fn patient_id(&self) -> i64 {
        match self {
            ActiveDialog::Analysis { patient_id, .. }
            | ActiveDialog::History { patient_id }
            | ActiveDialog::Report { patient_id, .. } => *patient_id,
        }
    }

    /// Resets the dialog's session. In-flight responses arrive stale
    /// afterwards. The history dialog carries no session of its own.
    fn shut(&self) {
        let result = match self {
            ActiveDialog::Analysis { workflow, .. } => {
                workflow.close().map_err(|e| e.to_string())
            }
            ActiveDialog::Report { workflow, .. } => {
                workflow.close().map_err(|e| e.to_string())
            }
            ActiveDialog::History { .. } => Ok(()),
        };
        match result {
            Ok(()) => tracing::info!(
                patient_id = self.patient_id(),
                dialog = %self.kind(),
                "dialog closed"
            ),
            Err(e) => tracing::warn!(
                patient_id = self.patient_id(),
                dialog = %self.kind(),
                error = %e,
                "dialog session could not be reset cleanly"
            ),
        }
    }
}

/// Owns the backend seams, the shared history cache, and the single
/// active dialog slot.
pub struct Workspace {
    analyzer: Arc<dyn ImageAnalyzer>,
    archive: Arc<dyn AnalysisArchive>,
    reports: Arc<dyn ReportService>,
    history: Arc<AnalysisHistory>,
    active: Mutex<Option<ActiveDialog>>,
}

impl Workspace {
    pub fn new(
        analyzer: Arc<dyn ImageAnalyzer>,
        archive: Arc<dyn AnalysisArchive>,
        reports: Arc<dyn ReportService>,
    ) -> Self {
        let history = Arc::new(AnalysisHistory::new(archive.clone()));
        Self {
            analyzer,
            archive,
            reports,
            history,
            active: Mutex::new(None),
        }
    }

    /// Wires every seam to one backend instance, the common case for both
    /// `HttpBackend` and `MockBackend`.
    pub fn with_backend<B>(backend: Arc<B>) -> Self
    where
        B: ImageAnalyzer + AnalysisArchive + ReportService + 'static,
    {
        Self::new(backend.clone(), backend.clone(), backend)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<ActiveDialog>>, WorkspaceError> {
        self.active.lock().map_err(|_| WorkspaceError::LockPoisoned)
    }

    /// The shared per-patient history cache.
    pub fn history(&self) -> Arc<AnalysisHistory> {
        self.history.clone()
    }

    pub fn active(&self) -> Result<Option<(DialogKind, i64)>, WorkspaceError> {
        Ok(self.lock()?.as_ref().map(|d| (d.kind(), d.patient_id())))
    }

    /// Opens the analysis dialog for one patient, closing whatever was
    /// active. The returned workflow is fresh.
    pub fn open_analysis(&self, patient_id: i64) -> Result<Arc<AnalysisWorkflow>, WorkspaceError> {
        let mut active = self.lock()?;
        if let Some(previous) = active.take() {
            previous.shut();
        }

        let workflow = Arc::new(AnalysisWorkflow::new(
            self.analyzer.clone(),
            self.archive.clone(),
            self.history.clone(),
            patient_id,
        ));
        *active = Some(ActiveDialog::Analysis {
            patient_id,
            workflow: workflow.clone(),
        });
        tracing::info!(patient_id, dialog = %DialogKind::Analysis, "dialog opened");
        Ok(workflow)
    }

    /// Opens the history dialog. The store itself is shared; only the
    /// active-dialog slot changes.
    pub fn open_history(&self, patient_id: i64) -> Result<Arc<AnalysisHistory>, WorkspaceError> {
        let mut active = self.lock()?;
        if let Some(previous) = active.take() {
            previous.shut();
        }

        *active = Some(ActiveDialog::History { patient_id });
        tracing::info!(patient_id, dialog = %DialogKind::History, "dialog opened");
        Ok(self.history.clone())
    }

    /// Opens the report dialog for one patient, closing whatever was
    /// active. The returned workflow is fresh.
    pub fn open_report(&self, patient_id: i64) -> Result<Arc<ReportWorkflow>, WorkspaceError> {
        let mut active = self.lock()?;
        if let Some(previous) = active.take() {
            previous.shut();
        }

        let workflow = Arc::new(ReportWorkflow::new(
            self.reports.clone(),
            self.history.clone(),
            patient_id,
        ));
        *active = Some(ActiveDialog::Report {
            patient_id,
            workflow: workflow.clone(),
        });
        tracing::info!(patient_id, dialog = %DialogKind::Report, "dialog opened");
        Ok(workflow)
    }

    /// Closes the active dialog, if any, resetting its session.
    pub fn close(&self) -> Result<(), WorkspaceError> {
        if let Some(previous) = self.lock()?.take() {
            previous.shut();
        }
        Ok(())
    }
}
