//! Image analysis workflow.
//!
//! `AnalysisSession` is a pure state machine: every transition is a
//! synchronous method, and network results re-enter through `finish_*`
//! calls carrying the epoch their request started under. Stale results
//! (the session was reset while the request was out) are discarded on
//! arrival; nothing is ever cancelled mid-flight. `AnalysisWorkflow`
//! owns a session plus the backend seams and weaves the actual calls
//! around the machine, holding the lock only for transitions, never
//! across an await.
//!
//! Failure semantics follow two rules. Anything wrong before a request
//! leaves (no file, empty file, wrong state, second submit while one is
//! out) is a synchronous `AnalysisError`. Anything wrong after (transport
//! outage, malformed body) lands the session in `SubmitFailed` or
//! `PersistFailed` and is read back as state, not as an error.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::api::{AnalysisArchive, AnalyzeResponse, ApiError, ImageAnalyzer, ImageFile};
use crate::findings::{self, Findings};
use crate::history::AnalysisHistory;
use crate::models::{AnalysisMode, AnalysisRecord, NewAnalysis};
use crate::overlay::Annotation;

// ---------------------------------------------------------------------------
// States and errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    Idle,
    FileSelected,
    Submitting,
    Analyzed,
    SubmitFailed,
    Persisting,
    Persisted,
    PersistFailed,
}

impl AnalysisState {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisState::Idle => "idle",
            AnalysisState::FileSelected => "file_selected",
            AnalysisState::Submitting => "submitting",
            AnalysisState::Analyzed => "analyzed",
            AnalysisState::SubmitFailed => "submit_failed",
            AnalysisState::Persisting => "persisting",
            AnalysisState::Persisted => "persisted",
            AnalysisState::PersistFailed => "persist_failed",
        }
    }
}

impl std::fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("No image file selected")]
    FileRequired,

    #[error("Selected image '{0}' is empty")]
    EmptyFile(String),

    #[error("{op} is not allowed in state {state}")]
    InvalidState {
        op: &'static str,
        state: AnalysisState,
    },

    #[error("A {0} request is already in flight")]
    Busy(&'static str),

    #[error("No patient bound to this session")]
    MissingPatient,

    #[error("Detection results are not persisted to the patient record")]
    NotPersistable,

    #[error("Failed to serialize annotations: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Analysis session lock poisoned")]
    LockPoisoned,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// What a completed analysis left behind.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    /// Normalized findings; empty when the payload was unreadable.
    pub findings: Findings,
    /// Findings text exactly as the service sent it, kept for persisting.
    pub raw_findings: String,
    /// Detection boxes in source-image pixels (empty in findings mode).
    pub annotations: Vec<Annotation>,
}

/// Ticket handed out by `begin_submit`; carries everything the network
/// call needs so the session lock can be released while it runs.
#[derive(Debug, Clone)]
pub struct SubmitTicket {
    epoch: u64,
    file: ImageFile,
    mode: AnalysisMode,
}

impl SubmitTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn file(&self) -> &ImageFile {
        &self.file
    }

    pub fn mode(&self) -> AnalysisMode {
        self.mode
    }
}

/// Ticket handed out by `begin_persist`.
#[derive(Debug, Clone)]
pub struct PersistTicket {
    epoch: u64,
    request: NewAnalysis,
}

impl PersistTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn request(&self) -> &NewAnalysis {
        &self.request
    }
}

/// The analysis dialog's state machine. Pure and synchronous; see the
/// module docs for how network results are fed back in.
#[derive(Debug)]
pub struct AnalysisSession {
    patient_id: Option<i64>,
    mode: AnalysisMode,
    state: AnalysisState,
    file: Option<ImageFile>,
    outcome: Option<AnalysisOutcome>,
    persisted: Option<AnalysisRecord>,
    last_error: Option<String>,
    epoch: u64,
}

impl AnalysisSession {
    pub fn new() -> Self {
        Self {
            patient_id: None,
            mode: AnalysisMode::Findings,
            state: AnalysisState::Idle,
            file: None,
            outcome: None,
            persisted: None,
            last_error: None,
            epoch: 0,
        }
    }

    pub fn for_patient(patient_id: i64) -> Self {
        Self {
            patient_id: Some(patient_id),
            ..Self::new()
        }
    }

    pub fn state(&self) -> AnalysisState {
        self.state
    }

    pub fn mode(&self) -> AnalysisMode {
        self.mode
    }

    pub fn patient_id(&self) -> Option<i64> {
        self.patient_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn selected_file(&self) -> Option<&ImageFile> {
        self.file.as_ref()
    }

    pub fn outcome(&self) -> Option<&AnalysisOutcome> {
        self.outcome.as_ref()
    }

    pub fn persisted(&self) -> Option<&AnalysisRecord> {
        self.persisted.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Selects (or replaces) the image to analyze. A failed submission
    /// clears the file, so SubmitFailed is a valid source state here;
    /// once results exist the dialog must be reset instead.
    pub fn select_file(&mut self, file: ImageFile) -> Result<(), AnalysisError> {
        match self.state {
            AnalysisState::Idle | AnalysisState::FileSelected | AnalysisState::SubmitFailed => {
                tracing::debug!(file = file.name(), size = file.len(), "image selected");
                self.file = Some(file);
                self.state = AnalysisState::FileSelected;
                Ok(())
            }
            state => Err(AnalysisError::InvalidState {
                op: "select_file",
                state,
            }),
        }
    }

    /// Switches between findings and detection mode. Only sensible before
    /// a submission; afterwards the result would no longer match the mode.
    pub fn set_mode(&mut self, mode: AnalysisMode) -> Result<(), AnalysisError> {
        match self.state {
            AnalysisState::Idle | AnalysisState::FileSelected => {
                self.mode = mode;
                Ok(())
            }
            state => Err(AnalysisError::InvalidState {
                op: "set_mode",
                state,
            }),
        }
    }

    /// Starts a submission. The prior outcome survives a re-selection but
    /// is discarded here, the moment a new submission actually begins.
    pub fn begin_submit(&mut self) -> Result<SubmitTicket, AnalysisError> {
        let file = match self.state {
            AnalysisState::Submitting => return Err(AnalysisError::Busy("submit")),
            AnalysisState::FileSelected => {
                self.file.as_ref().ok_or(AnalysisError::FileRequired)?
            }
            AnalysisState::Idle | AnalysisState::SubmitFailed => {
                return Err(AnalysisError::FileRequired)
            }
            state => return Err(AnalysisError::InvalidState { op: "submit", state }),
        };
        if file.is_empty() {
            return Err(AnalysisError::EmptyFile(file.name().to_string()));
        }

        let ticket = SubmitTicket {
            epoch: self.epoch,
            file: file.clone(),
            mode: self.mode,
        };
        self.outcome = None;
        self.persisted = None;
        self.last_error = None;
        self.state = AnalysisState::Submitting;
        Ok(ticket)
    }

    /// Applies a submission result. Returns false when the result was
    /// discarded as stale or unexpected.
    pub fn finish_submit(
        &mut self,
        epoch: u64,
        result: Result<AnalyzeResponse, ApiError>,
    ) -> bool {
        if epoch != self.epoch {
            tracing::debug!(
                ticket_epoch = epoch,
                current_epoch = self.epoch,
                "stale analysis response discarded"
            );
            return false;
        }
        if self.state != AnalysisState::Submitting {
            tracing::warn!(state = %self.state, "analysis response outside submission discarded");
            return false;
        }

        match result {
            Ok(resp) => {
                let normalized = findings::normalize(&resp.findings);
                tracing::info!(
                    mode = %self.mode,
                    findings = normalized.len(),
                    annotations = resp.annotation.len(),
                    "analysis completed"
                );
                self.outcome = Some(AnalysisOutcome {
                    findings: normalized,
                    raw_findings: findings::raw_text(&resp.findings),
                    annotations: resp.annotation,
                });
                self.state = AnalysisState::Analyzed;
            }
            Err(e) => {
                crate::api::error::log_failure("analysis submission", &e);
                self.last_error = Some(e.to_string());
                self.file = None;
                self.outcome = None;
                self.state = AnalysisState::SubmitFailed;
            }
        }
        true
    }

    /// Starts persisting the current outcome to the patient record.
    /// Findings mode only; detection results stay on screen.
    pub fn begin_persist(&mut self) -> Result<PersistTicket, AnalysisError> {
        match self.state {
            AnalysisState::Persisting => return Err(AnalysisError::Busy("persist")),
            AnalysisState::Analyzed | AnalysisState::PersistFailed => {}
            state => return Err(AnalysisError::InvalidState { op: "persist", state }),
        }
        if self.mode == AnalysisMode::Detection {
            return Err(AnalysisError::NotPersistable);
        }
        let patient_id = self.patient_id.ok_or(AnalysisError::MissingPatient)?;
        let outcome = self
            .outcome
            .as_ref()
            .ok_or(AnalysisError::InvalidState {
                op: "persist",
                state: self.state,
            })?;

        let annotation = serde_json::to_string(&outcome.annotations)?;
        let ticket = PersistTicket {
            epoch: self.epoch,
            request: NewAnalysis {
                patient_id,
                findings: Some(outcome.raw_findings.clone()),
                annotation: Some(annotation),
            },
        };
        self.last_error = None;
        self.state = AnalysisState::Persisting;
        Ok(ticket)
    }

    /// Applies a persist result. The outcome is kept either way: on
    /// success for display, on failure so persist can be retried.
    pub fn finish_persist(
        &mut self,
        epoch: u64,
        result: Result<AnalysisRecord, ApiError>,
    ) -> bool {
        if epoch != self.epoch {
            tracing::debug!(
                ticket_epoch = epoch,
                current_epoch = self.epoch,
                "stale persist response discarded"
            );
            return false;
        }
        if self.state != AnalysisState::Persisting {
            tracing::warn!(state = %self.state, "persist response outside persisting discarded");
            return false;
        }

        match result {
            Ok(record) => {
                tracing::info!(analysis_id = record.id, patient_id = record.patient_id, "analysis persisted");
                self.persisted = Some(record);
                self.state = AnalysisState::Persisted;
            }
            Err(e) => {
                crate::api::error::log_failure("analysis persist", &e);
                self.last_error = Some(e.to_string());
                self.state = AnalysisState::PersistFailed;
            }
        }
        true
    }

    /// Back to idle: file, outcome, errors and mode are discarded, and
    /// the epoch moves on so in-flight responses become stale.
    pub fn reset(&mut self) {
        self.epoch += 1;
        self.file = None;
        self.outcome = None;
        self.persisted = None;
        self.last_error = None;
        self.mode = AnalysisMode::Findings;
        self.state = AnalysisState::Idle;
        tracing::debug!(epoch = self.epoch, "analysis session reset");
    }
}

impl Default for AnalysisSession {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Workflow driver
// ---------------------------------------------------------------------------

/// Serializable view of a session for the embedding shell.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSnapshot {
    pub state: AnalysisState,
    pub mode: AnalysisMode,
    pub patient_id: Option<i64>,
    pub file_name: Option<String>,
    pub outcome: Option<AnalysisOutcome>,
    pub persisted_id: Option<i64>,
    pub last_error: Option<String>,
}

/// Drives an `AnalysisSession` against the backend seams.
pub struct AnalysisWorkflow {
    analyzer: Arc<dyn ImageAnalyzer>,
    archive: Arc<dyn AnalysisArchive>,
    history: Arc<AnalysisHistory>,
    session: Mutex<AnalysisSession>,
}

impl AnalysisWorkflow {
    pub fn new(
        analyzer: Arc<dyn ImageAnalyzer>,
        archive: Arc<dyn AnalysisArchive>,
        history: Arc<AnalysisHistory>,
        patient_id: i64,
    ) -> Self {
        Self {
            analyzer,
            archive,
            history,
            session: Mutex::new(AnalysisSession::for_patient(patient_id)),
        }
    }

    fn session(&self) -> Result<MutexGuard<'_, AnalysisSession>, AnalysisError> {
        self.session.lock().map_err(|_| AnalysisError::LockPoisoned)
    }

    pub fn select_file(&self, file: ImageFile) -> Result<(), AnalysisError> {
        self.session()?.select_file(file)
    }

    pub fn set_mode(&self, mode: AnalysisMode) -> Result<(), AnalysisError> {
        self.session()?.set_mode(mode)
    }

    pub fn state(&self) -> Result<AnalysisState, AnalysisError> {
        Ok(self.session()?.state())
    }

    pub fn snapshot(&self) -> Result<AnalysisSnapshot, AnalysisError> {
        let session = self.session()?;
        Ok(AnalysisSnapshot {
            state: session.state(),
            mode: session.mode(),
            patient_id: session.patient_id(),
            file_name: session.selected_file().map(|f| f.name().to_string()),
            outcome: session.outcome().cloned(),
            persisted_id: session.persisted().map(|r| r.id),
            last_error: session.last_error().map(String::from),
        })
    }

    /// Runs one submission. Synchronous rejections come back as errors;
    /// the backend's verdict comes back as the resulting state.
    pub async fn submit(&self) -> Result<AnalysisState, AnalysisError> {
        let ticket = self.session()?.begin_submit()?;
        tracing::info!(
            mode = %ticket.mode(),
            file = ticket.file().name(),
            "submitting image for analysis"
        );
        let result = self.analyzer.analyze(ticket.file(), ticket.mode()).await;

        let mut session = self.session()?;
        session.finish_submit(ticket.epoch(), result);
        Ok(session.state())
    }

    /// Persists the current outcome and, on success, drops the patient's
    /// cached history so the next history view shows this record.
    pub async fn persist(&self) -> Result<AnalysisState, AnalysisError> {
        let ticket = self.session()?.begin_persist()?;
        let result = self.archive.create(ticket.request()).await;

        let (state, invalidate) = {
            let mut session = self.session()?;
            let applied = session.finish_persist(ticket.epoch(), result);
            let persisted = applied && session.state() == AnalysisState::Persisted;
            (session.state(), persisted.then(|| session.patient_id()).flatten())
        };
        if let Some(patient_id) = invalidate {
            self.history.invalidate(patient_id);
        }
        Ok(state)
    }

    /// Resets the session; any in-flight response will arrive stale.
    pub fn close(&self) -> Result<(), AnalysisError> {
        self.session()?.reset();
        Ok(())
    }
}
