//! Report drafting workflow.
//!
//! Same split as the analysis module: `ReportDraftSession` is the pure
//! state machine, `ReportWorkflow` weaves the backend calls around it.
//! A draft is `New` until its first successful save; the id captured from
//! the create response upgrades it to `Existing`, and every save after
//! that is an update. The create-vs-update decision always reads the
//! draft variant, never a sentinel id.
//!
//! Generation sources its findings from, in order: the caller's explicit
//! text, the patient's newest stored analysis, and finally a fixed
//! placeholder note, so generation never hard-fails just because the
//! patient has no priors. Resolving that source happens outside the
//! session lock, so `begin_generate` re-presents the epoch the precheck
//! handed out; a reset in that window makes the start itself stale and
//! the action dies before any network call.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::api::{ApiError, ReportService};
use crate::history::AnalysisHistory;
use crate::models::{NewReport, ReportRecord};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Findings text used when generation is requested with nothing explicit
/// and no stored analysis exists. States the absence of priors; it is not
/// a clinical statement about the patient.
pub const DEFAULT_FINDINGS_NOTE: &str = "No prior AI findings are available for this patient.";

// ---------------------------------------------------------------------------
// States and errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportState {
    Idle,
    Generating,
    Ready,
    GenerationFailed,
    Editing,
    Saving,
    Saved,
    SaveFailed,
}

impl ReportState {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportState::Idle => "idle",
            ReportState::Generating => "generating",
            ReportState::Ready => "ready",
            ReportState::GenerationFailed => "generation_failed",
            ReportState::Editing => "editing",
            ReportState::Saving => "saving",
            ReportState::Saved => "saved",
            ReportState::SaveFailed => "save_failed",
        }
    }
}

impl std::fmt::Display for ReportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("{op} is not allowed in state {state}")]
    InvalidState {
        op: &'static str,
        state: ReportState,
    },

    #[error("A {0} request is already in flight")]
    Busy(&'static str),

    #[error("No patient bound to this session")]
    MissingPatient,

    #[error("No draft to {0}")]
    NoDraft(&'static str),

    #[error("Report session lock poisoned")]
    LockPoisoned,
}

// ---------------------------------------------------------------------------
// Draft
// ---------------------------------------------------------------------------

/// A report draft and its identity binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Draft {
    /// Never saved; the next save creates.
    New { content: String },
    /// Bound to a stored report; the next save updates it.
    Existing { id: i64, content: String },
}

impl Draft {
    pub fn content(&self) -> &str {
        match self {
            Draft::New { content } | Draft::Existing { content, .. } => content,
        }
    }

    pub fn report_id(&self) -> Option<i64> {
        match self {
            Draft::New { .. } => None,
            Draft::Existing { id, .. } => Some(*id),
        }
    }

    fn set_content(&mut self, text: String) {
        match self {
            Draft::New { content } | Draft::Existing { content, .. } => *content = text,
        }
    }
}

// ---------------------------------------------------------------------------
// Tickets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GenerateTicket {
    epoch: u64,
    patient_id: i64,
    findings: String,
}

impl GenerateTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn patient_id(&self) -> i64 {
        self.patient_id
    }

    pub fn findings(&self) -> &str {
        &self.findings
    }
}

/// What a save means for the backend, derived from the draft variant.
#[derive(Debug, Clone)]
pub enum SaveIntent {
    Create { request: NewReport },
    Update { report_id: i64, request: NewReport },
}

#[derive(Debug, Clone)]
pub struct SaveTicket {
    epoch: u64,
    intent: SaveIntent,
}

impl SaveTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn intent(&self) -> &SaveIntent {
        &self.intent
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The report dialog's state machine. Pure and synchronous.
#[derive(Debug)]
pub struct ReportDraftSession {
    patient_id: Option<i64>,
    state: ReportState,
    draft: Option<Draft>,
    source_findings: Option<String>,
    last_saved: Option<ReportRecord>,
    last_error: Option<String>,
    epoch: u64,
}

impl ReportDraftSession {
    pub fn new() -> Self {
        Self {
            patient_id: None,
            state: ReportState::Idle,
            draft: None,
            source_findings: None,
            last_saved: None,
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

    pub fn state(&self) -> ReportState {
        self.state
    }

    pub fn patient_id(&self) -> Option<i64> {
        self.patient_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn draft(&self) -> Option<&Draft> {
        self.draft.as_ref()
    }

    /// Findings text the current draft was generated from.
    pub fn source_findings(&self) -> Option<&str> {
        self.source_findings.as_deref()
    }

    pub fn last_saved(&self) -> Option<&ReportRecord> {
        self.last_saved.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// State-only precheck for generation, so the driver can reject bad
    /// calls before it resolves a findings source. Returns the patient
    /// and the epoch the eventual `begin_generate` must present.
    pub fn can_generate(&self) -> Result<(i64, u64), ReportError> {
        match self.state {
            ReportState::Generating => return Err(ReportError::Busy("generate")),
            ReportState::Idle | ReportState::GenerationFailed => {}
            state => {
                return Err(ReportError::InvalidState {
                    op: "generate",
                    state,
                })
            }
        }
        let patient_id = self.patient_id.ok_or(ReportError::MissingPatient)?;
        Ok((patient_id, self.epoch))
    }

    /// Starts a generation with an already-resolved findings source.
    ///
    /// `epoch` is the value `can_generate` handed out before the source
    /// was resolved. A mismatch means the session was reset in between;
    /// the start itself is stale and is discarded as `Ok(None)` without
    /// touching the session.
    pub fn begin_generate(
        &mut self,
        epoch: u64,
        findings: String,
    ) -> Result<Option<GenerateTicket>, ReportError> {
        if epoch != self.epoch {
            tracing::debug!(
                started_epoch = epoch,
                current_epoch = self.epoch,
                "stale generation start discarded"
            );
            return Ok(None);
        }
        let (patient_id, epoch) = self.can_generate()?;
        let ticket = GenerateTicket {
            epoch,
            patient_id,
            findings: findings.clone(),
        };
        self.source_findings = Some(findings);
        self.last_error = None;
        self.state = ReportState::Generating;
        Ok(Some(ticket))
    }

    /// Applies a generation result. Returns false when discarded as stale.
    pub fn finish_generate(&mut self, epoch: u64, result: Result<String, ApiError>) -> bool {
        if epoch != self.epoch {
            tracing::debug!(
                ticket_epoch = epoch,
                current_epoch = self.epoch,
                "stale generation response discarded"
            );
            return false;
        }
        if self.state != ReportState::Generating {
            tracing::warn!(state = %self.state, "generation response outside generating discarded");
            return false;
        }

        match result {
            Ok(content) => {
                tracing::info!(chars = content.len(), "report draft generated");
                self.draft = Some(Draft::New { content });
                self.state = ReportState::Ready;
            }
            Err(e) => {
                crate::api::error::log_failure("report generation", &e);
                self.last_error = Some(e.to_string());
                self.state = ReportState::GenerationFailed;
            }
        }
        true
    }

    /// Replaces the draft buffer. Local only, never a network call.
    pub fn edit(&mut self, text: impl Into<String>) -> Result<(), ReportError> {
        match self.state {
            ReportState::Ready
            | ReportState::Editing
            | ReportState::Saved
            | ReportState::SaveFailed => {}
            state => return Err(ReportError::InvalidState { op: "edit", state }),
        }
        let draft = self.draft.as_mut().ok_or(ReportError::NoDraft("edit"))?;
        draft.set_content(text.into());
        self.state = ReportState::Editing;
        Ok(())
    }

    /// Starts a save. `Draft::New` becomes a create intent,
    /// `Draft::Existing` an update intent for its bound id.
    pub fn begin_save(&mut self) -> Result<SaveTicket, ReportError> {
        match self.state {
            ReportState::Saving => return Err(ReportError::Busy("save")),
            ReportState::Ready
            | ReportState::Editing
            | ReportState::Saved
            | ReportState::SaveFailed => {}
            state => return Err(ReportError::InvalidState { op: "save", state }),
        }
        let patient_id = self.patient_id.ok_or(ReportError::MissingPatient)?;
        let draft = self.draft.as_ref().ok_or(ReportError::NoDraft("save"))?;

        let request = NewReport {
            patient_id,
            content: Some(draft.content().to_string()),
        };
        let intent = match draft.report_id() {
            None => SaveIntent::Create { request },
            Some(report_id) => SaveIntent::Update { report_id, request },
        };
        let ticket = SaveTicket {
            epoch: self.epoch,
            intent,
        };
        self.last_error = None;
        self.state = ReportState::Saving;
        Ok(ticket)
    }

    /// Applies a save result. On a successful create, the returned id
    /// upgrades the draft to `Existing` so the next save updates instead
    /// of creating again. On failure the buffer and the draft variant are
    /// left exactly as they were.
    pub fn finish_save(&mut self, epoch: u64, result: Result<ReportRecord, ApiError>) -> bool {
        if epoch != self.epoch {
            tracing::debug!(
                ticket_epoch = epoch,
                current_epoch = self.epoch,
                "stale save response discarded"
            );
            return false;
        }
        if self.state != ReportState::Saving {
            tracing::warn!(state = %self.state, "save response outside saving discarded");
            return false;
        }

        match result {
            Ok(record) => {
                match self.draft.take() {
                    Some(Draft::New { content }) => {
                        tracing::info!(report_id = record.id, "report created");
                        self.draft = Some(Draft::Existing {
                            id: record.id,
                            content,
                        });
                    }
                    existing => {
                        tracing::info!(report_id = record.id, "report updated");
                        self.draft = existing;
                    }
                }
                self.last_saved = Some(record);
                self.state = ReportState::Saved;
            }
            Err(e) => {
                crate::api::error::log_failure("report save", &e);
                self.last_error = Some(e.to_string());
                self.state = ReportState::SaveFailed;
            }
        }
        true
    }

    /// Back to idle: buffer, identity binding and errors are discarded,
    /// and the epoch moves on so in-flight responses become stale.
    pub fn reset(&mut self) {
        self.epoch += 1;
        self.draft = None;
        self.source_findings = None;
        self.last_saved = None;
        self.last_error = None;
        self.state = ReportState::Idle;
        tracing::debug!(epoch = self.epoch, "report session reset");
    }
}

impl Default for ReportDraftSession {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Workflow driver
// ---------------------------------------------------------------------------

/// Serializable view of a session for the embedding shell.
#[derive(Debug, Clone, Serialize)]
pub struct ReportSnapshot {
    pub state: ReportState,
    pub patient_id: Option<i64>,
    pub content: Option<String>,
    pub report_id: Option<i64>,
    pub source_findings: Option<String>,
    pub last_error: Option<String>,
}

/// Drives a `ReportDraftSession` against the report service, resolving
/// the findings fallback chain through the shared history store.
pub struct ReportWorkflow {
    reports: Arc<dyn ReportService>,
    history: Arc<AnalysisHistory>,
    session: Mutex<ReportDraftSession>,
}

impl ReportWorkflow {
    pub fn new(
        reports: Arc<dyn ReportService>,
        history: Arc<AnalysisHistory>,
        patient_id: i64,
    ) -> Self {
        Self {
            reports,
            history,
            session: Mutex::new(ReportDraftSession::for_patient(patient_id)),
        }
    }

    fn session(&self) -> Result<MutexGuard<'_, ReportDraftSession>, ReportError> {
        self.session.lock().map_err(|_| ReportError::LockPoisoned)
    }

    pub fn state(&self) -> Result<ReportState, ReportError> {
        Ok(self.session()?.state())
    }

    pub fn snapshot(&self) -> Result<ReportSnapshot, ReportError> {
        let session = self.session()?;
        Ok(ReportSnapshot {
            state: session.state(),
            patient_id: session.patient_id(),
            content: session.draft().map(|d| d.content().to_string()),
            report_id: session.draft().and_then(|d| d.report_id()),
            source_findings: session.source_findings().map(String::from),
            last_error: session.last_error().map(String::from),
        })
    }

    /// Generates a draft. Findings come from the explicit argument, else
    /// the patient's newest stored analysis, else the placeholder note.
    pub async fn generate(&self, explicit: Option<String>) -> Result<ReportState, ReportError> {
        let (patient_id, epoch) = self.session()?.can_generate()?;

        let findings = match explicit {
            Some(text) => text,
            None => self
                .history
                .latest_findings(patient_id)
                .await
                .unwrap_or_else(|| DEFAULT_FINDINGS_NOTE.to_string()),
        };

        let ticket = {
            let mut session = self.session()?;
            match session.begin_generate(epoch, findings)? {
                Some(ticket) => ticket,
                // Reset landed while the findings source was resolving.
                None => return Ok(session.state()),
            }
        };
        tracing::info!(patient_id, "requesting report generation");
        let result = self
            .reports
            .generate(ticket.patient_id(), ticket.findings())
            .await;

        let mut session = self.session()?;
        session.finish_generate(ticket.epoch(), result);
        Ok(session.state())
    }

    pub fn edit(&self, text: impl Into<String>) -> Result<(), ReportError> {
        self.session()?.edit(text)
    }

    /// Saves the draft: first success creates, every one after updates.
    pub async fn save(&self) -> Result<ReportState, ReportError> {
        let ticket = self.session()?.begin_save()?;
        let result = match ticket.intent() {
            SaveIntent::Create { request } => self.reports.create(request).await,
            SaveIntent::Update { report_id, request } => {
                self.reports.update(*report_id, request).await
            }
        };

        let mut session = self.session()?;
        session.finish_save(ticket.epoch(), result);
        Ok(session.state())
    }

    /// Resets the session; the draft and its id binding are discarded.
    pub fn close(&self) -> Result<(), ReportError> {
        self.session()?.reset();
        Ok(())
    }
}
