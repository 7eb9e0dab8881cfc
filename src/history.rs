//! Per-patient analysis history cache.
//!
//! The history dialog and the report generator both read prior analyses.
//! Records are fetched once per patient and kept until explicitly
//! invalidated (after a successful persist); there is no timer-based
//! refresh. A failed fetch degrades to an empty list so the dialogs stay
//! usable while the backend is down, and nothing is cached in that case
//! so the next load retries.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::api::AnalysisArchive;
use crate::models::AnalysisRecord;

pub struct AnalysisHistory {
    archive: Arc<dyn AnalysisArchive>,
    cache: RwLock<HashMap<i64, Vec<AnalysisRecord>>>,
}

impl AnalysisHistory {
    pub fn new(archive: Arc<dyn AnalysisArchive>) -> Self {
        Self {
            archive,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Records for one patient, most recent first.
    ///
    /// Serves the cached list when present. The backend returns records in
    /// insertion order, so the sort here is what gives the dialogs their
    /// newest-first display; equal timestamps keep backend order.
    pub async fn load(&self, patient_id: i64) -> Vec<AnalysisRecord> {
        if let Some(records) = self.cached(patient_id) {
            return records;
        }

        match self.archive.list_for_patient(patient_id).await {
            Ok(mut records) => {
                records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                tracing::info!(patient_id, count = records.len(), "analysis history loaded");
                self.write().insert(patient_id, records.clone());
                records
            }
            Err(e) => {
                tracing::warn!(patient_id, error = %e, "history fetch failed, showing empty");
                Vec::new()
            }
        }
    }

    /// Cached records without touching the backend.
    pub fn cached(&self, patient_id: i64) -> Option<Vec<AnalysisRecord>> {
        self.read().get(&patient_id).cloned()
    }

    /// Drops the cached list so the next `load` refetches. Called after a
    /// successful persist.
    pub fn invalidate(&self, patient_id: i64) {
        if self.write().remove(&patient_id).is_some() {
            tracing::debug!(patient_id, "analysis history invalidated");
        }
    }

    /// Findings text of the newest record, if that record carries any.
    /// Report generation uses this as its second-choice source.
    pub async fn latest_findings(&self, patient_id: i64) -> Option<String> {
        self.load(patient_id)
            .await
            .into_iter()
            .next()
            .and_then(|record| record.findings)
    }

    // The cache only ever holds plain record lists, so a poisoned lock
    // still guards valid data and can be recovered.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<i64, Vec<AnalysisRecord>>> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<i64, Vec<AnalysisRecord>>> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, MockBackend};
    use chrono::NaiveDate;

    fn make_record(id: i64, patient_id: i64, findings: Option<&str>, day: u32) -> AnalysisRecord {
        AnalysisRecord {
            id,
            patient_id,
            findings: findings.map(String::from),
            annotation: None,
            created_at: NaiveDate::from_ymd_opt(2024, 3, day)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
        }
    }

    #[tokio::test]
    async fn caches_after_first_load() {
        let mock = Arc::new(
            MockBackend::new().with_history(Ok(vec![make_record(1, 7, Some("{'A': 0.5}"), 1)])),
        );
        let history = AnalysisHistory::new(mock.clone());

        assert_eq!(history.load(7).await.len(), 1);
        assert_eq!(history.load(7).await.len(), 1);
        assert_eq!(mock.calls_to("list_for_patient"), 1);
    }

    #[tokio::test]
    async fn orders_most_recent_first() {
        let mock = Arc::new(MockBackend::new().with_history(Ok(vec![
            make_record(1, 7, None, 2),
            make_record(2, 7, None, 9),
            make_record(3, 7, None, 5),
        ])));
        let history = AnalysisHistory::new(mock);

        let ids: Vec<i64> = history.load(7).await.iter().map(|r| r.id).collect();
        assert_eq!(ids, [2, 3, 1]);
    }

    #[tokio::test]
    async fn equal_timestamps_keep_backend_order() {
        let mock = Arc::new(MockBackend::new().with_history(Ok(vec![
            make_record(4, 7, None, 3),
            make_record(9, 7, None, 5),
            make_record(2, 7, None, 3),
        ])));
        let history = AnalysisHistory::new(mock);

        let ids: Vec<i64> = history.load(7).await.iter().map(|r| r.id).collect();
        assert_eq!(ids, [9, 4, 2]);
    }

    #[tokio::test]
    async fn fetch_failure_yields_empty_and_is_not_cached() {
        let mock = Arc::new(
            MockBackend::new()
                .with_history(Err(ApiError::Transport("down".into())))
                .with_history(Ok(vec![make_record(1, 7, None, 1)])),
        );
        let history = AnalysisHistory::new(mock.clone());

        assert!(history.load(7).await.is_empty());
        assert_eq!(history.load(7).await.len(), 1);
        assert_eq!(mock.calls_to("list_for_patient"), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let mock = Arc::new(
            MockBackend::new()
                .with_history(Ok(vec![make_record(1, 7, None, 1)]))
                .with_history(Ok(vec![make_record(1, 7, None, 1), make_record(2, 7, None, 2)])),
        );
        let history = AnalysisHistory::new(mock.clone());

        assert_eq!(history.load(7).await.len(), 1);
        history.invalidate(7);
        assert_eq!(history.load(7).await.len(), 2);
        assert_eq!(mock.calls_to("list_for_patient"), 2);
    }

    #[tokio::test]
    async fn caches_per_patient() {
        let mock = Arc::new(
            MockBackend::new()
                .with_history(Ok(vec![make_record(1, 7, None, 1)]))
                .with_history(Ok(Vec::new())),
        );
        let history = AnalysisHistory::new(mock.clone());

        assert_eq!(history.load(7).await.len(), 1);
        assert!(history.load(8).await.is_empty());
        assert_eq!(history.load(7).await.len(), 1);
        assert_eq!(mock.calls_to("list_for_patient"), 2);
    }

    #[tokio::test]
    async fn latest_findings_reads_only_the_newest_record() {
        let mock = Arc::new(MockBackend::new().with_history(Ok(vec![
            make_record(1, 7, Some("{'Old': 0.2}"), 1),
            make_record(2, 7, Some("{'New': 0.9}"), 8),
        ])));
        let history = AnalysisHistory::new(mock);

        assert_eq!(history.latest_findings(7).await.as_deref(), Some("{'New': 0.9}"));
    }

    #[tokio::test]
    async fn latest_findings_is_none_when_newest_record_has_none() {
        let mock = Arc::new(MockBackend::new().with_history(Ok(vec![
            make_record(1, 7, Some("{'Old': 0.2}"), 1),
            make_record(2, 7, None, 8),
        ])));
        let history = AnalysisHistory::new(mock);

        assert_eq!(history.latest_findings(7).await, None);
    }
}
