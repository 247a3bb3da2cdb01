//! Record synchronization view-model.
//!
//! Keeps a client-local mirror of the backend's record collection in step with the
//! user's load, upload and delete actions.
//!
//! ## State
//!
//! ```text
//!            load()                 upload()
//!   Idle ───────────▶ Loading   Idle ─────────▶ Uploading
//!    ▲                  │        ▲                  │
//!    └──── success ─────┤        └──── success ─────┤
//!                       ▼                           ▼
//!                 Error(message) ◀──── failure ─────┘
//! ```
//!
//! `delete()` does not touch the status; its failure is returned to the caller.
//!
//! Operations are not serialized. When two of them race, whichever response lands last
//! decides the contents of `records`. The status is derived from the work still in
//! flight: an upload keeps the view `Uploading` until it settles, whatever a concurrent
//! load does, and a failure stays visible until the next operation starts.

use crate::api::PortalApi;
use crate::models::{DownloadedFile, RecordId, RecordSummary, UploadFile};
use crate::scope::ViewScope;
use crate::session::Session;
use crate::{PortalError, PortalResult};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// What the records view is doing right now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RecordsStatus {
    #[default]
    Idle,
    Loading,
    Uploading,
    Error(String),
}

impl RecordsStatus {
    pub fn is_busy(&self) -> bool {
        matches!(self, RecordsStatus::Loading | RecordsStatus::Uploading)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            RecordsStatus::Error(message) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Busy {
    Loading,
    Uploading,
}

#[derive(Debug, Default)]
struct RecordsState {
    records: Vec<RecordSummary>,
    loading: usize,
    uploading: usize,
    error: Option<String>,
}

impl RecordsState {
    fn in_flight(&mut self, busy: Busy) -> &mut usize {
        match busy {
            Busy::Loading => &mut self.loading,
            Busy::Uploading => &mut self.uploading,
        }
    }

    fn status(&self) -> RecordsStatus {
        if self.uploading > 0 {
            RecordsStatus::Uploading
        } else if self.loading > 0 {
            RecordsStatus::Loading
        } else if let Some(message) = &self.error {
            RecordsStatus::Error(message.clone())
        } else {
            RecordsStatus::Idle
        }
    }
}

/// Retires one in-flight operation when dropped.
///
/// Covers every way an operation can end, including the caller dropping the future
/// mid-request.
struct ReleaseOnDrop<'a> {
    state: &'a Mutex<RecordsState>,
    busy: Busy,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let count = state.in_flight(self.busy);
        *count = count.saturating_sub(1);
    }
}

pub struct RecordsViewModel<A> {
    api: Arc<A>,
    session: Session,
    state: Mutex<RecordsState>,
    scope: ViewScope,
}

impl<A: PortalApi> RecordsViewModel<A> {
    /// Creates the view-model without fetching anything.
    pub fn new(api: Arc<A>, session: Session) -> Self {
        Self {
            api,
            session,
            state: Mutex::new(RecordsState::default()),
            scope: ViewScope::new(),
        }
    }

    /// Creates the view-model and performs the initial load, as when the records page is
    /// first shown.
    ///
    /// The view is returned even when that load fails (it is then in `Error`), together
    /// with the load's outcome so the caller can redirect on `NotAuthenticated`.
    pub async fn mount(api: Arc<A>, session: Session) -> (Self, PortalResult<()>) {
        let view = Self::new(api, session);
        let loaded = view.load().await;
        if let Err(e) = &loaded {
            tracing::warn!("initial records load failed: {}", e);
        }
        (view, loaded)
    }

    fn lock(&self) -> MutexGuard<'_, RecordsState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn enter(&self, busy: Busy) -> ReleaseOnDrop<'_> {
        let mut state = self.lock();
        *state.in_flight(busy) += 1;
        state.error = None;
        drop(state);
        ReleaseOnDrop {
            state: &self.state,
            busy,
        }
    }

    fn fail(&self, err: &PortalError) {
        if matches!(err, PortalError::Cancelled) {
            return;
        }
        self.lock().error = Some(err.user_message());
    }

    /// Replaces the collection with the backend's current one.
    ///
    /// # Errors
    ///
    /// The failure is also recorded as `RecordsStatus::Error`; it is returned so that
    /// callers can react to `NotAuthenticated` with a redirect.
    pub async fn load(&self) -> PortalResult<()> {
        let _release = self.enter(Busy::Loading);

        match self.scope.run(self.api.list_records(&self.session)).await {
            Ok(records) => {
                tracing::debug!("loaded {} records", records.len());
                let mut state = self.lock();
                state.records = records;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("failed to fetch records: {}", e);
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Uploads `file` and prepends the record the backend created for it.
    ///
    /// # Errors
    ///
    /// On failure the collection is untouched and the status becomes `Error`.
    pub async fn upload(&self, file: UploadFile) -> PortalResult<RecordSummary> {
        let _release = self.enter(Busy::Uploading);

        match self
            .scope
            .run(self.api.upload_record(&self.session, &file))
            .await
        {
            Ok(record) => {
                tracing::debug!("uploaded {} as record {}", file.file_name(), record.id);
                let mut state = self.lock();
                // A load that raced this upload may already contain the record.
                state.records.retain(|r| r.id != record.id);
                state.records.insert(0, record.clone());
                Ok(record)
            }
            Err(e) => {
                tracing::warn!("failed to upload {}: {}", file.file_name(), e);
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Deletes a record on the backend, then drops it from the collection.
    ///
    /// # Errors
    ///
    /// Returns the backend failure unchanged; the collection and status are untouched.
    pub async fn delete(&self, id: &RecordId) -> PortalResult<()> {
        tracing::debug!("deleting record {}", id);
        self.scope
            .run(self.api.delete_record(&self.session, id))
            .await?;

        let mut state = self.lock();
        let before = state.records.len();
        state.records.retain(|r| &r.id != id);
        tracing::debug!(
            "record {} removed locally ({} -> {} records)",
            id,
            before,
            state.records.len()
        );
        Ok(())
    }

    pub fn records(&self) -> Vec<RecordSummary> {
        self.lock().records.clone()
    }

    pub fn status(&self) -> RecordsStatus {
        self.lock().status()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Looks a record up in the local mirror.
    pub fn find(&self, id: &RecordId) -> Option<RecordSummary> {
        self.lock().records.iter().find(|r| &r.id == id).cloned()
    }

    /// Aborts every in-flight request. Later calls fail with `Cancelled`.
    pub fn teardown(&self) {
        self.scope.close();
    }
}

impl<A> Drop for RecordsViewModel<A> {
    fn drop(&mut self) {
        self.scope.close();
    }
}

/// Fetches one record for the detail view.
pub async fn fetch_record<A: PortalApi + ?Sized>(
    api: &A,
    session: &Session,
    id: &RecordId,
) -> PortalResult<RecordSummary> {
    api.get_record(session, id).await
}

/// Downloads a record and writes it into `dir` under the name chosen by the backend.
///
/// Returns the path written.
pub async fn download_record_to<A: PortalApi + ?Sized>(
    api: &A,
    session: &Session,
    id: &RecordId,
    dir: &Path,
) -> PortalResult<PathBuf> {
    let DownloadedFile { file_name, bytes } = api.download_record(session, id).await?;

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(PortalError::FileWrite)?;
    let path = dir.join(&file_name);
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(PortalError::FileWrite)?;

    tracing::debug!("downloaded record {} to {}", id, path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{sample_record, Call, FakePortalApi};
    use std::time::Duration;
    use tempfile::TempDir;

    fn signed_in() -> Session {
        let session = Session::in_memory();
        session.sign_in("tok").unwrap();
        session
    }

    fn ids(records: &[RecordSummary]) -> Vec<String> {
        records.iter().map(|r| r.id.to_string()).collect()
    }

    fn file() -> UploadFile {
        UploadFile::new("letter.pdf", b"%PDF".to_vec()).unwrap()
    }

    #[tokio::test]
    async fn mount_loads_once() {
        let api = Arc::new(FakePortalApi::with_records(vec![sample_record(1), sample_record(2)]));
        let (view, loaded) = RecordsViewModel::mount(api.clone(), signed_in()).await;

        loaded.unwrap();
        assert_eq!(ids(&view.records()), ["1", "2"]);
        assert_eq!(view.status(), RecordsStatus::Idle);
        assert_eq!(api.count(|c| *c == Call::ListRecords), 1);
    }

    #[tokio::test]
    async fn repeated_loads_converge_to_backend() {
        let api = Arc::new(FakePortalApi::with_records(vec![sample_record(1)]));
        let (view, _) = RecordsViewModel::mount(api.clone(), signed_in()).await;

        api.set_records(vec![sample_record(5), sample_record(4)]);
        view.load().await.unwrap();
        view.load().await.unwrap();

        assert_eq!(ids(&view.records()), ["5", "4"]);
        assert_eq!(view.status(), RecordsStatus::Idle);
    }

    #[tokio::test]
    async fn failed_load_sets_error_and_keeps_records() {
        let api = Arc::new(FakePortalApi::with_records(vec![sample_record(1)]));
        let (view, _) = RecordsViewModel::mount(api.clone(), signed_in()).await;

        api.fail_next("list_records", 500, "Failed to fetch records: Internal Server Error");
        let err = view.load().await.unwrap_err();

        assert!(matches!(err, PortalError::Http { status: 500, .. }));
        assert_eq!(
            view.status(),
            RecordsStatus::Error("Failed to fetch records: Internal Server Error".into())
        );
        assert_eq!(ids(&view.records()), ["1"]);

        view.load().await.unwrap();
        assert_eq!(view.status(), RecordsStatus::Idle);
    }

    #[tokio::test]
    async fn successful_upload_prepends_server_record() {
        let api = Arc::new(FakePortalApi::with_records(vec![sample_record(1)]));
        let (view, _) = RecordsViewModel::mount(api.clone(), signed_in()).await;

        let created = view.upload(file()).await.unwrap();

        assert_eq!(created.id, RecordId::from(2));
        assert_eq!(ids(&view.records()), ["2", "1"]);
        assert_eq!(view.status(), RecordsStatus::Idle);
    }

    #[tokio::test]
    async fn failed_upload_leaves_collection_untouched() {
        let api = Arc::new(FakePortalApi::with_records(vec![sample_record(1)]));
        let (view, _) = RecordsViewModel::mount(api.clone(), signed_in()).await;
        let before = view.records();

        api.fail_next("upload_record", 415, "Unsupported file type");
        assert!(view.upload(file()).await.is_err());

        assert_eq!(view.records(), before);
        let status = view.status();
        assert_eq!(status.error(), Some("Unsupported file type"));
        assert!(!status.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_upload_releases_uploading() {
        let api = Arc::new(FakePortalApi::with_records(vec![]));
        api.delay("upload_record", Duration::from_secs(5));
        let view = RecordsViewModel::new(api.clone(), signed_in());

        let outcome =
            tokio::time::timeout(Duration::from_millis(100), view.upload(file())).await;

        assert!(outcome.is_err());
        assert_eq!(view.status(), RecordsStatus::Idle);
        assert!(view.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn load_during_upload_keeps_uploading() {
        let api = Arc::new(FakePortalApi::with_records(vec![sample_record(1)]));
        api.delay("upload_record", Duration::from_secs(5));
        let view = Arc::new(RecordsViewModel::new(api.clone(), signed_in()));

        let uploader = {
            let view = Arc::clone(&view);
            tokio::spawn(async move { view.upload(file()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(view.status(), RecordsStatus::Uploading);

        view.load().await.unwrap();
        assert_eq!(view.status(), RecordsStatus::Uploading);

        uploader.await.unwrap().unwrap();
        assert_eq!(view.status(), RecordsStatus::Idle);
        assert_eq!(ids(&view.records()), ["2", "1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn upload_after_failed_load_keeps_error() {
        let api = Arc::new(FakePortalApi::with_records(vec![sample_record(1)]));
        api.delay("upload_record", Duration::from_secs(5));
        let view = Arc::new(RecordsViewModel::new(api.clone(), signed_in()));

        let uploader = {
            let view = Arc::clone(&view);
            tokio::spawn(async move { view.upload(file()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        api.fail_next("list_records", 500, "Failed to fetch records: boom");
        assert!(view.load().await.is_err());
        assert_eq!(view.status(), RecordsStatus::Uploading);

        uploader.await.unwrap().unwrap();
        assert_eq!(
            view.status(),
            RecordsStatus::Error("Failed to fetch records: boom".into())
        );
        assert_eq!(ids(&view.records()), ["2"]);

        view.load().await.unwrap();
        assert_eq!(view.status(), RecordsStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn load_that_already_holds_uploaded_record_keeps_one_copy() {
        let api = Arc::new(FakePortalApi::with_records(vec![sample_record(1)]));
        api.delay("upload_record", Duration::from_secs(5));
        let (view, _) = RecordsViewModel::mount(api.clone(), signed_in()).await;
        let view = Arc::new(view);

        let uploader = {
            let view = Arc::clone(&view);
            tokio::spawn(async move { view.upload(file()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The backend already lists the new record before the upload response arrives.
        api.set_records(vec![sample_record(2), sample_record(1)]);
        view.load().await.unwrap();
        assert_eq!(ids(&view.records()), ["2", "1"]);

        let created = uploader.await.unwrap().unwrap();
        assert_eq!(created.id, RecordId::from(2));

        let records = view.records();
        assert_eq!(ids(&records), ["2", "1"]);
        assert_eq!(records.iter().filter(|r| r.id == created.id).count(), 1);
        assert_eq!(view.status(), RecordsStatus::Idle);
    }

    #[tokio::test]
    async fn delete_removes_only_matching_record() {
        let api = Arc::new(FakePortalApi::with_records(vec![
            sample_record(3),
            sample_record(2),
            sample_record(1),
        ]));
        let (view, _) = RecordsViewModel::mount(api.clone(), signed_in()).await;

        view.delete(&RecordId::from(2)).await.unwrap();

        assert_eq!(ids(&view.records()), ["3", "1"]);
        assert!(view.find(&RecordId::from(2)).is_none());
        assert_eq!(view.status(), RecordsStatus::Idle);
    }

    #[tokio::test]
    async fn failed_delete_is_returned_and_changes_nothing() {
        let api = Arc::new(FakePortalApi::with_records(vec![sample_record(1)]));
        let (view, _) = RecordsViewModel::mount(api.clone(), signed_in()).await;

        api.fail_next("delete_record", 500, "Failed to delete record: boom");
        let err = view.delete(&RecordId::from(1)).await.unwrap_err();

        assert_eq!(err.user_message(), "Failed to delete record: boom");
        assert_eq!(ids(&view.records()), ["1"]);
        assert_eq!(view.status(), RecordsStatus::Idle);
    }

    #[tokio::test]
    async fn load_upload_delete_end_to_end() {
        let api = Arc::new(FakePortalApi::with_records(vec![sample_record(1)]));
        let (view, _) = RecordsViewModel::mount(api.clone(), signed_in()).await;
        assert_eq!(ids(&view.records()), ["1"]);

        view.upload(file()).await.unwrap();
        assert_eq!(ids(&view.records()), ["2", "1"]);

        view.delete(&RecordId::from(1)).await.unwrap();
        assert_eq!(ids(&view.records()), ["2"]);
    }

    #[tokio::test]
    async fn signed_out_load_requires_login() {
        let api = Arc::new(FakePortalApi::with_records(vec![sample_record(1)]));
        let (view, loaded) = RecordsViewModel::mount(api.clone(), Session::in_memory()).await;

        assert!(loaded.unwrap_err().is_redirect_to_login());
        assert!(view.is_empty());
        assert_eq!(view.status(), RecordsStatus::Error("Please log in to continue.".into()));
        let err = view.load().await.unwrap_err();
        assert!(err.is_redirect_to_login());
        assert_eq!(api.count(|c| *c == Call::ListRecords), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_cancels_in_flight_load() {
        let api = Arc::new(FakePortalApi::with_records(vec![sample_record(1)]));
        api.delay("list_records", Duration::from_secs(10));
        let view = Arc::new(RecordsViewModel::new(api.clone(), signed_in()));

        let loader = {
            let view = Arc::clone(&view);
            tokio::spawn(async move { view.load().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(view.status(), RecordsStatus::Loading);

        view.teardown();
        let result = loader.await.unwrap();

        assert!(matches!(result, Err(PortalError::Cancelled)));
        assert_eq!(view.status(), RecordsStatus::Idle);
        assert!(view.is_empty());
    }

    #[tokio::test]
    async fn download_writes_named_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let api = FakePortalApi::with_records(vec![sample_record(9)]);

        let path = download_record_to(&api, &signed_in(), &RecordId::from(9), temp_dir.path())
            .await
            .unwrap();

        assert_eq!(path, temp_dir.path().join("health_record_9.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4");
    }

    #[tokio::test]
    async fn fetch_record_reports_missing() {
        let api = FakePortalApi::with_records(vec![sample_record(1)]);
        let err = fetch_record(&api, &signed_in(), &RecordId::from(42))
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Record not found");
    }
}
