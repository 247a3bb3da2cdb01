//! In-memory [`PortalApi`] for controller tests.

use crate::api::PortalApi;
use crate::models::{
    AccessToken, ClinicQuery, ClinicResult, ClinicSearchResponse, CurrentUser, DeleteConfirmation,
    DownloadedFile, NewUser, RecordId, RecordRequest, RecordRequestReceipt, RecordSummary,
    RegisteredUser, SharedUploadReceipt, StructuredData, UploadFile,
};
use crate::session::Session;
use crate::{PortalError, PortalResult};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Login(String),
    Register(String),
    CurrentUser,
    ListRecords,
    UploadRecord(String),
    GetRecord(RecordId),
    DownloadRecord(RecordId),
    DeleteRecord(RecordId),
    SearchClinics {
        name: String,
        location: Option<String>,
    },
    SendRecordRequest(RecordRequest),
    UploadWithToken {
        token: String,
        file_name: String,
    },
}

pub(crate) fn sample_record(id: i64) -> RecordSummary {
    RecordSummary {
        id: RecordId::from(id),
        document_type: Some("gp_note".into()),
        provider_name: Some(format!("Dr {id}")),
        provider_clinic: None,
        provider_specialty: None,
        visit_date: Some("2024-01-15".into()),
        created_at: Utc.with_ymd_and_hms(2024, 1, 16, 9, 0, 0).unwrap(),
        structured_data: StructuredData::default(),
        content_text: None,
    }
}

pub(crate) fn sample_clinic(place_id: &str, name: &str) -> ClinicResult {
    ClinicResult {
        place_id: place_id.into(),
        name: name.into(),
        address: Some("1 Main St".into()),
        rating: Some(4.2),
        review_count: Some(10),
    }
}

#[derive(Default)]
pub(crate) struct FakePortalApi {
    records: Mutex<Vec<RecordSummary>>,
    next_id: AtomicI64,
    clinics: Mutex<HashMap<String, Vec<ClinicResult>>>,
    delays: Mutex<HashMap<String, Duration>>,
    failures: Mutex<HashMap<&'static str, (u16, String)>>,
    calls: Mutex<Vec<(Call, Instant)>>,
}

impl FakePortalApi {
    pub(crate) fn with_records(records: Vec<RecordSummary>) -> Self {
        let next = records
            .iter()
            .filter_map(|r| r.id.as_str().parse::<i64>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        Self {
            records: Mutex::new(records),
            next_id: AtomicI64::new(next),
            ..Self::default()
        }
    }

    /// Replaces the backend's collection behind the client's back.
    pub(crate) fn set_records(&self, records: Vec<RecordSummary>) {
        *self.records.lock().unwrap() = records;
    }

    pub(crate) fn set_clinics(&self, name: &str, results: Vec<ClinicResult>) {
        self.clinics.lock().unwrap().insert(name.into(), results);
    }

    /// Delays the operation (or the search for `key`) by `delay`.
    pub(crate) fn delay(&self, key: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(key.into(), delay);
    }

    /// Makes the next call of `op` fail with an HTTP error.
    pub(crate) fn fail_next(&self, op: &'static str, status: u16, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(op, (status, message.into()));
    }

    pub(crate) fn calls(&self) -> Vec<(Call, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| matches(c))
            .count()
    }

    async fn enter(&self, op: &'static str, call: Call, key: &str) -> PortalResult<()> {
        self.calls.lock().unwrap().push((call, Instant::now()));

        let delay = {
            let delays = self.delays.lock().unwrap();
            delays.get(key).or_else(|| delays.get(op)).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some((status, message)) = self.failures.lock().unwrap().remove(op) {
            return Err(PortalError::Http { status, message });
        }
        Ok(())
    }
}

#[async_trait]
impl PortalApi for FakePortalApi {
    async fn login(&self, username: &str, password: &str) -> PortalResult<AccessToken> {
        self.enter("login", Call::Login(username.into()), "login").await?;
        if password != "correct horse" {
            return Err(PortalError::Http {
                status: 401,
                message: "Invalid credentials".into(),
            });
        }
        Ok(AccessToken {
            access_token: format!("token-for-{username}"),
            token_type: Some("bearer".into()),
        })
    }

    async fn register(&self, user: &NewUser) -> PortalResult<RegisteredUser> {
        self.enter("register", Call::Register(user.email.to_string()), "register")
            .await?;
        Ok(RegisteredUser {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            email: user.email.to_string(),
            full_name: user.full_name.clone(),
            role: Some(user.role.clone()),
            dob: user.dob.clone(),
        })
    }

    async fn current_user(&self, session: &Session) -> PortalResult<CurrentUser> {
        session.bearer()?;
        self.enter("current_user", Call::CurrentUser, "current_user")
            .await?;
        Ok(CurrentUser {
            email: "pat@example.com".into(),
            full_name: Some("Pat Example".into()),
            avatar_url: None,
        })
    }

    async fn list_records(&self, session: &Session) -> PortalResult<Vec<RecordSummary>> {
        session.bearer()?;
        self.enter("list_records", Call::ListRecords, "list_records")
            .await?;
        Ok(self.records.lock().unwrap().clone())
    }

    async fn upload_record(
        &self,
        session: &Session,
        file: &UploadFile,
    ) -> PortalResult<RecordSummary> {
        session.bearer()?;
        self.enter(
            "upload_record",
            Call::UploadRecord(file.file_name().into()),
            "upload_record",
        )
        .await?;
        let record = sample_record(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.records.lock().unwrap().insert(0, record.clone());
        Ok(record)
    }

    async fn get_record(&self, session: &Session, id: &RecordId) -> PortalResult<RecordSummary> {
        session.bearer()?;
        self.enter("get_record", Call::GetRecord(id.clone()), "get_record")
            .await?;
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| &r.id == id)
            .cloned()
            .ok_or_else(|| PortalError::Http {
                status: 404,
                message: "Record not found".into(),
            })
    }

    async fn download_record(
        &self,
        session: &Session,
        id: &RecordId,
    ) -> PortalResult<DownloadedFile> {
        session.bearer()?;
        self.enter(
            "download_record",
            Call::DownloadRecord(id.clone()),
            "download_record",
        )
        .await?;
        Ok(DownloadedFile {
            file_name: format!("health_record_{id}.pdf"),
            bytes: b"%PDF-1.4".to_vec(),
        })
    }

    async fn delete_record(
        &self,
        session: &Session,
        id: &RecordId,
    ) -> PortalResult<DeleteConfirmation> {
        session.bearer()?;
        self.enter("delete_record", Call::DeleteRecord(id.clone()), "delete_record")
            .await?;
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| &r.id != id);
        if records.len() == before {
            return Err(PortalError::Http {
                status: 404,
                message: "Record not found".into(),
            });
        }
        Ok(DeleteConfirmation {
            message: "Record deleted successfully".into(),
        })
    }

    async fn search_clinics(&self, query: &ClinicQuery) -> PortalResult<ClinicSearchResponse> {
        let name = query.name.to_string();
        self.enter(
            "search_clinics",
            Call::SearchClinics {
                name: name.clone(),
                location: query.location.as_ref().map(|l| l.to_string()),
            },
            &name,
        )
        .await?;
        let results = self
            .clinics
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .unwrap_or_default();
        Ok(ClinicSearchResponse {
            count: results.len(),
            results,
        })
    }

    async fn send_record_request(
        &self,
        session: &Session,
        request: &RecordRequest,
    ) -> PortalResult<RecordRequestReceipt> {
        session.bearer()?;
        self.enter(
            "send_record_request",
            Call::SendRecordRequest(request.clone()),
            "send_record_request",
        )
        .await?;
        Ok(RecordRequestReceipt {
            message: "Email sent successfully".into(),
            link: "http://localhost:3000/upload?token=abc".into(),
            patient_name: "Pat Example".into(),
        })
    }

    async fn upload_with_token(
        &self,
        token: &str,
        file: &UploadFile,
    ) -> PortalResult<SharedUploadReceipt> {
        self.enter(
            "upload_with_token",
            Call::UploadWithToken {
                token: token.into(),
                file_name: file.file_name().into(),
            },
            "upload_with_token",
        )
        .await?;
        Ok(SharedUploadReceipt {
            message: "Upload successful".into(),
            record_id: Some(RecordId::from(self.next_id.fetch_add(1, Ordering::SeqCst))),
        })
    }
}
