//! Wire and view types exchanged with the medst backend.
//!
//! Field names follow the backend's JSON. Anything the backend may omit or send as
//! `null` is optional here, and unknown fields are ignored so that backend additions do
//! not break older clients.

use crate::constants::{CONTEXT_SNIPPET_CHARS, DEFAULT_USER_ROLE};
use crate::{PortalError, PortalResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use medst_types::{EmailAddress, NonEmptyText};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

// ============================================================================
// RECORDS
// ============================================================================

/// Server-assigned record identifier.
///
/// The backend currently issues integers; the client treats the value as opaque and
/// accepts either a JSON number or string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub struct RecordId(String);

impl RecordId {
    pub fn new(raw: impl AsRef<str>) -> PortalResult<Self> {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            return Err(PortalError::InvalidInput("record id cannot be empty".into()));
        }
        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordId {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<RecordId> for String {
    fn from(value: RecordId) -> Self {
        value.0
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Ok(RecordId::from(n)),
            Raw::Str(s) => RecordId::new(s).map_err(serde::de::Error::custom),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parses a backend timestamp. RFC 3339 values keep their offset; naive ISO values
/// (which is what the backend emits today) are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw:?}")))
}

/// Fields extracted from a document by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredData {
    #[serde(default, deserialize_with = "null_as_default")]
    pub diagnosis: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub medications: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sections: BTreeMap<String, Option<String>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StructuredData {
    /// Returns a named section when it is present and non-blank.
    pub fn section(&self, name: &str) -> Option<&str> {
        self.sections
            .get(name)
            .and_then(|v| v.as_deref())
            .filter(|v| !v.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.diagnosis.is_empty()
            && self.medications.is_empty()
            && self.sections.values().all(Option::is_none)
            && self.extra.is_empty()
    }
}

/// One uploaded health document as known to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub id: RecordId,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub provider_clinic: Option<String>,
    #[serde(default)]
    pub provider_specialty: Option<String>,
    #[serde(default)]
    pub visit_date: Option<String>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub structured_data: StructuredData,
    #[serde(default)]
    pub content_text: Option<String>,
}

/// Formats a date the way the record card does: `January 5, 2024`.
pub fn format_long_date(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

impl RecordSummary {
    /// The visit date, when the backend managed to normalise it to `YYYY-MM-DD`.
    pub fn visit_date_parsed(&self) -> Option<NaiveDate> {
        self.visit_date
            .as_deref()
            .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok())
    }

    fn visit_date_display(&self) -> Option<String> {
        let raw = self.visit_date.as_deref().filter(|v| !v.trim().is_empty())?;
        Some(
            self.visit_date_parsed()
                .map(format_long_date)
                .unwrap_or_else(|| raw.to_owned()),
        )
    }

    /// Human label for the document type tag.
    pub fn document_type_label(&self) -> String {
        document_type_label(self.document_type.as_deref())
    }

    /// Title shown in lists: type, provider and visit date where known.
    pub fn title(&self) -> String {
        let label = self.document_type_label();
        let provider = self
            .provider_name
            .as_deref()
            .or(self.provider_clinic.as_deref())
            .filter(|p| !p.trim().is_empty());

        match (provider, self.visit_date_display()) {
            (Some(provider), Some(date)) => format!("{label} - {provider} ({date})"),
            (Some(provider), None) => format!("{label} - {provider}"),
            (None, Some(date)) => format!("{label} ({date})"),
            (None, None) => format!("{label} - Record #{}", self.id),
        }
    }

    /// One-line summary of the extracted clinical content.
    pub fn context_summary(&self) -> String {
        let data = &self.structured_data;
        let mut parts = Vec::new();

        if !data.diagnosis.is_empty() {
            parts.push(format!("Diagnosis: {}", first_two(&data.diagnosis)));
        }
        if !data.medications.is_empty() {
            parts.push(format!("Medications: {}", first_two(&data.medications)));
        }
        if let Some(assessment) = data.section("assessment") {
            parts.push(format!("Assessment: {}...", snippet(assessment)));
        } else if let Some(complaint) = data.section("presenting_complaint") {
            parts.push(format!("Complaint: {}...", snippet(complaint)));
        }

        if parts.is_empty() {
            "Health record document".into()
        } else {
            parts.join(" . ")
        }
    }
}

fn first_two(items: &[String]) -> String {
    items.iter().take(2).map(String::as_str).collect::<Vec<_>>().join(", ")
}

fn snippet(text: &str) -> String {
    text.chars().take(CONTEXT_SNIPPET_CHARS).collect()
}

pub fn document_type_label(document_type: Option<&str>) -> String {
    match document_type.map(str::to_ascii_lowercase).as_deref() {
        Some("pathology_report") => "Pathology Report".into(),
        Some("referral") => "Referral".into(),
        Some("gp_note") => "GP Note".into(),
        _ => document_type
            .filter(|t| !t.trim().is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| "Health Record".into()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteConfirmation {
    #[serde(default)]
    pub message: String,
}

/// Reply to an upload made through a shared link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedUploadReceipt {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub record_id: Option<RecordId>,
}

/// A file selected for upload.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadFile {
    file_name: String,
    bytes: Vec<u8>,
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl UploadFile {
    /// Wraps in-memory bytes. The only client-side check is that the blob is non-empty;
    /// type and size are for the backend to judge.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> PortalResult<Self> {
        let file_name = file_name.into();
        if bytes.is_empty() {
            return Err(PortalError::InvalidInput(format!(
                "file {file_name:?} is empty"
            )));
        }
        if file_name.trim().is_empty() {
            return Err(PortalError::InvalidInput("file name cannot be empty".into()));
        }
        Ok(Self { file_name, bytes })
    }

    pub async fn from_path(path: impl AsRef<Path>) -> PortalResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(PortalError::FileRead)?;
        let file_name = path
            .file_name()
            .and_then(|os| os.to_str())
            .unwrap_or("upload")
            .to_string();
        Self::new(file_name, bytes)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
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

    pub fn mime_type(&self) -> String {
        mime_guess::from_path(&self.file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_owned()
    }
}

/// A downloaded record file together with the name it should be saved under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

// ============================================================================
// CLINICS AND REQUESTS
// ============================================================================

/// One clinic search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicResult {
    pub place_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default, rename = "user_ratings_total")]
    pub review_count: Option<u32>,
}

impl ClinicResult {
    /// `4.5 (120 reviews)`, or `N/A (0 reviews)` for unrated places.
    pub fn rating_display(&self) -> String {
        let rating = self
            .rating
            .map(|r| r.to_string())
            .unwrap_or_else(|| "N/A".into());
        format!("{rating} ({} reviews)", self.review_count.unwrap_or(0))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicSearchResponse {
    #[serde(default)]
    pub count: usize,
    #[serde(default, deserialize_with = "null_as_default")]
    pub results: Vec<ClinicResult>,
}

/// Parameters of a clinic search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClinicQuery {
    pub name: NonEmptyText,
    pub location: Option<NonEmptyText>,
}

/// Kind of records a clinic is asked to upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    #[default]
    Doctor,
    Pathology,
    Radiology,
    Physiotherapy,
    Other,
}

impl ServiceType {
    pub const ALL: [ServiceType; 5] = [
        ServiceType::Doctor,
        ServiceType::Pathology,
        ServiceType::Radiology,
        ServiceType::Physiotherapy,
        ServiceType::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Doctor => "doctor",
            ServiceType::Pathology => "pathology",
            ServiceType::Radiology => "radiology",
            ServiceType::Physiotherapy => "physiotherapy",
            ServiceType::Other => "other",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ServiceType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| PortalError::InvalidInput(format!("unknown service type: {s:?}")))
    }
}

/// Body of `POST /requests/send-email`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordRequest {
    pub clinic_name: String,
    pub service_type: ServiceType,
    pub email: EmailAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRequestReceipt {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub patient_name: String,
}

// ============================================================================
// ACCOUNTS
// ============================================================================

/// Body of `POST /auth/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewUser {
    pub email: EmailAddress,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dob: Option<String>,
    pub role: String,
}

impl NewUser {
    pub fn patient(
        email: EmailAddress,
        password: impl Into<String>,
        full_name: Option<String>,
        dob: Option<String>,
    ) -> PortalResult<Self> {
        let password = password.into();
        if password.is_empty() {
            return Err(PortalError::InvalidInput("password is required".into()));
        }
        Ok(Self {
            email,
            password,
            full_name: full_name.filter(|n| !n.trim().is_empty()),
            dob: dob.filter(|d| !d.trim().is_empty()),
            role: DEFAULT_USER_ROLE.into(),
        })
    }
}

/// Account as returned by registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredUser {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub dob: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Profile of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl CurrentUser {
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("Unknown User")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> RecordSummary {
        serde_json::from_value(value).expect("record should deserialize")
    }

    #[test]
    fn record_accepts_backend_shape() {
        let r = record(json!({
            "id": 7,
            "patient_id": 3,
            "document_type": "gp_note",
            "visit_date": "2024-03-05",
            "provider_name": "Dr Lee",
            "provider_clinic": null,
            "provider_specialty": null,
            "storage_key": "3/abc.pdf",
            "structured_data": {
                "diagnosis": ["Hypertension"],
                "medications": ["Amlodipine 5mg", "Aspirin"],
                "sections": {"assessment": "Stable", "plan": null},
                "labs": []
            },
            "created_at": "2024-03-06T10:11:12.123456"
        }));

        assert_eq!(r.id, RecordId::from(7));
        assert_eq!(r.visit_date_parsed(), NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(r.structured_data.section("assessment"), Some("Stable"));
        assert_eq!(r.structured_data.section("plan"), None);
        assert!(r.structured_data.extra.contains_key("labs"));
        assert_eq!(r.created_at.to_rfc3339(), "2024-03-06T10:11:12.123456+00:00");
    }

    #[test]
    fn record_tolerates_null_structured_data() {
        let r = record(json!({
            "id": "r-1",
            "structured_data": null,
            "created_at": "2024-03-06T10:11:12Z"
        }));
        assert!(r.structured_data.is_empty());
        assert_eq!(r.id.as_str(), "r-1");
        assert_eq!(r.title(), "Health Record - Record #r-1");
        assert_eq!(r.context_summary(), "Health record document");
    }

    #[test]
    fn record_rejects_bad_timestamp() {
        let err = serde_json::from_value::<RecordSummary>(json!({
            "id": 1,
            "created_at": "yesterday"
        }));
        assert!(err.is_err());
    }

    #[test]
    fn title_combines_provider_and_date() {
        let r = record(json!({
            "id": 1,
            "document_type": "pathology_report",
            "provider_clinic": "City Pathology",
            "visit_date": "2023-11-20",
            "created_at": "2023-11-21T00:00:00"
        }));
        assert_eq!(r.title(), "Pathology Report - City Pathology (November 20, 2023)");

        let r = record(json!({
            "id": 2,
            "document_type": "discharge_summary",
            "visit_date": "20/11/2023",
            "created_at": "2023-11-21T00:00:00"
        }));
        assert_eq!(r.title(), "discharge_summary (20/11/2023)");
    }

    #[test]
    fn context_summary_truncates_assessment() {
        let long = "x".repeat(150);
        let r = record(json!({
            "id": 1,
            "structured_data": {
                "diagnosis": ["A", "B", "C"],
                "medications": [],
                "sections": {"assessment": long, "presenting_complaint": "Cough"}
            },
            "created_at": "2023-11-21T00:00:00"
        }));
        let summary = r.context_summary();
        assert!(summary.starts_with("Diagnosis: A, B . Assessment: "));
        assert!(summary.ends_with(&format!("{}...", "x".repeat(100))));
    }

    #[test]
    fn context_summary_falls_back_to_complaint() {
        let r = record(json!({
            "id": 1,
            "structured_data": {"sections": {"presenting_complaint": "Cough"}},
            "created_at": "2023-11-21T00:00:00"
        }));
        assert_eq!(r.context_summary(), "Complaint: Cough...");
    }

    #[test]
    fn service_type_parses_case_insensitively() {
        assert_eq!("Radiology".parse::<ServiceType>().unwrap(), ServiceType::Radiology);
        assert_eq!(ServiceType::default(), ServiceType::Doctor);
        assert!("dentist".parse::<ServiceType>().is_err());
        assert_eq!(
            serde_json::to_value(ServiceType::Physiotherapy).unwrap(),
            json!("physiotherapy")
        );
    }

    #[test]
    fn clinic_result_reads_review_total() {
        let c: ClinicResult = serde_json::from_value(json!({
            "place_id": "p1",
            "name": "Harbour Medical",
            "address": "1 Quay St",
            "rating": 4.5,
            "user_ratings_total": 120
        }))
        .unwrap();
        assert_eq!(c.review_count, Some(120));
        assert_eq!(c.rating_display(), "4.5 (120 reviews)");

        let c: ClinicResult =
            serde_json::from_value(json!({"place_id": "p2", "name": "New Clinic"})).unwrap();
        assert_eq!(c.rating_display(), "N/A (0 reviews)");
    }

    #[test]
    fn upload_file_rejects_empty_blob() {
        assert!(matches!(
            UploadFile::new("scan.pdf", Vec::new()),
            Err(PortalError::InvalidInput(_))
        ));
        let f = UploadFile::new("scan.pdf", vec![1, 2, 3]).unwrap();
        assert_eq!(f.mime_type(), "application/pdf");
        assert_eq!(f.len(), 3);
    }

    #[test]
    fn new_user_drops_blank_optionals() {
        let user = NewUser::patient(
            EmailAddress::parse("pat@example.com").unwrap(),
            "secret",
            Some(" ".into()),
            None,
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&user).unwrap(),
            json!({"email": "pat@example.com", "password": "secret", "role": "patient"})
        );
    }
}
