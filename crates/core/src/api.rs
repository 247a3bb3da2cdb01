//! The backend surface consumed by the portal.
//!
//! [`PortalApi`] lists every endpoint the client calls. Controllers are generic over it;
//! [`HttpPortalApi`] is the `reqwest` implementation used by the binaries.
//!
//! Authenticated calls take the [`Session`] explicitly and read the bearer token from
//! it at the start of each request.

use crate::config::ClientConfig;
use crate::constants::{DOWNLOAD_FALLBACK_PREFIX, UPLOAD_FIELD_NAME};
use crate::models::{
    AccessToken, ClinicQuery, ClinicSearchResponse, CurrentUser, DeleteConfirmation,
    DownloadedFile, NewUser, RecordId, RecordRequest, RecordRequestReceipt, RecordSummary,
    RegisteredUser, SharedUploadReceipt, UploadFile,
};
use crate::session::Session;
use crate::{PortalError, PortalResult};
use async_trait::async_trait;
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::{multipart, Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use std::path::Path;

#[async_trait]
pub trait PortalApi: Send + Sync {
    /// `POST /auth/token` with form-encoded credentials.
    async fn login(&self, username: &str, password: &str) -> PortalResult<AccessToken>;

    /// `POST /auth/register`.
    async fn register(&self, user: &NewUser) -> PortalResult<RegisteredUser>;

    /// `GET /users/me`.
    async fn current_user(&self, session: &Session) -> PortalResult<CurrentUser>;

    /// `GET /records/`.
    async fn list_records(&self, session: &Session) -> PortalResult<Vec<RecordSummary>>;

    /// `POST /records/upload` (multipart). Returns the canonical created record.
    async fn upload_record(
        &self,
        session: &Session,
        file: &UploadFile,
    ) -> PortalResult<RecordSummary>;

    /// `GET /records/{id}`.
    async fn get_record(&self, session: &Session, id: &RecordId) -> PortalResult<RecordSummary>;

    /// `GET /records/{id}/download`.
    async fn download_record(
        &self,
        session: &Session,
        id: &RecordId,
    ) -> PortalResult<DownloadedFile>;

    /// `DELETE /records/{id}`.
    async fn delete_record(
        &self,
        session: &Session,
        id: &RecordId,
    ) -> PortalResult<DeleteConfirmation>;

    /// `GET /clinics/search?name=&location=`.
    async fn search_clinics(&self, query: &ClinicQuery) -> PortalResult<ClinicSearchResponse>;

    /// `POST /requests/send-email`.
    async fn send_record_request(
        &self,
        session: &Session,
        request: &RecordRequest,
    ) -> PortalResult<RecordRequestReceipt>;

    /// `POST /records/tupload?token=`. Unauthenticated; the one-time token is the
    /// credential.
    async fn upload_with_token(
        &self,
        token: &str,
        file: &UploadFile,
    ) -> PortalResult<SharedUploadReceipt>;
}

/// `reqwest`-backed implementation of [`PortalApi`].
#[derive(Clone, Debug)]
pub struct HttpPortalApi {
    base_url: Url,
    client: Client,
}

impl HttpPortalApi {
    /// # Errors
    ///
    /// Returns `PortalError::Network` if the HTTP client cannot be constructed (for
    /// example when the TLS backend fails to initialise).
    pub fn new(cfg: &ClientConfig) -> PortalResult<Self> {
        let client = Client::builder()
            .timeout(cfg.request_timeout())
            .build()
            .map_err(PortalError::Network)?;

        Ok(Self {
            base_url: cfg.api_base_url().clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Joins path segments onto the base URL, percent-encoding each one.
    ///
    /// A trailing `""` segment produces a trailing slash (`/records/`).
    fn endpoint(&self, segments: &[&str]) -> PortalResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PortalError::Config(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorised(&self, builder: RequestBuilder, session: &Session) -> PortalResult<RequestBuilder> {
        Ok(builder.bearer_auth(session.bearer()?))
    }
}

fn send_error(e: reqwest::Error) -> PortalError {
    if e.is_decode() {
        PortalError::Decode(e.to_string())
    } else {
        PortalError::Network(e)
    }
}

/// Pulls a human-readable message out of an error body.
///
/// Understands FastAPI's `{"detail": "..."}`, its validation form
/// `{"detail": [{"msg": "..."}]}`, and a plain `{"message": "..."}`.
pub fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;

    match value.get("detail") {
        Some(serde_json::Value::String(detail)) if !detail.trim().is_empty() => {
            return Some(detail.clone());
        }
        Some(serde_json::Value::Array(items)) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                .collect();
            if !messages.is_empty() {
                return Some(messages.join("; "));
            }
        }
        _ => {}
    }

    value
        .get("message")
        .and_then(|m| m.as_str())
        .filter(|m| !m.trim().is_empty())
        .map(str::to_owned)
}

/// Passes successful responses through; turns anything else into `PortalError::Http`.
///
/// `fallback` builds the message from the status reason phrase when the body carries no
/// detail.
async fn check(response: Response, fallback: impl FnOnce(&str) -> String) -> PortalResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let reason = status.canonical_reason().unwrap_or("Error").to_owned();
    let body = response.text().await.unwrap_or_default();
    let message = error_detail(&body).unwrap_or_else(|| fallback(&reason));

    tracing::debug!("backend returned {}: {}", status, message);
    Err(PortalError::Http {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> PortalResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| PortalError::Decode(e.to_string()))
}

fn upload_form(file: &UploadFile) -> PortalResult<multipart::Form> {
    let part = multipart::Part::bytes(file.bytes().to_vec())
        .file_name(file.file_name().to_owned())
        .mime_str(&file.mime_type())
        .map_err(|e| PortalError::InvalidInput(format!("invalid MIME type: {e}")))?;
    Ok(multipart::Form::new().part(UPLOAD_FIELD_NAME, part))
}

/// Resolves the filename for a downloaded record.
///
/// Reads `filename="..."` or a bare `filename=...` from a `Content-Disposition` value,
/// matching the parameter name case-insensitively, and keeps only its final path
/// component. Falls back to `health_record_{id}`.
pub fn download_filename(content_disposition: Option<&str>, id: &RecordId) -> String {
    let fallback = || format!("{DOWNLOAD_FALLBACK_PREFIX}{id}");

    let Some(header) = content_disposition else {
        return fallback();
    };
    // ASCII lowercasing keeps byte offsets, so `start` indexes `header` too.
    let Some(start) = header.to_ascii_lowercase().find("filename=") else {
        return fallback();
    };

    let rest = header[start + "filename=".len()..].trim_start();
    let raw = match rest.strip_prefix('"') {
        Some(quoted) => quoted.split('"').next().unwrap_or_default(),
        None => rest.split(';').next().unwrap_or_default(),
    }
    .trim();

    Path::new(raw)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(fallback)
}

#[async_trait]
impl PortalApi for HttpPortalApi {
    async fn login(&self, username: &str, password: &str) -> PortalResult<AccessToken> {
        let url = self.endpoint(&["auth", "token"])?;
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .map_err(send_error)?;

        let response = check(response, |_| "Login failed".into()).await?;
        decode(response).await
    }

    async fn register(&self, user: &NewUser) -> PortalResult<RegisteredUser> {
        let url = self.endpoint(&["auth", "register"])?;
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .json(user)
            .send()
            .await
            .map_err(send_error)?;

        let response = check(response, |_| {
            "Something went wrong during registration!".into()
        })
        .await?;
        decode(response).await
    }

    async fn current_user(&self, session: &Session) -> PortalResult<CurrentUser> {
        let url = self.endpoint(&["users", "me"])?;
        let response = self
            .authorised(self.client.get(url), session)?
            .send()
            .await
            .map_err(send_error)?;

        let response = check(response, |_| "Failed to fetch user".into()).await?;
        decode(response).await
    }

    async fn list_records(&self, session: &Session) -> PortalResult<Vec<RecordSummary>> {
        let url = self.endpoint(&["records", ""])?;
        tracing::debug!("GET {}", url);

        let response = self
            .authorised(self.client.get(url), session)?
            .send()
            .await
            .map_err(send_error)?;

        let response = check(response, |reason| {
            format!("Failed to fetch records: {reason}")
        })
        .await?;
        decode(response).await
    }

    async fn upload_record(
        &self,
        session: &Session,
        file: &UploadFile,
    ) -> PortalResult<RecordSummary> {
        let url = self.endpoint(&["records", "upload"])?;
        tracing::debug!("POST {} ({}, {} bytes)", url, file.file_name(), file.len());

        let response = self
            .authorised(self.client.post(url), session)?
            .multipart(upload_form(file)?)
            .send()
            .await
            .map_err(send_error)?;

        let response = check(response, |reason| {
            format!("Failed to upload record: {reason}")
        })
        .await?;
        decode(response).await
    }

    async fn get_record(&self, session: &Session, id: &RecordId) -> PortalResult<RecordSummary> {
        let url = self.endpoint(&["records", id.as_str()])?;
        let response = self
            .authorised(self.client.get(url), session)?
            .send()
            .await
            .map_err(send_error)?;

        let response = check(response, |reason| {
            format!("Failed to fetch record: {reason}")
        })
        .await?;
        decode(response).await
    }

    async fn download_record(
        &self,
        session: &Session,
        id: &RecordId,
    ) -> PortalResult<DownloadedFile> {
        let url = self.endpoint(&["records", id.as_str(), "download"])?;
        tracing::debug!("GET {}", url);

        let response = self
            .authorised(self.client.get(url), session)?
            .send()
            .await
            .map_err(send_error)?;

        let response = check(response, |reason| {
            format!("Failed to download record: {reason}")
        })
        .await?;

        let file_name = download_filename(
            response
                .headers()
                .get(CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok()),
            id,
        );
        let bytes = response.bytes().await.map_err(send_error)?;

        Ok(DownloadedFile {
            file_name,
            bytes: bytes.to_vec(),
        })
    }

    async fn delete_record(
        &self,
        session: &Session,
        id: &RecordId,
    ) -> PortalResult<DeleteConfirmation> {
        let url = self.endpoint(&["records", id.as_str()])?;
        tracing::debug!("DELETE {}", url);

        let response = self
            .authorised(self.client.delete(url), session)?
            .send()
            .await
            .map_err(send_error)?;

        let response = check(response, |reason| {
            format!("Failed to delete record: {reason}")
        })
        .await?;
        let confirmation: DeleteConfirmation = decode(response).await?;
        tracing::debug!("record {} deleted: {}", id, confirmation.message);
        Ok(confirmation)
    }

    async fn search_clinics(&self, query: &ClinicQuery) -> PortalResult<ClinicSearchResponse> {
        let mut url = self.endpoint(&["clinics", "search"])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("name", query.name.as_str());
            if let Some(location) = &query.location {
                pairs.append_pair("location", location.as_str());
            }
        }
        tracing::debug!("GET {}", url);

        let response = self.client.get(url).send().await.map_err(send_error)?;
        let response = check(response, |_| "Failed to fetch clinics".into()).await?;
        decode(response).await
    }

    async fn send_record_request(
        &self,
        session: &Session,
        request: &RecordRequest,
    ) -> PortalResult<RecordRequestReceipt> {
        let url = self.endpoint(&["requests", "send-email"])?;
        tracing::debug!("POST {} ({})", url, request.clinic_name);

        let response = self
            .authorised(self.client.post(url), session)?
            .json(request)
            .send()
            .await
            .map_err(send_error)?;

        let response = check(response, |_| "Failed to send email".into()).await?;
        decode(response).await
    }

    async fn upload_with_token(
        &self,
        token: &str,
        file: &UploadFile,
    ) -> PortalResult<SharedUploadReceipt> {
        let mut url = self.endpoint(&["records", "tupload"])?;
        url.query_pairs_mut().append_pair("token", token);
        tracing::debug!("POST {}/records/tupload ({} bytes)", self.base_url, file.len());

        let response = self
            .client
            .post(url)
            .multipart(upload_form(file)?)
            .send()
            .await
            .map_err(send_error)?;

        let response = check(response, |_| "Upload failed. Please try again.".into()).await?;
        decode(response).await
    }
}
