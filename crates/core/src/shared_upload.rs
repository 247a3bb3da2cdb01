//! Upload page reached through a shared link.
//!
//! A clinic receives a link carrying a one-off `token` and uses it to upload a document
//! into the patient's records without signing in.

use crate::api::PortalApi;
use crate::models::UploadFile;
use crate::PortalError;
use reqwest::Url;
use std::sync::Arc;

/// Extracts the `token` query parameter from a shared link.
///
/// Accepts absolute links and bare paths such as `/upload?token=abc`. Returns `None` when
/// the parameter is missing or blank.
pub fn token_from_link(link: &str) -> Option<String> {
    let base = Url::parse("http://localhost/").ok()?;
    let url = base.join(link.trim()).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.trim().to_owned())
        .filter(|token| !token.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharedUploadStatus {
    Ready,
    InvalidLink,
    Uploading,
    Succeeded(String),
    Failed(String),
}

impl SharedUploadStatus {
    /// Banner text for the page, if the status has one.
    pub fn message(&self) -> Option<&str> {
        match self {
            SharedUploadStatus::InvalidLink => Some("Invalid or missing upload token."),
            SharedUploadStatus::Succeeded(message) | SharedUploadStatus::Failed(message) => {
                Some(message)
            }
            SharedUploadStatus::Ready | SharedUploadStatus::Uploading => None,
        }
    }
}

pub struct SharedUploadPage<A> {
    api: Arc<A>,
    token: Option<String>,
    selected: Option<UploadFile>,
    status: SharedUploadStatus,
}

impl<A: PortalApi> SharedUploadPage<A> {
    /// Reads the token once from `link`.
    pub fn mount(api: Arc<A>, link: &str) -> Self {
        let token = token_from_link(link);
        let status = if token.is_some() {
            SharedUploadStatus::Ready
        } else {
            tracing::warn!("shared upload link has no token");
            SharedUploadStatus::InvalidLink
        };
        Self {
            api,
            token,
            selected: None,
            status,
        }
    }

    pub fn status(&self) -> &SharedUploadStatus {
        &self.status
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    pub fn select(&mut self, file: UploadFile) {
        self.selected = Some(file);
    }

    pub fn selected(&self) -> Option<&UploadFile> {
        self.selected.as_ref()
    }

    /// Uploads the selected file.
    ///
    /// Does nothing when the link had no token or no file is selected. The outcome is
    /// left in [`status`](Self::status).
    pub async fn upload(&mut self) -> &SharedUploadStatus {
        let Some(token) = self.token.clone() else {
            self.status = SharedUploadStatus::InvalidLink;
            return &self.status;
        };
        let Some(file) = self.selected.take() else {
            self.status = SharedUploadStatus::Failed("Please select a file to upload.".into());
            return &self.status;
        };

        self.status = SharedUploadStatus::Uploading;
        match self.api.upload_with_token(&token, &file).await {
            Ok(receipt) => {
                tracing::debug!(
                    "shared upload of {} stored as {:?}",
                    file.file_name(),
                    receipt.record_id
                );
                self.status = SharedUploadStatus::Succeeded("Upload successful.".into());
            }
            Err(e) => {
                tracing::warn!("shared upload of {} failed: {}", file.file_name(), e);
                let message = match e {
                    PortalError::Network(_) => "Network error. Please try again.".into(),
                    other => other.user_message(),
                };
                self.selected = Some(file);
                self.status = SharedUploadStatus::Failed(message);
            }
        }
        &self.status
    }
}
