//! # medst Core
//!
//! Client-side logic for the medst patient portal.
//!
//! This crate talks to the portal backend and keeps the client's view of it consistent:
//! - Record list synchronization (load, upload, delete) with a single status
//! - Debounced clinic search with sequence-number recency
//! - Record request dialog and shared-link uploads
//! - Session token storage and the login gate
//!
//! **No presentation concerns**: rendering and prompting belong in the `medst` CLI and
//! the `medst-run` shell.

pub mod account;
pub mod api;
pub mod config;
pub mod constants;
pub mod debounce;
pub mod error;
pub mod models;
pub mod records;
pub mod request;
pub mod scope;
pub mod search;
pub mod session;
pub mod shared_upload;

#[cfg(test)]
pub(crate) mod fake;

pub use account::AccountService;
pub use api::{HttpPortalApi, PortalApi};
pub use config::ClientConfig;
pub use error::{PortalError, PortalResult};
pub use records::{RecordsStatus, RecordsViewModel};
pub use request::RequestDialog;
pub use search::ClinicSearchController;
pub use session::{GuardOutcome, Session, SessionGuard};
pub use shared_upload::{SharedUploadPage, SharedUploadStatus};
