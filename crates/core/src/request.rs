//! Dialog that asks a clinic to upload records on the patient's behalf.

use crate::api::PortalApi;
use crate::models::{ClinicResult, RecordRequest, RecordRequestReceipt, ServiceType};
use crate::session::Session;
use crate::{PortalError, PortalResult};
use medst_types::EmailAddress;
use std::sync::Arc;

pub struct RequestDialog<A> {
    api: Arc<A>,
    session: Session,
    clinic: Option<ClinicResult>,
    email: String,
    service_type: ServiceType,
    error: Option<String>,
}

impl<A: PortalApi> RequestDialog<A> {
    pub fn new(api: Arc<A>, session: Session) -> Self {
        Self {
            api,
            session,
            clinic: None,
            email: String::new(),
            service_type: ServiceType::default(),
            error: None,
        }
    }

    /// Opens the dialog for `clinic`. Fields typed earlier are kept.
    pub fn open(&mut self, clinic: ClinicResult) {
        self.clinic = Some(clinic);
        self.error = None;
    }

    pub fn close(&mut self) {
        self.clinic = None;
        self.error = None;
    }

    pub fn is_open(&self) -> bool {
        self.clinic.is_some()
    }

    pub fn clinic(&self) -> Option<&ClinicResult> {
        self.clinic.as_ref()
    }

    pub fn set_email(&mut self, email: &str) {
        self.email = email.to_owned();
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn set_service_type(&mut self, service_type: ServiceType) {
        self.service_type = service_type;
    }

    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    /// Message from the last failed submission, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Sends the request email.
    ///
    /// Nothing is sent unless a clinic is selected and the email looks like an
    /// address. On success the dialog closes and its fields reset; on failure it stays
    /// open with the fields as typed.
    pub async fn submit(&mut self) -> PortalResult<RecordRequestReceipt> {
        let request = match self.build_request() {
            Ok(request) => request,
            Err(e) => {
                self.error = Some(e.user_message());
                return Err(e);
            }
        };

        tracing::debug!(
            "requesting {} records from {}",
            request.service_type,
            request.clinic_name
        );
        match self.api.send_record_request(&self.session, &request).await {
            Ok(receipt) => {
                self.clinic = None;
                self.email.clear();
                self.service_type = ServiceType::default();
                self.error = None;
                Ok(receipt)
            }
            Err(e) => {
                tracing::warn!("record request to {} failed: {}", request.clinic_name, e);
                self.error = Some(e.user_message());
                Err(e)
            }
        }
    }

    fn build_request(&self) -> PortalResult<RecordRequest> {
        let clinic = self
            .clinic
            .as_ref()
            .ok_or_else(|| PortalError::InvalidInput("select a clinic first".into()))?;
        if self.email.trim().is_empty() {
            return Err(PortalError::InvalidInput(
                "Please provide an email address".into(),
            ));
        }
        let email = EmailAddress::parse(&self.email)?;

        Ok(RecordRequest {
            clinic_name: clinic.name.clone(),
            service_type: self.service_type,
            email,
        })
    }
}
