//! Sign-in, registration and profile.

use crate::api::PortalApi;
use crate::models::{CurrentUser, NewUser, RegisteredUser};
use crate::session::Session;
use crate::{PortalError, PortalResult};
use std::sync::Arc;

pub struct AccountService<A> {
    api: Arc<A>,
    session: Session,
}

impl<A: PortalApi> AccountService<A> {
    pub fn new(api: Arc<A>, session: Session) -> Self {
        Self { api, session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Exchanges credentials for a token and stores it in the session.
    pub async fn login(&self, email: &str, password: &str) -> PortalResult<()> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(PortalError::InvalidInput(
                "Email and password are required".into(),
            ));
        }

        let token = self.api.login(email, password).await?;
        self.session.sign_in(&token.access_token)?;
        tracing::info!("signed in as {}", email);
        Ok(())
    }

    /// Creates a patient account. Does not sign in.
    pub async fn register(&self, user: &NewUser) -> PortalResult<RegisteredUser> {
        let created = self.api.register(user).await?;
        tracing::info!("registered account {}", created.id);
        Ok(created)
    }

    pub async fn current_user(&self) -> PortalResult<CurrentUser> {
        self.api.current_user(&self.session).await
    }

    /// Forgets the stored token. The caller returns to the login screen.
    pub fn logout(&self) -> PortalResult<()> {
        self.session.sign_out()
    }
}
