/// Errors raised by the portal client.
///
/// Every variant can be turned into a single user-facing sentence with
/// [`PortalError::user_message`]; callers decide whether to show it as a banner, an alert
/// or a redirect.
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid text: {0}")]
    Text(#[from] medst_types::TextError),
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No bearer credential is stored. Treated as redirect-to-login, not an in-page error.
    #[error("not signed in")]
    NotAuthenticated,

    #[error("network error: {0}")]
    Network(reqwest::Error),
    #[error("request failed with status {status}: {message}")]
    Http { status: u16, message: String },
    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("failed to read token store: {0}")]
    TokenStoreRead(std::io::Error),
    #[error("failed to write token store: {0}")]
    TokenStoreWrite(std::io::Error),
    #[error("token store is not valid JSON: {0}")]
    TokenStoreFormat(serde_json::Error),

    #[error("failed to read file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to write file: {0}")]
    FileWrite(std::io::Error),

    /// The owning view was torn down while the request was in flight.
    #[error("request cancelled")]
    Cancelled,
}

pub type PortalResult<T> = std::result::Result<T, PortalError>;

impl PortalError {
    /// Collapses the error into the one message shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            PortalError::InvalidInput(message) => message.clone(),
            PortalError::Text(err) => err.to_string(),
            PortalError::NotAuthenticated => "Please log in to continue.".into(),
            PortalError::Network(_) => "Network error, please try again.".into(),
            PortalError::Http { message, .. } => message.clone(),
            PortalError::Decode(_) => "Unexpected response from the server.".into(),
            PortalError::Cancelled => "Request cancelled.".into(),
            other => other.to_string(),
        }
    }

    /// True when the caller should send the user back to the login screen.
    pub fn is_redirect_to_login(&self) -> bool {
        matches!(
            self,
            PortalError::NotAuthenticated | PortalError::Http { status: 401, .. }
        )
    }
}
