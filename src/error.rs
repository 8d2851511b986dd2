//! Error types for the SSH audit proxy

use thiserror::Error;

/// Main error type for the SSH audit proxy
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The user is not allowed to reach the asset with this system user
    #[error("User {user} has no permission to connect {asset} with {system_user}")]
    PermissionDenied {
        user: String,
        asset: String,
        system_user: String,
    },

    /// Backend rejected the credentials or the SSH negotiation failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Backend handshake did not finish in time
    #[error("Connection timeout after {0}s")]
    ConnectTimeout(u64),

    /// Socket-level failure while reaching the backend
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// A backend read did not complete after the channel reported readiness
    #[error("Read timeout after {0}s")]
    ReadTimeout(u64),

    /// Failure on an established client or backend channel
    #[error("Channel error: {0}")]
    Channel(String),

    /// Audit/permission service failure
    #[error("Service error: {0}")]
    Service(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// SSH key parsing error
    #[error("SSH key error: {0}")]
    SshKey(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Inventory or audit record (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using ProxyError
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    /// Create an authentication error from a string
    pub fn auth(msg: impl Into<String>) -> Self {
        ProxyError::Authentication(msg.into())
    }

    /// Create a connection error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        ProxyError::Connection(msg.into())
    }

    /// Create a channel error from a string
    pub fn channel(msg: impl Into<String>) -> Self {
        ProxyError::Channel(msg.into())
    }

    /// Create a service error from a string
    pub fn service(msg: impl Into<String>) -> Self {
        ProxyError::Service(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        ProxyError::Config(msg.into())
    }

    /// Credentials were refused or the SSH protocol negotiation failed
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ProxyError::Authentication(_) | ProxyError::SshKey(_))
    }

    /// The backend could not be reached at the socket level or in time
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            ProxyError::ConnectTimeout(_) | ProxyError::Connection(_) | ProxyError::Io(_)
        )
    }
}
