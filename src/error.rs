//! Error types for tradelink.

use axum::http::StatusCode;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Identity provider error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Account lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Profile store errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Identity provider errors.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The provider answered and refused the request. `message` is the
    /// provider's own text and is shown to the user verbatim.
    #[error("{message}")]
    Rejected { message: String },

    #[error("Identity provider unreachable: {0}")]
    Unavailable(String),

    #[error("Invalid response from identity provider: {0}")]
    InvalidResponse(String),
}

impl IdentityError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}

/// Errors surfaced by the account lifecycle controller.
///
/// Every variant carries a user-facing message (`Display`) and an HTTP
/// status; handlers render these inline instead of propagating them.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Provider refused the credentials; its message is passed through.
    #[error("{0}")]
    Credentials(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("{0}")]
    Validation(String),

    #[error("We could not finish setting up your account. Please try again.")]
    ProvisioningFailed,

    #[error("The service is temporarily unavailable. Please try again in a moment.")]
    Unavailable,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Failed to verify admin status")]
    AdminVerificationFailed,

    #[error("Unauthorized: Admin access only")]
    AdminOnly,

    #[error("Role can no longer be changed for this account")]
    RoleLocked,

    #[error("Cannot move account from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Storage error: {0}")]
    Database(#[from] DatabaseError),
}

impl LifecycleError {
    /// HTTP status used when a page renders this error inline.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Credentials(_) | Self::InvalidCredentials | Self::NotAuthenticated => {
                StatusCode::UNAUTHORIZED
            }
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::AdminOnly | Self::RoleLocked => StatusCode::FORBIDDEN,
            Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::Unavailable | Self::AdminVerificationFailed => StatusCode::SERVICE_UNAVAILABLE,
            Self::ProvisioningFailed | Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show on a form. Storage details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Database(_) => Self::Unavailable.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<IdentityError> for LifecycleError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Rejected { message } => Self::Credentials(message),
            IdentityError::Unavailable(_) | IdentityError::InvalidResponse(_) => Self::Unavailable,
        }
    }
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
