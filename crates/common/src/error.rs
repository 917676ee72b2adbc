//! Error taxonomy shared by the rotation driver and its collaborators.

use thiserror::Error;

/// Fatal outcome of a rotation step.
///
/// Nothing here is retried inside the handler. The orchestrating rotation
/// framework owns retry and backoff across invocations; [`RotationError::is_retryable`]
/// tells it whether a later attempt can succeed without operator action.
#[derive(Debug, Error)]
pub enum RotationError {
    /// The secret exists but rotation is switched off for it.
    #[error("secret {0} is not enabled for rotation")]
    NotEnabledForRotation(String),

    /// The request token is not a known version, carries no usable stage, or
    /// the step name is not one of the four rotation steps.
    #[error("invalid rotation request: {0}")]
    UnknownVersionOrStage(String),

    /// A secret payload is missing a required field or names an unsupported engine.
    #[error("invalid secret payload: {0}")]
    InvalidSecretSchema(String),

    /// The database could not be reached, or rejected the credentials, within
    /// the configured timeout.
    #[error("database connection failed: {0}")]
    DatabaseConnectionFailed(String),

    /// A DDL or query statement failed for a reason other than the principal
    /// already existing or already being gone.
    #[error("database statement failed: {0}")]
    DatabaseStatementFailed(String),

    /// A secret store API call failed.
    #[error("secret store error: {0}")]
    SecretStore(String),

    /// The RDS instance/cluster description needed to complete a master
    /// credential could not be obtained.
    #[error("resource lookup failed: {0}")]
    ResourceLookup(String),
}

impl RotationError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            RotationError::NotEnabledForRotation(_) => "not_enabled_for_rotation",
            RotationError::UnknownVersionOrStage(_) => "unknown_version_or_stage",
            RotationError::InvalidSecretSchema(_) => "invalid_secret_schema",
            RotationError::DatabaseConnectionFailed(_) => "database_connection_failed",
            RotationError::DatabaseStatementFailed(_) => "database_statement_failed",
            RotationError::SecretStore(_) => "secret_store",
            RotationError::ResourceLookup(_) => "resource_lookup",
        }
    }

    /// Whether a later invocation of the same step may succeed unchanged.
    ///
    /// Precondition and schema failures need the secret to be fixed first.
    pub fn is_retryable(&self) -> bool {
        match self {
            RotationError::NotEnabledForRotation(_)
            | RotationError::UnknownVersionOrStage(_)
            | RotationError::InvalidSecretSchema(_) => false,
            RotationError::DatabaseConnectionFailed(_)
            | RotationError::DatabaseStatementFailed(_)
            | RotationError::SecretStore(_)
            | RotationError::ResourceLookup(_) => true,
        }
    }
}
