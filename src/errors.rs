use sea_orm::error::DbErr;
use thiserror::Error;

/// Unified error type for the sync pipeline.
///
/// The retry path cares only about `is_transient`; everything else is
/// surfaced into per-location statistics rather than aborting a run.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("External API error: {0}")]
    ExternalApiError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    /// Whether the failure is worth retrying: transport-level trouble and
    /// 5xx responses, plus connection-class database errors. Everything
    /// else propagates immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ExternalServiceError(_) => true,
            Self::DatabaseError(err) => {
                matches!(err, DbErr::Conn(_) | DbErr::ConnectionAcquire(_))
            }
            _ => false,
        }
    }

    /// Whether the failure is a unique-constraint violation, i.e. a benign
    /// race with another writer that created the same entity first.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::DatabaseError(err) => matches!(
                err.sql_err(),
                Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
            ),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return Self::ExternalServiceError(err.to_string());
        }
        if let Some(status) = err.status() {
            if status.is_server_error() {
                return Self::ExternalServiceError(err.to_string());
            }
            if status == reqwest::StatusCode::NOT_FOUND {
                return Self::NotFound(err.to_string());
            }
            if status.is_client_error() {
                return Self::ExternalApiError(err.to_string());
            }
        }
        if err.is_decode() {
            return Self::SerializationError(err.to_string());
        }
        Self::ExternalServiceError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_class_errors_are_transient() {
        assert!(ServiceError::ExternalServiceError("connection reset".into()).is_transient());
        assert!(ServiceError::DatabaseError(DbErr::Conn(sea_orm::RuntimeErr::Internal(
            "pool timed out".into()
        )))
        .is_transient());
    }

    #[test]
    fn client_class_errors_are_not_transient() {
        assert!(!ServiceError::ExternalApiError("400 Bad Request".into()).is_transient());
        assert!(!ServiceError::NotFound("no such discount".into()).is_transient());
        assert!(!ServiceError::ValidationError("missing item id".into()).is_transient());
    }

    #[test]
    fn conflict_counts_as_unique_violation() {
        assert!(ServiceError::Conflict("promotionId must be unique".into()).is_unique_violation());
        assert!(!ServiceError::NotFound("gone".into()).is_unique_violation());
    }
}
