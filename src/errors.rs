use sea_orm::error::DbErr;
use serde::Serialize;

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl From<crate::notifications::NotificationError> for ServiceError {
    fn from(err: crate::notifications::NotificationError) -> Self {
        ServiceError::NotificationError(err.to_string())
    }
}

impl ServiceError {
    /// Store-side failure without an underlying `DbErr`, such as a
    /// violated uniqueness rule in the in-memory store.
    pub fn db_error(message: impl Into<String>) -> Self {
        ServiceError::DatabaseError(DbErr::Custom(message.into()))
    }

    /// True for every caller-side input problem. `InsufficientStock` is a
    /// specialisation of a bad request.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Self::BadRequest(_)
                | Self::ValidationError(_)
                | Self::InsufficientStock(_)
                | Self::InvalidStatus(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Short machine-readable code, used as a metrics label and in logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::ValidationError(_) => "validation_error",
            Self::InsufficientStock(_) => "insufficient_stock",
            Self::InvalidStatus(_) => "invalid_status",
            Self::NotificationError(_) => "notification_error",
            Self::SerializationError(_) => "serialization_error",
            Self::InternalError(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_is_a_bad_request() {
        let err = ServiceError::InsufficientStock("product 1".into());
        assert!(err.is_bad_request());
        assert_eq!(err.code(), "insufficient_stock");
    }

    #[test]
    fn database_errors_are_not_client_errors() {
        let err = ServiceError::db_error("connection reset");
        assert!(!err.is_bad_request());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "Database error: Custom Error: connection reset");
    }
}
