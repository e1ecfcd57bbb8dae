use axum::http::StatusCode;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

/// Error taxonomy for the resolve/route/merge core. `Conflict` only
/// escapes when the internal re-resolve also fails; the normal
/// unique-violation path is retried, not surfaced.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("dependency unavailable: {0}")]
    Dependency(String),
    #[error("database error: {0}")]
    Database(String),
}

impl CoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Dependency(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_unique_violation(err: &DieselError) -> bool {
        matches!(
            err,
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
        )
    }
}

impl From<DieselError> for CoreError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound("record not found".to_string()),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Self::Conflict(info.message().to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for CoreError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        Self::Dependency(format!("database pool: {err}"))
    }
}

impl From<CoreError> for (StatusCode, String) {
    fn from(err: CoreError) -> Self {
        (err.status_code(), err.to_string())
    }
}

/// Handler-side adapter: any error coercible to `CoreError` becomes the
/// `(StatusCode, String)` axum handlers return.
pub fn http_err<E: Into<CoreError>>(err: E) -> (StatusCode, String) {
    err.into().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_http_status() {
        assert_eq!(
            CoreError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            CoreError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            CoreError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            CoreError::Dependency("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn diesel_not_found_becomes_not_found() {
        let err: CoreError = DieselError::NotFound.into();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
