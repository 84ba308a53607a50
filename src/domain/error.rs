//! Service-level error taxonomy
//!
//! Mirrors standard RPC status semantics: absent entities, malformed
//! requests, and downstream outages are the only failure classes the
//! gateway distinguishes. Everything else is logged and absorbed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Driver, route, trip or telemetry record absent. Read paths that
    /// treat absence as a transient state return empty/default instead.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed request rejected as a whole unit; no partial state is
    /// ever persisted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Downstream collaborator unreachable or erroring. Soft failure:
    /// logged, never fatal to an in-flight telemetry stream.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    /// HTTP status code for the API surface
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::NotFound(_) => 404,
            ServiceError::InvalidArgument(_) => 400,
            ServiceError::Unavailable(_) => 503,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ServiceError::NotFound("x".into()).status_code(), 404);
        assert_eq!(ServiceError::InvalidArgument("x".into()).status_code(), 400);
        assert_eq!(ServiceError::Unavailable("x".into()).status_code(), 503);
    }
}
