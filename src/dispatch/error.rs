use thiserror::Error;

use crate::worker::WorkerError;

/// Errors crossing the dispatch boundary. Everything except `RouteNotFound`
/// is subject to the configured failure mode.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no route for {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

impl DispatchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DispatchError::RouteNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = DispatchError::RouteNotFound {
            method: "GET".into(),
            path: "/missing".into(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "no route for GET /missing");
    }

    #[test]
    fn test_worker_error_passthrough() {
        let err = DispatchError::from(WorkerError::ExecutionTimeout(8_000));
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("8000"));
    }
}
