//! Worker subsystem error definitions.

use thiserror::Error;

/// Errors raised while fetching, spawning, or invoking a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Worker source missing or unreachable.
    #[error("worker source fetch failed for '{path}': {reason}")]
    SourceFetch { path: String, reason: String },

    /// The source or handler did not honor the execution contract
    /// (no fetch listener, no respondWith, uninterpretable response).
    #[error("worker contract violation: {0}")]
    ContractViolation(String),

    /// Per-request deadline exceeded; the worker was sent a close signal.
    #[error("worker did not respond within {0} ms")]
    ExecutionTimeout(u64),

    /// The worker burned through its CPU budget and terminated itself.
    #[error("worker exceeded its {0} ms CPU budget")]
    CpuBudgetExceeded(u64),

    /// The worker allocated past its heap limit and was terminated.
    #[error("worker exceeded its {0} MB heap limit")]
    HeapLimitExceeded(u64),

    /// Abnormal unit exit with an invocation in flight.
    #[error("worker crashed: {0}")]
    Crash(String),

    /// Malformed protocol message.
    #[error("protocol serialization error: {0}")]
    Serialization(String),
}

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WorkerError::ExecutionTimeout(8000);
        assert_eq!(err.to_string(), "worker did not respond within 8000 ms");

        let err = WorkerError::CpuBudgetExceeded(5000);
        assert!(err.to_string().contains("5000"));
    }
}
