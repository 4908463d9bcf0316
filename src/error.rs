//! Error types for forkpool.

use thiserror::Error;

/// Boxed cause carried by [`PoolError::WorkerTaskFailure`].
pub type TaskError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for forkpool.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Invalid process count: {0}. Expected a positive integer.")]
    InvalidProcessCount(String),

    #[error("Task is not runnable: {0}")]
    InvalidTask(String),

    #[error("Completion callback is not runnable: {0}")]
    InvalidCallback(String),

    #[error("Parameters must be a JSON array of objects, got {0}")]
    InvalidParameterSequence(String),

    #[error("Parameter sequence is empty")]
    EmptyParameterSequence,

    #[error("Task failed in worker {pid}")]
    WorkerTaskFailure {
        pid: i32,
        #[source]
        source: TaskError,
    },

    #[error("Worker capacity dropped to zero with {pending} task(s) never dispatched")]
    CapacityExhausted { pending: usize },

    #[error("Process error: {0}")]
    Process(#[from] nix::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for forkpool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    #[test]
    fn test_invalid_process_count_message() {
        let err = PoolError::InvalidProcessCount("-3".to_string());
        let msg = err.to_string();
        assert!(msg.contains("-3"));
        assert!(msg.contains("positive"));
    }

    #[test]
    fn test_invalid_parameter_sequence_message() {
        let err = PoolError::InvalidParameterSequence("a string".to_string());
        assert!(err.to_string().contains("a string"));
    }

    #[test]
    fn test_empty_parameter_sequence_message() {
        let err = PoolError::EmptyParameterSequence;
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_worker_task_failure_keeps_cause() {
        let cause: TaskError = anyhow::anyhow!("disk full").into();
        let err = PoolError::WorkerTaskFailure {
            pid: 4242,
            source: cause,
        };
        assert!(err.to_string().contains("4242"));
        let source = err.source().expect("cause should be attached");
        assert_eq!(source.to_string(), "disk full");
    }

    #[test]
    fn test_capacity_exhausted_message() {
        let err = PoolError::CapacityExhausted { pending: 7 };
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "params.json not found");
        let err: PoolError = io_err.into();
        assert!(err.to_string().contains("params.json"));
    }

    #[test]
    fn test_nix_error_conversion() {
        let err: PoolError = nix::Error::EAGAIN.into();
        assert!(err.to_string().starts_with("Process error"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ nope").unwrap_err();
        let err: PoolError = json_err.into();
        assert!(err.to_string().contains("JSON"));
    }
}
