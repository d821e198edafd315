use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// Why a single job failed. None of these are fatal to the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    /// The transport could not establish or complete the exchange.
    #[error("connect: {0}")]
    Connect(String),
    /// Status outside 2xx.
    #[error("non-2xx response: {0}")]
    Response(StatusCode),
    /// The body read failed mid-stream.
    #[error("receive: {0}")]
    Receive(String),
    #[error("length mismatch: expected {expected} bytes, received {received}")]
    Length { expected: u64, received: u64 },
    #[error("execution timeout after {0:?}")]
    Timeout(Duration),
    /// Anything else, including a panic inside the execution task.
    #[error("exception: {0}")]
    Exception(String),
}

/// Outcome of one executed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub latency: Duration,
    pub bytes: u64,
    pub error: Option<Failure>,
}

impl Record {
    pub fn success(latency: Duration, bytes: u64) -> Self {
        Record {
            latency,
            bytes,
            error: None,
        }
    }

    pub fn failed(failure: Failure) -> Self {
        Record {
            latency: Duration::ZERO,
            bytes: 0,
            error: Some(failure),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}
