//! Remote executor contract: one HTTP-shaped request per queued action.

use async_trait::async_trait;

use driftsync_common::Target;

/// Successful remote response.
#[derive(Debug, Clone)]
pub struct ExecutorResponse {
    /// Status code reported by the remote.
    pub status: u16,
    /// Response body, opaque to the engine.
    pub body: Vec<u8>,
}

impl ExecutorResponse {
    /// Response with a status and no body.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }
}

/// Failed remote attempt, pre-classified by the executor.
///
/// Classification is the executor's contract; the engine never guesses.
/// Non-retryable failures (4xx-equivalent) drop the action permanently,
/// retryable ones (5xx-equivalent or transport failure) go through backoff.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ExecuteFailure {
    pub retryable: bool,
    pub message: String,
}

impl ExecuteFailure {
    /// Client error; the action will not be retried.
    pub fn client(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }

    /// Server or transport error; the action will be retried with backoff.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }
}

/// Performs one remote request for a queued action.
///
/// Implementations own authentication, serialization of the payload onto the
/// wire, and failure classification.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Execute a single request.
    async fn execute(
        &self,
        target: &Target,
        payload: &[u8],
    ) -> std::result::Result<ExecutorResponse, ExecuteFailure>;
}
