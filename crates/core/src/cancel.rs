//! Cancellation and soft-deadline helpers
//!
//! Every blocking operation takes a [`CancellationToken`]. Cancellation stops
//! further writes; writes already issued stay in place.

use std::future::Future;
use std::time::Duration;

pub use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Fail with [`Error::Cancelled`] once the token has fired
pub fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Race a fallible future against cancellation and a soft deadline.
///
/// A timeout becomes [`Error::OperationFailed`] naming `operation`.
pub async fn with_deadline<T, F>(
    cancel: &CancellationToken,
    deadline: Duration,
    operation: &str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        outcome = tokio::time::timeout(deadline, fut) => match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::operation_failed(
                operation,
                format!("timed out after {} ms", deadline.as_millis()),
            )),
        },
    }
}
