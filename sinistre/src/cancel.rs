//! Cooperative cancellation for store and broker calls.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Runs `operation` until it completes or `token` fires, whichever comes
/// first. A token that has already fired wins without polling the operation.
pub async fn cancellable<T, F>(token: &CancellationToken, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(Error::Cancelled),
        result = operation => result,
    }
}
