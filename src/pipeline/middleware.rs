//! Middleware types are heavily inspired by `tide`'s approach to middleware.
use super::{PipeContext, PipeError};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A stage of a [`Pipeline`](super::Pipeline).
///
/// # Use case
///
/// Each stage gets mutable access to the operation's [`PipeContext`] and to the remainder of the
/// chain, [`Next`]. Before calling [`Next::run`] a stage can read and write context items or do
/// some work of its own; after it, it can inspect what the rest of the chain left in the context.
/// Not calling [`Next::run`] at all short-circuits the pipeline.
///
/// Stages are built once and shared by every invocation: keep per-operation state in the
/// context, not in the stage.
///
/// # Cancellation
///
/// [`Next::cancellation`] is the invocation's cancellation token. Check it before starting
/// long-running work; [`Next::run`] checks it before handing over to the next stage.
#[async_trait::async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, context: &mut PipeContext, next: Next<'_>) -> Result<(), PipeError>;
}

#[async_trait::async_trait]
impl<F> Middleware for F
where
    F: for<'a> Fn(&'a mut PipeContext, Next<'a>) -> BoxFuture<'a, Result<(), PipeError>>
        + Send
        + Sync
        + 'static,
{
    async fn handle(&self, context: &mut PipeContext, next: Next<'_>) -> Result<(), PipeError> {
        (self)(context, next).await
    }
}

/// The remainder of the middleware chain.
#[allow(missing_debug_implementations)]
pub struct Next<'a> {
    pub(super) next_middleware: &'a [Arc<dyn Middleware>],
    pub(super) cancellation: &'a CancellationToken,
}

impl<'a> Next<'a> {
    /// The cancellation token of the current invocation.
    pub fn cancellation(&self) -> &'a CancellationToken {
        self.cancellation
    }

    /// Asynchronously execute the remaining middleware chain.
    ///
    /// Running past the last stage is a no-op: the outcome is whatever the stages left in the
    /// context.
    pub async fn run(mut self, context: &mut PipeContext) -> Result<(), PipeError> {
        if self.cancellation.is_cancelled() {
            return Err(PipeError::Cancelled);
        }
        // If there is at least one middleware in the chain, get a reference to it and store
        // the remaining ones in `next_middleware`.
        // Then call the middleware passing `self` in the handler, recursively.
        if let Some((current, next)) = self.next_middleware.split_first() {
            self.next_middleware = next;
            current.handle(context, self).await
        } else {
            Ok(())
        }
    }
}
