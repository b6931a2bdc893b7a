use crate::broker::ChannelProvider;
use crate::pipeline::{Middleware, Next, PipeContext, PipeError};
use anyhow::Context;
use std::sync::Arc;

/// Pipe context item: the channel the current operation runs on.
#[derive(Debug, Clone)]
pub struct PublishChannel<C>(pub C);

/// Stage: get a channel from the provider and store it as [`PublishChannel`].
///
/// A channel already present in the context is used as it is.
pub struct AcquireChannel<P> {
    provider: Arc<P>,
}

impl<P: ChannelProvider> AcquireChannel<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }
}

#[async_trait::async_trait]
impl<P: ChannelProvider> Middleware for AcquireChannel<P> {
    async fn handle(&self, context: &mut PipeContext, next: Next<'_>) -> Result<(), PipeError> {
        if !context.contains::<PublishChannel<P::Channel>>() {
            if next.cancellation().is_cancelled() {
                return Err(PipeError::Cancelled);
            }
            let channel = self
                .provider
                .acquire()
                .await
                .context("Failed to acquire a healthy channel to publish to RabbitMq")
                .map_err(PipeError::Broker)?;
            context.insert(PublishChannel(channel));
        }
        next.run(context).await
    }
}
