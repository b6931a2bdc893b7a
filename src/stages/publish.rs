use super::PublishChannel;
use crate::broker::BrokerChannel;
use crate::pipeline::{Middleware, Next, PipeContext, PipeError};
use crate::publishers::MessageEnvelope;
use std::marker::PhantomData;

/// Pipe context item: the message reached the channel.
///
/// Written by [`BasicPublish`] right after a successful publish, even if the rest of the
/// operation fails afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Published;

/// Terminal stage: publish the context's [`MessageEnvelope`] on its [`PublishChannel`].
pub struct BasicPublish<C> {
    channel: PhantomData<fn() -> C>,
}

impl<C: BrokerChannel> BasicPublish<C> {
    pub fn new() -> Self {
        Self {
            channel: PhantomData,
        }
    }
}

impl<C: BrokerChannel> Default for BasicPublish<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<C: BrokerChannel> Middleware for BasicPublish<C> {
    async fn handle(&self, context: &mut PipeContext, next: Next<'_>) -> Result<(), PipeError> {
        let channel = context.require::<PublishChannel<C>>()?.0.clone();
        publish(&channel, context.require::<MessageEnvelope>()?).await?;
        context.insert(Published);
        next.run(context).await
    }
}

#[tracing::instrument(
    level = "debug",
    skip_all,
    fields(exchange = %envelope.exchange_name, routing_key = %envelope.routing_key)
)]
async fn publish<C: BrokerChannel>(
    channel: &C,
    envelope: &MessageEnvelope,
) -> Result<(), PipeError> {
    channel
        .basic_publish(envelope)
        .await
        .map_err(PipeError::Broker)
}
