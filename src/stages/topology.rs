use crate::broker::ChannelProvider;
use crate::consumers::ConsumeConfiguration;
use crate::pipeline::{Middleware, Next, PipeContext, PipeError};
use crate::publishers::MessageEnvelope;
use crate::topology::{ExchangeDeclaration, ExchangeKind, QueueDeclaration, TopologyCoordinator};
use futures_util::future::try_join;

/// Stage: make sure the exchange the message is published to exists.
///
/// Declares the context's [`ExchangeDeclaration`] if there is one, otherwise a durable
/// exchange named after the envelope's exchange, of the stage's default kind.
pub struct DeclarePublishTopology<P: ChannelProvider> {
    coordinator: TopologyCoordinator<P>,
    default_kind: ExchangeKind,
}

impl<P: ChannelProvider> DeclarePublishTopology<P> {
    pub fn new(coordinator: TopologyCoordinator<P>, default_kind: ExchangeKind) -> Self {
        Self {
            coordinator,
            default_kind,
        }
    }
}

#[async_trait::async_trait]
impl<P: ChannelProvider> Middleware for DeclarePublishTopology<P> {
    async fn handle(&self, context: &mut PipeContext, next: Next<'_>) -> Result<(), PipeError> {
        let declaration = match context.get::<ExchangeDeclaration>() {
            Some(declaration) => declaration.clone(),
            None => ExchangeDeclaration::durable(
                context.require::<MessageEnvelope>()?.exchange_name.as_str(),
                self.default_kind.clone(),
            ),
        };
        if next.cancellation().is_cancelled() {
            return Err(PipeError::Cancelled);
        }
        self.coordinator.declare_exchange(declaration).await?;
        next.run(context).await
    }
}

/// Pipe context item: the queue a consumer can start consuming from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredQueue(pub QueueDeclaration);

/// Stage: declare the exchange and the queue of the context's [`ConsumeConfiguration`],
/// then bind them together.
pub struct DeclareConsumeTopology<P: ChannelProvider> {
    coordinator: TopologyCoordinator<P>,
}

impl<P: ChannelProvider> DeclareConsumeTopology<P> {
    pub fn new(coordinator: TopologyCoordinator<P>) -> Self {
        Self { coordinator }
    }
}

#[async_trait::async_trait]
impl<P: ChannelProvider> Middleware for DeclareConsumeTopology<P> {
    async fn handle(&self, context: &mut PipeContext, next: Next<'_>) -> Result<(), PipeError> {
        let configuration = context.require::<ConsumeConfiguration>()?.clone();
        if next.cancellation().is_cancelled() {
            return Err(PipeError::Cancelled);
        }

        // Neither declaration depends on the other.
        try_join(
            self.coordinator
                .declare_exchange(configuration.exchange.clone()),
            self.coordinator.declare_queue(configuration.queue.clone()),
        )
        .await?;
        self.coordinator
            .bind_queue(
                configuration.queue.name.as_str(),
                configuration.exchange.name.as_str(),
                configuration.routing_key.as_str(),
            )
            .await?;

        context.insert(DeclaredQueue(configuration.queue));
        next.run(context).await
    }
}
