use super::{ConsumeConfiguration, MessageType};
use crate::amqp::configuration::ConsumeDefaults;
use crate::broker::ChannelProvider;
use crate::pipeline::{Middleware, PipeContext, PipeError, Pipeline};
use crate::stages::{DeclareConsumeTopology, DeclaredQueue, ResolveConsumeConfiguration};
use crate::topology::TopologyCoordinator;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Works out where a consumer should consume from, and makes sure it exists on the broker.
///
/// [`ConsumerSetup::prepare`] runs a pipeline that resolves the [`ConsumeConfiguration`] of a
/// message type, declares its exchange and queue, and binds them.
///
/// ```rust
/// use carrot_pipe::amqp::configuration::ConsumeDefaults;
/// use carrot_pipe::amqp::ConnectionFactory;
/// use carrot_pipe::consumers::{ConsumeTarget, ConsumerSetup, MessageType};
/// use carrot_pipe::topology::TopologyCoordinator;
/// use tokio_util::sync::CancellationToken;
///
/// async fn example(factory: ConnectionFactory) -> anyhow::Result<()> {
///     let setup = ConsumerSetup::new(TopologyCoordinator::new(factory), ConsumeDefaults::default());
///
///     let configuration = setup
///         .prepare(
///             MessageType::new("order_created"),
///             |context| {
///                 context.insert(ConsumeTarget::new("orders", "orders", "orders.created"));
///             },
///             &CancellationToken::new(),
///         )
///         .await?;
///     assert_eq!("orders", configuration.queue.name);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct ConsumerSetup {
    resolver: Arc<ResolveConsumeConfiguration>,
    pipeline: Pipeline,
}

impl ConsumerSetup {
    pub fn new<P: ChannelProvider>(
        coordinator: TopologyCoordinator<P>,
        defaults: ConsumeDefaults,
    ) -> Self {
        Self::builder(coordinator, defaults).build()
    }

    /// Like [`ConsumerSetup::new`], with middlewares running before the built-in stages.
    pub fn builder<P: ChannelProvider>(
        coordinator: TopologyCoordinator<P>,
        defaults: ConsumeDefaults,
    ) -> ConsumerSetupBuilder {
        ConsumerSetupBuilder {
            resolver: Arc::new(ResolveConsumeConfiguration::new(defaults)),
            declare_topology: Arc::new(DeclareConsumeTopology::new(coordinator)),
            middleware_chain: vec![],
        }
    }

    /// Consumers of `message_type` use `configuration`, whatever the context says.
    ///
    /// A later registration for the same message type replaces the earlier one.
    pub fn register(&self, message_type: MessageType, configuration: ConsumeConfiguration) {
        self.resolver.register(message_type, configuration);
    }

    /// Resolve and declare the consume topology for `message_type`.
    ///
    /// `seed` can add a [`ConsumeTarget`](super::ConsumeTarget) or a
    /// [`ConsumeCustomizer`](super::ConsumeCustomizer) to the pipe context.
    #[tracing::instrument(level = "debug", skip_all, fields(%message_type))]
    pub async fn prepare<S>(
        &self,
        message_type: MessageType,
        seed: S,
        cancellation: &CancellationToken,
    ) -> Result<ConsumeConfiguration, PipeError>
    where
        S: FnOnce(&mut PipeContext) + Send,
    {
        let context = self
            .pipeline
            .invoke(
                move |context| {
                    context.insert(message_type);
                    seed(context);
                },
                cancellation,
            )
            .await?;

        // Both are written by the built-in stages: a middleware may have short-circuited them.
        context.require::<DeclaredQueue>()?;
        Ok(context.require::<ConsumeConfiguration>()?.clone())
    }
}

/// A builder for [`ConsumerSetup`].
///
/// Use [`ConsumerSetup::builder`] as entrypoint.
pub struct ConsumerSetupBuilder {
    resolver: Arc<ResolveConsumeConfiguration>,
    declare_topology: Arc<dyn Middleware>,
    middleware_chain: Vec<Arc<dyn Middleware>>,
}

impl ConsumerSetupBuilder {
    #[must_use]
    pub fn with_middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middleware_chain.push(Arc::new(middleware));
        self
    }

    pub fn build(self) -> ConsumerSetup {
        let pipeline = Pipeline::builder()
            .with_middlewares(self.middleware_chain)
            .with_dyn_middleware(self.resolver.clone())
            .with_dyn_middleware(self.declare_topology)
            .build();
        ConsumerSetup {
            resolver: self.resolver,
            pipeline,
        }
    }
}
