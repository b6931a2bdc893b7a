use crate::amqp::configuration::PipeSettings;
use crate::broker::ChannelProvider;
use crate::confirms::{ConfirmTracker, PublishConfirmation};
use crate::pipeline::{Middleware, PipeContext, PipeError, Pipeline};
use crate::publishers::MessageEnvelope;
use crate::stages::{
    AcquireChannel, BasicPublish, ConfirmedPublish, DeclarePublishTopology, WaitForConfirm,
};
use crate::topology::{ExchangeKind, TopologyCoordinator};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

/// A high-level interface to publish messages.
///
/// Every publish runs through a [`Pipeline`]: your middlewares first, in registration order,
/// then the built-in stages, which acquire a channel, declare the target exchange (if enabled
/// with [`PublisherBuilder::declare_exchanges`]), register the publish for confirmation,
/// publish, and wait for the broker's confirmation.
///
/// # How do I build a `Publisher`?
///
/// The starting point is [`Publisher::builder`].
///
/// ```rust
/// use carrot_pipe::amqp::configuration::{PipeSettings, RabbitMqSettings};
/// use carrot_pipe::amqp::ConnectionFactory;
/// use carrot_pipe::pool::{ChannelManager, ChannelPool, ConnectionPool};
/// use carrot_pipe::publishers::Publisher;
/// use carrot_pipe::topology::TopologyCoordinator;
///
/// pub fn get_publisher() -> Result<Publisher, anyhow::Error> {
///     let settings = PipeSettings::default();
///     let factory = ConnectionFactory::new_from_config(&RabbitMqSettings::default())?;
///     let connection_pool = ConnectionPool::builder(factory.clone()).max_size(2).build()?;
///     let channel_pool = ChannelPool::builder(ChannelManager::new(connection_pool))
///         .max_size(10)
///         .build()?;
///
///     Ok(Publisher::builder(channel_pool)
///         .with_settings(&settings)
///         .declare_exchanges(TopologyCoordinator::new(factory), settings.publish_exchange_kind())
///         .build())
/// }
/// ```
#[derive(Clone)]
pub struct Publisher {
    pipeline: Pipeline,
    tracker: Arc<ConfirmTracker>,
    publisher_confirms: bool,
}

/// What the broker told us about a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    /// The sequence number the broker confirmed, `None` if confirmation was disabled.
    pub sequence: Option<u64>,
}

impl Publisher {
    /// Start building a [`Publisher`] that publishes on channels obtained from `provider`.
    pub fn builder<P: ChannelProvider>(provider: P) -> PublisherBuilder<P> {
        PublisherBuilder::new(provider)
    }

    /// Publish a message and wait for the broker's confirmation.
    ///
    /// A `message_id` and a `timestamp` are added to the message properties if missing.
    pub async fn publish(&self, envelope: MessageEnvelope) -> Result<PublishOutcome, PipeError> {
        self.publish_with_context(envelope, |_| {}, &CancellationToken::new())
            .await
    }

    /// Like [`Publisher::publish`], with `seed` adding items to the pipe context of this
    /// publish only, e.g. a [`ConfirmTimeout`](crate::confirms::ConfirmTimeout) or a
    /// [`PublishConfirmation`].
    pub async fn publish_with_context<S>(
        &self,
        envelope: MessageEnvelope,
        seed: S,
        cancellation: &CancellationToken,
    ) -> Result<PublishOutcome, PipeError>
    where
        S: FnOnce(&mut PipeContext) + Send,
    {
        let envelope = inject_amqp_properties(envelope);
        let publisher_confirms = self.publisher_confirms;
        let context = self
            .pipeline
            .invoke(
                move |context| {
                    context.insert(envelope);
                    if !publisher_confirms {
                        context.insert(PublishConfirmation::Disabled);
                    }
                    seed(context);
                },
                cancellation,
            )
            .await?;

        Ok(PublishOutcome {
            sequence: context
                .get::<ConfirmedPublish>()
                .map(|confirmed| confirmed.sequence),
        })
    }

    /// The tracker of this publisher's outstanding confirmations.
    pub fn confirm_tracker(&self) -> &Arc<ConfirmTracker> {
        &self.tracker
    }
}

/// A builder for [`Publisher`].
///
/// Use [`Publisher::builder`] as entrypoint.
pub struct PublisherBuilder<P: ChannelProvider> {
    provider: Arc<P>,
    timeout: Duration,
    publisher_confirms: bool,
    tracker: Option<Arc<ConfirmTracker>>,
    declare_topology: Option<Arc<dyn Middleware>>,
    middleware_chain: Vec<Arc<dyn Middleware>>,
}

impl<P: ChannelProvider> PublisherBuilder<P> {
    fn new(provider: P) -> Self {
        Self {
            provider: Arc::new(provider),
            timeout: Duration::from_secs(3),
            publisher_confirms: true,
            tracker: None,
            declare_topology: None,
            middleware_chain: vec![],
        }
    }

    /// How long a publish waits for the broker's confirmation.
    /// Defaults to 3 seconds if left unspecified.
    ///
    /// Ignored if a tracker is provided with [`PublisherBuilder::with_confirm_tracker`].
    #[must_use]
    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Don't wait for broker confirmations unless a publish asks for it with
    /// [`PublishConfirmation::Enabled`].
    #[must_use]
    pub fn without_publisher_confirmations(mut self) -> Self {
        self.publisher_confirms = false;
        self
    }

    /// Apply the publish-related [`PipeSettings`].
    #[must_use]
    pub fn with_settings(mut self, settings: &PipeSettings) -> Self {
        self.timeout = settings.confirm_timeout();
        self.publisher_confirms = settings.publisher_confirms;
        self
    }

    /// Share a [`ConfirmTracker`] with other publishers using the same channels.
    #[must_use]
    pub fn with_confirm_tracker(mut self, tracker: Arc<ConfirmTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Declare the target exchange through `coordinator` before publishing.
    ///
    /// Exchanges are declared as durable exchanges of type `kind`, unless the publish context
    /// carries an [`ExchangeDeclaration`](crate::topology::ExchangeDeclaration).
    #[must_use]
    pub fn declare_exchanges<Q: ChannelProvider>(
        mut self,
        coordinator: TopologyCoordinator<Q>,
        kind: ExchangeKind,
    ) -> Self {
        self.declare_topology = Some(Arc::new(DeclarePublishTopology::new(coordinator, kind)));
        self
    }

    /// You can add middleware to inject logic before and after publishing a message.
    /// Middlewares are executed in the order they are registered, before the built-in stages.
    #[must_use]
    pub fn with_middleware<M: Middleware>(self, middleware: M) -> Self {
        self.with_dyn_middleware(Arc::new(middleware))
    }

    /// Append dynamic middleware logic, see [`PublisherBuilder::with_middleware`].
    #[must_use]
    pub fn with_dyn_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware_chain.push(middleware);
        self
    }

    /// Append multiple dynamic middlewares, see [`PublisherBuilder::with_middleware`].
    #[must_use]
    pub fn with_middlewares<I>(mut self, middlewares: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Middleware>>,
    {
        self.middleware_chain.extend(middlewares);
        self
    }

    /// Finalise the builder and get an instance of [`Publisher`].
    pub fn build(self) -> Publisher {
        let tracker = self
            .tracker
            .unwrap_or_else(|| Arc::new(ConfirmTracker::new(self.timeout)));

        let pipeline = Pipeline::builder()
            .with_middlewares(self.middleware_chain)
            .with_middleware(AcquireChannel::new(self.provider))
            .with_middlewares(self.declare_topology)
            .with_middleware(WaitForConfirm::<P::Channel>::new(Arc::clone(&tracker)))
            .with_middleware(BasicPublish::<P::Channel>::new())
            .build();

        Publisher {
            pipeline,
            tracker,
            publisher_confirms: self.publisher_confirms,
        }
    }
}

fn inject_amqp_properties(mut envelope: MessageEnvelope) -> MessageEnvelope {
    let mut properties = envelope.properties;

    if properties.timestamp().is_none() {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(now) => properties = properties.with_timestamp(now.as_secs()),
            Err(_) => warn!("System time is before 1970"),
        }
    }
    if properties.message_id().is_none() {
        properties = properties.with_message_id(Uuid::new_v4().to_string().into());
    }

    envelope.properties = properties;
    envelope
}
