use crate::amqp::configuration::ConsumeDefaults;
use crate::consumers::{ConsumeConfiguration, ConsumeCustomizer, ConsumeTarget, MessageType};
use crate::pipeline::{Middleware, Next, PipeContext, PipeError};
use dashmap::DashMap;
use tracing::{debug, warn};

/// Stage: work out how to consume the context's [`MessageType`] and store the result as
/// [`ConsumeConfiguration`].
///
/// The first match wins:
/// 1. the configuration registered for the message type;
/// 2. the context's [`ConsumeTarget`], filled in with the defaults;
/// 3. the defaults.
///
/// The context's [`ConsumeCustomizer`], if any, is applied last.
pub struct ResolveConsumeConfiguration {
    registry: DashMap<MessageType, ConsumeConfiguration>,
    defaults: ConsumeDefaults,
}

impl ResolveConsumeConfiguration {
    pub fn new(defaults: ConsumeDefaults) -> Self {
        Self {
            registry: DashMap::new(),
            defaults,
        }
    }

    /// Use `configuration` for every consumer of `message_type`, replacing any previous
    /// registration.
    pub fn register(&self, message_type: MessageType, configuration: ConsumeConfiguration) {
        if let Some(previous) = self.registry.insert(message_type.clone(), configuration) {
            warn!(
                %message_type,
                previous_queue = %previous.queue.name,
                "Replacing the consume configuration registered for the message type"
            );
        }
    }

    pub fn registered(&self, message_type: &MessageType) -> Option<ConsumeConfiguration> {
        self.registry
            .get(message_type)
            .map(|configuration| configuration.value().clone())
    }

    fn resolve(&self, context: &PipeContext) -> ConsumeConfiguration {
        if let Some(configuration) = context
            .get::<MessageType>()
            .and_then(|message_type| self.registered(message_type))
        {
            return configuration;
        }
        match context.get::<ConsumeTarget>() {
            Some(target) => self.defaults.configuration_for(
                &target.queue,
                &target.exchange,
                &target.routing_key,
            ),
            None => {
                debug!("No consume configuration found, using the defaults");
                self.defaults.configuration()
            }
        }
    }
}

#[async_trait::async_trait]
impl Middleware for ResolveConsumeConfiguration {
    async fn handle(&self, context: &mut PipeContext, next: Next<'_>) -> Result<(), PipeError> {
        let mut configuration = self.resolve(context);
        if let Some(customizer) = context.get::<ConsumeCustomizer>() {
            customizer.apply(&mut configuration);
        }
        context.insert(configuration);
        next.run(context).await
    }
}
