use crate::topology::{ExchangeDeclaration, QueueDeclaration};
use std::any::type_name;
use std::fmt;
use std::sync::Arc;

/// Everything needed to start consuming messages of a given type.
///
/// Written to the pipe context by
/// [`ResolveConsumeConfiguration`](crate::stages::ResolveConsumeConfiguration).
#[derive(Debug, Clone)]
pub struct ConsumeConfiguration {
    pub queue: QueueDeclaration,
    pub exchange: ExchangeDeclaration,
    /// Routing key used to bind `queue` to `exchange`.
    pub routing_key: String,
    /// Maximum number of unacknowledged deliveries the broker will push to the consumer.
    pub prefetch_count: u16,
    /// Deliveries are considered acknowledged as soon as the broker sends them.
    pub no_ack: bool,
}

impl ConsumeConfiguration {
    pub fn new<R: Into<String>>(
        queue: QueueDeclaration,
        exchange: ExchangeDeclaration,
        routing_key: R,
    ) -> Self {
        Self {
            queue,
            exchange,
            routing_key: routing_key.into(),
            prefetch_count: 50,
            no_ack: false,
        }
    }

    pub fn with_prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }

    pub fn with_no_ack(mut self, no_ack: bool) -> Self {
        self.no_ack = no_ack;
        self
    }
}

/// Pipe context item: the kind of message a consumer is being set up for.
///
/// Keys the per-message-type registry of [`ConsumerSetup`](super::ConsumerSetup).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageType(pub String);

impl MessageType {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self(name.into())
    }

    /// The message type named after a Rust type.
    pub fn of<T: ?Sized>() -> Self {
        Self(type_name::<T>().to_owned())
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pipe context item: explicitly named queue, exchange and routing key to consume from.
///
/// Used when the message type has no registered [`ConsumeConfiguration`]. Blank fields fall
/// back to the process-wide defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumeTarget {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

impl ConsumeTarget {
    pub fn new<Q, E, R>(queue: Q, exchange: E, routing_key: R) -> Self
    where
        Q: Into<String>,
        E: Into<String>,
        R: Into<String>,
    {
        Self {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }
}

/// Pipe context item: a last-chance tweak applied to the resolved [`ConsumeConfiguration`].
#[derive(Clone)]
pub struct ConsumeCustomizer(Arc<dyn Fn(&mut ConsumeConfiguration) + Send + Sync>);

impl ConsumeCustomizer {
    pub fn new<F>(customize: F) -> Self
    where
        F: Fn(&mut ConsumeConfiguration) + Send + Sync + 'static,
    {
        Self(Arc::new(customize))
    }

    pub fn apply(&self, configuration: &mut ConsumeConfiguration) {
        (self.0)(configuration)
    }
}

impl fmt::Debug for ConsumeCustomizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConsumeCustomizer").finish()
    }
}
