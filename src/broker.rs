//! The broker-facing seams this crate is built on.
//!
//! [`BrokerChannel`] abstracts the protocol channel (declare, bind, publish, confirm mode) and
//! [`ChannelProvider`] abstracts where channels come from.
//! [`LapinChannel`](crate::amqp::LapinChannel) is the production implementation on top of
//! [`lapin`]; tests plug in in-memory channels.
use crate::publishers::MessageEnvelope;
use crate::topology::{BindingKey, ExchangeDeclaration, QueueDeclaration};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Process-unique identity of a channel.
///
/// AMQP channel numbers are only unique within a connection, so they are not used as keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Whether the broker accepted or rejected the publishes covered by an [`AckEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Ack,
    Nack,
}

/// A publisher confirmation sent by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckEvent {
    /// The delivery tag being confirmed.
    pub tag: u64,
    /// If `true`, the event covers every outstanding tag up to and including `tag`.
    pub multiple: bool,
    pub kind: AckKind,
}

impl AckEvent {
    pub fn ack(tag: u64) -> Self {
        Self {
            tag,
            multiple: false,
            kind: AckKind::Ack,
        }
    }

    pub fn ack_multiple(tag: u64) -> Self {
        Self {
            tag,
            multiple: true,
            kind: AckKind::Ack,
        }
    }

    pub fn nack(tag: u64) -> Self {
        Self {
            tag,
            multiple: false,
            kind: AckKind::Nack,
        }
    }
}

/// Callback invoked for every [`AckEvent`] received on a channel.
///
/// It may be called from any thread, concurrently with publishes on the same channel.
pub type AckListener = Arc<dyn Fn(AckEvent) + Send + Sync + 'static>;

/// A protocol channel to the broker.
///
/// Implementations are cheap handles: cloning must yield another handle to the same
/// underlying channel.
#[async_trait::async_trait]
pub trait BrokerChannel: Clone + Send + Sync + 'static {
    /// Identity used to key per-channel bookkeeping.
    fn id(&self) -> ChannelId;

    /// `false` once the channel has been closed, by us or by the broker.
    fn is_open(&self) -> bool;

    async fn declare_exchange(&self, declaration: &ExchangeDeclaration)
        -> Result<(), anyhow::Error>;

    async fn declare_queue(&self, declaration: &QueueDeclaration) -> Result<(), anyhow::Error>;

    async fn bind_queue(&self, binding: &BindingKey) -> Result<(), anyhow::Error>;

    async fn unbind_queue(&self, binding: &BindingKey) -> Result<(), anyhow::Error>;

    /// Put the channel in publisher-confirm mode.
    async fn enable_confirms(&self) -> Result<(), anyhow::Error>;

    /// The delivery tag the broker will assign to the next publish on this channel.
    fn next_publish_sequence(&self) -> u64;

    /// Register a listener for the broker's publisher confirmations.
    fn on_ack(&self, listener: AckListener);

    async fn basic_publish(&self, envelope: &MessageEnvelope) -> Result<(), anyhow::Error>;
}

/// Hands out usable channels.
#[async_trait::async_trait]
pub trait ChannelProvider: Send + Sync + 'static {
    type Channel: BrokerChannel;

    async fn acquire(&self) -> Result<Self::Channel, anyhow::Error>;
}

#[async_trait::async_trait]
impl<P: ChannelProvider> ChannelProvider for Arc<P> {
    type Channel = P::Channel;

    async fn acquire(&self) -> Result<Self::Channel, anyhow::Error> {
        (**self).acquire().await
    }
}
