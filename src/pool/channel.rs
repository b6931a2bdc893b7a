//! Implements [`Manager`] for [`LapinChannel`].
use super::connection::ConnectionPool;
use crate::amqp::LapinChannel;
use crate::broker::{AckListener, BrokerChannel, ChannelId, ChannelProvider};
use crate::publishers::MessageEnvelope;
use crate::topology::{BindingKey, ExchangeDeclaration, QueueDeclaration};
use anyhow::Context;
use deadpool::managed::{self, Manager, Object};
use std::sync::Arc;

/// `ChannelPool` pools [`LapinChannel`]s.
///
/// It maintains an internal pool of connections to the rabbitmq instance.
pub type ChannelPool = deadpool::managed::Pool<ChannelManager>;

/// `ChannelManager` implements [Manager] to manage a pool of [`LapinChannel`]s.
///
/// Channels are created in plain mode: confirm mode is switched on by the
/// [`ConfirmTracker`](crate::confirms::ConfirmTracker) the first time a publish on the channel
/// asks for a confirmation.
pub struct ChannelManager {
    connection_pool: ConnectionPool,
}

impl ChannelManager {
    pub fn new(connection_pool: ConnectionPool) -> Self {
        Self { connection_pool }
    }
}

#[async_trait::async_trait]
impl Manager for ChannelManager {
    type Type = LapinChannel;
    type Error = super::Error;

    async fn create(&self) -> Result<LapinChannel, super::Error> {
        let connection = self.connection_pool.get().await?;
        let channel = connection.create_channel().await?;
        Ok(LapinChannel::new(channel))
    }

    async fn recycle(&self, obj: &mut LapinChannel) -> managed::RecycleResult<super::Error> {
        if obj.is_open() {
            Ok(())
        } else {
            Err(managed::RecycleError::Message(format!(
                "Channel is not in an healthy state {:?}",
                obj.raw().status().state()
            )))
        }
    }
}

/// A channel checked out of a [`ChannelPool`].
///
/// The channel goes back to the pool once every clone has been dropped: nobody else
/// publishes on it in the meantime, which keeps confirmation sequence numbers predictable.
#[derive(Clone)]
pub struct PooledChannel(Arc<Object<ChannelManager>>);

impl PooledChannel {
    pub fn inner(&self) -> &LapinChannel {
        &self.0
    }
}

#[async_trait::async_trait]
impl ChannelProvider for ChannelPool {
    type Channel = PooledChannel;

    async fn acquire(&self) -> Result<PooledChannel, anyhow::Error> {
        let channel = self
            .get()
            .await
            .map_err(super::Error::from)
            .context("Failed to get a channel from the pool")?;
        Ok(PooledChannel(Arc::new(channel)))
    }
}

#[async_trait::async_trait]
impl BrokerChannel for PooledChannel {
    fn id(&self) -> ChannelId {
        self.inner().id()
    }

    fn is_open(&self) -> bool {
        self.inner().is_open()
    }

    async fn declare_exchange(
        &self,
        declaration: &ExchangeDeclaration,
    ) -> Result<(), anyhow::Error> {
        self.inner().declare_exchange(declaration).await
    }

    async fn declare_queue(&self, declaration: &QueueDeclaration) -> Result<(), anyhow::Error> {
        self.inner().declare_queue(declaration).await
    }

    async fn bind_queue(&self, binding: &BindingKey) -> Result<(), anyhow::Error> {
        self.inner().bind_queue(binding).await
    }

    async fn unbind_queue(&self, binding: &BindingKey) -> Result<(), anyhow::Error> {
        self.inner().unbind_queue(binding).await
    }

    async fn enable_confirms(&self) -> Result<(), anyhow::Error> {
        self.inner().enable_confirms().await
    }

    fn next_publish_sequence(&self) -> u64 {
        self.inner().next_publish_sequence()
    }

    fn on_ack(&self, listener: AckListener) {
        self.inner().on_ack(listener)
    }

    async fn basic_publish(&self, envelope: &MessageEnvelope) -> Result<(), anyhow::Error> {
        self.inner().basic_publish(envelope).await
    }
}
