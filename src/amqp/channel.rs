use crate::broker::{AckEvent, AckListener, BrokerChannel, ChannelId};
use crate::publishers::MessageEnvelope;
use crate::topology::{BindingKey, ExchangeDeclaration, QueueDeclaration};
use anyhow::Context;
use lapin::options::{
    BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{Channel, ChannelState};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Reply code of a message returned because no queue was bound to receive it.
///
/// See <https://www.rabbitmq.com/amqp-0-9-1-reference.html>.
const NO_ROUTE: u16 = 312;

/// [`BrokerChannel`] on top of a [`lapin::Channel`].
///
/// Cloning yields another handle to the same channel and the same confirmation feed.
#[derive(Clone)]
pub struct LapinChannel {
    id: ChannelId,
    channel: Channel,
    confirms: Arc<ConfirmFeed>,
}

/// Turns lapin's per-publish confirmations into [`AckEvent`]s.
///
/// lapin numbers the publishes of a channel in confirm mode the same way the broker does,
/// starting from 1. Publishes are serialized so that our counter follows the same order.
#[derive(Default)]
struct ConfirmFeed {
    enabled: AtomicBool,
    next_sequence: AtomicU64,
    publishing: tokio::sync::Mutex<()>,
    listeners: RwLock<Vec<AckListener>>,
}

impl ConfirmFeed {
    fn emit(&self, event: AckEvent) {
        for listener in self.listeners.read().iter() {
            listener(event);
        }
    }
}

impl LapinChannel {
    pub fn new(channel: Channel) -> Self {
        Self {
            id: ChannelId::new(),
            channel,
            confirms: Arc::default(),
        }
    }

    /// The underlying lapin channel, e.g. to start a consumer.
    pub fn raw(&self) -> &Channel {
        &self.channel
    }
}

impl std::fmt::Debug for LapinChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LapinChannel")
            .field("id", &self.id)
            .field("channel_id", &self.channel.id())
            .finish()
    }
}

#[async_trait::async_trait]
impl BrokerChannel for LapinChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn is_open(&self) -> bool {
        matches!(self.channel.status().state(), ChannelState::Connected)
    }

    async fn declare_exchange(
        &self,
        declaration: &ExchangeDeclaration,
    ) -> Result<(), anyhow::Error> {
        let options = ExchangeDeclareOptions {
            durable: declaration.durable,
            auto_delete: declaration.auto_delete,
            ..ExchangeDeclareOptions::default()
        };
        self.channel
            .exchange_declare(
                &declaration.name,
                declaration.kind.clone(),
                options,
                declaration.arguments.clone(),
            )
            .await
            .with_context(|| format!("Failed to declare exchange `{}`", declaration.name))
    }

    async fn declare_queue(&self, declaration: &QueueDeclaration) -> Result<(), anyhow::Error> {
        let options = QueueDeclareOptions {
            durable: declaration.durable,
            exclusive: declaration.exclusive,
            auto_delete: declaration.auto_delete,
            ..QueueDeclareOptions::default()
        };
        self.channel
            .queue_declare(&declaration.name, options, declaration.arguments.clone())
            .await
            .with_context(|| format!("Failed to declare queue `{}`", declaration.name))?;
        Ok(())
    }

    async fn bind_queue(&self, binding: &BindingKey) -> Result<(), anyhow::Error> {
        self.channel
            .queue_bind(
                &binding.queue,
                &binding.exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to bind {binding}"))
    }

    async fn unbind_queue(&self, binding: &BindingKey) -> Result<(), anyhow::Error> {
        self.channel
            .queue_unbind(
                &binding.queue,
                &binding.exchange,
                &binding.routing_key,
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to unbind {binding}"))
    }

    async fn enable_confirms(&self) -> Result<(), anyhow::Error> {
        let _publishing = self.confirms.publishing.lock().await;
        if self.confirms.enabled.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.channel
            .confirm_select(ConfirmSelectOptions { nowait: false })
            .await
            .context("Failed to put the channel in confirm mode")?;
        self.confirms.next_sequence.store(1, Ordering::SeqCst);
        self.confirms.enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn next_publish_sequence(&self) -> u64 {
        if self.confirms.enabled.load(Ordering::SeqCst) {
            self.confirms.next_sequence.load(Ordering::SeqCst)
        } else {
            0
        }
    }

    fn on_ack(&self, listener: AckListener) {
        self.confirms.listeners.write().push(listener);
    }

    async fn basic_publish(&self, envelope: &MessageEnvelope) -> Result<(), anyhow::Error> {
        let options = BasicPublishOptions {
            mandatory: envelope.mandatory,
            // Dropped in RabbitMq 3.0, setting it causes a not-supported error.
            immediate: false,
        };
        let mut properties = envelope.properties.clone();
        if properties.delivery_mode().is_none() {
            properties = properties.with_delivery_mode(2);
        }

        let _publishing = self.confirms.publishing.lock().await;
        let confirm = self
            .channel
            .basic_publish(
                &envelope.exchange_name,
                &envelope.routing_key,
                options,
                &envelope.payload,
                properties,
            )
            .await
            .context("Failed to publish the message")?;
        if !self.confirms.enabled.load(Ordering::SeqCst) {
            return Ok(());
        }
        let sequence = self.confirms.next_sequence.fetch_add(1, Ordering::SeqCst);

        let feed = Arc::clone(&self.confirms);
        tokio::spawn(async move {
            let event = match confirm.await {
                Ok(Confirmation::Ack(Some(returned))) if returned.reply_code == NO_ROUTE => {
                    debug!(sequence, "Message returned as unroutable");
                    AckEvent::nack(sequence)
                }
                Ok(Confirmation::Ack(_)) | Ok(Confirmation::NotRequested) => AckEvent::ack(sequence),
                Ok(Confirmation::Nack(_)) => AckEvent::nack(sequence),
                Err(error) => {
                    debug!(sequence, %error, "Failed to receive the publisher confirmation");
                    AckEvent::nack(sequence)
                }
            };
            feed.emit(event);
        });
        Ok(())
    }
}
