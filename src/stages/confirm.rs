use super::{PublishChannel, Published};
use crate::broker::BrokerChannel;
use crate::confirms::ConfirmTracker;
use crate::pipeline::{Middleware, Next, PipeContext, PipeError};
use std::marker::PhantomData;
use std::sync::Arc;

/// Pipe context item: the broker confirmed the publish with this sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmedPublish {
    pub sequence: u64,
}

/// Stage: register the publish with the [`ConfirmTracker`], let the rest of the pipeline
/// publish, then wait for the broker's confirmation.
///
/// Must run before [`BasicPublish`](super::BasicPublish): the sequence number is predicted
/// before the publish goes out. Nothing is recorded when confirmation is disabled for the
/// operation.
///
/// If the message never reaches the channel, its sequence number is given back to the
/// tracker. If the operation fails on a closed channel, the tracker forgets the channel.
pub struct WaitForConfirm<C> {
    tracker: Arc<ConfirmTracker>,
    channel: PhantomData<fn() -> C>,
}

impl<C: BrokerChannel> WaitForConfirm<C> {
    pub fn new(tracker: Arc<ConfirmTracker>) -> Self {
        Self {
            tracker,
            channel: PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<C: BrokerChannel> Middleware for WaitForConfirm<C> {
    async fn handle(&self, context: &mut PipeContext, next: Next<'_>) -> Result<(), PipeError> {
        let channel = context.require::<PublishChannel<C>>()?.0.clone();
        let outcome = self.publish_and_confirm(&channel, context, next).await;
        if outcome.is_err() && !channel.is_open() {
            self.tracker.release(&channel.id());
        }
        outcome
    }
}

impl<C: BrokerChannel> WaitForConfirm<C> {
    async fn publish_and_confirm(
        &self,
        channel: &C,
        context: &mut PipeContext,
        next: Next<'_>,
    ) -> Result<(), PipeError> {
        let pending = self
            .tracker
            .await_confirm(channel, context, next.cancellation())
            .await?;

        let outcome = next.run(context).await;
        let Some(pending) = pending else {
            return outcome;
        };
        if !context.contains::<Published>() {
            self.tracker.abandon(&channel.id(), pending.sequence());
            return outcome;
        }
        outcome?;

        let sequence = pending.await?;
        context.insert(ConfirmedPublish { sequence });
        Ok(())
    }
}
