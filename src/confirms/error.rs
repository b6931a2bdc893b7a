use crate::deferred::Abandoned;
use std::time::Duration;

/// Error returned when the broker did not confirm a publish.
#[derive(thiserror::Error, Debug)]
pub enum ConfirmError {
    #[error("No publisher confirmation for sequence number {sequence} within {timeout:?}")]
    Timeout { sequence: u64, timeout: Duration },
    #[error("The RabbitMq broker nacked the message with sequence number {sequence}")]
    Nacked { sequence: u64 },
    #[error("The channel was closed before the message was confirmed")]
    ChannelClosed,
    #[error("Cancelled while preparing the channel for publisher confirms")]
    Cancelled,
    #[error("Failed to put the channel in publisher-confirm mode")]
    Broker(#[source] anyhow::Error),
    #[error("The confirmation was dropped before being resolved")]
    Abandoned,
}

impl From<Abandoned> for ConfirmError {
    fn from(_: Abandoned) -> Self {
        Self::Abandoned
    }
}
