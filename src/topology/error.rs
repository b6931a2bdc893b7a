use super::TopologyTaskKind;
use crate::deferred::Abandoned;

/// Error returned when a topology operation could not be carried out.
///
/// Failed operations are not cached: asking again retries against the broker.
#[derive(thiserror::Error, Debug)]
pub enum TopologyError {
    #[error("The RabbitMq broker rejected the {kind} for `{target}`")]
    Declaration {
        kind: TopologyTaskKind,
        target: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to acquire a channel for topology operations")]
    Channel(#[source] anyhow::Error),
    #[error("The topology operation was dropped before being processed")]
    Abandoned,
}

impl From<Abandoned> for TopologyError {
    fn from(_: Abandoned) -> Self {
        Self::Abandoned
    }
}
