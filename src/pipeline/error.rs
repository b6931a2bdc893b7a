use crate::confirms::ConfirmError;
use crate::topology::TopologyError;

/// Error returned by a pipeline invocation.
///
/// The first stage to fail aborts the pipeline: no later stage runs.
#[derive(thiserror::Error, Debug)]
pub enum PipeError {
    #[error("The pipeline was cancelled")]
    Cancelled,
    #[error("`{0}` is missing from the pipe context")]
    MissingContextItem(&'static str),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Confirm(#[from] ConfirmError),
    #[error("Generic error encountered when interacting with the RabbitMq broker")]
    Broker(#[source] anyhow::Error),
    #[error("A pipeline stage failed to process the operation")]
    Stage(#[source] anyhow::Error),
}
