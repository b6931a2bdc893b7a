//! The built-in [`Middleware`](crate::pipeline::Middleware)s that make up the publish and
//! consume pipelines.
//!
//! Each stage reads its inputs from the [`PipeContext`](crate::pipeline::PipeContext) and
//! writes its outputs back to it, see the [context item table](crate::pipeline::PipeContext).
mod channel;
mod confirm;
mod consume;
mod publish;
mod topology;

pub use channel::{AcquireChannel, PublishChannel};
pub use confirm::{ConfirmedPublish, WaitForConfirm};
pub use consume::ResolveConsumeConfiguration;
pub use publish::{BasicPublish, Published};
pub use topology::{DeclareConsumeTopology, DeclarePublishTopology, DeclaredQueue};
