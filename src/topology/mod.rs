//! Awaitable, deduplicated declaration of exchanges, queues and bindings.
//! Check out [`TopologyCoordinator`] as a starting point.
mod coordinator;
mod declaration;
mod error;
mod task;

pub use coordinator::TopologyCoordinator;
pub use declaration::{
    BindingKey, ExchangeDeclaration, QueueDeclaration, DEFAULT_EXCHANGE, DIRECT_REPLY_TO_QUEUE,
};
pub use error::TopologyError;
pub use lapin::ExchangeKind;
pub use task::TopologyTaskKind;
