//! `carrot-pipe` runs RabbitMq publishes and consumer setups through composable pipelines,
//! built on top of [`lapin`].
//!
//! - [`pipeline`]: the middleware engine, every operation runs through a [`Pipeline`](pipeline::Pipeline);
//! - [`topology`]: deduplicated, serialized declaration of exchanges, queues and bindings;
//! - [`confirms`]: tracking of publisher confirmations across channels;
//! - [`stages`]: the built-in pipeline stages wiring the above together.
//!
//! [`Publisher`](publishers::Publisher) and [`ConsumerSetup`](consumers::ConsumerSetup) are
//! the best starting points.

pub mod consumers;
pub mod publishers;

pub mod amqp;
pub mod broker;
pub mod confirms;
pub mod deferred;
pub mod exclusive;
pub mod pipeline;
pub mod pool;
pub mod stages;
pub mod topology;
