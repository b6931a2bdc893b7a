//! Connecting to a RabbitMq broker with [`lapin`].
pub mod configuration;
mod channel;
mod factory;

pub use channel::LapinChannel;
pub use factory::ConnectionFactory;
pub use lapin::{options, types, BasicProperties, Channel, Connection};
