//! Pools [`LapinChannel`](crate::amqp::LapinChannel)s and [`lapin::Connection`]s using [`deadpool`].
//!
//! Broken channels are disposed of and recreated on demand, and connections are reused across
//! channels. A [`ChannelPool`] is a [`ChannelProvider`](crate::broker::ChannelProvider): hand it
//! to a [`Publisher`](crate::publishers::Publisher) or a
//! [`TopologyCoordinator`](crate::topology::TopologyCoordinator).
//!
//! ```rust
//! use carrot_pipe::amqp::configuration::RabbitMqSettings;
//! use carrot_pipe::amqp::ConnectionFactory;
//! use carrot_pipe::broker::ChannelProvider;
//! use carrot_pipe::pool::{ChannelManager, ChannelPool, ConnectionPool};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let settings = RabbitMqSettings::default();
//!
//!     let connection_pool = ConnectionPool::builder(ConnectionFactory::new_from_config(&settings)?)
//!         .max_size(4)
//!         .build()?;
//!     let pool = ChannelPool::builder(ChannelManager::new(connection_pool))
//!         .max_size(16)
//!         .build()?;
//!
//!     // Checked out until every clone is dropped.
//!     let channel = pool.acquire().await?;
//!     Ok(())
//! }
//! ```

mod channel;
mod connection;
mod error;

pub use channel::{ChannelManager, ChannelPool, PooledChannel};
pub use connection::ConnectionPool;
pub use error::Error;
