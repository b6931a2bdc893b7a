//! Resolve and declare what a consumer needs before it starts consuming.
//! Check out [`ConsumerSetup`] as a starting point.
mod configuration;
mod setup;

pub use configuration::{ConsumeConfiguration, ConsumeCustomizer, ConsumeTarget, MessageType};
pub use setup::{ConsumerSetup, ConsumerSetupBuilder};
