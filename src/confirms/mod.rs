//! Correlates the broker's publisher confirmations to individual publishes.
//! Check out [`ConfirmTracker`] as a starting point.
mod error;
mod tracker;

pub use error::ConfirmError;
pub use tracker::{ConfirmTimeout, ConfirmTracker, PendingConfirmation, PublishConfirmation};
