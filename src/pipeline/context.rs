//! The per-operation property bag threaded through a pipeline.
//!
//! Items are keyed by their type: each well-known item is a dedicated type.
//! A stage that reads an item relies on an earlier stage (or the caller's seed) having written it.
//!
//! | Item | Written by | Read by |
//! |---|---|---|
//! | [`MessageEnvelope`](crate::publishers::MessageEnvelope) | caller seed | [`DeclarePublishTopology`](crate::stages::DeclarePublishTopology), [`BasicPublish`](crate::stages::BasicPublish) |
//! | [`ExchangeDeclaration`](crate::topology::ExchangeDeclaration) | caller seed, optional | [`DeclarePublishTopology`](crate::stages::DeclarePublishTopology) |
//! | [`PublishConfirmation`](crate::confirms::PublishConfirmation) | caller seed, optional | [`ConfirmTracker`](crate::confirms::ConfirmTracker) |
//! | [`ConfirmTimeout`](crate::confirms::ConfirmTimeout) | caller seed, optional | [`ConfirmTracker`](crate::confirms::ConfirmTracker) |
//! | [`PublishChannel`](crate::stages::PublishChannel) | [`AcquireChannel`](crate::stages::AcquireChannel) | [`WaitForConfirm`](crate::stages::WaitForConfirm), [`BasicPublish`](crate::stages::BasicPublish) |
//! | [`Published`](crate::stages::Published) | [`BasicPublish`](crate::stages::BasicPublish) | [`WaitForConfirm`](crate::stages::WaitForConfirm) |
//! | [`ConfirmedPublish`](crate::stages::ConfirmedPublish) | [`WaitForConfirm`](crate::stages::WaitForConfirm) | caller |
//! | [`MessageType`](crate::consumers::MessageType) | caller seed | [`ResolveConsumeConfiguration`](crate::stages::ResolveConsumeConfiguration) |
//! | [`ConsumeTarget`](crate::consumers::ConsumeTarget) | caller seed, optional | [`ResolveConsumeConfiguration`](crate::stages::ResolveConsumeConfiguration) |
//! | [`ConsumeCustomizer`](crate::consumers::ConsumeCustomizer) | caller seed, optional | [`ResolveConsumeConfiguration`](crate::stages::ResolveConsumeConfiguration) |
//! | [`ConsumeConfiguration`](crate::consumers::ConsumeConfiguration) | [`ResolveConsumeConfiguration`](crate::stages::ResolveConsumeConfiguration) | [`DeclareConsumeTopology`](crate::stages::DeclareConsumeTopology), caller |
//! | [`DeclaredQueue`](crate::stages::DeclaredQueue) | [`DeclareConsumeTopology`](crate::stages::DeclareConsumeTopology) | caller |
use super::PipeError;
use std::any::type_name;
use std::fmt;
use task_local_extensions::Extensions;

/// A type-map owned by a single pipeline invocation.
///
/// It is created fresh for every invocation and never shared across concurrent operations.
pub struct PipeContext {
    items: Extensions,
}

impl Default for PipeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PipeContext {
    pub fn new() -> Self {
        Self {
            items: Extensions::new(),
        }
    }

    /// Insert an item, returning the previous item of the same type, if any.
    pub fn insert<T: Send + Sync + 'static>(&mut self, item: T) -> Option<T> {
        self.items.insert(item)
    }

    /// Builder-style [`PipeContext::insert`].
    #[must_use]
    pub fn with<T: Send + Sync + 'static>(mut self, item: T) -> Self {
        self.insert(item);
        self
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.items.get::<T>()
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.items.get_mut::<T>()
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.items.remove::<T>()
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.get::<T>().is_some()
    }

    /// Like [`PipeContext::get`], but a missing item is an error.
    ///
    /// Used by stages whose input must have been produced upstream.
    pub fn require<T: Send + Sync + 'static>(&self) -> Result<&T, PipeError> {
        self.get::<T>()
            .ok_or_else(|| PipeError::MissingContextItem(type_name::<T>()))
    }
}

impl fmt::Debug for PipeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeContext").finish_non_exhaustive()
    }
}
