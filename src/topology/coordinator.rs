use super::task::{TopologyCompletion, TopologyTask};
use super::{BindingKey, ExchangeDeclaration, QueueDeclaration, TopologyError};
use crate::broker::{BrokerChannel, ChannelProvider};
use crate::deferred::{completion_pair, Deferred};
use dashmap::DashSet;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Declares exchanges and queues, and binds them, against a single broker channel.
///
/// # Deduplication
///
/// Successful declarations and bindings are remembered for the lifetime of the coordinator:
/// asking for something that is already known to exist resolves immediately, without a broker
/// round-trip. Auto-delete resources are never remembered, since the broker can remove them
/// without telling us. Failures are never remembered either: the next request retries.
///
/// # Ordering
///
/// Every operation that needs the broker goes through one FIFO queue, drained by at most one
/// task at a time. Topology changes against the broker are therefore strictly serialized,
/// while callers never wait to get their operation enqueued.
///
/// Operations return a [`Deferred`] that resolves once the broker has answered.
/// They must be called from within a Tokio runtime, which runs the drain loop.
pub struct TopologyCoordinator<P: ChannelProvider> {
    inner: Arc<Inner<P>>,
}

impl<P: ChannelProvider> Clone for TopologyCoordinator<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<P: ChannelProvider> {
    provider: P,
    /// Lazily acquired on first use, replaced if found closed.
    channel: tokio::sync::Mutex<Option<P::Channel>>,
    exchanges: DashSet<String>,
    queues: DashSet<String>,
    bindings: DashSet<BindingKey>,
    tasks: Mutex<VecDeque<TopologyTask>>,
    /// Set while some task holds the drain role.
    draining: AtomicBool,
}

impl<P: ChannelProvider> TopologyCoordinator<P> {
    pub fn new(provider: P) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                channel: tokio::sync::Mutex::new(None),
                exchanges: DashSet::new(),
                queues: DashSet::new(),
                bindings: DashSet::new(),
                tasks: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// Make sure `declaration` exists on the broker.
    pub fn declare_exchange(&self, declaration: ExchangeDeclaration) -> Deferred<(), TopologyError> {
        if self.is_exchange_declared(&declaration) {
            debug!(exchange = %declaration.name, "Exchange already declared");
            return Deferred::ready(Ok(()));
        }
        self.schedule(|completion| TopologyTask::DeclareExchange {
            declaration,
            completion,
        })
    }

    /// Make sure `declaration` exists on the broker.
    pub fn declare_queue(&self, declaration: QueueDeclaration) -> Deferred<(), TopologyError> {
        if self.is_queue_declared(&declaration) {
            debug!(queue = %declaration.name, "Queue already declared");
            return Deferred::ready(Ok(()));
        }
        self.schedule(|completion| TopologyTask::DeclareQueue {
            declaration,
            completion,
        })
    }

    /// Bind `queue` to `exchange` using `routing_key`.
    ///
    /// Binding to the default exchange is a no-op: every queue is already bound to it
    /// using its own name.
    pub fn bind_queue<Q, E, R>(
        &self,
        queue: Q,
        exchange: E,
        routing_key: R,
    ) -> Deferred<(), TopologyError>
    where
        Q: Into<String>,
        E: Into<String>,
        R: Into<String>,
    {
        let binding = BindingKey::new(queue, exchange, routing_key);
        if self.is_bound(&binding) {
            debug!(%binding, "Queue already bound");
            return Deferred::ready(Ok(()));
        }
        self.schedule(|completion| TopologyTask::Bind {
            binding,
            completion,
        })
    }

    /// Remove the binding between `queue` and `exchange` for `routing_key`.
    ///
    /// Always reaches the broker, even if we don't remember creating the binding: someone else
    /// may have.
    pub fn unbind_queue<Q, E, R>(
        &self,
        queue: Q,
        exchange: E,
        routing_key: R,
    ) -> Deferred<(), TopologyError>
    where
        Q: Into<String>,
        E: Into<String>,
        R: Into<String>,
    {
        let binding = BindingKey::new(queue, exchange, routing_key);
        self.schedule(|completion| TopologyTask::Unbind {
            binding,
            completion,
        })
    }

    /// `true` if the exchange is known to exist, without touching the broker.
    pub fn is_exchange_declared(&self, declaration: &ExchangeDeclaration) -> bool {
        declaration.is_default() || self.inner.exchanges.contains(&declaration.name)
    }

    /// `true` if the queue is known to exist, without touching the broker.
    pub fn is_queue_declared(&self, declaration: &QueueDeclaration) -> bool {
        declaration.is_direct_reply_to() || self.inner.queues.contains(&declaration.name)
    }

    /// `true` if the binding is known to exist, without touching the broker.
    pub fn is_bound(&self, binding: &BindingKey) -> bool {
        binding.is_implicit() || self.inner.bindings.contains(binding)
    }

    fn schedule<F>(&self, task: F) -> Deferred<(), TopologyError>
    where
        F: FnOnce(TopologyCompletion) -> TopologyTask,
    {
        let (completion, deferred) = completion_pair();
        self.inner.tasks.lock().push_back(task(completion));
        Inner::start_draining(&self.inner);
        deferred
    }
}

impl<P: ChannelProvider> Inner<P> {
    /// Spawn the drain loop, unless another task is already draining.
    fn start_draining(inner: &Arc<Self>) {
        if inner.try_acquire_drain_role() {
            tokio::spawn(Arc::clone(inner).drain());
        }
    }

    fn try_acquire_drain_role(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn pop(&self) -> Option<TopologyTask> {
        self.tasks.lock().pop_front()
    }

    async fn drain(self: Arc<Self>) {
        loop {
            while let Some(task) = self.pop() {
                self.process(task).await;
            }
            self.draining.store(false, Ordering::SeqCst);

            // A task enqueued between our last pop and the release saw the role taken and
            // left it to us.
            if self.tasks.lock().is_empty() || !self.try_acquire_drain_role() {
                return;
            }
        }
    }

    async fn process(&self, task: TopologyTask) {
        let kind = task.kind();
        let target = task.target();
        let (completion, outcome) = match task {
            TopologyTask::DeclareExchange {
                declaration,
                completion,
            } => (completion, self.declare_exchange(&declaration).await),
            TopologyTask::DeclareQueue {
                declaration,
                completion,
            } => (completion, self.declare_queue(&declaration).await),
            TopologyTask::Bind {
                binding,
                completion,
            } => (completion, self.bind(&binding).await),
            TopologyTask::Unbind {
                binding,
                completion,
            } => (completion, self.unbind(&binding).await),
        };

        let outcome = outcome.map_err(|failure| match failure {
            Failure::Channel(source) => TopologyError::Channel(source),
            Failure::Broker(source) => TopologyError::Declaration {
                kind,
                target: target.clone(),
                source,
            },
        });
        match &outcome {
            Ok(()) => debug!(%kind, %target, "Topology operation completed"),
            Err(e) => warn!(%kind, %target, error = ?e, "Topology operation failed"),
        }
        completion.try_resolve(outcome);
    }

    async fn declare_exchange(&self, declaration: &ExchangeDeclaration) -> Result<(), Failure> {
        // Another request for the same exchange may have been processed since this one was queued.
        if self.exchanges.contains(&declaration.name) {
            return Ok(());
        }
        let channel = self.channel().await?;
        channel
            .declare_exchange(declaration)
            .await
            .map_err(Failure::Broker)?;
        if !declaration.auto_delete {
            self.exchanges.insert(declaration.name.clone());
        }
        Ok(())
    }

    async fn declare_queue(&self, declaration: &QueueDeclaration) -> Result<(), Failure> {
        if self.queues.contains(&declaration.name) {
            return Ok(());
        }
        let channel = self.channel().await?;
        channel.declare_queue(declaration).await.map_err(Failure::Broker)?;
        if !declaration.auto_delete {
            self.queues.insert(declaration.name.clone());
        }
        Ok(())
    }

    async fn bind(&self, binding: &BindingKey) -> Result<(), Failure> {
        if self.bindings.contains(binding) {
            return Ok(());
        }
        let channel = self.channel().await?;
        channel.bind_queue(binding).await.map_err(Failure::Broker)?;
        self.bindings.insert(binding.clone());
        Ok(())
    }

    async fn unbind(&self, binding: &BindingKey) -> Result<(), Failure> {
        let channel = self.channel().await?;
        channel.unbind_queue(binding).await.map_err(Failure::Broker)?;
        self.bindings.remove(binding);
        Ok(())
    }

    async fn channel(&self) -> Result<P::Channel, Failure> {
        let mut current = self.channel.lock().await;
        match current.as_ref() {
            Some(channel) if channel.is_open() => return Ok(channel.clone()),
            Some(channel) => {
                debug!(channel = %channel.id(), "Topology channel is closed, acquiring a new one")
            }
            None => {}
        }
        let channel = self
            .provider
            .acquire()
            .await
            .map_err(Failure::Channel)?;
        *current = Some(channel.clone());
        Ok(channel)
    }
}

enum Failure {
    Channel(anyhow::Error),
    Broker(anyhow::Error),
}
