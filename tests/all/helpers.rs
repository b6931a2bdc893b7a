use carrot_pipe::broker::{AckEvent, AckListener, BrokerChannel, ChannelId, ChannelProvider};
use carrot_pipe::publishers::MessageEnvelope;
use carrot_pipe::topology::{BindingKey, ExchangeDeclaration, QueueDeclaration};
use fake::faker::lorem::en::Word;
use fake::Fake;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A random resource name, unique enough for a test.
pub fn random_name(prefix: &str) -> String {
    let word: String = Word().fake();
    format!("{prefix}.{word}.{}", uuid::Uuid::new_v4().simple())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    DeclareExchange(String),
    DeclareQueue(String),
    Bind(BindingKey),
    Unbind(BindingKey),
    EnableConfirms,
    Publish { exchange: String, routing_key: String },
}

/// An in-memory [`BrokerChannel`] recording every call made against it.
#[derive(Clone, Default)]
pub struct FakeChannel {
    id: ChannelId,
    state: Arc<FakeState>,
}

#[derive(Default)]
struct FakeState {
    calls: Mutex<Vec<BrokerCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency: Mutex<Duration>,
    failing: Mutex<HashSet<String>>,
    closed: AtomicBool,
    confirms_enabled: AtomicBool,
    next_sequence: AtomicU64,
    auto_ack: AtomicBool,
    listeners: Mutex<Vec<AckListener>>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every broker call takes at least `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.state.latency.lock() = latency;
        self
    }

    /// Acknowledge every publish as soon as it is sent.
    pub fn with_auto_ack(self) -> Self {
        self.state.auto_ack.store(true, Ordering::SeqCst);
        self
    }

    /// Broker calls targeting `name` fail until [`FakeChannel::stop_failing`] is called.
    pub fn fail_on(&self, name: &str) {
        self.state.failing.lock().insert(name.to_owned());
    }

    pub fn stop_failing(&self, name: &str) {
        self.state.failing.lock().remove(name);
    }

    pub fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }

    /// Deliver `event` to the acknowledgement listeners, as the broker would.
    pub fn emit(&self, event: AckEvent) {
        let listeners = self.state.listeners.lock().clone();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn calls(&self) -> Vec<BrokerCall> {
        self.state.calls.lock().clone()
    }

    pub fn count(&self, call: &BrokerCall) -> usize {
        self.state.calls.lock().iter().filter(|c| *c == call).count()
    }

    pub fn publishes(&self) -> usize {
        self.state
            .calls
            .lock()
            .iter()
            .filter(|c| matches!(c, BrokerCall::Publish { .. }))
            .count()
    }

    pub fn max_concurrent_calls(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.state.listeners.lock().len()
    }

    async fn call(&self, call: BrokerCall, target: &str) -> Result<(), anyhow::Error> {
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = *self.state.latency.lock();
        if latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(latency).await;
        }

        self.state.calls.lock().push(call);
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.state.closed.load(Ordering::SeqCst) {
            anyhow::bail!("CHANNEL_ERROR - channel is closed");
        }
        if self.state.failing.lock().contains(target) {
            anyhow::bail!("PRECONDITION_FAILED - inequivalent arg for `{target}`");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl BrokerChannel for FakeChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn is_open(&self) -> bool {
        !self.state.closed.load(Ordering::SeqCst)
    }

    async fn declare_exchange(
        &self,
        declaration: &ExchangeDeclaration,
    ) -> Result<(), anyhow::Error> {
        self.call(
            BrokerCall::DeclareExchange(declaration.name.clone()),
            &declaration.name,
        )
        .await
    }

    async fn declare_queue(&self, declaration: &QueueDeclaration) -> Result<(), anyhow::Error> {
        self.call(
            BrokerCall::DeclareQueue(declaration.name.clone()),
            &declaration.name,
        )
        .await
    }

    async fn bind_queue(&self, binding: &BindingKey) -> Result<(), anyhow::Error> {
        self.call(BrokerCall::Bind(binding.clone()), &binding.queue)
            .await
    }

    async fn unbind_queue(&self, binding: &BindingKey) -> Result<(), anyhow::Error> {
        self.call(BrokerCall::Unbind(binding.clone()), &binding.queue)
            .await
    }

    async fn enable_confirms(&self) -> Result<(), anyhow::Error> {
        self.call(BrokerCall::EnableConfirms, "confirm.select")
            .await?;
        if !self.state.confirms_enabled.swap(true, Ordering::SeqCst) {
            self.state.next_sequence.store(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn next_publish_sequence(&self) -> u64 {
        if self.state.confirms_enabled.load(Ordering::SeqCst) {
            self.state.next_sequence.load(Ordering::SeqCst)
        } else {
            0
        }
    }

    fn on_ack(&self, listener: AckListener) {
        self.state.listeners.lock().push(listener);
    }

    async fn basic_publish(&self, envelope: &MessageEnvelope) -> Result<(), anyhow::Error> {
        self.call(
            BrokerCall::Publish {
                exchange: envelope.exchange_name.clone(),
                routing_key: envelope.routing_key.clone(),
            },
            &envelope.exchange_name,
        )
        .await?;
        if self.state.confirms_enabled.load(Ordering::SeqCst) {
            let tag = self.state.next_sequence.fetch_add(1, Ordering::SeqCst);
            if self.state.auto_ack.load(Ordering::SeqCst) {
                self.emit(AckEvent::ack(tag));
            }
        }
        Ok(())
    }
}

/// Hands out the same [`FakeChannel`] until told otherwise.
#[derive(Clone, Default)]
pub struct FakeProvider {
    channel: Arc<Mutex<FakeChannel>>,
    acquisitions: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub fn new(channel: FakeChannel) -> Self {
        Self {
            channel: Arc::new(Mutex::new(channel)),
            acquisitions: Arc::default(),
        }
    }

    /// Channels acquired from now on are `channel`.
    pub fn replace_channel(&self, channel: FakeChannel) {
        *self.channel.lock() = channel;
    }

    pub fn channel(&self) -> FakeChannel {
        self.channel.lock().clone()
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ChannelProvider for FakeProvider {
    type Channel = FakeChannel;

    async fn acquire(&self) -> Result<FakeChannel, anyhow::Error> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(self.channel())
    }
}
