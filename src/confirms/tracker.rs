use super::ConfirmError;
use crate::broker::{AckEvent, AckKind, BrokerChannel, ChannelId};
use crate::deferred::{completion_pair, Completion, Deferred};
use crate::exclusive::ExclusiveExecutor;
use crate::pipeline::PipeContext;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Pipe context item: whether the publish in flight should wait for a broker confirmation.
///
/// Confirmation is on unless the context says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishConfirmation {
    #[default]
    Enabled,
    Disabled,
}

/// Pipe context item: how long to wait for the broker's confirmation of this publish,
/// overriding [`ConfirmTracker`]'s default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmTimeout(pub Duration);

type ConfirmCompletion = Completion<u64, ConfirmError>;

struct PendingEntry {
    completion: ConfirmCompletion,
    timer: JoinHandle<()>,
}

impl PendingEntry {
    /// Resolve the publish and stop its timer.
    fn resolve(self, outcome: Result<u64, ConfirmError>) -> bool {
        self.timer.abort();
        self.completion.try_resolve(outcome)
    }
}

/// Tracks publishes waiting for a broker confirmation, across any number of channels.
///
/// # Sequence numbers
///
/// Once a channel is in confirm mode, the broker numbers every publish on it, starting from 1.
/// Its acknowledgements refer to those numbers, either one at a time or as a range
/// ("everything up to N"). The tracker predicts the number of each publish before it happens,
/// registers it, and resolves it when the matching acknowledgement arrives, or fails it when
/// its timeout expires, whichever comes first.
///
/// # Usage
///
/// Call [`ConfirmTracker::await_confirm`] right before publishing, publish, then await the
/// returned [`PendingConfirmation`].
///
/// All bookkeeping is per channel and lock-free on the publish path: resolving confirmations
/// never blocks new publishes.
pub struct ConfirmTracker {
    default_timeout: Duration,
    channels: DashMap<ChannelId, Arc<ChannelConfirms>>,
    listener_installation: ExclusiveExecutor<ChannelId>,
}

#[derive(Default)]
struct ChannelConfirms {
    pending: DashMap<u64, PendingEntry>,
    last_assigned: AtomicU64,
    resync: AtomicBool,
    listening: AtomicBool,
}

impl ConfirmTracker {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            channels: DashMap::new(),
            listener_installation: ExclusiveExecutor::new(),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Register the next publish on `channel` for confirmation.
    ///
    /// Returns `None` if `context` disables confirmation for this publish.
    /// The first call for a channel puts it in confirm mode and starts listening to its
    /// acknowledgements; concurrent first callers wait for a single installation.
    ///
    /// `cancellation` is only observed while the channel is being prepared. Once a sequence
    /// number has been assigned, only an acknowledgement, the timeout,
    /// [`ConfirmTracker::abandon`] or [`ConfirmTracker::release`] resolve it.
    #[tracing::instrument(level = "debug", skip_all, fields(channel = %channel.id()))]
    pub async fn await_confirm<C: BrokerChannel>(
        &self,
        channel: &C,
        context: &PipeContext,
        cancellation: &CancellationToken,
    ) -> Result<Option<PendingConfirmation>, ConfirmError> {
        if context.get::<PublishConfirmation>() == Some(&PublishConfirmation::Disabled) {
            return Ok(None);
        }
        let id = channel.id();
        if !channel.is_open() {
            self.release(&id);
            return Err(ConfirmError::ChannelClosed);
        }
        let timeout = context
            .get::<ConfirmTimeout>()
            .map(|t| t.0)
            .unwrap_or(self.default_timeout);

        let confirms = self.channel_confirms(id);
        if !confirms.listening.load(Ordering::SeqCst) {
            self.start_listening(channel, &confirms, cancellation)
                .await?;
        }

        let sequence = confirms.assign_sequence(channel.next_publish_sequence());
        let deferred = confirms.register(sequence, timeout);

        Ok(Some(PendingConfirmation { sequence, deferred }))
    }

    /// Give back `sequence`: it was registered on `channel` but the publish never went out.
    ///
    /// Its confirmation fails with [`ConfirmError::Abandoned`] and, unless a later sequence
    /// number was handed out in the meantime, the next publish on `channel` gets `sequence`
    /// again.
    pub fn abandon(&self, channel: &ChannelId, sequence: u64) {
        let Some(confirms) = self.channels.get(channel).map(|c| c.value().clone()) else {
            return;
        };
        if let Some((_, entry)) = confirms.pending.remove(&sequence) {
            entry.resolve(Err(ConfirmError::Abandoned));
        }
        if confirms
            .last_assigned
            .compare_exchange(sequence, sequence - 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Someone registered after us: realign with the broker before their publish.
            confirms.resync.store(true, Ordering::SeqCst);
            warn!(
                %channel,
                sequence,
                "Abandoned a sequence number that is not the latest one assigned"
            );
        }
        debug!(%channel, sequence, "Abandoned publisher confirmation");
    }

    /// Forget everything about `channel`, failing its outstanding confirmations with
    /// [`ConfirmError::ChannelClosed`].
    ///
    /// Call it when the channel is closed: its sequence numbers will never be acknowledged.
    pub fn release(&self, channel: &ChannelId) {
        if let Some((_, confirms)) = self.channels.remove(channel) {
            let tags: Vec<u64> = confirms.pending.iter().map(|entry| *entry.key()).collect();
            for tag in tags {
                if let Some((_, entry)) = confirms.pending.remove(&tag) {
                    entry.resolve(Err(ConfirmError::ChannelClosed));
                }
            }
            debug!(%channel, "Released publisher confirms state");
        }
        self.listener_installation.forget(channel);
    }

    /// The number of publishes on `channel` still waiting for a confirmation.
    pub fn outstanding(&self, channel: &ChannelId) -> usize {
        self.channels
            .get(channel)
            .map(|confirms| confirms.pending.len())
            .unwrap_or(0)
    }

    /// The number of channels the tracker holds state for.
    pub fn tracked_channels(&self) -> usize {
        self.channels.len()
    }

    fn channel_confirms(&self, channel: ChannelId) -> Arc<ChannelConfirms> {
        self.channels.entry(channel).or_default().value().clone()
    }

    async fn start_listening<C: BrokerChannel>(
        &self,
        channel: &C,
        confirms: &Arc<ChannelConfirms>,
        cancellation: &CancellationToken,
    ) -> Result<(), ConfirmError> {
        let id = channel.id();
        let installation = async {
            if confirms.listening.load(Ordering::SeqCst) {
                return Ok(());
            }
            channel
                .enable_confirms()
                .await
                .map_err(ConfirmError::Broker)?;

            let confirms_ref: Weak<ChannelConfirms> = Arc::downgrade(confirms);
            channel.on_ack(Arc::new(move |event| {
                if let Some(confirms) = confirms_ref.upgrade() {
                    confirms.acknowledge(event);
                }
            }));
            confirms.listening.store(true, Ordering::SeqCst);
            debug!(channel = %id, "Publisher confirms enabled");
            Ok::<(), ConfirmError>(())
        };

        self.listener_installation
            .run_exclusively_until(&id, cancellation, installation)
            .await
            .map_err(|_| ConfirmError::Cancelled)?
    }
}

impl ChannelConfirms {
    /// Pick the sequence number of the next publish.
    ///
    /// The broker's counter is authoritative, but it only moves once a publish has actually
    /// gone out: two publishers registering back-to-back read the same value. We never hand
    /// out a number at or below one we already gave away, except after an out-of-order
    /// [`ConfirmTracker::abandon`]: the next number then comes from the broker counter, skipping
    /// only the numbers of publishes still registered but not sent yet.
    fn assign_sequence(&self, broker_next: u64) -> u64 {
        if self.resync.swap(false, Ordering::SeqCst) {
            let unsent = self
                .pending
                .iter()
                .map(|entry| *entry.key())
                .filter(|tag| *tag >= broker_next)
                .max();
            let realigned = unsent.unwrap_or(broker_next.saturating_sub(1));
            self.last_assigned.store(realigned, Ordering::SeqCst);
        }
        let mut last = self.last_assigned.load(Ordering::SeqCst);
        loop {
            let candidate = broker_next.max(last + 1);
            match self.last_assigned.compare_exchange_weak(
                last,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return candidate,
                Err(current) => last = current,
            }
        }
    }

    /// Wait for the confirmation of `sequence`, failing it after `timeout`.
    fn register(self: &Arc<Self>, sequence: u64, timeout: Duration) -> Deferred<u64, ConfirmError> {
        let (completion, deferred) = completion_pair();
        let timer = spawn_timeout(Arc::clone(self), sequence, completion.clone(), timeout);
        let entry = PendingEntry {
            completion: completion.clone(),
            timer,
        };
        if let Some(replaced) = self.pending.insert(sequence, entry) {
            replaced.timer.abort();
            warn!(
                sequence,
                "Sequence number already awaiting a confirmation, replacing it"
            );
        }
        // The timer may have fired before the entry was inserted.
        if completion.is_resolved() {
            self.pending
                .remove_if(&sequence, |_, pending| pending.completion.is_same(&completion));
        }
        deferred
    }

    fn acknowledge(&self, event: AckEvent) {
        let tags: Vec<u64> = if event.multiple {
            self.pending
                .iter()
                .map(|entry| *entry.key())
                .filter(|tag| *tag <= event.tag)
                .collect()
        } else {
            vec![event.tag]
        };

        for tag in tags {
            // Whoever removes the entry resolves it: a racing timeout finds nothing to do.
            if let Some((_, entry)) = self.pending.remove(&tag) {
                let outcome = match event.kind {
                    AckKind::Ack => Ok(tag),
                    AckKind::Nack => Err(ConfirmError::Nacked { sequence: tag }),
                };
                entry.resolve(outcome);
            }
        }
    }
}

fn spawn_timeout(
    confirms: Arc<ChannelConfirms>,
    sequence: u64,
    completion: ConfirmCompletion,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        confirms
            .pending
            .remove_if(&sequence, |_, pending| pending.completion.is_same(&completion));
        if completion.try_resolve(Err(ConfirmError::Timeout { sequence, timeout })) {
            debug!(sequence, ?timeout, "Publisher confirmation timed out");
        }
    })
}

/// A publish registered with [`ConfirmTracker`], waiting for the broker's verdict.
///
/// Resolves to the publish's sequence number once the broker acknowledged it.
#[must_use = "the confirmation is only observed if awaited"]
#[derive(Debug)]
pub struct PendingConfirmation {
    sequence: u64,
    deferred: Deferred<u64, ConfirmError>,
}

impl PendingConfirmation {
    /// The sequence number assigned to the publish.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Future for PendingConfirmation {
    type Output = Result<u64, ConfirmError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().deferred).poll(cx)
    }
}
