//! Single-resolution completion handles and the futures that await them.
//!
//! A [`Completion`] is the producer side: whoever does the work resolves it.
//! A [`Deferred`] is the consumer side: the caller `.await`s it.
//!
//! Resolution is first-writer-wins. Clones of a [`Completion`] share the same slot, so two
//! independent paths (e.g. an acknowledgement and a timeout) can race to resolve it and only
//! the first one takes effect. The loser gets `false` back from [`Completion::try_resolve`],
//! which is expected and must not be treated as an error.
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Every [`Completion`] for a [`Deferred`] was dropped before resolving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abandoned;

/// Create a connected [`Completion`]/[`Deferred`] pair.
pub fn completion_pair<T, E>() -> (Completion<T, E>, Deferred<T, E>) {
    let (sender, receiver) = oneshot::channel();
    let completion = Completion {
        slot: Arc::new(Mutex::new(Some(sender))),
    };
    let deferred = Deferred {
        state: State::Waiting(receiver),
    };
    (completion, deferred)
}

/// The resolving side of a [`Deferred`].
pub struct Completion<T, E> {
    slot: Arc<Mutex<Option<oneshot::Sender<Result<T, E>>>>>,
}

impl<T, E> Clone for Completion<T, E> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T, E> Completion<T, E> {
    /// Resolve the handle if nobody has resolved it yet.
    ///
    /// Returns `true` if this call resolved the handle, `false` if it had already been
    /// resolved. The outcome is delivered even if the waiting side has gone away: the
    /// handle still counts as resolved.
    pub fn try_resolve(&self, outcome: Result<T, E>) -> bool {
        match self.slot.lock().take() {
            Some(sender) => {
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }

    /// `true` if both handles resolve the same [`Deferred`].
    pub(crate) fn is_same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// `true` once any clone of this handle has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl<T, E> std::fmt::Debug for Completion<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// A result that will be available later.
///
/// It resolves to `Err(E::from(Abandoned))` if the producing side went away without
/// resolving it.
#[must_use = "a deferred result does nothing unless awaited"]
pub struct Deferred<T, E> {
    state: State<T, E>,
}

enum State<T, E> {
    Ready(Option<Result<T, E>>),
    Waiting(oneshot::Receiver<Result<T, E>>),
}

impl<T, E> Deferred<T, E> {
    /// A deferred result that is already resolved.
    pub fn ready(outcome: Result<T, E>) -> Self {
        Self {
            state: State::Ready(Some(outcome)),
        }
    }

    /// `true` if the result was already available when the deferred was created.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }
}

// The state is never pinned structurally: the receiver is `Unpin` and the ready value is
// moved out by value.
impl<T, E> Unpin for Deferred<T, E> {}

impl<T, E> Future for Deferred<T, E>
where
    E: From<Abandoned>,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            State::Ready(outcome) => match outcome.take() {
                Some(outcome) => Poll::Ready(outcome),
                None => Poll::Ready(Err(E::from(Abandoned))),
            },
            State::Waiting(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|received| received.unwrap_or_else(|_| Err(E::from(Abandoned)))),
        }
    }
}

impl<T, E> std::fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("ready", &self.is_ready())
            .finish()
    }
}
