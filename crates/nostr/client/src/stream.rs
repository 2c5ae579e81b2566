//! Subscriptions as cancellable async sequences.
//!
//! An [`EventStream`] yields events, at most one end-of-stored-events marker,
//! and ends either when cancelled or after a [`StreamItem::Closed`] item.

use futures::Stream;
use futures::task::AtomicWaker;
use hub_nostr::Event;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Event(Event),
    /// Every relay has delivered its stored backlog
    EndOfStoredEvents,
    /// The subscription ended on the transport side; no items follow
    Closed(String),
}

/// Sending half used by transports to feed an [`EventStream`].
pub type StreamSender = mpsc::UnboundedSender<StreamItem>;

type CancelFn = Box<dyn FnOnce() + Send>;

struct CancelState {
    cancelled: AtomicBool,
    on_cancel: Mutex<Option<CancelFn>>,
    waker: AtomicWaker,
}

/// Cloneable cancellation for one subscription.
///
/// The teardown callback runs on the first `cancel()` only; later calls and
/// calls after the transport is gone are no-ops.
#[derive(Clone)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    fn new(on_cancel: CancelFn) -> Self {
        Self {
            state: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
                on_cancel: Mutex::new(Some(on_cancel)),
                waker: AtomicWaker::new(),
            }),
        }
    }

    /// Returns `true` if this call performed the teardown.
    pub fn cancel(&self) -> bool {
        if self.state.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        let callback = match self.state.on_cancel.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(callback) = callback {
            callback();
        }
        self.state.waker.wake();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A live subscription. Dropping it cancels it.
pub struct EventStream {
    subscription_id: String,
    rx: mpsc::UnboundedReceiver<StreamItem>,
    cancel: CancelHandle,
    finished: bool,
}

impl EventStream {
    /// Build a stream plus the sender a transport feeds it with.
    ///
    /// `on_cancel` is the transport teardown (send CLOSE, drop routing state).
    pub fn channel(
        subscription_id: impl Into<String>,
        on_cancel: impl FnOnce() + Send + 'static,
    ) -> (StreamSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = Self {
            subscription_id: subscription_id.into(),
            rx,
            cancel: CancelHandle::new(Box::new(on_cancel)),
            finished: false,
        };
        (tx, stream)
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Idempotent; returns `true` only for the call that tore the stream down.
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for EventStream {
    type Item = StreamItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished || this.cancel.is_cancelled() {
            this.finished = true;
            return Poll::Ready(None);
        }

        this.cancel.state.waker.register(cx.waker());
        if this.cancel.is_cancelled() {
            this.finished = true;
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(StreamItem::Closed(reason))) => {
                this.finished = true;
                Poll::Ready(Some(StreamItem::Closed(reason)))
            }
            Poll::Ready(Some(item)) => Poll::Ready(Some(item)),
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("subscription_id", &self.subscription_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::AtomicUsize;

    fn counted() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_cancel_runs_teardown_once() {
        let (count, on_cancel) = counted();
        let (_tx, stream) = EventStream::channel("sub", on_cancel);

        assert!(stream.cancel());
        assert!(!stream.cancel());
        drop(stream);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_cancels() {
        let (count, on_cancel) = counted();
        let (_tx, stream) = EventStream::channel("sub", on_cancel);
        drop(stream);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_item_ends_stream() {
        let (_count, on_cancel) = counted();
        let (tx, mut stream) = EventStream::channel("sub", on_cancel);
        tx.send(StreamItem::EndOfStoredEvents).unwrap();
        tx.send(StreamItem::Closed("bye".to_string())).unwrap();
        tx.send(StreamItem::EndOfStoredEvents).unwrap();

        assert_eq!(stream.next().await, Some(StreamItem::EndOfStoredEvents));
        assert_eq!(stream.next().await, Some(StreamItem::Closed("bye".to_string())));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_cancel_from_other_task_wakes_consumer() {
        let (_count, on_cancel) = counted();
        let (_tx, mut stream) = EventStream::channel("sub", on_cancel);
        let handle = stream.cancel_handle();

        let consumer = tokio::spawn(async move { stream.next().await });
        tokio::task::yield_now().await;
        handle.cancel();

        assert_eq!(consumer.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sender_dropped_ends_stream() {
        let (_count, on_cancel) = counted();
        let (tx, mut stream) = EventStream::channel("sub", on_cancel);
        drop(tx);
        assert_eq!(stream.next().await, None);
    }
}
