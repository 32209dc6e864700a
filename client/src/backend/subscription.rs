//! Owned change-stream attachment.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use livefeed_engine::ChangeEvent;
use tokio::sync::mpsc;

/// Message delivered on a change stream.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// A change to the collection
    Event(ChangeEvent),
    /// The transport dropped the stream; nothing more will arrive
    Interrupted(String),
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// One active stream attachment.
///
/// The subscription owns the server-side resource: cancelling it, or
/// dropping it, releases that resource and stops delivery. Cancelling twice
/// is harmless.
pub struct Subscription {
    id: String,
    events: mpsc::UnboundedReceiver<FeedMessage>,
    on_cancel: Option<CancelFn>,
}

impl Subscription {
    /// Wrap a receiver together with the release action for its resource.
    pub fn new(
        id: impl Into<String>,
        events: mpsc::UnboundedReceiver<FeedMessage>,
        on_cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            events,
            on_cancel: Some(Box::new(on_cancel)),
        }
    }

    /// Identifier of the server-side subscription.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Receive the next message; `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<FeedMessage> {
        if self.is_cancelled() {
            return None;
        }
        self.events.recv().await
    }

    /// Stop delivery and release the server-side resource.
    pub fn cancel(&mut self) {
        if let Some(on_cancel) = self.on_cancel.take() {
            self.events.close();
            on_cancel();
            tracing::debug!(subscription = %self.id, "Subscription cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.on_cancel.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl Stream for Subscription {
    type Item = FeedMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.is_cancelled() {
            return Poll::Ready(None);
        }
        self.events.poll_recv(cx)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use livefeed_engine::Record;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counted_subscription() -> (
        Subscription,
        mpsc::UnboundedSender<FeedMessage>,
        Arc<AtomicUsize>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let sub = Subscription::new("sub-1", rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (sub, tx, released)
    }

    #[tokio::test]
    async fn delivers_messages_as_stream() {
        let (mut sub, tx, _) = counted_subscription();
        let event = ChangeEvent::Inserted(Record::remote("1", 1, json!({})));
        tx.send(FeedMessage::Event(event.clone())).unwrap();
        tx.send(FeedMessage::Interrupted("bye".into())).unwrap();

        assert_eq!(sub.next().await, Some(FeedMessage::Event(event)));
        assert_eq!(
            sub.recv().await,
            Some(FeedMessage::Interrupted("bye".into()))
        );
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_stops_delivery() {
        let (mut sub, tx, released) = counted_subscription();
        sub.cancel();
        sub.cancel();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(sub.is_cancelled());

        assert!(tx.send(FeedMessage::Interrupted("late".into())).is_err());
        assert_eq!(sub.next().await, None);
    }

    #[test]
    fn drop_releases_resource() {
        let (sub, _tx, released) = counted_subscription();
        drop(sub);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
