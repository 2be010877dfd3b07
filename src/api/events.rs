//! Session status notifications.
//!
//! Components interested in session changes call [`SessionEvents::subscribe`]
//! and keep the returned [`Subscription`]; dropping it (or calling
//! [`Subscription::unsubscribe`]) removes the subscriber.

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Bound { username: String, email: String },
    Destroyed { username: String },
}

#[derive(Clone, Debug)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SessionEvents {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to every live subscriber; returns how many received it.
    pub fn publish(&self, event: SessionEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<SessionEvent>,
}

impl Subscription {
    /// Next event, or `None` once every publisher is gone.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("session event subscriber lagged, skipped {skipped} events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {
        drop(self.receiver);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(username: &str) -> SessionEvent {
        SessionEvent::Bound {
            username: username.to_string(),
            email: format!("{username}@example.com"),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let events = SessionEvents::default();
        let mut first = events.subscribe();
        let mut second = events.subscribe();

        assert_eq!(events.publish(bound("alice")), 2);
        assert_eq!(first.next().await, Some(bound("alice")));
        assert_eq!(second.next().await, Some(bound("alice")));
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_that_subscriber() {
        let events = SessionEvents::default();
        let first = events.subscribe();
        let mut second = events.subscribe();
        assert_eq!(events.subscriber_count(), 2);

        first.unsubscribe();
        assert_eq!(events.subscriber_count(), 1);

        let destroyed = SessionEvent::Destroyed {
            username: "alice".to_string(),
        };
        assert_eq!(events.publish(destroyed.clone()), 1);
        assert_eq!(second.next().await, Some(destroyed));
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let events = SessionEvents::new(0);
        assert_eq!(events.publish(bound("alice")), 0);
    }

    #[tokio::test]
    async fn next_returns_none_when_channel_closes() {
        let events = SessionEvents::default();
        let mut subscription = events.subscribe();
        drop(events);
        assert_eq!(subscription.next().await, None);
    }
}
