use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::time::Duration;
use thiserror::Error;

/// Message published to ask a background thread to wind down.
pub type CancellationMessage = ();

pub struct EventConsumer<E>(Receiver<E>);

impl<E> From<Receiver<E>> for EventConsumer<E> {
    fn from(value: Receiver<E>) -> Self {
        Self(value)
    }
}

pub struct EventPublisher<E>(Sender<E>);

impl<E> From<Sender<E>> for EventPublisher<E> {
    fn from(value: Sender<E>) -> Self {
        Self(value)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum EventPublisherError {
    #[error("error while publishing event: {0}")]
    SendError(String),
    /// The channel stayed full for the whole allowed timeout.
    #[error("channel full after waiting {0:?}")]
    Full(Duration),
}

/// Returns an unbounded publisher/consumer pair.
pub fn pub_sub<E>() -> (EventPublisher<E>, EventConsumer<E>) {
    let (s, r) = unbounded();
    (EventPublisher(s), EventConsumer(r))
}

/// Returns a publisher/consumer pair over a channel of fixed `capacity`.
///
/// Used for the per-process worker inboxes, where a slow worker must push
/// back on callers instead of letting updates pile up without bound.
pub fn bounded_pub_sub<E>(capacity: usize) -> (EventPublisher<E>, EventConsumer<E>) {
    let (s, r) = bounded(capacity);
    (EventPublisher(s), EventConsumer(r))
}

impl<E> EventPublisher<E> {
    pub fn publish(&self, event: E) -> Result<(), EventPublisherError> {
        self.0
            .send(event)
            .map_err(|err| EventPublisherError::SendError(err.to_string()))
    }

    pub fn try_publish(&self, event: E) -> Result<(), EventPublisherError> {
        self.0
            .try_send(event)
            .map_err(|err| EventPublisherError::SendError(err.to_string()))
    }

    /// Publishes the event, waiting at most `timeout` for channel space.
    pub fn publish_timeout(&self, event: E, timeout: Duration) -> Result<(), EventPublisherError> {
        self.0.send_timeout(event, timeout).map_err(|err| match err {
            SendTimeoutError::Timeout(_) => EventPublisherError::Full(timeout),
            SendTimeoutError::Disconnected(_) => {
                EventPublisherError::SendError("channel disconnected".to_string())
            }
        })
    }
}

impl<E> Clone for EventPublisher<E> {
    fn clone(&self) -> Self {
        EventPublisher(self.0.clone())
    }
}

impl<E> AsRef<Receiver<E>> for EventConsumer<E> {
    fn as_ref(&self) -> &Receiver<E> {
        &self.0
    }
}

impl EventConsumer<CancellationMessage> {
    /// Waits up to `timeout` for a stop request. True once one arrived, or
    /// once the publishing side went away (a dropped stopper counts as a
    /// stop). Interval threads use this as their sleep.
    pub fn is_cancelled(&self, timeout: Duration) -> bool {
        !matches!(self.0.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_publish_and_consume() {
        let (publisher, consumer) = pub_sub::<u32>();
        publisher.publish(7).unwrap();
        assert_eq!(consumer.as_ref().recv().unwrap(), 7);
    }

    #[test]
    fn test_bounded_publish_timeout_when_full() {
        let (publisher, _consumer) = bounded_pub_sub::<u32>(1);
        publisher.publish(1).unwrap();

        let result = publisher.publish_timeout(2, Duration::from_millis(20));
        assert_matches!(result, Err(EventPublisherError::Full(_)));
    }

    #[test]
    fn test_publish_to_disconnected_channel() {
        let (publisher, consumer) = pub_sub::<u32>();
        drop(consumer);
        assert_matches!(publisher.publish(1), Err(EventPublisherError::SendError(_)));
    }

    #[test]
    fn cancellation_consumer_times_out_then_observes_the_stop() {
        let (publisher, consumer) = pub_sub::<CancellationMessage>();
        assert!(!consumer.is_cancelled(Duration::from_millis(10)));

        publisher.publish(()).unwrap();
        assert!(consumer.is_cancelled(Duration::from_millis(10)));

        // A dropped stopper counts as a stop.
        drop(publisher);
        assert!(consumer.is_cancelled(Duration::from_millis(10)));
    }
}
