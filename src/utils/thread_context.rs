use std::thread::{sleep, JoinHandle};
use std::time::{Duration, Instant};

use crate::event::channel::{pub_sub, CancellationMessage, EventConsumer, EventPublisher};

const GRACEFUL_STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Spawns an OS thread named after the subsystem it serves. The name shows
/// up in panic messages and debugger output, which is the only way to tell
/// a fleet of process workers apart.
pub fn spawn_named<T: Send + 'static>(
    name: impl Into<String>,
    f: impl FnOnce() -> T + Send + 'static,
) -> JoinHandle<T> {
    let name = name.into();
    std::thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .unwrap_or_else(|err| panic!("spawning thread '{name}': {err}"))
}

/// A named background thread that has not been spawned yet.
///
/// The callback receives a consumer that delivers a single cancellation
/// message when the thread is asked to stop.
pub struct NotStartedThreadContext<F, T>
where
    F: FnOnce(EventConsumer<CancellationMessage>) -> T + Send + 'static,
    T: Send + 'static,
{
    thread_name: String,
    callback: F,
}

impl<F, T> NotStartedThreadContext<F, T>
where
    F: FnOnce(EventConsumer<CancellationMessage>) -> T + Send + 'static,
    T: Send + 'static,
{
    pub fn new<S: Into<String>>(thread_name: S, callback: F) -> Self {
        Self {
            thread_name: thread_name.into(),
            callback,
        }
    }

    pub fn start(self) -> StartedThreadContext {
        let (stop_publisher, stop_consumer) = pub_sub::<CancellationMessage>();

        StartedThreadContext::new(
            self.thread_name.clone(),
            stop_publisher,
            spawn_named(self.thread_name.clone(), move || {
                (self.callback)(stop_consumer);
            }),
        )
    }
}

pub struct StartedThreadContext {
    thread_name: String,
    stop_publisher: EventPublisher<CancellationMessage>,
    join_handle: JoinHandle<()>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ThreadContextStopperError {
    #[error("error sending stop signal to '{0}' thread: {1}")]
    StopSignal(String, String),

    #[error("error joining '{0}' thread")]
    Join(String),

    #[error("timeout waiting for '{0}' thread to finish")]
    StopTimeout(String),
}

impl StartedThreadContext {
    /// Returns a new `StartedThreadContext`.
    ///
    /// At this point the thread is running in the background. In general the
    /// thread will run until a message is published to the `stop_publisher`.
    /// Some threads watch a different signal instead; the channel still
    /// exists for those so the stop call does not error.
    pub fn new(
        thread_name: String,
        stop_publisher: EventPublisher<CancellationMessage>,
        join_handle: JoinHandle<()>,
    ) -> Self {
        Self {
            thread_name,
            stop_publisher,
            join_handle,
        }
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    /// Sends a stop signal and periodically checks whether the thread has
    /// finished, giving up after [`DEFAULT_GRACEFUL_STOP_TIMEOUT`].
    pub fn stop(self) -> Result<(), ThreadContextStopperError> {
        self.stop_with_timeout(DEFAULT_GRACEFUL_STOP_TIMEOUT)
    }

    /// Sends a stop signal and periodically checks whether the thread has
    /// finished until `timeout` elapses.
    pub fn stop_with_timeout(self, timeout: Duration) -> Result<(), ThreadContextStopperError> {
        self.send_stop_signal()?;
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.join_handle.is_finished() {
                return join_thread(self.thread_name, self.join_handle);
            }
            sleep(GRACEFUL_STOP_POLL_INTERVAL.min(timeout));
        }

        Err(ThreadContextStopperError::StopTimeout(self.thread_name))
    }

    /// Sends a stop signal and waits until the thread handle is joined,
    /// however long that takes.
    pub fn stop_blocking(self) -> Result<(), ThreadContextStopperError> {
        self.send_stop_signal()?;
        join_thread(self.thread_name, self.join_handle)
    }

    /// A dead stop channel is fine when the thread has already exited on its
    /// own (e.g. the dispatcher after its queue shut down).
    fn send_stop_signal(&self) -> Result<(), ThreadContextStopperError> {
        match self.stop_publisher.publish(()) {
            Ok(()) => Ok(()),
            Err(_) if self.join_handle.is_finished() => Ok(()),
            Err(err) => Err(ThreadContextStopperError::StopSignal(
                self.thread_name.clone(),
                err.to_string(),
            )),
        }
    }
}

fn join_thread(
    thread_name: String,
    join_handle: JoinHandle<()>,
) -> Result<(), ThreadContextStopperError> {
    join_handle
        .join()
        .map_err(|_| ThreadContextStopperError::Join(thread_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_thread_context_start_stop_blocking() {
        let thread_name = "test-thread";
        let callback = |stop_consumer: EventConsumer<CancellationMessage>| loop {
            if stop_consumer.is_cancelled(Duration::default()) {
                break;
            }
        };

        let started = NotStartedThreadContext::new(thread_name, callback).start();
        assert!(!started.is_finished());
        started.stop_blocking().unwrap();

        let started = NotStartedThreadContext::new(thread_name, callback).start();
        assert!(!started.is_finished());
        started.stop().unwrap();
    }

    #[test]
    fn test_fail_stop() {
        let thread_name = "test-thread";
        let never_ending_fn = |_: EventConsumer<CancellationMessage>| {
            sleep(Duration::from_secs(u64::MAX));
        };
        let started = NotStartedThreadContext::new(thread_name, never_ending_fn).start();

        assert!(!started.is_finished());

        assert_eq!(
            started.stop_with_timeout(Duration::from_millis(300)).unwrap_err(),
            ThreadContextStopperError::StopTimeout(thread_name.to_string())
        );
    }
}
