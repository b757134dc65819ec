//! Broadcast fan-out of worker output lines.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio_stream::Stream;
use tracing::{debug, warn};

use super::types::{LogLine, LogStream, StreamFilter};

/// Default per-subscriber backlog before a slow subscriber starts losing lines.
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out point for worker output. Cheap to clone; clones share one channel.
#[derive(Clone)]
pub struct LogRelay {
    inner: Arc<Mutex<RelayState>>,
}

struct RelayState {
    /// `None` once the relay is closed.
    sender: Option<broadcast::Sender<LogLine>>,
    /// Sequence of the last published line.
    sequence: u64,
}

impl LogRelay {
    /// Create a relay whose subscribers buffer up to `capacity` lines.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Mutex::new(RelayState {
                sender: Some(sender),
                sequence: 0,
            })),
        }
    }

    /// Create with default capacity.
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RelayState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Broadcast a line to every active subscriber.
    ///
    /// Returns the number of subscribers that received it. Lines published
    /// after [`close`](Self::close) are dropped.
    pub fn publish(&self, stream: LogStream, text: impl Into<String>) -> usize {
        let mut state = self.lock();
        if state.sender.is_none() {
            return 0;
        }
        state.sequence += 1;
        let line = LogLine {
            stream,
            text: text.into(),
            sequence: state.sequence,
        };
        // Sent under the lock so sequence order equals delivery order.
        state
            .sender
            .as_ref()
            .map_or(0, |sender| sender.send(line).unwrap_or(0))
    }

    /// Attach a new subscriber. Lines emitted before this call are not replayed.
    pub fn subscribe(&self, filter: StreamFilter) -> LogSubscription {
        let state = self.lock();
        let rx = if let Some(sender) = &state.sender {
            sender.subscribe()
        } else {
            // Already closed: hand out a receiver whose channel is closed too.
            let (tx, rx) = broadcast::channel(1);
            drop(tx);
            rx
        };
        LogSubscription { rx, filter }
    }

    /// End every subscription once buffered lines are drained. Idempotent.
    pub fn close(&self) {
        if self.lock().sender.take().is_some() {
            debug!("Log relay closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().sender.is_none()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock()
            .sender
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for LogRelay {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// A live, filtered view of the relay.
#[derive(Debug)]
pub struct LogSubscription {
    rx: broadcast::Receiver<LogLine>,
    filter: StreamFilter,
}

impl LogSubscription {
    pub const fn filter(&self) -> StreamFilter {
        self.filter
    }

    /// Next matching line, or `None` once the relay has closed.
    pub async fn next(&mut self) -> Option<LogLine> {
        loop {
            match self.rx.recv().await {
                Ok(line) if self.filter.matches(line.stream) => return Some(line),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Log subscriber lagging, lines dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Convert into a [`Stream`] that ends when the relay closes.
    pub fn into_stream(mut self) -> impl Stream<Item = LogLine> + Send + 'static {
        async_stream::stream! {
            while let Some(line) = self.next().await {
                yield line;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn broadcasts_to_every_subscriber() {
        let relay = LogRelay::with_defaults();
        let mut a = relay.subscribe(StreamFilter::All);
        let mut b = relay.subscribe(StreamFilter::All);

        assert_eq!(relay.publish(LogStream::Stdout, "hello"), 2);

        assert_eq!(a.next().await.unwrap().text, "hello");
        assert_eq!(b.next().await.unwrap().text, "hello");
    }

    #[tokio::test]
    async fn filter_selects_stream() {
        let relay = LogRelay::with_defaults();
        let errs = relay.subscribe(StreamFilter::stderr());
        assert_eq!(errs.filter(), StreamFilter::Only(LogStream::Stderr));

        relay.publish(LogStream::Stdout, "out-1");
        relay.publish(LogStream::Stderr, "err-1");
        relay.publish(LogStream::Stdout, "out-2");
        relay.publish(LogStream::Stderr, "err-2");
        relay.close();

        let got: Vec<String> = errs.into_stream().map(|l| l.text).collect().await;
        assert_eq!(got, vec!["err-1", "err-2"]);
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_replay() {
        let relay = LogRelay::with_defaults();
        relay.publish(LogStream::Stdout, "early");

        let mut late = relay.subscribe(StreamFilter::All);
        relay.publish(LogStream::Stdout, "late");
        relay.close();

        assert_eq!(late.next().await.unwrap().text, "late");
        assert!(late.next().await.is_none());
    }

    #[tokio::test]
    async fn sequence_is_monotonic_across_streams() {
        let relay = LogRelay::with_defaults();
        let mut sub = relay.subscribe(StreamFilter::All);

        relay.publish(LogStream::Stdout, "a");
        relay.publish(LogStream::Stderr, "b");
        relay.publish(LogStream::Stdout, "c");

        let s1 = sub.next().await.unwrap().sequence;
        let s2 = sub.next().await.unwrap().sequence;
        let s3 = sub.next().await.unwrap().sequence;
        assert!(s1 < s2 && s2 < s3);
    }

    #[tokio::test]
    async fn subscribe_after_close_ends_immediately() {
        let relay = LogRelay::with_defaults();
        relay.close();
        relay.close();

        assert!(relay.is_closed());
        assert_eq!(relay.publish(LogStream::Stdout, "dropped"), 0);
        let mut sub = relay.subscribe(StreamFilter::All);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_to_newest() {
        let relay = LogRelay::new(2);
        let sub = relay.subscribe(StreamFilter::All);
        for i in 0..5 {
            relay.publish(LogStream::Stdout, format!("line-{i}"));
        }
        relay.close();

        let got: Vec<String> = sub.into_stream().map(|l| l.text).collect().await;
        assert_eq!(got, vec!["line-3", "line-4"]);
    }

    #[tokio::test]
    async fn subscriber_count_tracks_drops() {
        let relay = LogRelay::with_defaults();
        let sub = relay.subscribe(StreamFilter::All);
        assert_eq!(relay.subscriber_count(), 1);
        drop(sub);
        assert_eq!(relay.subscriber_count(), 0);
    }
}
