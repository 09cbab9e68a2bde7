//! Bounded-wait reader over the capture queue.

use std::collections::VecDeque;
use std::time::Duration;

use log::trace;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

use crate::error::ChannelError;

/// Absolute end of a bounded wait. `None` means wait forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// Deadline `timeout` from now, or no deadline.
    pub fn after(timeout: Option<Duration>) -> Self {
        Self(timeout.map(|t| Instant::now() + t))
    }

    /// A deadline that never expires.
    pub fn never() -> Self {
        Self(None)
    }

    /// Whether the deadline has passed.
    pub fn expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }
}

/// Consumer side of the capture queue.
///
/// [`poll`](Self::poll) is the only suspension point exposed to the
/// layers above. Units handed back with [`unread`](Self::unread) are
/// delivered again before anything new from the queue.
#[derive(Debug)]
pub struct TimedQueueReader<U> {
    rx: UnboundedReceiver<U>,
    pushback: VecDeque<U>,
    poll_interval: Duration,
}

impl<U> TimedQueueReader<U> {
    /// Wrap a queue receiver. `poll_interval` bounds each wait in
    /// [`poll_until`](Self::poll_until).
    pub fn new(rx: UnboundedReceiver<U>, poll_interval: Duration) -> Self {
        Self {
            rx,
            pushback: VecDeque::new(),
            poll_interval,
        }
    }

    /// Return the next unit, waiting at most `timeout`.
    ///
    /// `Ok(None)` means nothing arrived in time. With no timeout this waits
    /// until a unit arrives. [`ChannelError::Closed`] is returned once the
    /// capture task has stopped and the queue is empty.
    pub async fn poll(&mut self, timeout: Option<Duration>) -> Result<Option<U>, ChannelError> {
        if let Some(unit) = self.pushback.pop_front() {
            return Ok(Some(unit));
        }

        match timeout {
            None => self.rx.recv().await.map(Some).ok_or(ChannelError::Closed),
            Some(timeout) => match tokio::time::timeout(timeout, self.rx.recv()).await {
                Ok(Some(unit)) => Ok(Some(unit)),
                Ok(None) => Err(ChannelError::Closed),
                Err(_) => {
                    trace!("poll: nothing within {:?}", timeout);
                    Ok(None)
                }
            },
        }
    }

    /// Poll once, bounded by the poll interval clipped to `deadline`.
    pub async fn poll_until(&mut self, deadline: &Deadline) -> Result<Option<U>, ChannelError> {
        let wait = deadline.remaining().map(|r| self.poll_interval.min(r));
        self.poll(wait).await
    }

    /// Put units back in front of the queue, preserving their order.
    pub fn unread(&mut self, units: Vec<U>) {
        for unit in units.into_iter().rev() {
            self.pushback.push_front(unit);
        }
    }

    /// Discard everything that arrives within `window`. Returns the count.
    pub async fn drain(&mut self, window: Duration) -> Result<usize, ChannelError> {
        let deadline = Deadline::after(Some(window));
        let mut discarded = 0;
        while !deadline.expired() {
            if self.poll_until(&deadline).await?.is_some() {
                discarded += 1;
            }
        }
        trace!("drain: discarded {} units", discarded);
        Ok(discarded)
    }

    /// The per-wait bound used by [`poll_until`](Self::poll_until).
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_interleaved_producer_keeps_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut reader = TimedQueueReader::new(rx, Duration::from_millis(50));

        let producer = tokio::spawn(async move {
            for i in 0..2000u32 {
                tx.send(i).unwrap();
                if i % 64 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        });

        let mut expected = 0u32;
        while expected < 2000 {
            if let Some(v) = reader.poll(Some(Duration::from_secs(1))).await.unwrap() {
                assert_eq!(v, expected);
                expected += 1;
            }
        }
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_poll_times_out_without_error() {
        let (_tx, rx) = mpsc::unbounded_channel::<char>();
        let mut reader = TimedQueueReader::new(rx, Duration::from_millis(50));

        let start = std::time::Instant::now();
        let got = reader.poll(Some(Duration::from_millis(100))).await.unwrap();
        assert!(got.is_none());
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_closed_after_drain() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut reader = TimedQueueReader::new(rx, Duration::from_millis(50));
        tx.send('a').unwrap();
        drop(tx);

        assert_eq!(reader.poll(None).await.unwrap(), Some('a'));
        assert!(matches!(reader.poll(None).await, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_unread_comes_first_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut reader = TimedQueueReader::new(rx, Duration::from_millis(50));
        tx.send(4u8).unwrap();
        reader.unread(vec![1, 2, 3]);

        let mut got = Vec::new();
        for _ in 0..4 {
            got.push(reader.poll(None).await.unwrap().unwrap());
        }
        assert_eq!(got, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_drain_discards_pending() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut reader = TimedQueueReader::new(rx, Duration::from_millis(20));
        for c in "stale".chars() {
            tx.send(c).unwrap();
        }

        assert_eq!(reader.drain(Duration::from_millis(60)).await.unwrap(), 5);
        tx.send('x').unwrap();
        assert_eq!(reader.poll(None).await.unwrap(), Some('x'));
    }

    #[test]
    fn test_deadline_never_expires() {
        let deadline = Deadline::never();
        assert!(!deadline.expired());
        assert!(deadline.remaining().is_none());
        assert_eq!(deadline, Deadline::after(None));
    }
}
