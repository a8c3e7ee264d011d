//! Producer/consumer channel for streamed generation output.
//!
//! A producer task owns a [`FragmentSender`] and pushes text fragments; the
//! consumer pulls them from the [`FragmentStream`]. The stream ends when the
//! producer drops its sender. A consumer cancels by dropping the stream: the
//! producer observes it through [`FragmentSender::closed`] or a failed send
//! and stops.

use tokio::sync::mpsc;

use carebot_shared::{CarebotError, Result};

/// Fragments buffered between producer and consumer.
pub const DEFAULT_STREAM_CAPACITY: usize = 64;

/// Receiving half: a finite, non-restartable sequence of fragments.
#[derive(Debug)]
pub struct FragmentStream {
    rx: mpsc::Receiver<Result<String>>,
}

/// Sending half held by the producer.
#[derive(Debug, Clone)]
pub struct FragmentSender {
    tx: mpsc::Sender<Result<String>>,
}

impl FragmentStream {
    /// Create a connected sender/stream pair.
    pub fn channel(capacity: usize) -> (FragmentSender, FragmentStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (FragmentSender { tx }, FragmentStream { rx })
    }

    /// A stream that yields the given fragments and then ends.
    pub fn from_fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items: Vec<Result<String>> = fragments.into_iter().map(|f| Ok(f.into())).collect();
        Self::from_results(items)
    }

    /// A stream that yields the given items (fragments or errors) and then ends.
    pub fn from_results(items: Vec<Result<String>>) -> Self {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            // Capacity covers every item, so this cannot fail.
            let _ = tx.try_send(item);
        }
        Self { rx }
    }

    /// Next fragment, or `None` once the producer has finished.
    pub async fn next(&mut self) -> Option<Result<String>> {
        self.rx.recv().await
    }

    /// Drain the stream into one string. The first error aborts.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

impl FragmentSender {
    /// Send one fragment. Returns `false` once the consumer has gone away.
    pub async fn send(&self, fragment: impl Into<String>) -> bool {
        self.tx.send(Ok(fragment.into())).await.is_ok()
    }

    /// Report a producer failure to the consumer.
    pub async fn fail(&self, error: CarebotError) -> bool {
        self.tx.send(Err(error)).await.is_ok()
    }

    /// Whether the consumer dropped its stream.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the consumer has dropped its stream.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_fragments_in_order() {
        let stream = FragmentStream::from_fragments(["Take ", "a ", "walk."]);
        assert_eq!(stream.collect_text().await.unwrap(), "Take a walk.");
    }

    #[tokio::test]
    async fn error_aborts_collection() {
        let stream = FragmentStream::from_results(vec![
            Ok("partial".into()),
            Err(CarebotError::GenerationFailure("backend died".into())),
        ]);
        let err = stream.collect_text().await.unwrap_err();
        assert!(err.to_string().contains("backend died"));
    }

    #[tokio::test]
    async fn producer_observes_dropped_consumer() {
        let (tx, mut stream) = FragmentStream::channel(1);
        let producer = tokio::spawn(async move {
            let mut sent = 0usize;
            while tx.send("x").await {
                sent += 1;
            }
            sent
        });

        assert_eq!(stream.next().await.unwrap().unwrap(), "x");
        drop(stream);

        // The producer exits instead of blocking forever.
        let sent = producer.await.unwrap();
        assert!(sent >= 1);
    }

    #[tokio::test]
    async fn stream_ends_when_sender_dropped() {
        let (tx, mut stream) = FragmentStream::channel(4);
        assert!(tx.send("only").await);
        drop(tx);
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
    }
}
