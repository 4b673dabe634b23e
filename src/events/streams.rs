use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace};

/// Generic event stream for reactive event handling
pub struct EventStream<T: Clone + Send + 'static> {
    sender: broadcast::Sender<T>,
    buffer: Arc<RwLock<VecDeque<T>>>,
    buffer_size: usize,
    stats: Arc<RwLock<EventStreamStats>>,
}

/// Statistics for monitoring stream activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventStreamStats {
    pub events_published: u64,
    pub events_dropped: u64,
}

impl<T: Clone + Send + 'static> EventStream<T> {
    /// Create a new event stream with specified capacity
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        debug!(capacity, buffer_size, "Creating new event stream");
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(buffer_size))),
            buffer_size,
            stats: Arc::new(RwLock::new(EventStreamStats::default())),
        }
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> Subscriber<T> {
        debug!("New subscriber registered to event stream");
        Subscriber {
            receiver: self.sender.subscribe(),
            buffer: Arc::clone(&self.buffer),
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// The event is buffered for replay whether or not anyone is listening;
    /// an error only means there were no live receivers.
    pub async fn publish(&self, event: T) -> Result<usize, broadcast::error::SendError<T>> {
        let result = self.sender.send(event.clone());
        self.buffer_event(event).await;

        let mut stats = self.stats.write().await;
        match &result {
            Ok(receiver_count) => {
                stats.events_published += 1;
                trace!(receivers = receiver_count, "Event published");
            }
            Err(_) => {
                stats.events_dropped += 1;
                debug!("No receivers for event, message buffered");
            }
        }

        result
    }

    /// Store an event in the buffer for replay
    async fn buffer_event(&self, event: T) {
        if self.buffer_size == 0 {
            return;
        }
        let mut buffer = self.buffer.write().await;
        buffer.push_back(event);

        // Keep buffer size under control
        while buffer.len() > self.buffer_size {
            buffer.pop_front();
        }
    }

    /// Get current statistics
    pub async fn get_stats(&self) -> EventStreamStats {
        self.stats.read().await.clone()
    }

    /// Number of live subscribers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Subscriber for receiving events from a stream
pub struct Subscriber<T: Clone + Send + 'static> {
    receiver: broadcast::Receiver<T>,
    buffer: Arc<RwLock<VecDeque<T>>>,
}

impl<T: Clone + Send + 'static> Subscriber<T> {
    /// Receive the next event
    pub async fn recv(&mut self) -> Result<T, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Receive an event if one is already waiting
    pub fn try_recv(&mut self) -> Result<T, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Replay events from the buffer
    pub async fn replay_buffer(&self) -> Vec<T> {
        let buffer = self.buffer.read().await;
        buffer.iter().cloned().collect()
    }
}

impl<T: Clone + Send + 'static> Clone for EventStream<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            buffer: Arc::clone(&self.buffer),
            buffer_size: self.buffer_size,
            stats: Arc::clone(&self.stats),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_buffered() {
        let stream: EventStream<u32> = EventStream::new(8, 2);

        assert!(stream.publish(1).await.is_err());
        assert!(stream.publish(2).await.is_err());
        assert!(stream.publish(3).await.is_err());

        let stats = stream.get_stats().await;
        assert_eq!(stats.events_published, 0);
        assert_eq!(stats.events_dropped, 3);

        // Buffer keeps only the newest entries
        let subscriber = stream.subscribe();
        assert_eq!(subscriber.replay_buffer().await, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let stream: EventStream<&'static str> = EventStream::new(8, 8);
        let mut first = stream.subscribe();
        let mut second = stream.subscribe();
        assert_eq!(stream.receiver_count(), 2);

        assert_eq!(stream.publish("a").await.unwrap(), 2);
        assert_eq!(stream.publish("b").await.unwrap(), 2);

        assert_eq!(first.recv().await.unwrap(), "a");
        assert_eq!(first.recv().await.unwrap(), "b");
        assert_eq!(second.try_recv().unwrap(), "a");
        assert_eq!(second.try_recv().unwrap(), "b");
        assert!(second.try_recv().is_err());

        assert_eq!(stream.get_stats().await.events_published, 2);
    }
}
