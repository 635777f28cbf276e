//! Bounded media queue between the ingress loop and the inference relay
//!
//! The producer never waits for space. When the queue is full a video frame is
//! dropped, while an audio chunk evicts the oldest queued item (of any kind) and
//! takes its place: a skipped frame is superseded by the next one, but missing
//! audio breaks rhythm and speech detection.

use crate::media_event::{MediaItem, MediaKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::debug;

/// Default number of queued items per connection
pub const DEFAULT_QUEUE_CAPACITY: usize = 20;

/// Result of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Stored in a free slot
    Enqueued,
    /// Stored after evicting the oldest item, whose kind is given
    Evicted(MediaKind),
    /// Discarded, the queue is unchanged
    Dropped,
}

/// Counters describing what happened to items offered to the queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub evicted: u64,
    pub dropped: u64,
}

struct Inner {
    items: VecDeque<MediaItem>,
    closed: bool,
}

/// Single-producer, single-consumer bounded queue with an eviction policy.
pub struct MediaIngressQueue {
    inner: Mutex<Inner>,
    available: Notify,
    capacity: usize,
    enqueued: AtomicU64,
    evicted: AtomicU64,
    dropped: AtomicU64,
}

impl MediaIngressQueue {
    /// Create a queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ingress queue capacity must be at least 1");
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Notify::new(),
            capacity,
            enqueued: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Offer an item without ever waiting for space.
    pub fn try_enqueue(&self, item: MediaItem) -> EnqueueOutcome {
        let kind = item.kind();
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.closed {
                EnqueueOutcome::Dropped
            } else if inner.items.len() < self.capacity {
                inner.items.push_back(item);
                EnqueueOutcome::Enqueued
            } else {
                match kind {
                    MediaKind::Video => EnqueueOutcome::Dropped,
                    MediaKind::Audio => match inner.items.pop_front() {
                        Some(oldest) => {
                            inner.items.push_back(item);
                            EnqueueOutcome::Evicted(oldest.kind())
                        }
                        None => EnqueueOutcome::Dropped,
                    },
                }
            }
        };

        match outcome {
            EnqueueOutcome::Enqueued => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
                self.available.notify_one();
            }
            EnqueueOutcome::Evicted(evicted_kind) => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
                self.evicted.fetch_add(1, Ordering::Relaxed);
                debug!("Queue full, evicted oldest {} item for audio", evicted_kind.as_str());
                self.available.notify_one();
            }
            EnqueueOutcome::Dropped => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Queue full, dropped incoming {} item", kind.as_str());
            }
        }

        outcome
    }

    /// Wait for the next item.
    ///
    /// Returns `None` once the queue has been closed and drained. Dropping the
    /// returned future never loses an item.
    pub async fn dequeue(&self) -> Option<MediaItem> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(item) = inner.items.pop_front() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            self.available.notified().await;
        }
    }

    /// Stop accepting items and wake a waiting consumer.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for MediaIngressQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn audio(tag: u8) -> MediaItem {
        MediaItem::Audio(vec![tag])
    }

    fn video(tag: u8) -> MediaItem {
        MediaItem::Video(vec![tag])
    }

    async fn drain(queue: &MediaIngressQueue) -> Vec<MediaItem> {
        queue.close();
        let mut items = Vec::new();
        while let Some(item) = queue.dequeue().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn test_audio_evicts_oldest_when_full() {
        let queue = MediaIngressQueue::new(2);
        assert_eq!(queue.try_enqueue(video(1)), EnqueueOutcome::Enqueued);
        assert_eq!(queue.try_enqueue(video(2)), EnqueueOutcome::Enqueued);
        assert_eq!(
            queue.try_enqueue(audio(3)),
            EnqueueOutcome::Evicted(MediaKind::Video)
        );

        assert_eq!(drain(&queue).await, vec![video(2), audio(3)]);
        assert_eq!(
            queue.stats(),
            QueueStats { enqueued: 3, evicted: 1, dropped: 0 }
        );
    }

    #[tokio::test]
    async fn test_video_dropped_when_full() {
        let queue = MediaIngressQueue::new(2);
        queue.try_enqueue(audio(1));
        queue.try_enqueue(audio(2));

        assert_eq!(queue.try_enqueue(video(3)), EnqueueOutcome::Dropped);
        assert_eq!(queue.len(), 2);
        assert_eq!(drain(&queue).await, vec![audio(1), audio(2)]);
        assert_eq!(queue.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_audio_can_evict_audio() {
        let queue = MediaIngressQueue::new(2);
        queue.try_enqueue(audio(1));
        queue.try_enqueue(audio(2));

        assert_eq!(
            queue.try_enqueue(audio(3)),
            EnqueueOutcome::Evicted(MediaKind::Audio)
        );
        assert_eq!(drain(&queue).await, vec![audio(2), audio(3)]);
    }

    #[tokio::test]
    async fn test_fifo_order_below_capacity() {
        let queue = MediaIngressQueue::new(4);
        queue.try_enqueue(audio(1));
        queue.try_enqueue(video(2));
        queue.try_enqueue(audio(3));

        assert_eq!(queue.dequeue().await, Some(audio(1)));
        assert_eq!(queue.dequeue().await, Some(video(2)));
        assert_eq!(queue.dequeue().await, Some(audio(3)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_item() {
        let queue = Arc::new(MediaIngressQueue::new(2));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.try_enqueue(video(7));
        let item = timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer was not woken")
            .unwrap();
        assert_eq!(item, Some(video(7)));
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_consumer() {
        let queue = Arc::new(MediaIngressQueue::new(2));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let item = timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer was not woken")
            .unwrap();
        assert_eq!(item, None);
        assert_eq!(queue.try_enqueue(audio(1)), EnqueueOutcome::Dropped);
    }

    #[tokio::test]
    async fn test_cancelled_dequeue_loses_nothing() {
        let queue = MediaIngressQueue::new(2);
        assert!(timeout(Duration::from_millis(10), queue.dequeue())
            .await
            .is_err());

        queue.try_enqueue(audio(9));
        assert_eq!(queue.dequeue().await, Some(audio(9)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_producer_and_consumer() {
        const TOTAL: u32 = 2000;
        let queue = Arc::new(MediaIngressQueue::new(3));

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(item) = queue.dequeue().await {
                    seen.push(item);
                }
                seen
            })
        };

        for i in 0..TOTAL {
            queue.try_enqueue(MediaItem::Audio(i.to_le_bytes().to_vec()));
            if i % 64 == 0 {
                tokio::task::yield_now().await;
            }
        }
        queue.close();

        let seen = consumer.await.unwrap();
        let unique: HashSet<Vec<u8>> = seen.iter().map(|item| item.bytes().to_vec()).collect();
        assert_eq!(unique.len(), seen.len(), "an item was delivered twice");

        let stats = queue.stats();
        assert_eq!(stats.enqueued, TOTAL as u64);
        assert_eq!(stats.dropped, 0);
        assert_eq!(seen.len() as u64 + stats.evicted, TOTAL as u64);
    }
}
