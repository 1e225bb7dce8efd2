//! Size- and time-bounded batching.
//!
//! Items accumulate in one buffer guarded by a single mutex that also owns
//! the flush timer. A push either appends, or appends and takes the full
//! batch; the sink always runs outside that lock.
//!
//! Sink calls are serialized by a second, async lock taken before the batch
//! is. At most one flush runs at a time, and `drain` waits for the one in
//! flight before taking the remainder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::trace;

/// Why a batch was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Size,
    Timeout,
    Shutdown,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Timeout => "timeout",
            FlushTrigger::Shutdown => "shutdown",
        }
    }
}

/// Receives full batches.
#[async_trait]
pub trait BatchSink<T>: Send + Sync + 'static {
    async fn flush(&self, items: Vec<T>, trigger: FlushTrigger);
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Flush as soon as this many items are buffered.
    pub max_size: usize,
    /// Flush a partial batch this long after its first item arrived.
    pub max_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            max_delay: Duration::from_millis(5000),
        }
    }
}

struct BatchState<T> {
    items: Vec<T>,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever a batch is taken, so a stale timer can tell its
    /// batch is gone.
    generation: u64,
}

impl<T> BatchState<T> {
    fn take(&mut self) -> Vec<T> {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
        std::mem::take(&mut self.items)
    }
}

struct Shared<T, S> {
    state: Mutex<BatchState<T>>,
    /// Held for the whole take-and-flush sequence.
    flushing: AsyncMutex<()>,
    sink: S,
    config: BatchConfig,
}

/// Buffers items and hands them to a [`BatchSink`] by size or timeout.
pub struct Batcher<T, S> {
    shared: Arc<Shared<T, S>>,
}

impl<T, S> Clone for Batcher<T, S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, S> Batcher<T, S>
where
    T: Send + 'static,
    S: BatchSink<T>,
{
    pub fn new(sink: S, mut config: BatchConfig) -> Self {
        config.max_size = config.max_size.max(1);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BatchState {
                    items: Vec::with_capacity(config.max_size),
                    timer: None,
                    generation: 0,
                }),
                flushing: AsyncMutex::new(()),
                sink,
                config,
            }),
        }
    }

    /// Append an item, flushing on the caller's task if the batch is full.
    ///
    /// A full batch waits for any flush in flight, so it may be taken by
    /// a timer that fired in between; it is flushed exactly once either way.
    pub async fn push(&self, item: T) {
        let full = {
            let mut state = self.shared.state.lock();
            state.items.push(item);

            let full = state.items.len() >= self.shared.config.max_size;
            if !full && state.items.len() == 1 {
                state.timer = Some(self.arm_timer(state.generation));
            }
            full
        };

        if full {
            let _flushing = self.shared.flushing.lock().await;
            let batch = {
                let mut state = self.shared.state.lock();
                if state.items.len() >= self.shared.config.max_size {
                    state.take()
                } else {
                    Vec::new()
                }
            };
            if !batch.is_empty() {
                self.shared.sink.flush(batch, FlushTrigger::Size).await;
            }
        }
    }

    /// Wait for the flush in flight, then flush whatever is buffered.
    /// Used on shutdown.
    pub async fn drain(&self) {
        let _flushing = self.shared.flushing.lock().await;
        let batch = self.shared.state.lock().take();
        if !batch.is_empty() {
            self.shared.sink.flush(batch, FlushTrigger::Shutdown).await;
        }
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sink(&self) -> &S {
        &self.shared.sink
    }

    fn arm_timer(&self, generation: u64) -> JoinHandle<()> {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(shared.config.max_delay).await;

            let _flushing = shared.flushing.lock().await;
            let batch = {
                let mut state = shared.state.lock();
                if state.generation != generation || state.items.is_empty() {
                    trace!(generation, "Stale batch timer");
                    return;
                }
                // Detach ourselves first so `take` doesn't abort this task
                state.timer = None;
                state.take()
            };

            shared.sink.flush(batch, FlushTrigger::Timeout).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default, Clone)]
    struct RecordingSink {
        flushes: Arc<Mutex<Vec<(Vec<u32>, FlushTrigger)>>>,
        /// Time each flush takes before it is recorded.
        delay: Duration,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
    }

    impl RecordingSink {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn flushes(&self) -> Vec<(Vec<u32>, FlushTrigger)> {
            self.flushes.lock().clone()
        }

        fn max_active(&self) -> usize {
            self.max_active.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BatchSink<u32> for RecordingSink {
        async fn flush(&self, items: Vec<u32>, trigger: FlushTrigger) {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.flushes.lock().push((items, trigger));
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn batcher(max_size: usize, max_delay_ms: u64) -> (Batcher<u32, RecordingSink>, RecordingSink) {
        with_sink(RecordingSink::default(), max_size, max_delay_ms)
    }

    fn with_sink(
        sink: RecordingSink,
        max_size: usize,
        max_delay_ms: u64,
    ) -> (Batcher<u32, RecordingSink>, RecordingSink) {
        let batcher = Batcher::new(
            sink.clone(),
            BatchConfig {
                max_size,
                max_delay: Duration::from_millis(max_delay_ms),
            },
        );
        (batcher, sink)
    }

    // Test critique: le N-ième élément déclenche un flush d'exactement N éléments, sans double flush
    #[tokio::test(start_paused = true)]
    async fn test_size_flush_exactly_n_no_double_flush() {
        let (batcher, sink) = batcher(3, 1000);

        batcher.push(1).await;
        batcher.push(2).await;
        assert!(sink.flushes().is_empty());

        batcher.push(3).await;
        assert_eq!(sink.flushes(), vec![(vec![1, 2, 3], FlushTrigger::Size)]);
        assert!(batcher.is_empty());

        // The cancelled timer must not fire an empty or duplicate flush
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.flushes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_flushes_partial_batch() {
        let (batcher, sink) = batcher(10, 1000);

        batcher.push(7).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        batcher.push(8).await;
        assert!(sink.flushes().is_empty());

        // Deadline counts from the first item, not the latest
        tokio::time::sleep(Duration::from_millis(501)).await;
        assert_eq!(sink.flushes(), vec![(vec![7, 8], FlushTrigger::Timeout)]);
        assert!(batcher.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_rearms_for_next_batch() {
        let (batcher, sink) = batcher(2, 1000);

        batcher.push(1).await;
        batcher.push(2).await;
        batcher.push(3).await;
        assert_eq!(sink.flushes().len(), 1);

        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(
            sink.flushes(),
            vec![
                (vec![1, 2], FlushTrigger::Size),
                (vec![3], FlushTrigger::Timeout)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_flushes_remaining_and_cancels_timer() {
        let (batcher, sink) = batcher(10, 1000);

        batcher.drain().await;
        assert!(sink.flushes().is_empty());

        batcher.push(4).await;
        batcher.drain().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.flushes(), vec![(vec![4], FlushTrigger::Shutdown)]);
    }

    // Test critique: l'arrêt attend le flush déclenché par le timer avant de rendre la main
    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_in_flight_timer_flush() {
        let (batcher, sink) = with_sink(RecordingSink::slow(Duration::from_secs(3)), 10, 1000);

        batcher.push(1).await;
        // Timer has fired and its flush is still running
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(batcher.is_empty());
        assert!(sink.flushes().is_empty());

        batcher.drain().await;
        assert_eq!(sink.flushes(), vec![(vec![1], FlushTrigger::Timeout)]);
    }

    // Test critique: un flush par taille attend le flush du timer en cours, jamais deux à la fois
    #[tokio::test(start_paused = true)]
    async fn test_size_and_timer_flushes_never_overlap() {
        let (batcher, sink) = with_sink(RecordingSink::slow(Duration::from_secs(3)), 2, 1000);

        batcher.push(1).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;

        batcher.push(2).await;
        batcher.push(3).await;
        batcher.drain().await;

        assert_eq!(sink.max_active(), 1);
        assert_eq!(
            sink.flushes(),
            vec![
                (vec![1], FlushTrigger::Timeout),
                (vec![2, 3], FlushTrigger::Size)
            ]
        );
    }
}
