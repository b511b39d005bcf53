use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;

use crate::frame::FrameDescriptor;
use crate::guard::SharedBufferGuard;
use crate::subscriber::FrameSubscriber;

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1024;

/// Broker statistics snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct BrokerStats {
    pub published_frames: u64,
    pub dispatched_tasks: u64,
    pub dropped_tasks: u64,
    pub queue_size: usize,
    pub subscriber_count: usize,
}

/// One queued delivery: descriptor by value, strong subscriber reference,
/// and a clone of the shared buffer holder keeping the region alive.
struct DispatchTask {
    frame: FrameDescriptor,
    subscriber: Arc<dyn FrameSubscriber>,
    // Keeps the backing region alive until the task is destroyed.
    _buffer: Option<SharedBufferGuard>,
    priority: u8,
    sequence: u64,
}

impl PartialEq for DispatchTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for DispatchTask {}

impl PartialOrd for DispatchTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DispatchTask {
    /// Max-heap key: priority descending, then sequence ascending, so the
    /// queue is FIFO within a priority band.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// State shared between the broker facade and its worker threads.
struct BrokerShared {
    queue: Mutex<BinaryHeap<DispatchTask>>,
    queue_cv: Condvar,
    running: AtomicBool,
    sequence: AtomicU64,
    published_frames: AtomicU64,
    dispatched_tasks: AtomicU64,
    dropped_tasks: AtomicU64,
    max_queue_size: AtomicUsize,
}

/// Frame distribution hub
///
/// Holds weak references to subscribers, expands each published frame into
/// per-subscriber dispatch tasks on a bounded priority queue, and drains
/// the queue with a pool of worker threads. Under overload the broker
/// tail-drops per subscriber rather than growing the queue.
pub struct FrameBroker {
    shared: Arc<BrokerShared>,
    subscribers: Mutex<Vec<Weak<dyn FrameSubscriber>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl FrameBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(BrokerShared {
                queue: Mutex::new(BinaryHeap::new()),
                queue_cv: Condvar::new(),
                running: AtomicBool::new(false),
                sequence: AtomicU64::new(0),
                published_frames: AtomicU64::new(0),
                dispatched_tasks: AtomicU64::new(0),
                dropped_tasks: AtomicU64::new(0),
                max_queue_size: AtomicUsize::new(DEFAULT_MAX_QUEUE_SIZE),
            }),
            subscribers: Mutex::new(Vec::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker pool. Idempotent; `worker_count = 0` resolves to
    /// the hardware concurrency (minimum 1).
    pub fn start(&self, worker_count: usize) -> bool {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return true;
        }

        let worker_count = if worker_count == 0 {
            thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            worker_count
        };

        let mut workers = self.workers.lock().unwrap();
        workers.reserve(worker_count);
        for index in 0..worker_count {
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(format!("frame-worker-{index}"))
                .spawn(move || worker_loop(shared));
            match handle {
                Ok(handle) => workers.push(handle),
                Err(error) => {
                    tracing::error!(%error, "failed to spawn broker worker");
                }
            }
        }

        tracing::debug!(workers = workers.len(), "frame broker started");
        true
    }

    /// Stop the worker pool: wake everyone, join, then drop any tasks
    /// still queued (releasing their buffer references).
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.shared.queue_cv.notify_all();

        let handles: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }

        self.shared.queue.lock().unwrap().clear();
        tracing::debug!("frame broker stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Register a subscriber. Rejects a second registration of the same
    /// referent while its first is still live.
    pub fn subscribe(&self, subscriber: &Arc<dyn FrameSubscriber>) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap();

        for weak in subscribers.iter() {
            if let Some(existing) = weak.upgrade() {
                if Arc::ptr_eq(&existing, subscriber) {
                    return false;
                }
            }
        }

        subscribers.push(Arc::downgrade(subscriber));
        tracing::debug!(
            subscriber = subscriber.subscriber_name(),
            priority = subscriber.priority(),
            "subscriber added"
        );
        true
    }

    /// Remove every registration of `subscriber`, pruning expired entries
    /// along the way. Fires `on_unsubscribed` for the removed referent.
    pub fn unsubscribe(&self, subscriber: &Arc<dyn FrameSubscriber>) {
        let removed = {
            let mut subscribers = self.subscribers.lock().unwrap();
            let mut removed = Vec::new();
            subscribers.retain(|weak| match weak.upgrade() {
                Some(existing) => {
                    if Arc::ptr_eq(&existing, subscriber) {
                        removed.push(existing);
                        false
                    } else {
                        true
                    }
                }
                None => false,
            });
            removed
        };

        for subscriber in removed {
            tracing::debug!(
                subscriber = subscriber.subscriber_name(),
                "subscriber removed"
            );
            subscriber.on_unsubscribed();
        }
    }

    /// Drop all subscriber registrations, firing `on_unsubscribed` for
    /// each still-live referent.
    pub fn clear_subscribers(&self) {
        let drained: Vec<_> = self.subscribers.lock().unwrap().drain(..).collect();
        for weak in drained {
            if let Some(subscriber) = weak.upgrade() {
                subscriber.on_unsubscribed();
            }
        }
    }

    /// Count of non-expired subscriber registrations.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Publish a frame that carries no pooled buffer reference.
    pub fn publish(&self, frame: FrameDescriptor) {
        self.publish_impl(frame, None);
    }

    /// Publish a frame backed by a pooled buffer; each dispatch task holds
    /// a clone of the shared guard until its callback returns.
    pub fn publish_with_buffer(&self, frame: FrameDescriptor, buffer: SharedBufferGuard) {
        self.publish_impl(frame, Some(buffer));
    }

    fn publish_impl(&self, frame: FrameDescriptor, buffer: Option<SharedBufferGuard>) {
        if !self.shared.running.load(Ordering::SeqCst) {
            return;
        }

        let mut snapshot: Vec<Arc<dyn FrameSubscriber>> = {
            let mut subscribers = self.subscribers.lock().unwrap();
            subscribers.retain(|weak| weak.strong_count() > 0);
            subscribers.iter().filter_map(Weak::upgrade).collect()
        };

        if snapshot.is_empty() {
            return;
        }

        // Stable sort keeps registration order within a priority band, so
        // high-priority subscribers hit the queue first and are the last
        // to be tail-dropped.
        snapshot.sort_by(|a, b| b.priority().cmp(&a.priority()));

        if let Some(buffer) = &buffer {
            buffer.mark_in_flight();
        }

        self.shared.published_frames.fetch_add(1, Ordering::Relaxed);

        {
            let mut queue = self.shared.queue.lock().unwrap();
            for subscriber in snapshot {
                if queue.len() >= self.shared.max_queue_size.load(Ordering::Relaxed) {
                    self.shared.dropped_tasks.fetch_add(1, Ordering::Relaxed);
                    continue;
                }

                let priority = subscriber.priority();
                queue.push(DispatchTask {
                    frame,
                    subscriber,
                    _buffer: buffer.clone(),
                    priority,
                    sequence: self.shared.sequence.fetch_add(1, Ordering::Relaxed),
                });
            }
        }

        self.shared.queue_cv.notify_all();
    }

    pub fn set_max_queue_size(&self, max_queue_size: usize) {
        self.shared
            .max_queue_size
            .store(max_queue_size, Ordering::Relaxed);
    }

    pub fn get_max_queue_size(&self) -> usize {
        self.shared.max_queue_size.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            published_frames: self.shared.published_frames.load(Ordering::Relaxed),
            dispatched_tasks: self.shared.dispatched_tasks.load(Ordering::Relaxed),
            dropped_tasks: self.shared.dropped_tasks.load(Ordering::Relaxed),
            queue_size: self.shared.queue.lock().unwrap().len(),
            subscriber_count: self.subscriber_count(),
        }
    }
}

impl Default for FrameBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FrameBroker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<BrokerShared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().unwrap();
            while queue.is_empty() && shared.running.load(Ordering::SeqCst) {
                queue = shared.queue_cv.wait(queue).unwrap();
            }

            match queue.pop() {
                Some(task) => task,
                // Stopping and drained: exit.
                None => return,
            }
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| task.subscriber.on_frame(&task.frame)));
        match outcome {
            Ok(()) => {
                shared.dispatched_tasks.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                let message = if let Some(message) = payload.downcast_ref::<&str>() {
                    (*message).to_string()
                } else if let Some(message) = payload.downcast_ref::<String>() {
                    message.clone()
                } else {
                    "unknown panic".to_string()
                };
                tracing::error!(
                    subscriber = task.subscriber.subscriber_name(),
                    %message,
                    "subscriber panicked in frame callback"
                );
            }
        }
        // Dropping the task here releases its buffer reference.
    }
}
