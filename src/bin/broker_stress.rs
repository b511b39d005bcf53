//! FrameBroker stress harness: one publisher thread fanning frames out to
//! a set of prioritized counting subscribers, reporting stats once a
//! second. Runs for the duration given as the first argument (seconds,
//! default 5) or until Ctrl-C.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use camlink::{FrameBroker, FrameDescriptor, FrameSubscriber, MemoryType, PixelFormat};

struct StressSubscriber {
    name: String,
    priority: u8,
    received: AtomicU64,
}

impl StressSubscriber {
    fn new(name: String, priority: u8) -> Self {
        Self {
            name,
            priority,
            received: AtomicU64::new(0),
        }
    }
}

impl FrameSubscriber for StressSubscriber {
    fn on_frame(&self, _frame: &FrameDescriptor) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn subscriber_name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }
}

fn build_test_frame(frame_id: u32) -> FrameDescriptor {
    let mut frame = FrameDescriptor::default();
    frame.frame_id = frame_id;
    frame.width = 1920;
    frame.height = 1080;
    frame.format = PixelFormat::Nv12;
    frame.plane_count = 2;
    frame.stride = [1920, 1920, 0];
    frame.offset = [0, 1920 * 1080, 0];
    frame.plane_size = [1920 * 1080, 1920 * 540, 0];
    frame.region_size = 1920 * 1080 * 3 / 2;
    frame.memory_type = MemoryType::DmaBuf;
    frame
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let duration_seconds: u64 = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(5)
        .max(1);

    const SUBSCRIBER_COUNT: usize = 8;
    const WORKER_COUNT: usize = 4;

    let running = Arc::new(AtomicBool::new(true));
    let running_in_handler = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_in_handler.store(false, Ordering::SeqCst);
    })?;

    tracing::info!(
        duration_seconds,
        subscribers = SUBSCRIBER_COUNT,
        workers = WORKER_COUNT,
        "frame broker stress test start"
    );

    let broker = FrameBroker::new();
    broker.set_max_queue_size(4096);
    broker.start(WORKER_COUNT);

    let mut subscribers: Vec<Arc<StressSubscriber>> = Vec::with_capacity(SUBSCRIBER_COUNT);
    for index in 0..SUBSCRIBER_COUNT {
        let subscriber = Arc::new(StressSubscriber::new(
            format!("subscriber_{index}"),
            128 + index as u8,
        ));
        let capability: Arc<dyn FrameSubscriber> = subscriber.clone();
        broker.subscribe(&capability);
        subscribers.push(subscriber);
    }

    let mut frame_id = 0u32;
    let start_time = Instant::now();
    let mut last_report = start_time;

    while running.load(Ordering::SeqCst) {
        if start_time.elapsed() >= Duration::from_secs(duration_seconds) {
            break;
        }

        broker.publish(build_test_frame(frame_id));
        frame_id = frame_id.wrapping_add(1);

        if last_report.elapsed() >= Duration::from_secs(1) {
            let stats = broker.stats();
            tracing::info!(
                published = stats.published_frames,
                dispatched = stats.dispatched_tasks,
                dropped = stats.dropped_tasks,
                queue = stats.queue_size,
                "progress"
            );
            last_report = Instant::now();
        }
    }

    broker.stop();

    let total_received: u64 = subscribers
        .iter()
        .map(|subscriber| subscriber.received.load(Ordering::Relaxed))
        .sum();

    let stats = broker.stats();
    tracing::info!(
        published = stats.published_frames,
        dispatched = stats.dispatched_tasks,
        dropped = stats.dropped_tasks,
        received = total_received,
        "summary"
    );

    Ok(())
}
