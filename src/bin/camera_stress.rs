//! End-to-end stress harness: test-pattern capture through the buffer
//! pool into the broker and out to two subscribers. Accepts an optional
//! TOML config path as the first argument and a duration in seconds as
//! the second (default 5). Stops early on Ctrl-C and fails if the pool
//! leaks buffers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use camlink::{
    CameraSource, FrameBroker, FrameDescriptor, FrameSink, FrameSubscriber, PipelineConfig,
    TestPatternDevice,
};

struct CountingSubscriber {
    name: &'static str,
    priority: u8,
    received: AtomicU64,
}

impl FrameSubscriber for CountingSubscriber {
    fn on_frame(&self, frame: &FrameDescriptor) {
        // Touch the luma plane so the shared buffer is actually read.
        if let Some(plane) = frame.plane_data(0) {
            std::hint::black_box(plane[0]);
        }
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn subscriber_name(&self) -> &str {
        self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => PipelineConfig::from_file(&path)?,
        None => PipelineConfig::default(),
    };
    let duration_seconds: u64 = args
        .next()
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(5)
        .max(1);

    let running = Arc::new(AtomicBool::new(true));
    let running_in_handler = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_in_handler.store(false, Ordering::SeqCst);
    })?;

    tracing::info!(
        width = config.camera.width,
        height = config.camera.height,
        format = config.camera.format.as_str(),
        fps = config.camera.fps,
        buffers = config.camera.buffer_count,
        duration_seconds,
        "camera stress test start"
    );

    let broker = Arc::new(FrameBroker::new());
    broker.set_max_queue_size(config.broker.max_queue_size);
    broker.start(config.broker.worker_count);

    let analyzer = Arc::new(CountingSubscriber {
        name: "analyzer",
        priority: 200,
        received: AtomicU64::new(0),
    });
    let recorder = Arc::new(CountingSubscriber {
        name: "recorder",
        priority: 100,
        received: AtomicU64::new(0),
    });
    for subscriber in [
        Arc::clone(&analyzer) as Arc<dyn FrameSubscriber>,
        Arc::clone(&recorder) as Arc<dyn FrameSubscriber>,
    ] {
        broker.subscribe(&subscriber);
    }

    let mut source = CameraSource::new(config.camera.clone())?;
    let device = TestPatternDevice::new(&config.camera);

    let broker_in_sink = Arc::clone(&broker);
    let sink: FrameSink = Box::new(move |frame, buffer| {
        broker_in_sink.publish_with_buffer(frame, buffer);
    });
    source.start(device, sink)?;

    let start_time = Instant::now();
    let mut last_report = Instant::now();
    while running.load(Ordering::SeqCst)
        && start_time.elapsed() < Duration::from_secs(duration_seconds)
    {
        std::thread::sleep(Duration::from_millis(50));

        if last_report.elapsed() >= Duration::from_secs(1) {
            let broker_stats = broker.stats();
            let pool_stats = source.pool().stats();
            tracing::info!(
                captured = source.frame_count(),
                capture_dropped = source.dropped_frames(),
                published = broker_stats.published_frames,
                dispatched = broker_stats.dispatched_tasks,
                dropped = broker_stats.dropped_tasks,
                pool_available = pool_stats.available,
                pool_in_flight = pool_stats.in_flight,
                "progress"
            );
            last_report = Instant::now();
        }
    }

    source.stop();
    broker.stop();

    let broker_stats = broker.stats();
    tracing::info!(
        captured = source.frame_count(),
        capture_dropped = source.dropped_frames(),
        published = broker_stats.published_frames,
        dispatched = broker_stats.dispatched_tasks,
        dropped = broker_stats.dropped_tasks,
        analyzer_received = analyzer.received.load(Ordering::Relaxed),
        recorder_received = recorder.received.load(Ordering::Relaxed),
        "summary"
    );

    let leaks = source.pool().check_leaks();
    if !leaks.is_empty() {
        bail!("buffer pool leaked ids {leaks:?}");
    }

    Ok(())
}
