//! End-to-end pipeline test: test-pattern device -> camera source ->
//! buffer pool -> frame broker -> subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use camlink::{
    CameraConfig, CameraSource, FrameBroker, FrameDescriptor, FrameSink, FrameSubscriber,
    PixelFormat, TestPatternDevice,
};

struct CountingSubscriber {
    name: &'static str,
    priority: u8,
    received: AtomicU64,
    bad_frames: AtomicU64,
}

impl CountingSubscriber {
    fn new(name: &'static str, priority: u8) -> Arc<Self> {
        Arc::new(Self {
            name,
            priority,
            received: AtomicU64::new(0),
            bad_frames: AtomicU64::new(0),
        })
    }

    fn received(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }
}

impl FrameSubscriber for CountingSubscriber {
    fn on_frame(&self, frame: &FrameDescriptor) {
        let expected = TestPatternDevice::pattern_byte(frame.sequence);
        let plane_ok = frame
            .plane_data(0)
            .map(|plane| plane.iter().all(|&byte| byte == expected))
            .unwrap_or(false);
        if !frame.is_valid() || !plane_ok {
            self.bad_frames.fetch_add(1, Ordering::SeqCst);
        }
        self.received.fetch_add(1, Ordering::SeqCst);
    }

    fn subscriber_name(&self) -> &str {
        self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }
}

fn test_config() -> CameraConfig {
    CameraConfig {
        width: 64,
        height: 48,
        format: PixelFormat::Nv12,
        fps: 120,
        buffer_count: 4,
        source_id: 1,
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[test]
fn frames_flow_from_device_to_subscribers() {
    let config = test_config();

    let broker = Arc::new(FrameBroker::new());
    broker.start(2);

    let analyzer = CountingSubscriber::new("analyzer", 200);
    let recorder = CountingSubscriber::new("recorder", 100);
    let analyzer_capability: Arc<dyn FrameSubscriber> = analyzer.clone();
    let recorder_capability: Arc<dyn FrameSubscriber> = recorder.clone();
    assert!(broker.subscribe(&analyzer_capability));
    assert!(broker.subscribe(&recorder_capability));
    assert_eq!(broker.subscriber_count(), 2);

    let mut source = CameraSource::new(config.clone()).unwrap();
    let broker_in_sink = Arc::clone(&broker);
    let sink: FrameSink = Box::new(move |frame, buffer| {
        broker_in_sink.publish_with_buffer(frame, buffer);
    });
    source.start(TestPatternDevice::new(&config), sink).unwrap();

    // Let at least ten frames reach both subscribers.
    assert!(wait_until(Duration::from_secs(10), || {
        analyzer.received() >= 10 && recorder.received() >= 10
    }));

    source.stop();
    broker.stop();

    assert_eq!(analyzer.bad_frames.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.bad_frames.load(Ordering::SeqCst), 0);

    let stats = broker.stats();
    assert!(stats.published_frames >= 10);
    assert!(stats.dispatched_tasks >= 20);
    assert_eq!(stats.queue_size, 0);

    // Every buffer came home.
    let pool_stats = source.pool().stats();
    assert_eq!(pool_stats.available, pool_stats.total);
    assert_eq!(pool_stats.in_use, 0);
    assert_eq!(pool_stats.in_flight, 0);
    assert!(source.pool().check_leaks().is_empty());
}

#[test]
fn slow_subscriber_forces_bounded_drops() {
    let config = test_config();

    let broker = Arc::new(FrameBroker::new());
    broker.set_max_queue_size(2);
    broker.start(1);

    struct SlowSubscriber {
        received: AtomicU64,
    }

    impl FrameSubscriber for SlowSubscriber {
        fn on_frame(&self, _frame: &FrameDescriptor) {
            thread::sleep(Duration::from_millis(40));
            self.received.fetch_add(1, Ordering::SeqCst);
        }

        fn subscriber_name(&self) -> &str {
            "slow"
        }
    }

    let slow = Arc::new(SlowSubscriber {
        received: AtomicU64::new(0),
    });
    let capability: Arc<dyn FrameSubscriber> = slow.clone();
    assert!(broker.subscribe(&capability));

    let mut source = CameraSource::new(config.clone()).unwrap();
    let broker_in_sink = Arc::clone(&broker);
    let sink: FrameSink = Box::new(move |frame, buffer| {
        broker_in_sink.publish_with_buffer(frame, buffer);
    });
    source.start(TestPatternDevice::new(&config), sink).unwrap();

    // The 120 fps producer outruns the 25 fps consumer; the queue cap
    // must hold and drops must be counted.
    assert!(wait_until(Duration::from_secs(10), || {
        broker.stats().dropped_tasks > 0
    }));
    assert!(broker.stats().queue_size <= 2);

    source.stop();
    broker.stop();

    let stats = broker.stats();
    assert!(stats.dropped_tasks > 0);
    assert!(stats.published_frames > stats.dispatched_tasks);
    assert!(slow.received.load(Ordering::SeqCst) > 0);

    // Dropped tasks released their buffer references too.
    let pool_stats = source.pool().stats();
    assert_eq!(pool_stats.available, pool_stats.total);
    assert!(source.pool().check_leaks().is_empty());
}

#[test]
fn unsubscribed_consumer_stops_receiving() {
    let config = test_config();

    let broker = Arc::new(FrameBroker::new());
    broker.start(1);

    let keeper = CountingSubscriber::new("keeper", 128);
    let leaver = CountingSubscriber::new("leaver", 128);
    let keeper_capability: Arc<dyn FrameSubscriber> = keeper.clone();
    let leaver_capability: Arc<dyn FrameSubscriber> = leaver.clone();
    assert!(broker.subscribe(&keeper_capability));
    assert!(broker.subscribe(&leaver_capability));

    let mut source = CameraSource::new(config.clone()).unwrap();
    let broker_in_sink = Arc::clone(&broker);
    let sink: FrameSink = Box::new(move |frame, buffer| {
        broker_in_sink.publish_with_buffer(frame, buffer);
    });
    source.start(TestPatternDevice::new(&config), sink).unwrap();

    assert!(wait_until(Duration::from_secs(10), || {
        leaver.received() >= 5
    }));

    broker.unsubscribe(&leaver_capability);
    assert_eq!(broker.subscriber_count(), 1);

    // Drain the tasks queued before removal, then freeze the count. With
    // one worker at most one leaver delivery can still be mid-callback.
    assert!(wait_until(Duration::from_secs(10), || {
        broker.stats().queue_size == 0
    }));
    let frozen = leaver.received();
    let keeper_then = keeper.received();

    assert!(wait_until(Duration::from_secs(10), || {
        keeper.received() >= keeper_then + 10
    }));
    assert!(leaver.received() <= frozen + 1);

    source.stop();
    broker.stop();
}
