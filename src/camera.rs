use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::CameraConfig;
use crate::frame::FrameDescriptor;
use crate::guard::SharedBufferGuard;
use crate::pool::BufferPool;
use crate::types::{MemoryType, PipelineError, PixelFormat};

/// One dequeued device buffer, borrowed until the next dequeue.
/// Dropping it stands in for re-queueing the buffer to the device.
pub struct DeviceBuffer<'a> {
    pub data: &'a [u8],
    pub bytes_used: usize,
    /// Device-reported sequence number.
    pub sequence: u32,
}

/// Capture device seen by the producer loop
///
/// Implementations block until the next frame is ready (or a short
/// internal timeout elapses, returning `Ok(None)` so the loop can observe
/// shutdown).
pub trait CaptureDevice: Send {
    fn dequeue(&mut self) -> Result<Option<DeviceBuffer<'_>>, PipelineError>;
}

/// Deterministic synthetic device: emits fps-paced frames whose bytes are
/// filled with a value derived from the sequence number.
pub struct TestPatternDevice {
    data: Vec<u8>,
    frame_interval: Duration,
    next_due: Instant,
    sequence: u32,
}

impl TestPatternDevice {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            data: vec![0u8; buffer_size_for(config)],
            frame_interval: Duration::from_secs(1) / config.fps.max(1),
            next_due: Instant::now(),
            sequence: 0,
        }
    }

    pub fn pattern_byte(sequence: u32) -> u8 {
        (sequence % 251) as u8
    }
}

impl CaptureDevice for TestPatternDevice {
    fn dequeue(&mut self) -> Result<Option<DeviceBuffer<'_>>, PipelineError> {
        let now = Instant::now();
        if now < self.next_due {
            thread::sleep(self.next_due - now);
        }
        self.next_due += self.frame_interval;

        self.sequence += 1;
        let fill = Self::pattern_byte(self.sequence);
        self.data.fill(fill);

        Ok(Some(DeviceBuffer {
            bytes_used: self.data.len(),
            sequence: self.sequence,
            data: &self.data,
        }))
    }
}

/// Sink receiving each captured frame together with its buffer holder.
pub type FrameSink = Box<dyn FnMut(FrameDescriptor, SharedBufferGuard) + Send>;

/// Capture producer
///
/// Owns the buffer pool and a capture thread that copies device frames
/// into pooled regions, fills descriptors, and hands them to the sink
/// (typically a closure publishing into a broker). Frames arriving while
/// the pool is exhausted are counted in `dropped_frames` and skipped.
pub struct CameraSource {
    config: CameraConfig,
    pool: Arc<BufferPool>,
    running: Arc<AtomicBool>,
    frame_count: Arc<AtomicU64>,
    dropped_frames: Arc<AtomicU64>,
    capture_thread: Option<thread::JoinHandle<()>>,
}

impl CameraSource {
    /// Validate the configuration and size the pool for it.
    pub fn new(config: CameraConfig) -> Result<Self, PipelineError> {
        if !config.is_valid() {
            return Err(PipelineError::Config(format!(
                "invalid camera config: {config:?}"
            )));
        }

        let pool = Arc::new(BufferPool::new());
        if !pool.initialize(config.buffer_count as usize, buffer_size_for(&config)) {
            return Err(PipelineError::Config(
                "buffer pool initialization failed".to_string(),
            ));
        }

        Ok(Self {
            config,
            pool,
            running: Arc::new(AtomicBool::new(false)),
            frame_count: Arc::new(AtomicU64::new(0)),
            dropped_frames: Arc::new(AtomicU64::new(0)),
            capture_thread: None,
        })
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Start the capture thread over `device`, delivering into `sink`.
    pub fn start<D>(&mut self, device: D, sink: FrameSink) -> Result<(), PipelineError>
    where
        D: CaptureDevice + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::Capture(
                "capture already started".to_string(),
            ));
        }

        self.frame_count.store(0, Ordering::Relaxed);
        self.dropped_frames.store(0, Ordering::Relaxed);

        let config = self.config.clone();
        let pool = Arc::clone(&self.pool);
        let running = Arc::clone(&self.running);
        let frame_count = Arc::clone(&self.frame_count);
        let dropped_frames = Arc::clone(&self.dropped_frames);

        let handle = thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                capture_loop(device, sink, config, pool, running, frame_count, dropped_frames);
            });

        match handle {
            Ok(handle) => {
                self.capture_thread = Some(handle);
                Ok(())
            }
            Err(error) => {
                self.running.store(false, Ordering::SeqCst);
                Err(PipelineError::Capture(format!("spawn failed: {error}")))
            }
        }
    }

    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.capture_thread.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Frames skipped because the pool had no free buffer.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop<D: CaptureDevice>(
    mut device: D,
    mut sink: FrameSink,
    config: CameraConfig,
    pool: Arc<BufferPool>,
    running: Arc<AtomicBool>,
    frame_count: Arc<AtomicU64>,
    dropped_frames: Arc<AtomicU64>,
) {
    while running.load(Ordering::SeqCst) {
        let device_frame = match device.dequeue() {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(error) => {
                tracing::error!(%error, "capture device dequeue failed");
                break;
            }
        };

        let mut guard = match pool.acquire() {
            Some(guard) => guard,
            None => {
                // Pool exhausted: skip the frame, the device buffer is
                // re-queued when `device_frame` drops.
                dropped_frames.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        let used = device_frame.bytes_used.min(device_frame.data.len());
        let copy_len = used.min(guard.size());
        guard.as_mut_slice()[..copy_len].copy_from_slice(&device_frame.data[..copy_len]);

        let frame_id = frame_count.fetch_add(1, Ordering::Relaxed);

        let mut frame = FrameDescriptor::default();
        frame.frame_id = frame_id as u32;
        frame.source_id = config.source_id;
        frame.timestamp_ns = monotonic_ns();
        frame.width = config.width;
        frame.height = config.height;
        frame.format = config.format;
        frame.sequence = device_frame.sequence;
        frame.memory_type = MemoryType::Heap;
        frame.ptr = guard.as_ptr();
        frame.region_size = copy_len;
        fill_frame_layout(&mut frame, copy_len);

        sink(frame, Arc::new(guard));
    }
}

/// Bytes needed for one frame of `config`'s geometry and format.
pub fn buffer_size_for(config: &CameraConfig) -> usize {
    let width = config.width as usize;
    let height = config.height as usize;

    match config.format {
        PixelFormat::Nv12 => width * height * 3 / 2,
        PixelFormat::Yuyv => width * height * 2,
        PixelFormat::Rgb888 => width * height * 3,
        PixelFormat::Rgba8888 => width * height * 4,
        // Compressed formats get a conservative worst-case budget.
        PixelFormat::Mjpeg | PixelFormat::H264 | PixelFormat::H265 | PixelFormat::Unknown => {
            width * height * 2
        }
    }
}

/// Fill the per-plane layout for the frame's format. NV12 is the only
/// multi-planar format the capture path produces; everything else is
/// described as a single plane covering the copied bytes.
fn fill_frame_layout(frame: &mut FrameDescriptor, copied: usize) {
    let width = frame.width;
    let height = frame.height;

    if frame.format == PixelFormat::Nv12 {
        frame.plane_count = 2;
        frame.stride[0] = width;
        frame.stride[1] = width;
        frame.offset[0] = 0;
        frame.offset[1] = width * height;
        frame.plane_size[0] = width * height;
        frame.plane_size[1] = width * height / 2;
    } else {
        frame.plane_count = 1;
        frame.stride[0] = width * 2;
        frame.offset[0] = 0;
        frame.plane_size[0] = copied as u32;
    }
}

fn monotonic_ns() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}
