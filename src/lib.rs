//! camlink - camera frame pipeline
//!
//! Moves video frames from a capture device to multiple concurrent
//! subscribers with bounded memory and no copies on the fan-out path.
//! The capture producer copies each device frame into a pooled buffer
//! once; the broker then fans the frame descriptor out to subscribers,
//! every dispatch task sharing the same buffer through a reference-counted
//! guard that returns the region to the pool when the last consumer is
//! done.

pub mod broker;
pub mod camera;
pub mod config;
pub mod frame;
pub mod guard;
pub mod pool;
pub mod subscriber;
pub mod types;

// Re-export key types for convenience
pub use broker::{BrokerStats, FrameBroker, DEFAULT_MAX_QUEUE_SIZE};
pub use camera::{
    buffer_size_for, CameraSource, CaptureDevice, DeviceBuffer, FrameSink, TestPatternDevice,
};
pub use config::{BrokerConfig, CameraConfig, PipelineConfig};
pub use frame::FrameDescriptor;
pub use guard::{BufferGuard, SharedBufferGuard};
pub use pool::{BufferPool, BufferPoolStats};
pub use subscriber::FrameSubscriber;
pub use types::{BufferState, MemoryType, PipelineError, PixelFormat};
