use serde::{Deserialize, Serialize};

/// Pixel format enumeration
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Unknown = 0,
    Nv12,
    Yuyv,
    Rgb888,
    Rgba8888,
    Mjpeg,
    H264,
    H265,
}

impl PixelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Unknown => "unknown",
            PixelFormat::Nv12 => "nv12",
            PixelFormat::Yuyv => "yuyv",
            PixelFormat::Rgb888 => "rgb888",
            PixelFormat::Rgba8888 => "rgba8888",
            PixelFormat::Mjpeg => "mjpeg",
            PixelFormat::H264 => "h264",
            PixelFormat::H265 => "h265",
        }
    }
}

/// Memory class backing a frame region
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    Mmap = 0,
    DmaBuf,
    Shm,
    Heap,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Mmap => "mmap",
            MemoryType::DmaBuf => "dmabuf",
            MemoryType::Shm => "shm",
            MemoryType::Heap => "heap",
        }
    }
}

/// Buffer lifecycle state
///
/// `InFlight` marks a buffer that has left the capture thread and entered
/// the dispatch fabric but has not yet been fully consumed.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Free = 0,
    InUse,
    InFlight,
}

impl BufferState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BufferState::Free => "free",
            BufferState::InUse => "in_use",
            BufferState::InFlight => "in_flight",
        }
    }
}

/// Generic pipeline error
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Capture error: {0}")]
    Capture(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}
