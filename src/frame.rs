use std::slice;

use crate::types::{MemoryType, PixelFormat};

/// Frame descriptor (C-style POD)
///
/// The descriptor is the ticket for one captured frame: identity, geometry,
/// per-plane memory layout, and the handle to the backing region. It does
/// not own the backing memory; its validity is scoped to the lifetime of
/// the buffer reference it was published with.
///
/// The layout is `#[repr(C)]` with trailing reserved bytes so the struct
/// can cross FFI and shared-memory boundaries without churn.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FrameDescriptor {
    /// Per-source monotonic frame number.
    pub frame_id: u32,
    /// Capture device id.
    pub source_id: u32,
    /// Monotonic timestamp in nanoseconds.
    pub timestamp_ns: u64,

    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,

    /// Number of valid planes (1-3).
    pub plane_count: u32,
    /// Per-plane row stride in bytes.
    pub stride: [u32; 3],
    /// Per-plane byte offset into the backing region.
    pub offset: [u32; 3],
    /// Per-plane byte size.
    pub plane_size: [u32; 3],

    pub memory_type: MemoryType,
    /// DMA-BUF or shared-memory fd; negative means none.
    pub fd: i32,
    /// Mapped virtual address; valid for CPU access only.
    pub ptr: *const u8,
    /// Total backing region size in bytes.
    pub region_size: usize,

    /// Device-reported sequence number.
    pub sequence: u32,
    pub flags: u32,
    pub reserved: [u8; 56],
}

// Consumers treat the backing region as read-only once the descriptor has
// been handed off; the raw pointer itself carries no ownership.
unsafe impl Send for FrameDescriptor {}
unsafe impl Sync for FrameDescriptor {}

impl Default for FrameDescriptor {
    fn default() -> Self {
        Self {
            frame_id: 0,
            source_id: 0,
            timestamp_ns: 0,
            width: 0,
            height: 0,
            format: PixelFormat::Unknown,
            plane_count: 0,
            stride: [0; 3],
            offset: [0; 3],
            plane_size: [0; 3],
            memory_type: MemoryType::Mmap,
            fd: -1,
            ptr: std::ptr::null(),
            region_size: 0,
            sequence: 0,
            flags: 0,
            reserved: [0; 56],
        }
    }
}

impl FrameDescriptor {
    /// A descriptor is valid when it describes a plausible frame and
    /// carries at least one usable memory handle.
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.format != PixelFormat::Unknown
            && self.plane_count > 0
            && self.plane_count <= 3
            && self.region_size > 0
            && (!self.ptr.is_null() || self.fd >= 0)
    }

    /// Byte slice for one plane, or `None` when the plane index is out of
    /// range, the frame has no mapped address, or the plane does not fit
    /// inside the backing region.
    pub fn plane_data(&self, plane_index: u32) -> Option<&[u8]> {
        if plane_index >= self.plane_count.min(3) || self.ptr.is_null() {
            return None;
        }

        let offset = self.offset[plane_index as usize] as usize;
        let size = self.plane_size[plane_index as usize] as usize;
        if offset.checked_add(size)? > self.region_size {
            return None;
        }

        unsafe { Some(slice::from_raw_parts(self.ptr.add(offset), size)) }
    }

    /// Size of one plane in bytes; 0 when the index is out of range.
    pub fn plane_len(&self, plane_index: u32) -> usize {
        if plane_index >= self.plane_count.min(3) {
            return 0;
        }
        self.plane_size[plane_index as usize] as usize
    }

    pub fn reset(&mut self) {
        *self = FrameDescriptor::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nv12_1080p(ptr: *const u8, region_size: usize) -> FrameDescriptor {
        FrameDescriptor {
            frame_id: 1,
            width: 1920,
            height: 1080,
            format: PixelFormat::Nv12,
            plane_count: 2,
            stride: [1920, 1920, 0],
            offset: [0, 1920 * 1080, 0],
            plane_size: [1920 * 1080, 1920 * 540, 0],
            memory_type: MemoryType::Heap,
            ptr,
            region_size,
            ..FrameDescriptor::default()
        }
    }

    #[test]
    fn default_is_invalid() {
        let frame = FrameDescriptor::default();
        assert!(!frame.is_valid());
        assert!(frame.ptr.is_null());
        assert_eq!(frame.fd, -1);
    }

    #[test]
    fn validity_requires_memory_handle() {
        let mut frame = nv12_1080p(std::ptr::null(), 1920 * 1080 * 3 / 2);
        assert!(!frame.is_valid());

        frame.fd = 7;
        assert!(frame.is_valid());

        frame.fd = -1;
        let backing = vec![0u8; frame.region_size];
        frame.ptr = backing.as_ptr();
        assert!(frame.is_valid());
    }

    #[test]
    fn validity_rejects_bad_geometry() {
        let backing = vec![0u8; 16];
        let mut frame = nv12_1080p(backing.as_ptr(), backing.len());
        assert!(frame.is_valid());

        frame.width = 0;
        assert!(!frame.is_valid());
        frame.width = 1920;

        frame.format = PixelFormat::Unknown;
        assert!(!frame.is_valid());
        frame.format = PixelFormat::Nv12;

        frame.plane_count = 0;
        assert!(!frame.is_valid());
        frame.plane_count = 4;
        assert!(!frame.is_valid());
        frame.plane_count = 2;

        frame.region_size = 0;
        assert!(!frame.is_valid());
    }

    #[test]
    fn plane_data_is_bounds_checked() {
        let region_size = 1920 * 1080 * 3 / 2;
        let backing = vec![0xABu8; region_size];
        let frame = nv12_1080p(backing.as_ptr(), region_size);

        let luma = frame.plane_data(0).unwrap();
        assert_eq!(luma.len(), 1920 * 1080);
        assert_eq!(luma[0], 0xAB);

        let chroma = frame.plane_data(1).unwrap();
        assert_eq!(chroma.len(), 1920 * 540);

        assert!(frame.plane_data(2).is_none());
        assert_eq!(frame.plane_len(1), 1920 * 540);
        assert_eq!(frame.plane_len(2), 0);
    }

    #[test]
    fn plane_data_rejects_overflowing_layout() {
        let backing = vec![0u8; 64];
        let mut frame = nv12_1080p(backing.as_ptr(), backing.len());
        // Layout claims more bytes than the region holds.
        assert!(frame.plane_data(0).is_none());

        frame.plane_count = 1;
        frame.offset[0] = 0;
        frame.plane_size[0] = 64;
        assert_eq!(frame.plane_data(0).unwrap().len(), 64);
    }

    #[test]
    fn plane_data_requires_mapped_address() {
        let frame = nv12_1080p(std::ptr::null(), 1920 * 1080 * 3 / 2);
        assert!(frame.plane_data(0).is_none());
    }

    #[test]
    fn reset_restores_defaults() {
        let backing = vec![0u8; 16];
        let mut frame = nv12_1080p(backing.as_ptr(), backing.len());
        frame.reset();
        assert!(!frame.is_valid());
        assert_eq!(frame.frame_id, 0);
        assert_eq!(frame.plane_count, 0);
        assert!(frame.ptr.is_null());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn wire_layout_is_stable() {
        assert_eq!(std::mem::size_of::<FrameDescriptor>(), 160);
    }
}
