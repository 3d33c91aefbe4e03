use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use vantage_core::{ash, vk};

use crate::buffer::{Buffer, BufferDesc, BufferLocation};

const ALIGNMENT: u64 = 256;

fn align_up(value: u64, alignment: u64) -> u64 {
    ((value + alignment - 1) / alignment) * alignment
}

/// Record of how much of the ring a single in-flight frame claimed,
/// so a later frame's allocations can be checked against every frame
/// still in flight rather than only the immediately preceding one
/// (SPEC_FULL.md §13 / spec.md §9 open question 1).
#[derive(Clone, Copy, Default)]
struct FrameRegion {
    start: u64,
    end: u64,
}

/// Frame N's recording only ever races frames `N-1` down to
/// `N-frame_queue_length+1` — the caller's `wait_for_fence` already
/// retires frame `N-frame_queue_length` before `start_frame` runs, so
/// that frame's region must not still be checked against. That's
/// `frame_queue_length - 1` frames genuinely in flight.
fn tracked_region_count(frame_queue_length: usize) -> usize {
    frame_queue_length.saturating_sub(1)
}

/// Per-frame bump allocator backed by a single persistently-mapped
/// host-visible buffer (spec §4.7). `start_frame`/`end_frame` delimit
/// one frame's claims; `allocate` asserts the new claim does not
/// intrude on any region still in flight.
pub struct RingBuffer {
    buffer: Buffer,
    size: u64,
    offset: u64,
    this_frame_start: u64,
    regions: Vec<FrameRegion>,
    alignment: u64,
}

impl RingBuffer {
    /// `alignment` overrides the default 256-byte minimum when the
    /// device reports a stricter `min_uniform_buffer_alignment`
    /// (SPEC_FULL.md §13 open question 2); pass `None` for rings that
    /// never back a uniform buffer.
    pub fn new(
        device: ash::Device,
        allocator: Arc<Mutex<gpu_allocator::vulkan::Allocator>>,
        size: u64,
        usage: vk::BufferUsageFlags,
        frame_queue_length: usize,
        alignment: Option<u64>,
    ) -> Result<Self> {
        let alignment = alignment.map(|a| a.max(ALIGNMENT)).unwrap_or(ALIGNMENT);
        let buffer = Buffer::new(
            device,
            allocator,
            BufferDesc::new()
                .set_size(size)
                .set_location(BufferLocation::CpuToGpu)
                .set_usage_flags(usage),
        )?;
        Ok(Self {
            buffer,
            size,
            offset: 0,
            this_frame_start: 0,
            regions: vec![FrameRegion::default(); tracked_region_count(frame_queue_length)],
            alignment,
        })
    }

    pub fn raw(&self) -> vk::Buffer {
        self.buffer.raw()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn start_frame(&mut self) {
        self.this_frame_start = self.offset;
    }

    pub fn end_frame(&mut self) {
        if self.regions.is_empty() {
            // frame_queue_length == 1: no frame is ever still in flight
            // by the time the next one starts recording, so there is
            // nothing to track.
            return;
        }
        self.regions.remove(0);
        self.regions.push(FrameRegion {
            start: self.this_frame_start,
            end: self.offset,
        });
    }

    /// Bump-allocates `len` bytes aligned to 256 bytes, wrapping to the
    /// start of the buffer when the current segment would overrun it.
    /// Asserts the new region does not overlap any of the last
    /// `frame_queue_length` frames' regions — a programming error
    /// (buffer too small for the workload), not a recoverable one.
    pub fn allocate(&mut self, len: u64) -> (std::ptr::NonNull<u8>, u64) {
        let aligned_len = align_up(len, self.alignment);
        debug_assert!(
            aligned_len <= self.size,
            "ring buffer allocation of {aligned_len} bytes exceeds buffer size {}",
            self.size
        );

        if (self.offset % self.size) + aligned_len >= self.size {
            self.offset = align_up(self.offset / self.size, 1) * self.size;
        }

        let allocation_offset = self.offset % self.size;
        let alloc_end = allocation_offset + aligned_len;

        for region in &self.regions {
            if region.end == 0 {
                continue;
            }
            let overlaps = allocation_offset < region.end && alloc_end > region.start;
            debug_assert!(
                !overlaps,
                "ring buffer allocation at [{allocation_offset}, {alloc_end}) overlaps in-flight region [{}, {})",
                region.start, region.end
            );
        }

        self.offset += aligned_len;

        let base = self
            .buffer
            .mapped_ptr()
            .expect("ring buffer must be host-visible")
            .as_ptr() as *mut u8;
        let ptr = unsafe { base.add(allocation_offset as usize) };
        (std::ptr::NonNull::new(ptr).expect("mapped pointer is never null"), allocation_offset)
    }

    pub fn allocate_copy<T: Copy>(&mut self, value: &T) -> u64 {
        let (ptr, offset) = self.allocate(std::mem::size_of::<T>() as u64);
        unsafe { (ptr.as_ptr() as *mut T).write_unaligned(*value) };
        offset
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn align_up_rounds_to_next_multiple() {
        assert_eq!(super::align_up(0, 256), 0);
        assert_eq!(super::align_up(1, 256), 256);
        assert_eq!(super::align_up(256, 256), 256);
        assert_eq!(super::align_up(257, 256), 512);
    }

    #[test]
    fn tracked_region_count_excludes_the_already_retired_frame() {
        assert_eq!(super::tracked_region_count(2), 1);
        assert_eq!(super::tracked_region_count(3), 2);
        assert_eq!(super::tracked_region_count(1), 0);
    }
}
