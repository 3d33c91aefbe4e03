use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use vantage_core::{ash, vk};

use crate::{
    buffer::{Buffer, BufferDesc, BufferLocation},
    handle::Handle,
    image::Image,
    sync::{self, Fence, ResourceUsage},
    work::Work,
};

const STAGING_BUFFER_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Requested,
    Uploading,
    Done,
}

struct BufferUploadRequest {
    target: Handle<Buffer>,
    data: Vec<u8>,
}

struct ImageUploadRequest {
    target: Handle<Image>,
    data: Vec<u8>,
    width: u32,
    height: u32,
}

/// One staging allocation the streamer can write into. `retire_at` is
/// the transfer-fence value at which the bytes already written become
/// safe to overwrite again — set whenever a write lands in this area,
/// cleared (and `cursor` rewound to 0) once that value has completed.
struct StagingArea {
    buffer: Buffer,
    cursor: u64,
    retire_at: Option<u64>,
}

impl StagingArea {
    fn new(device: ash::Device, allocator: Arc<Mutex<gpu_allocator::vulkan::Allocator>>) -> Result<Self> {
        let buffer = Buffer::new(
            device,
            allocator,
            BufferDesc::new()
                .set_size(STAGING_BUFFER_SIZE)
                .set_location(BufferLocation::CpuToGpu)
                .set_usage_flags(vk::BufferUsageFlags::TRANSFER_SRC),
        )?;
        Ok(Self {
            buffer,
            cursor: 0,
            retire_at: None,
        })
    }

    fn remaining(&self) -> u64 {
        STAGING_BUFFER_SIZE - self.cursor
    }
}

/// Async CPU→GPU upload engine (spec §4.9). Every pending request drains
/// per `update()` call, each write going through whichever staging area
/// has room; state is tracked per target handle so `is_uploaded`/`wait`
/// can answer without the caller needing to track transfer IDs itself.
/// Uses its own timeline semaphore, independent of the per-frame render
/// `Fence`.
pub struct Streamer {
    device: ash::Device,
    allocator: Arc<Mutex<gpu_allocator::vulkan::Allocator>>,
    staging_areas: Vec<StagingArea>,

    buffer_requests: Sender<BufferUploadRequest>,
    buffer_requests_rx: Receiver<BufferUploadRequest>,
    image_requests: Sender<ImageUploadRequest>,
    image_requests_rx: Receiver<ImageUploadRequest>,

    buffer_state: Mutex<HashMap<Handle<Buffer>, UploadState>>,
    image_state: Mutex<HashMap<Handle<Image>, UploadState>>,

    transfer_fence: Fence,
    current_transfer: u64,
}

impl Streamer {
    pub fn new(device: ash::Device, allocator: Arc<Mutex<gpu_allocator::vulkan::Allocator>>) -> Result<Self> {
        let first_area = StagingArea::new(device.clone(), allocator.clone())?;

        let (buffer_requests, buffer_requests_rx) = crossbeam_channel::unbounded();
        let (image_requests, image_requests_rx) = crossbeam_channel::unbounded();
        let transfer_fence = Fence::new(device.clone(), 1)?;

        Ok(Self {
            device,
            allocator,
            staging_areas: vec![first_area],
            buffer_requests,
            buffer_requests_rx,
            image_requests,
            image_requests_rx,
            buffer_state: Mutex::new(HashMap::new()),
            image_state: Mutex::new(HashMap::new()),
            transfer_fence,
            current_transfer: 0,
        })
    }

    /// Queues a buffer upload. A second call against a target already
    /// in flight is a no-op (spec §7 Programming errors class) rather
    /// than an error surfaced to the caller.
    pub fn upload_buffer(&self, target: Handle<Buffer>, data: &[u8]) {
        let mut state = self.buffer_state.lock();
        if matches!(state.get(&target), Some(UploadState::Requested | UploadState::Uploading)) {
            log::warn!("streamer: upload already in flight for this buffer, skipping");
            return;
        }
        state.insert(target, UploadState::Requested);
        drop(state);
        let _ = self.buffer_requests.send(BufferUploadRequest {
            target,
            data: data.to_vec(),
        });
    }

    pub fn upload_image(&self, target: Handle<Image>, data: &[u8], width: u32, height: u32) {
        let mut state = self.image_state.lock();
        if matches!(state.get(&target), Some(UploadState::Requested | UploadState::Uploading)) {
            log::warn!("streamer: upload already in flight for this image, skipping");
            return;
        }
        state.insert(target, UploadState::Requested);
        drop(state);
        let _ = self.image_requests.send(ImageUploadRequest {
            target,
            data: data.to_vec(),
            width,
            height,
        });
    }

    pub fn is_uploaded(&self, target: Handle<Buffer>) -> bool {
        matches!(self.buffer_state.lock().get(&target), Some(UploadState::Done))
    }

    pub fn is_image_uploaded(&self, target: Handle<Image>) -> bool {
        matches!(self.image_state.lock().get(&target), Some(UploadState::Done))
    }

    pub fn wait(&self) -> Result<()> {
        self.transfer_fence.wait(&self.device, self.current_transfer, 10)
    }

    /// The fence `update`'s return value is a signal value for. Callers
    /// that submit `work` on a queue covering transfer (e.g. the
    /// graphics queue, since Transfer is a subset of Graphics) pass this
    /// alongside that signal value to `Device::submit`.
    pub fn transfer_fence(&self) -> &Fence {
        &self.transfer_fence
    }

    /// Drains every pending buffer and image request into `work`,
    /// writing through whichever staging area has room. Callers submit
    /// `work` on the transfer queue and signal `transfer_fence` to
    /// `current_transfer + 1` themselves (mirrors `Queue::submit`'s
    /// signal-semaphore contract — the streamer does not own the queue).
    pub fn update(
        &mut self,
        work: &Work,
        get_buffer_raw: impl Fn(Handle<Buffer>) -> Option<vk::Buffer>,
        get_image_raw: impl Fn(Handle<Image>) -> Option<vk::Image>,
    ) -> u64 {
        self.reclaim_staging_areas();

        let batch = self.transfer_fence.signal_value(self.current_transfer);

        while let Ok(request) = self.buffer_requests_rx.try_recv() {
            self.buffer_state.lock().insert(request.target, UploadState::Uploading);
            if let Some(dst) = get_buffer_raw(request.target) {
                self.stage_and_copy_buffer(work, &request.data, dst, batch);
            }
            self.buffer_state.lock().insert(request.target, UploadState::Done);
        }

        while let Ok(request) = self.image_requests_rx.try_recv() {
            self.image_state.lock().insert(request.target, UploadState::Uploading);
            if let Some(dst) = get_image_raw(request.target) {
                self.stage_and_copy_image(work, &request.data, dst, request.width, request.height, batch);
            }
            self.image_state.lock().insert(request.target, UploadState::Done);
        }

        self.current_transfer += 1;
        batch
    }

    /// Rewinds any staging area whose last write's batch has already
    /// completed on the GPU, making its bytes safe to overwrite again.
    fn reclaim_staging_areas(&mut self) {
        let completed = match self.transfer_fence.raw().counter_value() {
            Ok(value) => value,
            Err(err) => {
                log::error!("streamer: failed to query transfer fence: {err}");
                return;
            }
        };
        for area in &mut self.staging_areas {
            if area.retire_at.is_some_and(|retire_at| completed >= retire_at) {
                area.cursor = 0;
                area.retire_at = None;
            }
        }
    }

    /// Finds an existing staging area with room for `len` bytes (after
    /// `reclaim_staging_areas` has already rewound whichever ones it
    /// could). Allocates a new area (spec §7's preferred policy for
    /// staging exhaustion) when none of the existing ones fit it.
    fn staging_area_for(&mut self, len: u64) -> Option<usize> {
        if let Some(index) = self.staging_areas.iter().position(|area| area.remaining() >= len) {
            return Some(index);
        }
        if len > STAGING_BUFFER_SIZE {
            log::error!("streamer: upload of {len} bytes exceeds the maximum staging area size {STAGING_BUFFER_SIZE}");
            return None;
        }
        match StagingArea::new(self.device.clone(), self.allocator.clone()) {
            Ok(area) => {
                self.staging_areas.push(area);
                Some(self.staging_areas.len() - 1)
            }
            Err(err) => {
                log::error!("streamer: failed to allocate an additional staging area: {err}");
                None
            }
        }
    }

    /// Writes `data` into whichever staging area has room, marking it
    /// reclaimable once `batch` completes. Returns `None` (and logs) if
    /// no area could be found or allocated — the request is dropped
    /// rather than corrupting an area still in flight.
    fn stage(&mut self, data: &[u8], batch: u64) -> Option<(vk::Buffer, u64)> {
        let len = data.len() as u64;
        let index = self.staging_area_for(len)?;
        let area = &mut self.staging_areas[index];

        debug_assert!(
            area.cursor + len <= STAGING_BUFFER_SIZE,
            "staging write of {len} bytes at cursor {} overruns the staging area",
            area.cursor
        );

        let offset = area.cursor;
        area.buffer
            .copy_data_to_buffer_at(offset, data)
            .unwrap_or_else(|err| log::error!("streamer: staging write failed: {err}"));
        area.cursor += len;
        area.retire_at = Some(batch);
        Some((area.buffer.raw(), offset))
    }

    fn stage_and_copy_buffer(&mut self, work: &Work, data: &[u8], dst: vk::Buffer, batch: u64) {
        let Some((staging_raw, offset)) = self.stage(data, batch) else {
            log::error!("streamer: dropping buffer upload, no staging area available");
            return;
        };

        let region = vk::BufferCopy {
            src_offset: offset,
            dst_offset: 0,
            size: data.len() as u64,
        };
        unsafe {
            work.device_raw().cmd_copy_buffer(work.raw(), staging_raw, dst, std::slice::from_ref(&region));
        }
    }

    fn stage_and_copy_image(
        &mut self,
        work: &Work,
        data: &[u8],
        dst: vk::Image,
        width: u32,
        height: u32,
        batch: u64,
    ) {
        let Some((staging_raw, offset)) = self.stage(data, batch) else {
            log::error!("streamer: dropping image upload, no staging area available");
            return;
        };

        if let Some(barrier) = sync::image_barrier(dst, vk::ImageAspectFlags::COLOR, ResourceUsage::None, ResourceUsage::TransferDst) {
            work.image_barrier(barrier);
        }

        let subresource = vk::ImageSubresourceLayers::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1)
            .build();
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(offset)
            .image_subresource(subresource)
            .image_extent(vk::Extent3D { width, height, depth: 1 })
            .build();
        unsafe {
            work.device_raw().cmd_copy_buffer_to_image(
                work.raw(),
                staging_raw,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );
        }
    }
}
