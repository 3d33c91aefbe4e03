use std::{
    mem::{align_of, size_of_val},
    sync::Arc,
};

use anyhow::Result;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, Allocator},
    MemoryLocation,
};
use parking_lot::Mutex;
use vantage_core::{ash, vk};

use crate::sync::ResourceUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferLocation {
    GpuOnly,
    CpuToGpu,
}

pub struct BufferDesc {
    pub usage_flags: vk::BufferUsageFlags,
    pub location: BufferLocation,
    pub size: u64,
}

impl Default for BufferDesc {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferDesc {
    pub fn new() -> Self {
        Self {
            usage_flags: vk::BufferUsageFlags::empty(),
            location: BufferLocation::GpuOnly,
            size: 0,
        }
    }

    pub fn set_usage_flags(mut self, usage_flags: vk::BufferUsageFlags) -> Self {
        self.usage_flags = usage_flags;
        self
    }

    pub fn set_location(mut self, location: BufferLocation) -> Self {
        self.location = location;
        self
    }

    pub fn set_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }
}

/// GPU buffer. `usage` tracks the access state it was last transitioned
/// into, so the next `Work::barrier` call can look up the source side
/// of the transition (spec §4.5).
pub struct Buffer {
    device: ash::Device,
    allocator: Arc<Mutex<Allocator>>,
    raw: vk::Buffer,
    allocation: Option<Allocation>,
    desc: BufferDesc,
    usage: ResourceUsage,
    device_address: Option<u64>,
    storage_slot: u32,
}

impl Buffer {
    pub(crate) fn new(
        device: ash::Device,
        allocator: Arc<Mutex<Allocator>>,
        desc: BufferDesc,
    ) -> Result<Self> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(desc.size)
            .usage(desc.usage_flags | vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST);

        let raw = unsafe { device.create_buffer(&create_info, None)? };
        let requirements = unsafe { device.get_buffer_memory_requirements(raw) };

        let location = match desc.location {
            BufferLocation::GpuOnly => MemoryLocation::GpuOnly,
            BufferLocation::CpuToGpu => MemoryLocation::CpuToGpu,
        };

        let allocation = allocator.lock().allocate(&AllocationCreateDesc {
            name: "buffer",
            requirements,
            location,
            linear: true,
        })?;

        unsafe { device.bind_buffer_memory(raw, allocation.memory(), allocation.offset())? };

        Ok(Self {
            device,
            allocator,
            raw,
            allocation: Some(allocation),
            desc,
            usage: ResourceUsage::None,
            device_address: None,
            storage_slot: u32::MAX,
        })
    }

    pub(crate) fn set_storage_slot(&mut self, index: u32) {
        self.storage_slot = index;
    }

    /// Bindless storage-buffer array slot, or `u32::MAX` until bound.
    pub fn storage_slot(&self) -> u32 {
        self.storage_slot
    }

    pub fn copy_data_to_buffer<T: Copy>(&self, data: &[T]) -> Result<()> {
        self.copy_data_to_buffer_at(0, data)
    }

    /// Writes `data` starting at byte `offset` within the mapped
    /// region. Used by staging buffers where several independent
    /// uploads share one mapping and must not overwrite each other
    /// (spec §4.9: one staging area can carry more than one request).
    pub fn copy_data_to_buffer_at<T: Copy>(&self, offset: u64, data: &[T]) -> Result<()> {
        let base = self
            .allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .ok_or_else(|| anyhow::anyhow!("buffer is not host-visible"))?
            .as_ptr();
        let ptr = unsafe { (base as *mut u8).add(offset as usize) as *mut std::ffi::c_void };
        unsafe {
            let mut align = ash::util::Align::new(ptr, align_of::<T>() as u64, size_of_val(data) as u64);
            align.copy_from_slice(data);
        }
        Ok(())
    }

    pub fn mapped_ptr(&self) -> Option<std::ptr::NonNull<std::ffi::c_void>> {
        self.allocation.as_ref().and_then(|a| a.mapped_ptr())
    }

    /// Queries the buffer's device address on first call and caches it
    /// (spec §3: set lazily, only meaningful when the buffer was created
    /// with `SHADER_DEVICE_ADDRESS` usage).
    pub fn get_device_address(&mut self) -> u64 {
        if let Some(address) = self.device_address {
            return address;
        }
        let info = vk::BufferDeviceAddressInfo::builder().buffer(self.raw);
        let address = unsafe { self.device.get_buffer_device_address(&info) };
        self.device_address = Some(address);
        address
    }

    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    pub fn size(&self) -> u64 {
        self.desc.size
    }

    pub fn usage(&self) -> ResourceUsage {
        self.usage
    }

    pub fn set_usage(&mut self, usage: ResourceUsage) {
        self.usage = usage;
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.destroy_buffer(self.raw, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(err) = self.allocator.lock().free(allocation) {
                log::error!("failed to free buffer allocation: {err}");
            }
        }
    }
}
