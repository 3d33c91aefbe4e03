pub use ash;

mod bindless;
mod buffer;
mod constants;
mod context;
mod descriptor_set;
mod device;
mod error;
mod framebuffer;
mod gpu_pool;
mod handle;
mod image;
mod physical_device;
mod program;
mod queue;
mod ring_buffer;
mod sampler;
mod shader;
mod streamer;
mod surface;
mod swapchain;
mod sync;
mod work;

pub use bindless::BindlessKind;
pub use buffer::{Buffer, BufferDesc, BufferLocation};
pub use constants::*;
pub use context::Context;
pub use descriptor_set::{DescriptorBinding, DescriptorSetLayout, DescriptorSetLayoutDesc};
pub use device::{Device, DeviceDescription};
pub use error::{check, fatal, fatal_result};
pub use framebuffer::{Framebuffer, LoadOp, RenderPass};
pub use gpu_pool::GpuPool;
pub use handle::{Handle, Table};
pub use image::{Image, ImageDesc};
pub use physical_device::PhysicalDevice;
pub use program::{ComputeProgram, GraphicsProgram, RenderState};
pub use queue::{Queue, QueueFamily, QueueFamilyIndices, QueueType, SemaphoreSubmitInfo};
pub use ring_buffer::RingBuffer;
pub use sampler::{Sampler, SamplerDesc};
pub use shader::Shader;
pub use streamer::{Streamer, UploadState};
pub use surface::Surface;
pub use swapchain::{Swapchain, SwapchainDesc};
pub use sync::{Fence, ResourceUsage, Semaphore, SemaphoreType};
pub use work::{Work, WorkPool};
