use std::{collections::HashMap, hash::Hash};

use anyhow::{Context as _, Result};
use vantage_core::{ash, vk};

use crate::{buffer::Buffer, handle::Handle, image::Image, sampler::Sampler};

#[derive(Debug, Clone, Copy)]
pub struct DescriptorBinding {
    pub index: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub shader_stage_flags: vk::ShaderStageFlags,
}

pub struct DescriptorSetLayoutDesc {
    pub bindings: Vec<DescriptorBinding>,
}

impl Default for DescriptorSetLayoutDesc {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorSetLayoutDesc {
    pub fn new() -> Self {
        Self { bindings: vec![] }
    }

    pub fn add_binding(mut self, binding: DescriptorBinding) -> Self {
        self.bindings.push(binding);
        self
    }
}

/// Layout for the per-program local set (spec §4.2's optional set 4).
/// The four global sets are built directly by `Device` — they are
/// fixed and never need a general-purpose layout builder.
pub struct DescriptorSetLayout {
    device: ash::Device,
    raw: vk::DescriptorSetLayout,
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayout {
    pub(crate) fn create(device: ash::Device, desc: DescriptorSetLayoutDesc) -> Result<Self> {
        let vulkan_bindings = desc
            .bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(b.index)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.shader_stage_flags)
                    .build()
            })
            .collect::<Vec<_>>();

        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vulkan_bindings);
        let raw = unsafe { device.create_descriptor_set_layout(&create_info, None) }
            .context("create descriptor set layout")?;

        Ok(Self {
            device,
            raw,
            bindings: desc.bindings,
        })
    }

    pub fn raw(&self) -> vk::DescriptorSetLayout {
        self.raw
    }

    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe { self.device.destroy_descriptor_set_layout(self.raw, None) };
    }
}

#[derive(Clone)]
pub enum DescriptorSetBindingResource {
    Buffer { handle: Handle<Buffer>, binding_index: u32 },
    Image { handle: Handle<Image>, sampler: Handle<Sampler>, binding_index: u32 },
}

impl DescriptorSetBindingResource {
    fn binding_index(&self) -> u32 {
        match self {
            Self::Buffer { binding_index, .. } | Self::Image { binding_index, .. } => *binding_index,
        }
    }
}

/// Content that determines whether two local-set requests can share the
/// same `VkDescriptorSet` — spec §4.2's requirement for a content-hash
/// keyed cache on the per-program local set, avoiding an allocation per
/// draw call when the same buffer/image set repeats across frames.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DescriptorSetKey {
    entries: Vec<(u32, u64, u64)>,
}

impl DescriptorSetKey {
    pub fn build(resources: &[DescriptorSetBindingResource]) -> Self {
        let mut entries: Vec<(u32, u64, u64)> = resources
            .iter()
            .map(|r| match r {
                DescriptorSetBindingResource::Buffer { handle, binding_index } => {
                    (*binding_index, handle.to_bits(), 0)
                }
                DescriptorSetBindingResource::Image {
                    handle,
                    sampler,
                    binding_index,
                } => (*binding_index, handle.to_bits(), sampler.to_bits()),
            })
            .collect();
        entries.sort_by_key(|(b, _, _)| *b);
        Self { entries }
    }
}

pub struct DescriptorSetPool {
    device: ash::Device,
    raw: vk::DescriptorPool,
}

impl DescriptorSetPool {
    pub fn new(device: ash::Device, max_sets: u32, pool_sizes: &[vk::DescriptorPoolSize]) -> Result<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);
        let raw = unsafe { device.create_descriptor_pool(&create_info, None) }
            .context("create descriptor pool")?;
        Ok(Self { device, raw })
    }

    pub fn raw(&self) -> vk::DescriptorPool {
        self.raw
    }
}

impl Drop for DescriptorSetPool {
    fn drop(&mut self) {
        unsafe { self.device.destroy_descriptor_pool(self.raw, None) };
    }
}

/// Caches local descriptor sets by `DescriptorSetKey` so repeated binds
/// of the same resource tuple (the common case across frames for a
/// material's constant buffer + textures) reuse a set instead of
/// allocating a new one every draw.
pub struct LocalDescriptorSetCache {
    device: ash::Device,
    pool: DescriptorSetPool,
    layout: vk::DescriptorSetLayout,
    cache: HashMap<DescriptorSetKey, vk::DescriptorSet>,
}

impl LocalDescriptorSetCache {
    pub fn new(device: ash::Device, layout: &DescriptorSetLayout, capacity: u32) -> Result<Self> {
        let pool_sizes = [
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(capacity)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(capacity)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(capacity)
                .build(),
        ];
        let pool = DescriptorSetPool::new(device.clone(), capacity, &pool_sizes)?;
        Ok(Self {
            device,
            pool,
            layout: layout.raw(),
            cache: HashMap::new(),
        })
    }

    /// Returns a `VkDescriptorSet` bound to `resources`, reusing a
    /// cached one when the same key was already built.
    pub fn get_or_create(
        &mut self,
        resources: &[DescriptorSetBindingResource],
        get_buffer: impl Fn(Handle<Buffer>) -> Option<vk::Buffer>,
        get_buffer_size: impl Fn(Handle<Buffer>) -> u64,
        get_image: impl Fn(Handle<Image>) -> Option<(vk::ImageView, vk::ImageLayout)>,
        get_sampler: impl Fn(Handle<Sampler>) -> Option<vk::Sampler>,
    ) -> Result<vk::DescriptorSet> {
        let key = DescriptorSetKey::build(resources);
        if let Some(set) = self.cache.get(&key) {
            return Ok(*set);
        }

        let layouts = [self.layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool.raw())
            .set_layouts(&layouts);
        let set = unsafe { self.device.allocate_descriptor_sets(&allocate_info) }
            .context("allocate local descriptor set")?[0];

        let mut buffer_infos = Vec::with_capacity(resources.len());
        let mut image_infos = Vec::with_capacity(resources.len());
        let mut writes = Vec::with_capacity(resources.len());

        for resource in resources {
            match resource {
                DescriptorSetBindingResource::Buffer { handle, binding_index } => {
                    let Some(buffer) = get_buffer(*handle) else { continue };
                    buffer_infos.push(
                        vk::DescriptorBufferInfo::builder()
                            .buffer(buffer)
                            .offset(0)
                            .range(get_buffer_size(*handle))
                            .build(),
                    );
                    writes.push(
                        vk::WriteDescriptorSet::builder()
                            .dst_set(set)
                            .dst_binding(*binding_index)
                            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                            .buffer_info(std::slice::from_ref(buffer_infos.last().unwrap()))
                            .build(),
                    );
                }
                DescriptorSetBindingResource::Image {
                    handle,
                    sampler,
                    binding_index,
                } => {
                    let Some((view, layout)) = get_image(*handle) else { continue };
                    let Some(sampler) = get_sampler(*sampler) else { continue };
                    image_infos.push(
                        vk::DescriptorImageInfo::builder()
                            .image_view(view)
                            .image_layout(layout)
                            .sampler(sampler)
                            .build(),
                    );
                    writes.push(
                        vk::WriteDescriptorSet::builder()
                            .dst_set(set)
                            .dst_binding(*binding_index)
                            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                            .image_info(std::slice::from_ref(image_infos.last().unwrap()))
                            .build(),
                    );
                }
            }
        }

        unsafe { self.device.update_descriptor_sets(&writes, &[]) };
        self.cache.insert(key, set);
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_order_independent_of_resource_order() {
        let a = DescriptorSetBindingResource::Buffer {
            handle: Handle::INVALID,
            binding_index: 0,
        };
        let b = DescriptorSetBindingResource::Buffer {
            handle: Handle::INVALID,
            binding_index: 1,
        };
        let key1 = DescriptorSetKey::build(&[a.clone(), b.clone()]);
        let key2 = DescriptorSetKey::build(&[b, a]);
        assert!(key1 == key2);
    }
}
