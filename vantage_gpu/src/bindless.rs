use anyhow::Result;
use vantage_core::vk;

/// One partially-bound, update-after-bind descriptor array per
/// resource kind (spec §4.3). Each kind gets its own `VkDescriptorSet`
/// with a single binding at index 0 — sets 1, 2, 3 of the global
/// layout (spec §4.2.1 / §6's shader-visible contract: "set 0 = one
/// dynamic UBO; sets 1-3 = the three bindless arrays"). Slot 0 of
/// every array is reserved as the "empty" sentinel, created once at
/// device construction and never handed out by `allocate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindlessKind {
    SampledImage,
    StorageImage,
    StorageBuffer,
}

struct Entry {
    buffer_info: Option<vk::DescriptorBufferInfo>,
    image_info: Option<vk::DescriptorImageInfo>,
}

/// A single bindless array: its own free-list allocator and shadow
/// table of the last-written descriptor, plus the deferred pending
/// lists flushed by `BindlessSet::flush`.
pub struct BindlessArray {
    kind: BindlessKind,
    capacity: u32,
    free_list: Vec<u32>,
    next_unallocated: u32,
    shadow: Vec<Option<Entry>>,
    pending_bind: Vec<u32>,
    pending_unbind: Vec<u32>,
}

impl BindlessArray {
    fn new(kind: BindlessKind, capacity: u32) -> Self {
        let mut shadow = Vec::with_capacity(capacity as usize);
        shadow.resize_with(capacity as usize, || None);
        Self {
            kind,
            capacity,
            free_list: Vec::new(),
            // slot 0 is the sentinel and is never allocated.
            next_unallocated: 1,
            shadow,
            pending_bind: Vec::new(),
            pending_unbind: Vec::new(),
        }
    }

    /// Reserves a slot. Returns `None` when the array is exhausted —
    /// this is a programming error (spec §7), not a fatal condition;
    /// callers should log and skip the binding.
    pub fn allocate(&mut self) -> Option<u32> {
        if let Some(slot) = self.free_list.pop() {
            return Some(slot);
        }
        if self.next_unallocated >= self.capacity {
            return None;
        }
        let slot = self.next_unallocated;
        self.next_unallocated += 1;
        Some(slot)
    }

    pub fn free(&mut self, slot: u32) {
        debug_assert_ne!(slot, 0, "slot 0 is the sentinel and is never allocated");
        self.free_list.push(slot);
    }

    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self.kind {
            BindlessKind::SampledImage => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            BindlessKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            BindlessKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        }
    }
}

pub struct BindlessSet {
    pub sampled_images: BindlessArray,
    pub storage_images: BindlessArray,
    pub storage_buffers: BindlessArray,
}

impl BindlessSet {
    pub fn new(sampled_image_capacity: u32, storage_image_capacity: u32, storage_buffer_capacity: u32) -> Self {
        Self {
            sampled_images: BindlessArray::new(BindlessKind::SampledImage, sampled_image_capacity),
            storage_images: BindlessArray::new(BindlessKind::StorageImage, storage_image_capacity),
            storage_buffers: BindlessArray::new(BindlessKind::StorageBuffer, storage_buffer_capacity),
        }
    }

    /// Allocates a slot and queues its descriptor write. Does not touch
    /// Vulkan state until `flush` runs.
    pub fn bind_image(&mut self, kind: BindlessKind, view: vk::ImageView, sampler: vk::Sampler, layout: vk::ImageLayout) -> Option<u32> {
        let array = match kind {
            BindlessKind::SampledImage => &mut self.sampled_images,
            BindlessKind::StorageImage => &mut self.storage_images,
            BindlessKind::StorageBuffer => panic!("bind_image called with a storage-buffer kind"),
        };
        let slot = array.allocate()?;
        let image_info = vk::DescriptorImageInfo::builder()
            .image_view(view)
            .sampler(sampler)
            .image_layout(layout)
            .build();
        array.shadow[slot as usize] = Some(Entry {
            buffer_info: None,
            image_info: Some(image_info),
        });
        array.pending_unbind.retain(|&s| s != slot);
        array.pending_bind.push(slot);
        Some(slot)
    }

    pub fn bind_buffer(&mut self, buffer: vk::Buffer, size: vk::DeviceSize) -> Option<u32> {
        let array = &mut self.storage_buffers;
        let slot = array.allocate()?;
        let buffer_info = vk::DescriptorBufferInfo::builder()
            .buffer(buffer)
            .offset(0)
            .range(size)
            .build();
        array.shadow[slot as usize] = Some(Entry {
            buffer_info: Some(buffer_info),
            image_info: None,
        });
        array.pending_unbind.retain(|&s| s != slot);
        array.pending_bind.push(slot);
        Some(slot)
    }

    /// Queues `slot` to be freed and copied-over with the sentinel
    /// binding, unless the same slot is also pending a new bind within
    /// this flush window — in that case the new binding wins and the
    /// sentinel copy is skipped (§4.3 / §8 scenario 3).
    pub fn unbind(&mut self, kind: BindlessKind, slot: u32) {
        let array = match kind {
            BindlessKind::SampledImage => &mut self.sampled_images,
            BindlessKind::StorageImage => &mut self.storage_images,
            BindlessKind::StorageBuffer => &mut self.storage_buffers,
        };
        array.free(slot);
        array.pending_unbind.push(slot);
    }

    /// Flushes one array's pending binds and unbinds into a single
    /// `vkUpdateDescriptorSets` call against its own set. Unbinds are
    /// applied first so a slot pending both resolves to its fresh
    /// binding.
    fn flush_array(device: &vantage_core::ash::Device, set: vk::DescriptorSet, array: &mut BindlessArray) {
        if array.pending_bind.is_empty() && array.pending_unbind.is_empty() {
            return;
        }

        let sentinel_image = array.shadow[0].as_ref().and_then(|e| e.image_info);
        let sentinel_buffer = array.shadow[0].as_ref().and_then(|e| e.buffer_info);

        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        let mut writes = Vec::new();

        for slot in array.pending_unbind.drain(..) {
            if array.pending_bind.contains(&slot) {
                continue;
            }
            match array.kind {
                BindlessKind::StorageBuffer => {
                    if let Some(info) = sentinel_buffer {
                        buffer_infos.push(info);
                        writes.push((slot, None, Some(buffer_infos.len() - 1)));
                    }
                }
                _ => {
                    if let Some(info) = sentinel_image {
                        image_infos.push(info);
                        writes.push((slot, Some(image_infos.len() - 1), None));
                    }
                }
            }
        }

        for slot in array.pending_bind.drain(..) {
            let Some(entry) = &array.shadow[slot as usize] else { continue };
            match array.kind {
                BindlessKind::StorageBuffer => {
                    if let Some(info) = entry.buffer_info {
                        buffer_infos.push(info);
                        writes.push((slot, None, Some(buffer_infos.len() - 1)));
                    }
                }
                _ => {
                    if let Some(info) = entry.image_info {
                        image_infos.push(info);
                        writes.push((slot, Some(image_infos.len() - 1), None));
                    }
                }
            }
        }

        let descriptor_type = array.descriptor_type();

        let vulkan_writes = writes
            .into_iter()
            .map(|(slot, image_idx, buffer_idx)| {
                let mut write = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(0)
                    .dst_array_element(slot)
                    .descriptor_type(descriptor_type);
                if let Some(i) = image_idx {
                    write = write.image_info(std::slice::from_ref(&image_infos[i]));
                }
                if let Some(i) = buffer_idx {
                    write = write.buffer_info(std::slice::from_ref(&buffer_infos[i]));
                }
                write.build()
            })
            .collect::<Vec<_>>();

        unsafe { device.update_descriptor_sets(&vulkan_writes, &[]) };
    }

    /// Drains and applies all three arrays' pending lists against their
    /// own sets. Called once per frame by `Device::update_globals`.
    pub fn flush(
        &mut self,
        device: &vantage_core::ash::Device,
        sampled_image_set: vk::DescriptorSet,
        storage_image_set: vk::DescriptorSet,
        storage_buffer_set: vk::DescriptorSet,
    ) {
        Self::flush_array(device, sampled_image_set, &mut self.sampled_images);
        Self::flush_array(device, storage_image_set, &mut self.storage_images);
        Self::flush_array(device, storage_buffer_set, &mut self.storage_buffers);
    }

    pub fn write_sentinels(
        &mut self,
        device: &vantage_core::ash::Device,
        sampled_image_set: vk::DescriptorSet,
        storage_image_set: vk::DescriptorSet,
        storage_buffer_set: vk::DescriptorSet,
        empty_view: vk::ImageView,
        empty_sampler: vk::Sampler,
        empty_buffer: vk::Buffer,
    ) -> Result<()> {
        for (array, set, layout, descriptor_type) in [
            (
                &mut self.sampled_images,
                sampled_image_set,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            ),
            (
                &mut self.storage_images,
                storage_image_set,
                vk::ImageLayout::GENERAL,
                vk::DescriptorType::STORAGE_IMAGE,
            ),
        ] {
            let image_info = vk::DescriptorImageInfo::builder()
                .image_view(empty_view)
                .sampler(empty_sampler)
                .image_layout(layout)
                .build();
            array.shadow[0] = Some(Entry {
                buffer_info: None,
                image_info: Some(image_info),
            });
            let write = vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(0)
                .dst_array_element(0)
                .descriptor_type(descriptor_type)
                .image_info(std::slice::from_ref(&image_info))
                .build();
            unsafe { device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
        }

        let buffer_info = vk::DescriptorBufferInfo::builder()
            .buffer(empty_buffer)
            .offset(0)
            .range(vk::WHOLE_SIZE)
            .build();
        self.storage_buffers.shadow[0] = Some(Entry {
            buffer_info: Some(buffer_info),
            image_info: None,
        });
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(storage_buffer_set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(std::slice::from_ref(&buffer_info))
            .build();
        unsafe { device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_zero_is_never_allocated() {
        let mut array = BindlessArray::new(BindlessKind::SampledImage, 4);
        for _ in 0..3 {
            let slot = array.allocate().unwrap();
            assert_ne!(slot, 0);
        }
        assert!(array.allocate().is_none());
    }

    #[test]
    fn freed_slot_is_reused() {
        let mut array = BindlessArray::new(BindlessKind::SampledImage, 4);
        let a = array.allocate().unwrap();
        array.free(a);
        let b = array.allocate().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn bind_then_unbind_without_flush_leaves_both_pending() {
        let mut set = BindlessSet::new(4, 4, 4);
        let slot = set
            .bind_image(BindlessKind::SampledImage, vk::ImageView::null(), vk::Sampler::null(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .unwrap();
        set.unbind(BindlessKind::SampledImage, slot);
        assert!(set.sampled_images.pending_bind.contains(&slot));
        assert!(set.sampled_images.pending_unbind.contains(&slot));
        assert!(set.sampled_images.free_list.contains(&slot));
    }
}
