use std::{
    ops::Range,
    ptr,
    sync::{Mutex, MutexGuard},
};

use ash::vk;
use itertools::Itertools;
use slotmap::SlotMap;
use vk_mem::Alloc;

use crate::{
    descriptors::GfxDescriptorWrite,
    device::GfxDevice,
    error::{GfxError, GfxResult},
    resources::{
        buffer::{GfxBuffer, GfxBufferDesc},
        handles::{GfxBufferHandle, GfxImageHandle},
        image::{GfxImage, GfxImageDesc},
    },
};

/// 初始化阶段写死的映射地址
struct MappedPtr(*mut u8);

// SAFETY: 映射地址在 allocation 销毁前一直有效，对它的访问都在 buffers 的锁内进行
unsafe impl Send for MappedPtr {}

struct VkBufferResource {
    allocation: vk_mem::Allocation,
    mapped: Option<MappedPtr>,
}

struct VkImageResource {
    allocation: vk_mem::Allocation,
}

/// 锁被 poison 时返回错误而不是 panic
fn lock<'a, T>(mutex: &'a Mutex<T>, what: &'static str) -> GfxResult<MutexGuard<'a, T>> {
    mutex.lock().map_err(|_| GfxError::LockPoisoned(what))
}

/// 每个 frame slot 一个 descriptor pool
const DESCRIPTOR_POOL_MAX_SETS: u32 = 256;
const DESCRIPTOR_POOL_SIZES: [vk::DescriptorPoolSize; 4] = [
    vk::DescriptorPoolSize {
        ty: vk::DescriptorType::STORAGE_BUFFER,
        descriptor_count: 2048,
    },
    vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 256,
    },
    vk::DescriptorPoolSize {
        ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        descriptor_count: 256,
    },
    vk::DescriptorPoolSize {
        ty: vk::DescriptorType::STORAGE_IMAGE,
        descriptor_count: 256,
    },
];

/// 基于 vk-mem 的 `GfxDevice` 实现
///
/// ash::Device 的生命周期由外部负责，本对象需要在 device 销毁之前 drop
pub struct VkGfxDevice {
    device: ash::Device,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    allocator: vk_mem::Allocator,

    buffers: Mutex<SlotMap<GfxBufferHandle, VkBufferResource>>,
    images: Mutex<SlotMap<GfxImageHandle, VkImageResource>>,

    descriptor_pools: Vec<Mutex<vk::DescriptorPool>>,
}

// new & init
impl VkGfxDevice {
    pub fn new(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        device: ash::Device,
        debug_utils: Option<ash::ext::debug_utils::Device>,
        frame_slots: usize,
    ) -> GfxResult<Self> {
        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(instance, &device, pdevice);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        let allocator = unsafe { vk_mem::Allocator::new(vma_ci)? };

        let pool_ci = vk::DescriptorPoolCreateInfo::default()
            .max_sets(DESCRIPTOR_POOL_MAX_SETS)
            .pool_sizes(&DESCRIPTOR_POOL_SIZES);
        let descriptor_pools: Vec<_> = (0..frame_slots)
            .map(|_| unsafe { device.create_descriptor_pool(&pool_ci, None) }.map(Mutex::new))
            .try_collect()?;

        log::info!("vk gfx device created with {} frame slots", frame_slots);
        Ok(Self {
            device,
            debug_utils,
            allocator,
            buffers: Mutex::new(SlotMap::with_key()),
            images: Mutex::new(SlotMap::with_key()),
            descriptor_pools,
        })
    }
}

// getter
impl VkGfxDevice {
    #[inline]
    pub fn ash_device(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn debug_utils(&self) -> Option<&ash::ext::debug_utils::Device> {
        self.debug_utils.as_ref()
    }

    #[inline]
    pub fn allocator(&self) -> &vk_mem::Allocator {
        &self.allocator
    }
}

impl GfxDevice for VkGfxDevice {
    fn create_buffer(&self, desc: &GfxBufferDesc) -> GfxResult<GfxBuffer> {
        let buffer_ci = vk::BufferCreateInfo::default().size(desc.size).usage(desc.usage);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: if desc.mapped {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM
            } else {
                vk_mem::AllocationCreateFlags::empty()
            },
            ..Default::default()
        };

        let (vk_buffer, mut allocation) = unsafe { self.allocator.create_buffer(&buffer_ci, &alloc_ci)? };
        let mapped = if desc.mapped {
            match unsafe { self.allocator.map_memory(&mut allocation) } {
                Ok(ptr) => Some(MappedPtr(ptr)),
                Err(e) => {
                    unsafe { self.allocator.destroy_buffer(vk_buffer, &mut allocation) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let mut buffers = match lock(&self.buffers, "buffers") {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe {
                    if mapped.is_some() {
                        self.allocator.unmap_memory(&mut allocation);
                    }
                    self.allocator.destroy_buffer(vk_buffer, &mut allocation);
                }
                return Err(e);
            }
        };
        let handle = buffers.insert(VkBufferResource { allocation, mapped });
        drop(buffers);
        log::debug!("create buffer `{}`: {} bytes", desc.name, desc.size);
        Ok(GfxBuffer {
            handle,
            vk_buffer,
            size: desc.size,
            usage: desc.usage,
            name: desc.name.clone(),
        })
    }

    fn destroy_buffer(&self, buffer: GfxBuffer) {
        let removed = match lock(&self.buffers, "buffers") {
            Ok(mut buffers) => buffers.remove(buffer.handle),
            Err(e) => {
                log::error!("destroy buffer `{}`: {}", buffer.name, e);
                return;
            }
        };
        let Some(mut resource) = removed else {
            log::error!("destroy unknown buffer `{}`", buffer.name);
            return;
        };
        unsafe {
            if resource.mapped.is_some() {
                self.allocator.unmap_memory(&mut resource.allocation);
            }
            self.allocator.destroy_buffer(buffer.vk_buffer, &mut resource.allocation);
        }
    }

    fn write_buffer(&self, buffer: &GfxBuffer, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()> {
        let size = data.len() as vk::DeviceSize;
        if offset + size > buffer.size {
            return Err(GfxError::OutOfBounds {
                name: buffer.name.clone(),
                offset,
                size,
                capacity: buffer.size,
            });
        }

        let buffers = lock(&self.buffers, "buffers")?;
        let resource = buffers.get(buffer.handle).ok_or(GfxError::UnknownBuffer)?;
        let mapped = resource.mapped.as_ref().ok_or_else(|| GfxError::NotMapped(buffer.name.clone()))?;
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), mapped.0.add(offset as usize), data.len());
        }
        self.allocator.flush_allocation(&resource.allocation, offset, size)?;
        Ok(())
    }

    fn create_image(&self, desc: &GfxImageDesc) -> GfxResult<GfxImage> {
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let (vk_image, allocation) = unsafe { self.allocator.create_image(&image_ci, &alloc_ci)? };
        let mut images = match lock(&self.images, "images") {
            Ok(images) => images,
            Err(e) => {
                let mut allocation = allocation;
                unsafe { self.allocator.destroy_image(vk_image, &mut allocation) };
                return Err(e);
            }
        };
        let handle = images.insert(VkImageResource { allocation });
        drop(images);
        log::info!(
            "create image `{}`: {}x{}, {} mips",
            desc.name,
            desc.extent.width,
            desc.extent.height,
            desc.mip_levels
        );
        Ok(GfxImage {
            handle,
            vk_image,
            extent: desc.extent,
            format: desc.format,
            mip_levels: desc.mip_levels,
            aspect: desc.aspect,
            name: desc.name.clone(),
        })
    }

    fn destroy_image(&self, image: GfxImage) {
        let removed = match lock(&self.images, "images") {
            Ok(mut images) => images.remove(image.handle),
            Err(e) => {
                log::error!("destroy image `{}`: {}", image.name, e);
                return;
            }
        };
        let Some(mut resource) = removed else {
            log::error!("destroy unknown image `{}`", image.name);
            return;
        };
        unsafe {
            self.allocator.destroy_image(image.vk_image, &mut resource.allocation);
        }
    }

    fn create_image_view(&self, image: &GfxImage, mips: Range<u32>) -> GfxResult<vk::ImageView> {
        let view_ci = vk::ImageViewCreateInfo::default()
            .image(image.vk_image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(image.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: image.aspect,
                base_mip_level: mips.start,
                level_count: mips.len() as u32,
                base_array_layer: 0,
                layer_count: 1,
            });
        Ok(unsafe { self.device.create_image_view(&view_ci, None)? })
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_reduction_sampler(&self, mode: vk::SamplerReductionMode) -> GfxResult<vk::Sampler> {
        let mut reduction_ci = vk::SamplerReductionModeCreateInfo::default().reduction_mode(mode);
        let sampler_ci = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .min_lod(0.0)
            .max_lod(16.0)
            .push_next(&mut reduction_ci);
        Ok(unsafe { self.device.create_sampler(&sampler_ci, None)? })
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) }
    }

    fn build_descriptor_set(
        &self,
        frame_slot: usize,
        layout: vk::DescriptorSetLayout,
        writes: &[GfxDescriptorWrite],
    ) -> GfxResult<vk::DescriptorSet> {
        let pool = self.descriptor_pools.get(frame_slot).ok_or(GfxError::InvalidFrameSlot(frame_slot))?;
        let pool = lock(pool, "descriptor pool")?;

        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default().descriptor_pool(*pool).set_layouts(&layouts);
        let set = unsafe { self.device.allocate_descriptor_sets(&alloc_info)?[0] };

        // info 需要活到 update_descriptor_sets 调用之后
        let buffer_infos = writes
            .iter()
            .map(|write| match *write {
                GfxDescriptorWrite::StorageBuffer {
                    buffer, offset, range, ..
                }
                | GfxDescriptorWrite::UniformBuffer {
                    buffer, offset, range, ..
                } => vk::DescriptorBufferInfo { buffer, offset, range },
                _ => vk::DescriptorBufferInfo::default(),
            })
            .collect_vec();
        let image_infos = writes
            .iter()
            .map(|write| match *write {
                GfxDescriptorWrite::SampledImage {
                    view, sampler, layout, ..
                } => vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: layout,
                },
                GfxDescriptorWrite::StorageImage { view, layout, .. } => vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: view,
                    image_layout: layout,
                },
                _ => vk::DescriptorImageInfo::default(),
            })
            .collect_vec();

        let vk_writes = writes
            .iter()
            .enumerate()
            .map(|(idx, write)| {
                let base = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(write.binding())
                    .descriptor_type(write.descriptor_type());
                match write {
                    GfxDescriptorWrite::StorageBuffer { .. } | GfxDescriptorWrite::UniformBuffer { .. } => {
                        base.buffer_info(std::slice::from_ref(&buffer_infos[idx]))
                    }
                    GfxDescriptorWrite::SampledImage { .. } | GfxDescriptorWrite::StorageImage { .. } => {
                        base.image_info(std::slice::from_ref(&image_infos[idx]))
                    }
                }
            })
            .collect_vec();
        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };

        Ok(set)
    }

    fn reset_frame_descriptors(&self, frame_slot: usize) -> GfxResult<()> {
        let pool = self.descriptor_pools.get(frame_slot).ok_or(GfxError::InvalidFrameSlot(frame_slot))?;
        let pool = lock(pool, "descriptor pool")?;
        unsafe { self.device.reset_descriptor_pool(*pool, vk::DescriptorPoolResetFlags::empty())? };
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> GfxResult<vk::Fence> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        Ok(unsafe { self.device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None)? })
    }

    fn wait_and_reset_fence(&self, fence: vk::Fence) -> GfxResult<()> {
        unsafe {
            self.device.wait_for_fences(&[fence], true, u64::MAX)?;
            self.device.reset_fences(&[fence])?;
        }
        Ok(())
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }
}

impl Drop for VkGfxDevice {
    fn drop(&mut self) {
        let leaked_buffers = self.buffers.get_mut().map(|buffers| buffers.len()).unwrap_or_default();
        let leaked_images = self.images.get_mut().map(|images| images.len()).unwrap_or_default();
        if leaked_buffers + leaked_images > 0 {
            log::warn!("vk gfx device dropped with {} buffers and {} images alive", leaked_buffers, leaked_images);
        }

        for pool in self.descriptor_pools.drain(..) {
            if let Ok(pool) = pool.into_inner() {
                unsafe { self.device.destroy_descriptor_pool(pool, None) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn test_poisoned_lock_is_an_error() {
        let table = Arc::new(Mutex::new(0u32));
        let poisoner = table.clone();
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock();
            panic!("poison the table");
        })
        .join();

        assert!(table.is_poisoned());
        assert!(matches!(lock(&table, "buffers"), Err(GfxError::LockPoisoned("buffers"))));
    }

    #[test]
    fn test_healthy_lock_returns_guard() {
        let table = Mutex::new(7u32);
        *lock(&table, "images").unwrap() += 1;
        assert_eq!(*lock(&table, "images").unwrap(), 8);
    }
}
