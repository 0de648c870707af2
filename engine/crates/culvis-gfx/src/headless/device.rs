use std::{
    collections::HashMap,
    ops::Range,
    sync::{
        Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use ash::vk::{self, Handle};
use slotmap::SlotMap;

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

struct HeadlessBuffer {
    vk_buffer: vk::Buffer,
    data: Vec<u8>,
    mapped: bool,
}

struct HeadlessDescriptorSet {
    frame_slot: usize,
    layout: vk::DescriptorSetLayout,
    writes: Vec<GfxDescriptorWrite>,
}

/// 在 CPU 上模拟资源的 `GfxDevice`
///
/// vulkan handle 是从 1 开始递增的假值，只用来区分不同的资源。
pub struct HeadlessDevice {
    frame_slots: usize,
    next_raw_handle: AtomicU64,

    buffers: Mutex<SlotMap<GfxBufferHandle, HeadlessBuffer>>,
    images: Mutex<SlotMap<GfxImageHandle, vk::Image>>,
    views: Mutex<HashMap<vk::ImageView, Range<u32>>>,
    samplers: Mutex<HashMap<vk::Sampler, vk::SamplerReductionMode>>,
    descriptor_sets: Mutex<HashMap<vk::DescriptorSet, HeadlessDescriptorSet>>,

    fence_waits: AtomicUsize,
}

// new & init
impl HeadlessDevice {
    pub fn new(frame_slots: usize) -> Self {
        Self {
            frame_slots,
            next_raw_handle: AtomicU64::new(1),
            buffers: Mutex::new(SlotMap::with_key()),
            images: Mutex::new(SlotMap::with_key()),
            views: Mutex::new(HashMap::new()),
            samplers: Mutex::new(HashMap::new()),
            descriptor_sets: Mutex::new(HashMap::new()),
            fence_waits: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn next_raw(&self) -> u64 {
        self.next_raw_handle.fetch_add(1, Ordering::Relaxed)
    }
}

// getter
impl HeadlessDevice {
    /// buffer 当前的内容
    pub fn buffer_bytes(&self, buffer: &GfxBuffer) -> Option<Vec<u8>> {
        self.buffers.lock().unwrap().get(buffer.handle).map(|b| b.data.clone())
    }

    /// 通过 vulkan handle 查找，用于检查已经交给 deletion queue 的 buffer
    pub fn vk_buffer_bytes(&self, vk_buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.buffers.lock().unwrap().values().find(|b| b.vk_buffer == vk_buffer).map(|b| b.data.clone())
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }

    pub fn live_image_count(&self) -> usize {
        self.images.lock().unwrap().len()
    }

    pub fn live_view_count(&self) -> usize {
        self.views.lock().unwrap().len()
    }

    /// view 覆盖的 mip 范围
    pub fn view_mips(&self, view: vk::ImageView) -> Option<Range<u32>> {
        self.views.lock().unwrap().get(&view).cloned()
    }

    pub fn sampler_reduction_mode(&self, sampler: vk::Sampler) -> Option<vk::SamplerReductionMode> {
        self.samplers.lock().unwrap().get(&sampler).copied()
    }

    pub fn descriptor_writes(&self, set: vk::DescriptorSet) -> Option<Vec<GfxDescriptorWrite>> {
        self.descriptor_sets.lock().unwrap().get(&set).map(|s| s.writes.clone())
    }

    pub fn descriptor_layout(&self, set: vk::DescriptorSet) -> Option<vk::DescriptorSetLayout> {
        self.descriptor_sets.lock().unwrap().get(&set).map(|s| s.layout)
    }

    /// `frame_slot` 当前持有的 descriptor set 数量
    pub fn live_descriptor_sets(&self, frame_slot: usize) -> usize {
        self.descriptor_sets.lock().unwrap().values().filter(|s| s.frame_slot == frame_slot).count()
    }

    pub fn fence_wait_count(&self) -> usize {
        self.fence_waits.load(Ordering::Relaxed)
    }
}

impl GfxDevice for HeadlessDevice {
    fn create_buffer(&self, desc: &GfxBufferDesc) -> GfxResult<GfxBuffer> {
        let vk_buffer = vk::Buffer::from_raw(self.next_raw());
        let handle = self.buffers.lock().unwrap().insert(HeadlessBuffer {
            vk_buffer,
            data: vec![0; desc.size as usize],
            mapped: desc.mapped,
        });
        Ok(GfxBuffer {
            handle,
            vk_buffer,
            size: desc.size,
            usage: desc.usage,
            name: desc.name.clone(),
        })
    }

    fn destroy_buffer(&self, buffer: GfxBuffer) {
        if self.buffers.lock().unwrap().remove(buffer.handle).is_none() {
            log::error!("destroy unknown buffer `{}`", buffer.name);
        }
    }

    fn write_buffer(&self, buffer: &GfxBuffer, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()> {
        let mut buffers = self.buffers.lock().unwrap();
        let target = buffers.get_mut(buffer.handle).ok_or(GfxError::UnknownBuffer)?;
        if !target.mapped {
            return Err(GfxError::NotMapped(buffer.name.clone()));
        }

        let begin = offset as usize;
        let end = begin + data.len();
        if end > target.data.len() {
            return Err(GfxError::OutOfBounds {
                name: buffer.name.clone(),
                offset,
                size: data.len() as vk::DeviceSize,
                capacity: buffer.size,
            });
        }
        target.data[begin..end].copy_from_slice(data);
        Ok(())
    }

    fn create_image(&self, desc: &GfxImageDesc) -> GfxResult<GfxImage> {
        let vk_image = vk::Image::from_raw(self.next_raw());
        let handle = self.images.lock().unwrap().insert(vk_image);
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
        if self.images.lock().unwrap().remove(image.handle).is_none() {
            log::error!("destroy unknown image `{}`", image.name);
        }
    }

    fn create_image_view(&self, image: &GfxImage, mips: Range<u32>) -> GfxResult<vk::ImageView> {
        if !self.images.lock().unwrap().contains_key(image.handle) {
            return Err(GfxError::UnknownImage);
        }
        let view = vk::ImageView::from_raw(self.next_raw());
        self.views.lock().unwrap().insert(view, mips);
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.views.lock().unwrap().remove(&view);
    }

    fn create_reduction_sampler(&self, mode: vk::SamplerReductionMode) -> GfxResult<vk::Sampler> {
        let sampler = vk::Sampler::from_raw(self.next_raw());
        self.samplers.lock().unwrap().insert(sampler, mode);
        Ok(sampler)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.samplers.lock().unwrap().remove(&sampler);
    }

    fn build_descriptor_set(
        &self,
        frame_slot: usize,
        layout: vk::DescriptorSetLayout,
        writes: &[GfxDescriptorWrite],
    ) -> GfxResult<vk::DescriptorSet> {
        if frame_slot >= self.frame_slots {
            return Err(GfxError::InvalidFrameSlot(frame_slot));
        }
        let set = vk::DescriptorSet::from_raw(self.next_raw());
        self.descriptor_sets.lock().unwrap().insert(
            set,
            HeadlessDescriptorSet {
                frame_slot,
                layout,
                writes: writes.to_vec(),
            },
        );
        Ok(set)
    }

    fn reset_frame_descriptors(&self, frame_slot: usize) -> GfxResult<()> {
        if frame_slot >= self.frame_slots {
            return Err(GfxError::InvalidFrameSlot(frame_slot));
        }
        self.descriptor_sets.lock().unwrap().retain(|_, s| s.frame_slot != frame_slot);
        Ok(())
    }

    fn create_fence(&self, _signaled: bool) -> GfxResult<vk::Fence> {
        Ok(vk::Fence::from_raw(self.next_raw()))
    }

    /// 没有 GPU，fence 总是已经 signal
    fn wait_and_reset_fence(&self, _fence: vk::Fence) -> GfxResult<()> {
        self.fence_waits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn destroy_fence(&self, _fence: vk::Fence) {}
}
