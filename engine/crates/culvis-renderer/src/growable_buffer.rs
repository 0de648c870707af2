use ash::vk;
use culvis_gfx::{
    GfxResult,
    device::GfxDevice,
    resources::buffer::{GfxBuffer, GfxBufferDesc},
};

use crate::{frame::DeletionQueue, settings::GrowthPolicy};

/// 只增不减的 GPU buffer，容量以元素个数计
///
/// 扩容时旧 buffer 交给当前帧的 deletion queue，新 buffer 的内容未定义
#[derive(Debug)]
pub struct GrowableBuffer {
    name: String,
    element_size: vk::DeviceSize,
    make_desc: fn(vk::DeviceSize, String) -> GfxBufferDesc,
    buffer: Option<GfxBuffer>,
    capacity: u64,
}

// new & init
impl GrowableBuffer {
    pub fn new(
        name: impl Into<String>,
        element_size: usize,
        make_desc: fn(vk::DeviceSize, String) -> GfxBufferDesc,
    ) -> Self {
        Self {
            name: name.into(),
            element_size: element_size as vk::DeviceSize,
            make_desc,
            buffer: None,
            capacity: 0,
        }
    }

    pub fn storage(name: impl Into<String>, element_size: usize) -> Self {
        Self::new(name, element_size, |size, name| GfxBufferDesc::storage(size, name))
    }

    pub fn indirect(name: impl Into<String>, element_size: usize) -> Self {
        Self::new(name, element_size, |size, name| GfxBufferDesc::indirect(size, name))
    }
}

// getter
impl GrowableBuffer {
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn buffer(&self) -> Option<&GfxBuffer> {
        self.buffer.as_ref()
    }

    /// 还没有分配时返回 null handle
    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.buffer.as_ref().map(GfxBuffer::vk_buffer).unwrap_or_default()
    }

    #[inline]
    pub fn element_size(&self) -> vk::DeviceSize {
        self.element_size
    }
}

// tools
impl GrowableBuffer {
    /// 保证至少能容纳 `demand` 个元素；返回是否重新分配
    pub fn ensure_capacity(
        &mut self,
        device: &dyn GfxDevice,
        demand: u64,
        growth: GrowthPolicy,
        retired: &mut DeletionQueue,
    ) -> GfxResult<bool> {
        let Some(new_capacity) = growth.grow(self.capacity, demand) else {
            return Ok(false);
        };

        let desc = (self.make_desc)(new_capacity * self.element_size, self.name.clone());
        let new_buffer = device.create_buffer(&desc)?;
        if let Some(old) = self.buffer.replace(new_buffer) {
            retired.retire_buffer(old);
        }
        log::info!("buffer `{}` grows: {} -> {} elements", self.name, self.capacity, new_capacity);
        self.capacity = new_capacity;
        Ok(true)
    }

    pub fn destroy(&mut self, device: &dyn GfxDevice) {
        if let Some(buffer) = self.buffer.take() {
            device.destroy_buffer(buffer);
        }
        self.capacity = 0;
    }
}
