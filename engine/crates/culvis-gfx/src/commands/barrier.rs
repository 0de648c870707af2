use ash::vk;

/// barrier 使用的 src 和 dst 访问 mask
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxBarrierMask {
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// 便捷创建 image memory barrier 的结构体
#[derive(Clone, Copy)]
pub struct GfxImageBarrier {
    inner: vk::ImageMemoryBarrier2<'static>,
}

impl Default for GfxImageBarrier {
    fn default() -> Self {
        Self {
            inner: vk::ImageMemoryBarrier2 {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::UNDEFINED,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::empty(),
                    base_array_layer: 0,
                    layer_count: 1,
                    base_mip_level: 0,
                    level_count: 1,
                },
                ..Default::default()
            },
        }
    }
}

// new & init
impl GfxImageBarrier {
    pub fn new() -> Self {
        Self::default()
    }
}

// builder
impl GfxImageBarrier {
    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.inner.old_layout = old_layout;
        self.inner.new_layout = new_layout;
        self
    }

    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.src_access_mask = src_access_mask;
        self
    }

    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.inner.dst_stage_mask = dst_stage_mask;
        self.inner.dst_access_mask = dst_access_mask;
        self
    }

    /// layer 使用默认值，mip 范围使用 [`Self::mip_range`] 指定
    #[inline]
    pub fn image_aspect_flag(mut self, aspect_mask: vk::ImageAspectFlags) -> Self {
        self.inner.subresource_range.aspect_mask = aspect_mask;
        self
    }

    /// depth pyramid 需要逐级 barrier，因此需要指定 mip 范围
    #[inline]
    pub fn mip_range(mut self, base_mip_level: u32, level_count: u32) -> Self {
        self.inner.subresource_range.base_mip_level = base_mip_level;
        self.inner.subresource_range.level_count = level_count;
        self
    }

    #[inline]
    pub fn image(mut self, image: vk::Image) -> Self {
        self.inner.image = image;
        self
    }
}

// getter
impl GfxImageBarrier {
    #[inline]
    pub fn inner(&self) -> &vk::ImageMemoryBarrier2<'_> {
        &self.inner
    }

    #[inline]
    pub fn vk_image(&self) -> vk::Image {
        self.inner.image
    }

    #[inline]
    pub fn mask(&self) -> GfxBarrierMask {
        GfxBarrierMask {
            src_stage: self.inner.src_stage_mask,
            dst_stage: self.inner.dst_stage_mask,
            src_access: self.inner.src_access_mask,
            dst_access: self.inner.dst_access_mask,
        }
    }

    #[inline]
    pub fn layouts(&self) -> (vk::ImageLayout, vk::ImageLayout) {
        (self.inner.old_layout, self.inner.new_layout)
    }

    #[inline]
    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        self.inner.subresource_range
    }
}

#[derive(Clone, Copy)]
pub struct GfxBufferBarrier {
    inner: vk::BufferMemoryBarrier2<'static>,
}

impl Default for GfxBufferBarrier {
    fn default() -> Self {
        Self {
            inner: vk::BufferMemoryBarrier2 {
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                size: vk::WHOLE_SIZE,
                ..Default::default()
            },
        }
    }
}

// new & init
impl GfxBufferBarrier {
    pub fn new() -> Self {
        Self::default()
    }
}

// builder
impl GfxBufferBarrier {
    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.src_access_mask = src_access_mask;
        self
    }

    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.inner.dst_stage_mask = dst_stage_mask;
        self.inner.dst_access_mask = dst_access_mask;
        self
    }

    #[inline]
    pub fn buffer(mut self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.inner.buffer = buffer;
        self.inner.offset = offset;
        self.inner.size = size;
        self
    }

    /// 覆盖整个 buffer
    #[inline]
    pub fn whole_buffer(self, buffer: vk::Buffer) -> Self {
        self.buffer(buffer, 0, vk::WHOLE_SIZE)
    }
}

// getter
impl GfxBufferBarrier {
    #[inline]
    pub fn inner(&self) -> &vk::BufferMemoryBarrier2<'_> {
        &self.inner
    }

    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.inner.buffer
    }

    #[inline]
    pub fn mask(&self) -> GfxBarrierMask {
        GfxBarrierMask {
            src_stage: self.inner.src_stage_mask,
            dst_stage: self.inner.dst_stage_mask,
            src_access: self.inner.src_access_mask,
            dst_access: self.inner.dst_access_mask,
        }
    }
}

impl std::fmt::Debug for GfxBufferBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GfxBufferBarrier").field("buffer", &self.inner.buffer).field("mask", &self.mask()).finish()
    }
}

impl std::fmt::Debug for GfxImageBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GfxImageBarrier")
            .field("image", &self.inner.image)
            .field("layouts", &self.layouts())
            .field("mask", &self.mask())
            .field("range", &self.inner.subresource_range)
            .finish()
    }
}
