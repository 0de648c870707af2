use ash::vk;

/// 写入 descriptor set 的一个 binding
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxDescriptorWrite {
    StorageBuffer {
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    UniformBuffer {
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    /// combined image sampler
    SampledImage {
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
    StorageImage {
        binding: u32,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
}

// new & init
impl GfxDescriptorWrite {
    /// 整个 storage buffer
    #[inline]
    pub fn storage(binding: u32, buffer: vk::Buffer) -> Self {
        Self::StorageBuffer {
            binding,
            buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }

    #[inline]
    pub fn uniform(binding: u32, buffer: vk::Buffer, offset: vk::DeviceSize, range: vk::DeviceSize) -> Self {
        Self::UniformBuffer {
            binding,
            buffer,
            offset,
            range,
        }
    }
}

// getter
impl GfxDescriptorWrite {
    #[inline]
    pub fn binding(&self) -> u32 {
        match *self {
            Self::StorageBuffer { binding, .. }
            | Self::UniformBuffer { binding, .. }
            | Self::SampledImage { binding, .. }
            | Self::StorageImage { binding, .. } => binding,
        }
    }

    #[inline]
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::StorageBuffer { .. } => vk::DescriptorType::STORAGE_BUFFER,
            Self::UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
            Self::SampledImage { .. } => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::StorageImage { .. } => vk::DescriptorType::STORAGE_IMAGE,
        }
    }
}
