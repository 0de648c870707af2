use ash::vk;

use crate::resources::handles::GfxBufferHandle;

/// 创建 buffer 所需的参数
#[derive(Clone, Debug)]
pub struct GfxBufferDesc {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    /// 是否持久映射到 host，只有映射过的 buffer 才能使用 `GfxDevice::write_buffer`
    pub mapped: bool,
    pub name: String,
}

// new & init
impl GfxBufferDesc {
    /// 位于 device memory 的 storage buffer，可以作为 transfer 的目标
    pub fn storage(size: vk::DeviceSize, name: impl Into<String>) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::TRANSFER_SRC,
            mapped: false,
            name: name.into(),
        }
    }

    /// indirect 参数或者 draw count
    pub fn indirect(size: vk::DeviceSize, name: impl Into<String>) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::INDIRECT_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST,
            mapped: false,
            name: name.into(),
        }
    }

    /// 每帧更新的 uniform buffer
    pub fn uniform(size: vk::DeviceSize, name: impl Into<String>) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
            mapped: true,
            name: name.into(),
        }
    }

    /// 顶点或者索引 buffer
    pub fn geometry(size: vk::DeviceSize, usage: vk::BufferUsageFlags, name: impl Into<String>) -> Self {
        Self {
            size,
            usage: usage | vk::BufferUsageFlags::TRANSFER_DST,
            mapped: false,
            name: name.into(),
        }
    }

    /// host 可见的 staging buffer，既可以作为 copy 的源，也可以被 compute shader 读取
    pub fn staging(size: vk::DeviceSize, name: impl Into<String>) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::STORAGE_BUFFER,
            mapped: true,
            name: name.into(),
        }
    }
}

/// 由 `GfxDevice` 创建的 buffer
///
/// 不实现 Clone：销毁时需要交还所有权，避免 double free
#[derive(Debug)]
pub struct GfxBuffer {
    pub(crate) handle: GfxBufferHandle,
    pub(crate) vk_buffer: vk::Buffer,
    pub(crate) size: vk::DeviceSize,
    pub(crate) usage: vk::BufferUsageFlags,
    pub(crate) name: String,
}

// getter
impl GfxBuffer {
    #[inline]
    pub fn handle(&self) -> GfxBufferHandle {
        self.handle
    }

    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.vk_buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}
