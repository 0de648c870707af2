use ash::vk;

use crate::resources::handles::GfxImageHandle;

#[derive(Clone, Debug)]
pub struct GfxImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub name: String,
}

/// 由 `GfxDevice` 创建的 2D image，不实现 Clone
#[derive(Debug)]
pub struct GfxImage {
    pub(crate) handle: GfxImageHandle,
    pub(crate) vk_image: vk::Image,
    pub(crate) extent: vk::Extent2D,
    pub(crate) format: vk::Format,
    pub(crate) mip_levels: u32,
    pub(crate) aspect: vk::ImageAspectFlags,
    pub(crate) name: String,
}

// getter
impl GfxImage {
    #[inline]
    pub fn handle(&self) -> GfxImageHandle {
        self.handle
    }

    #[inline]
    pub fn vk_image(&self) -> vk::Image {
        self.vk_image
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}
