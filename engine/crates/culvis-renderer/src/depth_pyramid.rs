use ash::vk;
use culvis_gfx::{
    GfxResult,
    commands::{encoder::GfxCommandEncoder, state::GfxImageState},
    descriptors::GfxDescriptorWrite,
    device::GfxDevice,
    resources::image::{GfxImage, GfxImageDesc},
};

use crate::{frame::DeletionQueue, pipelines::ComputePipeline, settings::DepthPyramidSettings};

/// 不大于 `v` 的最大 2 的幂，`v` 为 0 时返回 0
#[inline]
pub fn previous_pow2(v: u32) -> u32 {
    if v == 0 { 0 } else { 1 << (31 - v.leading_zeros()) }
}

/// `floor(log2(max(width, height))) + 1`
#[inline]
pub fn mip_levels(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// 上一帧的深度图，由外部的 forward pass 持有
#[derive(Clone, Copy, Debug)]
pub struct DepthTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
}

/// Hi-Z：深度图的 max reduction mip 链
///
/// 每一级都保持在 GENERAL layout，剔除 shader 通过 `full_view` 和 MAX sampler 采样
pub struct DepthPyramid {
    image: GfxImage,
    full_view: vk::ImageView,
    mip_views: Vec<vk::ImageView>,
    sampler: vk::Sampler,

    /// image 已经从 UNDEFINED 转换过 layout
    layout_ready: bool,
    /// 至少 build 过一次，内容有效
    built: bool,
}

// new & init
impl DepthPyramid {
    pub fn new(device: &dyn GfxDevice, depth_extent: vk::Extent2D) -> GfxResult<Self> {
        let sampler = device.create_reduction_sampler(vk::SamplerReductionMode::MAX)?;
        let (image, full_view, mip_views) = Self::create_image(device, depth_extent)?;
        Ok(Self {
            image,
            full_view,
            mip_views,
            sampler,
            layout_ready: false,
            built: false,
        })
    }

    fn create_image(
        device: &dyn GfxDevice,
        depth_extent: vk::Extent2D,
    ) -> GfxResult<(GfxImage, vk::ImageView, Vec<vk::ImageView>)> {
        let extent = vk::Extent2D {
            width: previous_pow2(depth_extent.width).max(1),
            height: previous_pow2(depth_extent.height).max(1),
        };
        let levels = mip_levels(extent.width, extent.height);

        let image = device.create_image(&GfxImageDesc {
            extent,
            format: vk::Format::R32_SFLOAT,
            mip_levels: levels,
            usage: vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC,
            aspect: vk::ImageAspectFlags::COLOR,
            name: "depth-pyramid".to_string(),
        })?;
        let full_view = device.create_image_view(&image, 0..levels)?;
        let mip_views = (0..levels)
            .map(|level| device.create_image_view(&image, level..level + 1))
            .collect::<GfxResult<Vec<_>>>()?;

        log::info!("depth pyramid created: {}x{}, {} levels", extent.width, extent.height, levels);
        Ok((image, full_view, mip_views))
    }

    /// 分辨率变化之后重建，旧的 image 在 frame slot 复用时销毁
    pub fn resize(
        &mut self,
        device: &dyn GfxDevice,
        depth_extent: vk::Extent2D,
        retired: &mut DeletionQueue,
    ) -> GfxResult<()> {
        let (image, full_view, mip_views) = Self::create_image(device, depth_extent)?;
        let old_image = std::mem::replace(&mut self.image, image);
        let old_full_view = std::mem::replace(&mut self.full_view, full_view);
        let old_mip_views = std::mem::replace(&mut self.mip_views, mip_views);
        retired.retire_image(old_image, std::iter::once(old_full_view).chain(old_mip_views));

        self.layout_ready = false;
        self.built = false;
        Ok(())
    }

    pub fn destroy(self, device: &dyn GfxDevice) {
        for view in self.mip_views {
            device.destroy_image_view(view);
        }
        device.destroy_image_view(self.full_view);
        device.destroy_image(self.image);
        device.destroy_sampler(self.sampler);
    }
}

// getter
impl DepthPyramid {
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }

    #[inline]
    pub fn level_count(&self) -> u32 {
        self.image.mip_levels()
    }

    #[inline]
    pub fn full_view(&self) -> vk::ImageView {
        self.full_view
    }

    #[inline]
    pub fn mip_views(&self) -> &[vk::ImageView] {
        &self.mip_views
    }

    #[inline]
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    #[inline]
    pub fn vk_image(&self) -> vk::Image {
        self.image.vk_image()
    }

    /// 内容是否有效，无效时不能做遮挡剔除
    #[inline]
    pub fn is_built(&self) -> bool {
        self.built
    }
}

// tools
impl DepthPyramid {
    #[inline]
    fn level_extent(&self, level: u32) -> vk::Extent2D {
        let extent = self.extent();
        vk::Extent2D {
            width: (extent.width >> level).max(1),
            height: (extent.height >> level).max(1),
        }
    }

    /// 剔除 shader 采样之前保证 image 不处于 UNDEFINED layout
    pub fn record_ensure_readable(&mut self, encoder: &mut dyn GfxCommandEncoder) {
        if self.layout_ready {
            return;
        }
        encoder.image_memory_barrier(&[GfxImageState::UNDEFINED
            .barrier_to(GfxImageState::GENERAL_READ_COMPUTE, self.vk_image())
            .image_aspect_flag(vk::ImageAspectFlags::COLOR)
            .mip_range(0, self.level_count())]);
        self.layout_ready = true;
    }

    /// 逐级 reduce：第 0 级读深度图，之后每一级读上一级
    pub fn record_build(
        &mut self,
        device: &dyn GfxDevice,
        encoder: &mut dyn GfxCommandEncoder,
        pipeline: &ComputePipeline,
        settings: &DepthPyramidSettings,
        frame_slot: usize,
        depth: &DepthTarget,
    ) -> GfxResult<()> {
        culvis_crate_tools::profile_span!("DepthPyramid::record_build");
        encoder.begin_label("depth-reduce", glam::Vec4::new(0.2, 0.4, 0.9, 1.0));

        let levels = self.level_count();
        let pyramid_src = if self.layout_ready { GfxImageState::GENERAL_READ_COMPUTE } else { GfxImageState::UNDEFINED };
        encoder.image_memory_barrier(&[
            GfxImageState::DEPTH_ATTACHMENT_WRITE
                .barrier_to(GfxImageState::SHADER_READ_COMPUTE, depth.image)
                .image_aspect_flag(vk::ImageAspectFlags::DEPTH),
            pyramid_src
                .barrier_to(GfxImageState::STORAGE_WRITE_COMPUTE, self.vk_image())
                .image_aspect_flag(vk::ImageAspectFlags::COLOR)
                .mip_range(0, levels),
        ]);

        encoder.cmd_bind_pipeline(vk::PipelineBindPoint::COMPUTE, pipeline.pipeline);
        for level in 0..levels {
            let (src_view, src_layout) = if level == 0 {
                (depth.view, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            } else {
                (self.mip_views[level as usize - 1], vk::ImageLayout::GENERAL)
            };
            let set = device.build_descriptor_set(
                frame_slot,
                pipeline.set_layout,
                &[
                    GfxDescriptorWrite::StorageImage {
                        binding: 0,
                        view: self.mip_views[level as usize],
                        layout: vk::ImageLayout::GENERAL,
                    },
                    GfxDescriptorWrite::SampledImage {
                        binding: 1,
                        view: src_view,
                        sampler: self.sampler,
                        layout: src_layout,
                    },
                ],
            )?;

            let level_extent = self.level_extent(level);
            let level_size = glam::UVec2::new(level_extent.width, level_extent.height);
            encoder.cmd_bind_descriptor_sets(vk::PipelineBindPoint::COMPUTE, pipeline.layout, 0, &[set]);
            encoder.cmd_push_constants(pipeline.layout, vk::ShaderStageFlags::COMPUTE, 0, bytemuck::bytes_of(&level_size));
            encoder.cmd_dispatch(glam::UVec3::new(
                level_extent.width.div_ceil(settings.group_size),
                level_extent.height.div_ceil(settings.group_size),
                1,
            ));

            // 下一级读取这一级
            encoder.image_memory_barrier(&[GfxImageState::STORAGE_WRITE_COMPUTE
                .barrier_to(GfxImageState::GENERAL_READ_COMPUTE, self.vk_image())
                .image_aspect_flag(vk::ImageAspectFlags::COLOR)
                .mip_range(level, 1)]);
        }

        encoder.image_memory_barrier(&[GfxImageState::SHADER_READ_COMPUTE
            .barrier_to(GfxImageState::DEPTH_ATTACHMENT_READ_WRITE, depth.image)
            .image_aspect_flag(vk::ImageAspectFlags::DEPTH)]);
        encoder.end_label();

        self.layout_ready = true;
        self.built = true;
        Ok(())
    }
}
