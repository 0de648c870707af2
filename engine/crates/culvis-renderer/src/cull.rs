//! 剔除 dispatch 的 CPU 端
//!
//! shader 见 `shader/indirect_cull.comp`，descriptor set 0：
//!
//! | binding | 内容 |
//! |---|---|
//! | 0 | [`GpuCullData`]（uniform，每个 pass 一段） |
//! | 1 | object buffer |
//! | 2 | draw indirect |
//! | 3 | instances |
//! | 4 | compacted instances |
//! | 5 | draw count |
//! | 6 | multibatch table |
//! | 7 | depth pyramid + MAX sampler |

use ash::vk;
use culvis_gfx::{
    GfxResult,
    commands::encoder::GfxCommandEncoder,
    descriptors::GfxDescriptorWrite,
    device::GfxDevice,
};
use culvis_scene::MeshPassType;

use crate::{
    frame::FrameResources,
    gpu_types::{CULL_DATA_ALIGN, GpuCullData, GpuCullFlags},
    pass_buffers::PassGpuBuffers,
    pipelines::ComputePipeline,
    settings::CullSettings,
};

pub const CULL_GROUP_SIZE: u32 = 256;

#[inline]
pub fn cull_group_count(batch_count: u32) -> u32 {
    batch_count.div_ceil(CULL_GROUP_SIZE)
}

/// 从投影矩阵中提取对称视锥的左右、上下平面
///
/// 返回 `[x.x, x.z, y.y, y.z]`，shader 只需要这四个分量
pub fn frustum_planes(projection: &glam::Mat4) -> glam::Vec4 {
    let projection_t = projection.transpose();
    let normalize_plane = |p: glam::Vec4| p / p.truncate().length();

    let frustum_x = normalize_plane(projection_t.w_axis + projection_t.x_axis);
    let frustum_y = normalize_plane(projection_t.w_axis + projection_t.y_axis);
    glam::Vec4::new(frustum_x.x, frustum_x.z, frustum_y.y, frustum_y.z)
}

/// 一次剔除使用的相机参数
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CullParams {
    pub view: glam::Mat4,
    pub projection: glam::Mat4,
    pub znear: f32,
    pub zfar: f32,
    pub frustum_cull: bool,
    pub occlusion_cull: bool,
    pub dist_cull: bool,
    pub draw_distance: f32,
    /// view 空间的 AABB，设置之后只做 AABB 相交测试
    pub aabb: Option<(glam::Vec3, glam::Vec3)>,
}

// new & init
impl CullParams {
    /// 主相机：开关来自当前帧的 [`CullSettings`]
    pub fn camera(view: glam::Mat4, projection: glam::Mat4, znear: f32, zfar: f32, settings: &CullSettings) -> Self {
        let enabled = settings.culling_enabled;
        Self {
            view,
            projection,
            znear,
            zfar,
            frustum_cull: enabled,
            occlusion_cull: enabled && settings.occlusion_enabled,
            dist_cull: enabled,
            draw_distance: settings.draw_distance,
            aabb: None,
        }
    }

    /// 方向光阴影：光源空间的 AABB，不做视锥和遮挡剔除
    pub fn light_aabb(view: glam::Mat4, aabb_min: glam::Vec3, aabb_max: glam::Vec3) -> Self {
        Self {
            view,
            projection: glam::Mat4::IDENTITY,
            znear: 0.0,
            zfar: 0.0,
            frustum_cull: false,
            occlusion_cull: false,
            dist_cull: false,
            draw_distance: 0.0,
            aabb: Some((aabb_min, aabb_max)),
        }
    }

    /// 所有物体都可见
    pub fn pass_through(view: glam::Mat4) -> Self {
        Self {
            aabb: None,
            ..Self::light_aabb(view, glam::Vec3::ZERO, glam::Vec3::ZERO)
        }
    }
}

// tools
impl CullParams {
    #[inline]
    pub fn flags(&self) -> GpuCullFlags {
        let mut flags = GpuCullFlags::empty();
        flags.set(GpuCullFlags::FRUSTUM, self.frustum_cull);
        flags.set(GpuCullFlags::OCCLUSION, self.occlusion_cull);
        flags.set(GpuCullFlags::DISTANCE, self.dist_cull);
        flags.set(GpuCullFlags::AABB, self.aabb.is_some());
        flags
    }
}

impl GpuCullData {
    pub fn pack(params: &CullParams, pyramid_extent: vk::Extent2D, draw_count: u32) -> Self {
        let (aabb_min, aabb_max) = params.aabb.unwrap_or_default();
        Self {
            view: params.view,
            p00: params.projection.x_axis.x,
            p11: params.projection.y_axis.y,
            znear: params.znear,
            zfar: params.zfar,
            frustum: frustum_planes(&params.projection),
            aabb_min: aabb_min.extend(0.0),
            aabb_max: aabb_max.extend(0.0),
            pyramid_width: pyramid_extent.width as f32,
            pyramid_height: pyramid_extent.height as f32,
            draw_count,
            flags: params.flags().bits(),
            draw_distance: params.draw_distance,
            _padding: [0; 3],
        }
    }
}

/// 剔除 dispatch 需要的外部资源
#[derive(Clone, Copy, Debug)]
pub struct CullInputs {
    pub objects: vk::Buffer,
    pub pyramid_view: vk::ImageView,
    pub pyramid_sampler: vk::Sampler,
    pub pyramid_extent: vk::Extent2D,
}

/// 为一个 pass 录制剔除 dispatch
///
/// 调用之前 indirect / count buffer 需要已经通过 [`PassGpuBuffers::record_reset`] 清零
#[allow(clippy::too_many_arguments)]
pub fn record_cull(
    device: &dyn GfxDevice,
    encoder: &mut dyn GfxCommandEncoder,
    pipeline: &ComputePipeline,
    frame: &FrameResources,
    pass_type: MeshPassType,
    buffers: &PassGpuBuffers,
    inputs: &CullInputs,
    params: &CullParams,
) -> GfxResult<()> {
    if buffers.is_empty() {
        return Ok(());
    }
    culvis_crate_tools::profile_span!("record_cull");

    let cull_data = GpuCullData::pack(params, inputs.pyramid_extent, buffers.batch_count());
    let uniform_offset = pass_type.index() as vk::DeviceSize * CULL_DATA_ALIGN;
    device.write_buffer(frame.cull_data(), uniform_offset, bytemuck::bytes_of(&cull_data))?;

    let set = device.build_descriptor_set(
        frame.label().index(),
        pipeline.set_layout,
        &[
            GfxDescriptorWrite::uniform(
                0,
                frame.cull_data().vk_buffer(),
                uniform_offset,
                size_of::<GpuCullData>() as vk::DeviceSize,
            ),
            GfxDescriptorWrite::storage(1, inputs.objects),
            GfxDescriptorWrite::storage(2, buffers.draw_indirect()),
            GfxDescriptorWrite::storage(3, buffers.instances()),
            GfxDescriptorWrite::storage(4, buffers.compacted()),
            GfxDescriptorWrite::storage(5, buffers.draw_count()),
            GfxDescriptorWrite::storage(6, buffers.multibatch_table()),
            GfxDescriptorWrite::SampledImage {
                binding: 7,
                view: inputs.pyramid_view,
                sampler: inputs.pyramid_sampler,
                layout: vk::ImageLayout::GENERAL,
            },
        ],
    )?;

    encoder.begin_label(&format!("cull-{}", pass_type), glam::Vec4::new(0.9, 0.6, 0.2, 1.0));
    encoder.cmd_bind_pipeline(vk::PipelineBindPoint::COMPUTE, pipeline.pipeline);
    encoder.cmd_bind_descriptor_sets(vk::PipelineBindPoint::COMPUTE, pipeline.layout, 0, &[set]);
    encoder.cmd_dispatch(glam::UVec3::new(cull_group_count(buffers.batch_count()), 1, 1));
    encoder.end_label();

    log::debug!("{} pass cull: {} batches, flags {:?}", pass_type, buffers.batch_count(), params.flags());
    Ok(())
}
