use std::sync::Arc;

use ash::vk;
use culvis_gfx::{
    GfxResult,
    commands::{encoder::GfxCommandEncoder, state::GfxBufferState},
    descriptors::GfxDescriptorWrite,
    device::GfxDevice,
    resources::buffer::GfxBufferDesc,
};
use culvis_scene::{
    MeshPassType, PerPassData, RenderScene,
    mesh::{GpuMesh, MeshMergePlan},
    mesh_pass::PassRefreshStats,
};
use itertools::Itertools;

use crate::{
    cull::{CullInputs, CullParams, record_cull},
    depth_pyramid::{DepthPyramid, DepthTarget},
    draw_executor::{DrawContext, DrawStats, record_debug_draws, record_draws},
    frame::{FrameCounter, FrameLabel, FrameResources},
    growable_buffer::GrowableBuffer,
    object_upload::{ObjectBufferSync, UploadReport},
    pass_buffers::PassGpuBuffers,
    pipelines::RendererPipelines,
    settings::{GrowthPolicy, RendererSettings},
};

/// merged vertex / index buffer 的读取状态
const VERTEX_INPUT_READ: GfxBufferState = GfxBufferState::new(
    vk::PipelineStageFlags2::from_raw(
        vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT.as_raw() | vk::PipelineStageFlags2::INDEX_INPUT.as_raw(),
    ),
    vk::AccessFlags2::from_raw(vk::AccessFlags2::VERTEX_ATTRIBUTE_READ.as_raw() | vk::AccessFlags2::INDEX_READ.as_raw()),
);

/// 主相机
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CullView {
    pub view: glam::Mat4,
    pub projection: glam::Mat4,
    pub znear: f32,
    pub zfar: f32,
}

/// 方向光阴影使用的光源空间 AABB
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowCullView {
    pub view: glam::Mat4,
    pub aabb_min: glam::Vec3,
    pub aabb_max: glam::Vec3,
}

/// [`GpuDrivenRenderer::record_upload_and_cull`] 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub upload: UploadReport,
    /// 本帧合并进 merged buffer 的 mesh 数量
    pub merged_meshes: usize,
    /// 重新上传了模板的 pass 数量
    pub template_uploads: usize,
    /// 执行了剔除 dispatch 的 pass 数量
    pub culled_passes: usize,
}

/// GPU driven 渲染核心
///
/// 每帧的调用顺序：
/// 1. [`Self::begin_frame`]：等待 frame slot 可用
/// 2. [`Self::prepare`]：合并 mesh，并行 refresh 所有 pass
/// 3. [`Self::record_upload_and_cull`]：上传 + 剔除
/// 4. [`Self::record_depth_pyramid`]：用上一帧的深度构建 Hi-Z，供下一次剔除使用
/// 5. [`Self::record_pass_draws`]：在外部的 render pass 中录制 draw
/// 6. 外部提交，signal [`Self::current_fence`]，然后 [`Self::end_frame`]
pub struct GpuDrivenRenderer {
    device: Arc<dyn GfxDevice>,
    settings: RendererSettings,
    pipelines: RendererPipelines,

    frame_counter: FrameCounter,
    frames: Vec<FrameResources>,

    objects: ObjectBufferSync,
    pass_buffers: PerPassData<PassGpuBuffers>,
    object_sets: PerPassData<vk::DescriptorSet>,

    merged_vertices: GrowableBuffer,
    merged_indices: GrowableBuffer,
    pending_merge: Option<MeshMergePlan>,

    depth_pyramid: DepthPyramid,
    /// freeze_cull 打开时使用的相机
    last_cull_view: Option<CullView>,
}

// new & init
impl GpuDrivenRenderer {
    pub fn new(
        device: Arc<dyn GfxDevice>,
        pipelines: RendererPipelines,
        settings: RendererSettings,
        extent: vk::Extent2D,
    ) -> GfxResult<Self> {
        let frames = FrameCounter::frame_labels()
            .into_iter()
            .map(|label| FrameResources::new(device.as_ref(), label, MeshPassType::COUNT))
            .collect::<GfxResult<Vec<_>>>()?;
        let depth_pyramid = DepthPyramid::new(device.as_ref(), extent)?;

        log::info!("gpu driven renderer created, extent {}x{}", extent.width, extent.height);
        Ok(Self {
            device,
            settings,
            pipelines,
            frame_counter: FrameCounter::new(0),
            frames,
            objects: ObjectBufferSync::new(),
            pass_buffers: PerPassData::from_fn(PassGpuBuffers::new),
            object_sets: PerPassData::default(),
            merged_vertices: GrowableBuffer::new("merged-vertices", 1, |size, name| {
                GfxBufferDesc::geometry(
                    size,
                    vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
                    name,
                )
            }),
            merged_indices: GrowableBuffer::new("merged-indices", 1, |size, name| {
                GfxBufferDesc::geometry(size, vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC, name)
            }),
            pending_merge: None,
            depth_pyramid,
            last_cull_view: None,
        })
    }

    /// 调用之前外部需要保证 GPU 已经空闲
    pub fn destroy(mut self) {
        let device = self.device.clone();
        let device = device.as_ref();
        self.objects.destroy(device);
        for (_, buffers) in self.pass_buffers.iter_mut() {
            buffers.destroy(device);
        }
        self.merged_vertices.destroy(device);
        self.merged_indices.destroy(device);
        for frame in self.frames.drain(..) {
            frame.destroy(device);
        }
        self.depth_pyramid.destroy(device);
        log::info!("gpu driven renderer destroyed");
    }
}

// getter
impl GpuDrivenRenderer {
    #[inline]
    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    /// 调试面板修改的 tunable 在下一次 record 时生效
    #[inline]
    pub fn settings_mut(&mut self) -> &mut RendererSettings {
        &mut self.settings
    }

    #[inline]
    pub fn frame_counter(&self) -> &FrameCounter {
        &self.frame_counter
    }

    #[inline]
    pub fn current_frame(&self) -> &FrameResources {
        &self.frames[self.frame_counter.frame_label().index()]
    }

    /// 外部提交本帧命令时 signal 这个 fence
    #[inline]
    pub fn current_fence(&self) -> vk::Fence {
        self.current_frame().fence()
    }

    #[inline]
    pub fn object_buffer(&self) -> vk::Buffer {
        self.objects.buffer().vk_buffer()
    }

    #[inline]
    pub fn pass_buffers(&self, pass: MeshPassType) -> &PassGpuBuffers {
        &self.pass_buffers[pass]
    }

    /// 本帧的 set 1，在 [`Self::record_upload_and_cull`] 中重建
    #[inline]
    pub fn object_set(&self, pass: MeshPassType) -> vk::DescriptorSet {
        self.object_sets[pass]
    }

    #[inline]
    pub fn merged_vertex_buffer(&self) -> vk::Buffer {
        self.merged_vertices.vk_buffer()
    }

    #[inline]
    pub fn merged_index_buffer(&self) -> vk::Buffer {
        self.merged_indices.vk_buffer()
    }

    #[inline]
    pub fn depth_pyramid(&self) -> &DepthPyramid {
        &self.depth_pyramid
    }
}

// frame
impl GpuDrivenRenderer {
    /// 等待当前 frame slot 上一次的提交完成，回收它的临时资源
    pub fn begin_frame(&mut self) -> GfxResult<FrameLabel> {
        let label = self.frame_counter.frame_label();
        self.frames[label.index()].wait_and_recycle(self.device.as_ref())?;
        log::debug!("{} begin", self.frame_counter.frame_name());
        Ok(label)
    }

    pub fn end_frame(&mut self) {
        self.frame_counter.next_frame();
    }

    /// 分辨率变化之后重建 depth pyramid
    pub fn resize(&mut self, extent: vk::Extent2D) -> GfxResult<()> {
        let label = self.frame_counter.frame_label();
        let retired = self.frames[label.index()].deletion_queue();
        self.depth_pyramid.resize(self.device.as_ref(), extent, retired)
    }
}

// CPU 侧
impl GpuDrivenRenderer {
    /// 合并新注册的 mesh，然后并行 refresh 所有 pass
    ///
    /// 必须在本帧所有的 update_object 之后调用
    pub fn prepare(&mut self, scene: &mut RenderScene) -> PerPassData<PassRefreshStats> {
        let plan = scene.merge_meshes();
        if !plan.is_empty() {
            match &mut self.pending_merge {
                Some(pending) => {
                    pending.vertex_copies.extend(plan.vertex_copies);
                    pending.index_copies.extend(plan.index_copies);
                    pending.vertex_stride = plan.vertex_stride;
                    pending.total_vertices = plan.total_vertices;
                    pending.total_indices = plan.total_indices;
                }
                None => self.pending_merge = Some(plan),
            }
        }
        scene.refresh_passes()
    }
}

// GPU 命令
impl GpuDrivenRenderer {
    /// 录制 merged buffer 构建、object 上传、模板上传以及所有 pass 的剔除
    pub fn record_upload_and_cull(
        &mut self,
        encoder: &mut dyn GfxCommandEncoder,
        scene: &mut RenderScene,
        view: &CullView,
        shadow: Option<&ShadowCullView>,
    ) -> GfxResult<FrameReport> {
        culvis_crate_tools::profile_span!("GpuDrivenRenderer::record_upload_and_cull");
        let device = self.device.as_ref();
        let label = self.frame_counter.frame_label();
        let frame = &mut self.frames[label.index()];
        let growth = self.settings.upload.growth;

        encoder.begin_label("upload", glam::Vec4::new(0.3, 0.8, 0.3, 1.0));
        let merged_meshes = match self.pending_merge.take() {
            Some(plan) => {
                Self::record_merge(device, encoder, &mut self.merged_vertices, &mut self.merged_indices, frame, &plan)?;
                plan.vertex_copies.len()
            }
            None => 0,
        };

        let upload = self.objects.upload(
            device,
            encoder,
            scene,
            &self.settings.upload,
            frame,
            &self.pipelines.sparse_upload,
        )?;

        let mut template_uploads = 0;
        for (pass_type, buffers) in self.pass_buffers.iter_mut() {
            if buffers.refresh_templates(device, encoder, scene, growth, frame.deletion_queue())? {
                template_uploads += 1;
            }
            // object buffer 和 compacted buffer 都可能被重新分配，set 1 每帧重建
            self.object_sets[pass_type] = if buffers.is_empty() {
                vk::DescriptorSet::null()
            } else {
                device.build_descriptor_set(
                    label.index(),
                    self.pipelines.object_set_layout,
                    &[
                        GfxDescriptorWrite::storage(0, self.objects.buffer().vk_buffer()),
                        GfxDescriptorWrite::storage(1, buffers.compacted()),
                    ],
                )?
            };
            buffers.record_reset(encoder);
        }
        encoder.end_label();

        // 剔除
        self.depth_pyramid.record_ensure_readable(encoder);
        let cull_view = match (self.settings.cull.freeze_cull, self.last_cull_view) {
            (true, Some(frozen)) => frozen,
            _ => {
                self.last_cull_view = Some(*view);
                *view
            }
        };
        let mut camera = CullParams::camera(
            cull_view.view,
            cull_view.projection,
            cull_view.znear,
            cull_view.zfar,
            &self.settings.cull,
        );
        // 还没有有效的 Hi-Z 时不能做遮挡剔除
        camera.occlusion_cull &= self.depth_pyramid.is_built();

        let inputs = CullInputs {
            objects: self.objects.buffer().vk_buffer(),
            pyramid_view: self.depth_pyramid.full_view(),
            pyramid_sampler: self.depth_pyramid.sampler(),
            pyramid_extent: self.depth_pyramid.extent(),
        };

        let mut culled_passes = 0;
        for (pass_type, buffers) in self.pass_buffers.iter() {
            if buffers.is_empty() {
                continue;
            }
            let params = match (pass_type, shadow) {
                (MeshPassType::DirectionalShadow, Some(shadow)) if self.settings.cull.shadow_cull => {
                    CullParams::light_aabb(shadow.view, shadow.aabb_min, shadow.aabb_max)
                }
                (MeshPassType::DirectionalShadow, _) => CullParams::pass_through(cull_view.view),
                _ => camera,
            };
            record_cull(device, encoder, &self.pipelines.cull, frame, pass_type, buffers, &inputs, &params)?;
            culled_passes += 1;
        }

        let barriers = self
            .pass_buffers
            .values()
            .filter(|buffers| !buffers.is_empty())
            .flat_map(|buffers| buffers.cull_output_barriers())
            .collect_vec();
        if !barriers.is_empty() {
            encoder.buffer_memory_barrier(&barriers);
        }

        let report = FrameReport {
            upload,
            merged_meshes,
            template_uploads,
            culled_passes,
        };
        log::debug!("{} upload & cull: {:?}", self.frame_counter.frame_name(), report);
        Ok(report)
    }

    /// 把新合并的 mesh 拷贝到 merged buffer 中，扩容时保留已经合并的部分
    fn record_merge(
        device: &dyn GfxDevice,
        encoder: &mut dyn GfxCommandEncoder,
        merged_vertices: &mut GrowableBuffer,
        merged_indices: &mut GrowableBuffer,
        frame: &mut FrameResources,
        plan: &MeshMergePlan,
    ) -> GfxResult<()> {
        let kept_bytes = [
            plan.kept_vertices as vk::DeviceSize * plan.vertex_stride as vk::DeviceSize,
            plan.kept_indices as vk::DeviceSize * GpuMesh::INDEX_SIZE,
        ];
        let targets = [
            (merged_vertices, plan.vertex_bytes(), &plan.vertex_copies),
            (merged_indices, plan.index_bytes(), &plan.index_copies),
        ];

        for ((buffer, total_bytes, copies), kept) in targets.into_iter().zip(kept_bytes) {
            let old = buffer.vk_buffer();
            if old != vk::Buffer::null() {
                encoder.buffer_memory_barrier(&[VERTEX_INPUT_READ.barrier_to(GfxBufferState::TRANSFER_WRITE, old)]);
            }
            // merged buffer 只在加载新 mesh 时增长，容量等于需求
            let grew = buffer.ensure_capacity(device, total_bytes, GrowthPolicy::Exact, frame.deletion_queue())?;
            let dst = buffer.vk_buffer();
            if grew && kept > 0 {
                encoder.cmd_copy_buffer(
                    old,
                    dst,
                    &[vk::BufferCopy {
                        src_offset: 0,
                        dst_offset: 0,
                        size: kept,
                    }],
                );
            }
            for region in copies {
                encoder.cmd_copy_buffer(region.src, dst, &[region.as_buffer_copy()]);
            }
            encoder.buffer_memory_barrier(&[GfxBufferState::TRANSFER_WRITE.barrier_to(VERTEX_INPUT_READ, dst)]);
        }

        log::info!(
            "merged buffers updated: {} vertices, {} indices",
            plan.total_vertices,
            plan.total_indices
        );
        Ok(())
    }

    /// 用上一帧的深度构建 Hi-Z，必须在本帧的 draw 覆盖深度图之前录制
    ///
    /// 关闭遮挡剔除时什么都不做
    pub fn record_depth_pyramid(
        &mut self,
        encoder: &mut dyn GfxCommandEncoder,
        depth: &DepthTarget,
    ) -> GfxResult<bool> {
        let cull = &self.settings.cull;
        if !cull.culling_enabled || !cull.occlusion_enabled {
            return Ok(false);
        }
        self.depth_pyramid.record_build(
            self.device.as_ref(),
            encoder,
            &self.pipelines.depth_reduce,
            &self.settings.depth_pyramid,
            self.frame_counter.frame_label().index(),
            depth,
        )?;
        Ok(true)
    }

    /// 在外部已经开始的 render pass 中录制一个 pass 的 draw
    pub fn record_pass_draws(
        &self,
        encoder: &mut dyn GfxCommandEncoder,
        scene: &RenderScene,
        pass_type: MeshPassType,
        global_set: vk::DescriptorSet,
    ) -> DrawStats {
        let ctx = DrawContext {
            pass_type,
            buffers: &self.pass_buffers[pass_type],
            global_set,
            object_set: self.object_sets[pass_type],
            merged_vertex_buffer: self.merged_vertices.vk_buffer(),
            merged_index_buffer: self.merged_indices.vk_buffer(),
        };

        encoder.begin_label(&format!("draw-{}", pass_type), glam::Vec4::new(0.8, 0.8, 0.8, 1.0));
        let mut stats = record_draws(encoder, scene, &ctx);
        if let (true, Some(debug_pass)) = (self.settings.cull.show_normals, self.pipelines.show_normals) {
            stats += record_debug_draws(encoder, scene, &ctx, debug_pass);
        }
        encoder.end_label();

        log::debug!("{} pass draws: {:?}", pass_type, stats);
        stats
    }
}
