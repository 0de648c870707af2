mod common;

use std::sync::Arc;

use ash::vk::{self, Handle as _};
use common::{all_passes, material, material_with_shader, mesh, mesh_with_stride, pipelines, shader_pass, translation};
use culvis_gfx::headless::{GfxCommand, HeadlessDevice, RecordingEncoder};
use culvis_renderer::{
    depth_pyramid::DepthTarget,
    gpu_driven_renderer::{CullView, FrameReport, GpuDrivenRenderer, ShadowCullView},
    gpu_types::{CULL_DATA_ALIGN, GpuCullData, GpuCullFlags, GpuIndirectObject},
    object_upload::UploadPath,
    pipelines::RendererPipelines,
    settings::RendererSettings,
};
use culvis_scene::{MeshPassFlags, MeshPassType, RenderScene};

const EXTENT: vk::Extent2D = vk::Extent2D {
    width: 1920,
    height: 1080,
};

fn camera(eye_x: f32) -> CullView {
    CullView {
        view: glam::Mat4::look_at_rh(glam::Vec3::new(eye_x, 2.0, 10.0), glam::Vec3::ZERO, glam::Vec3::Y),
        projection: glam::Mat4::perspective_rh(60f32.to_radians(), 16.0 / 9.0, 0.1, 1000.0),
        znear: 0.1,
        zfar: 1000.0,
    }
}

fn depth_target() -> DepthTarget {
    DepthTarget {
        image: vk::Image::from_raw(1 << 50),
        view: vk::ImageView::from_raw((1 << 50) + 1),
        extent: EXTENT,
    }
}

struct Fixture {
    device: Arc<HeadlessDevice>,
    pipelines: RendererPipelines,
    renderer: GpuDrivenRenderer,
    scene: RenderScene,
}

impl Fixture {
    fn new(settings: RendererSettings) -> Self {
        let device = common::device();
        let pipelines = pipelines();
        let renderer = GpuDrivenRenderer::new(device.clone(), pipelines, settings, EXTENT).unwrap();
        Self {
            device,
            pipelines,
            renderer,
            scene: RenderScene::new(),
        }
    }

    /// 三个物体：两个共享 mesh，全部使用同一个材质
    fn with_simple_scene() -> Self {
        let mut fixture = Self::new(RendererSettings::default());
        let (cube, cone, stone) = (mesh("cube", 8, 36), mesh("cone", 5, 18), material("stone"));
        fixture.scene.register_object(cube.clone(), stone.clone(), translation(0.0), all_passes());
        fixture.scene.register_object(cone, stone.clone(), translation(2.0), all_passes());
        fixture.scene.register_object(cube, stone, translation(4.0), all_passes());
        fixture
    }

    fn upload_and_cull(
        &mut self,
        encoder: &mut RecordingEncoder,
        view: &CullView,
        shadow: Option<&ShadowCullView>,
    ) -> FrameReport {
        self.renderer.begin_frame().unwrap();
        self.renderer.prepare(&mut self.scene);
        self.renderer.record_upload_and_cull(encoder, &mut self.scene, view, shadow).unwrap()
    }

    fn cull_data(&self, pass: MeshPassType) -> GpuCullData {
        let bytes = self.device.buffer_bytes(self.renderer.current_frame().cull_data()).unwrap();
        let offset = pass.index() * CULL_DATA_ALIGN as usize;
        bytemuck::pod_read_unaligned(&bytes[offset..offset + size_of::<GpuCullData>()])
    }
}

/// `commands[after..before]` 中是否有作用于 `buffer` 的 barrier，
/// 其 src 覆盖 `src`、dst 覆盖 `dst`（stage, access）
fn has_buffer_barrier(
    commands: &[GfxCommand],
    after: usize,
    before: usize,
    buffer: vk::Buffer,
    src: (vk::PipelineStageFlags2, vk::AccessFlags2),
    dst: (vk::PipelineStageFlags2, vk::AccessFlags2),
) -> bool {
    commands[after..before].iter().any(|c| match c {
        GfxCommand::BufferBarrier(barriers) => barriers.iter().any(|b| {
            b.buffer == buffer
                && b.mask.src_stage.contains(src.0)
                && b.mask.src_access.contains(src.1)
                && b.mask.dst_stage.contains(dst.0)
                && b.mask.dst_access.contains(dst.1)
        }),
        _ => false,
    })
}

const TRANSFER_WRITE: (vk::PipelineStageFlags2, vk::AccessFlags2) =
    (vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE);
const TRANSFER_READ: (vk::PipelineStageFlags2, vk::AccessFlags2) =
    (vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ);
const CULL_READ: (vk::PipelineStageFlags2, vk::AccessFlags2) =
    (vk::PipelineStageFlags2::COMPUTE_SHADER, vk::AccessFlags2::SHADER_STORAGE_READ);
const CULL_WRITE: (vk::PipelineStageFlags2, vk::AccessFlags2) =
    (vk::PipelineStageFlags2::COMPUTE_SHADER, vk::AccessFlags2::SHADER_STORAGE_WRITE);
const INDIRECT_READ: (vk::PipelineStageFlags2, vk::AccessFlags2) =
    (vk::PipelineStageFlags2::DRAW_INDIRECT, vk::AccessFlags2::INDIRECT_COMMAND_READ);

#[test]
fn test_frame_command_order() {
    let mut fixture = Fixture::with_simple_scene();
    let mut encoder = RecordingEncoder::new();

    let report = fixture.upload_and_cull(&mut encoder, &camera(0.0), None);
    assert!(fixture.renderer.record_depth_pyramid(&mut encoder, &depth_target()).unwrap());
    fixture.renderer.record_pass_draws(&mut encoder, &fixture.scene, MeshPassType::Forward, vk::DescriptorSet::null());
    fixture.renderer.end_frame();

    assert_eq!(report.upload.path, UploadPath::Full);
    assert_eq!(report.merged_meshes, 2);
    assert_eq!(report.template_uploads, 3);
    assert_eq!(report.culled_passes, 3);

    let object_buffer = fixture.renderer.object_buffer();
    let cull_pipeline = fixture.pipelines.cull.pipeline;
    let depth_pipeline = fixture.pipelines.depth_reduce.pipeline;
    let commands = encoder.commands();

    let object_copy = encoder
        .position(|c| matches!(c, GfxCommand::CopyBuffer { dst, .. } if *dst == object_buffer))
        .unwrap();
    let count_reset = encoder.position(|c| matches!(c, GfxCommand::FillBuffer { .. })).unwrap();
    let cull_bind = encoder
        .position(|c| matches!(c, GfxCommand::BindPipeline { pipeline, .. } if *pipeline == cull_pipeline))
        .unwrap();
    let indirect_draw = encoder.position(|c| matches!(c, GfxCommand::DrawIndexedIndirectCount { .. })).unwrap();
    let depth_bind = encoder
        .position(|c| matches!(c, GfxCommand::BindPipeline { pipeline, .. } if *pipeline == depth_pipeline))
        .unwrap();

    assert!(object_copy < cull_bind);
    assert!(count_reset < cull_bind);
    assert!(cull_bind < depth_bind);
    assert!(depth_bind < indirect_draw);

    // 剔除之后有一个让 indirect 参数对 DRAW_INDIRECT 可见的 barrier
    let draw_indirect = fixture.renderer.pass_buffers(MeshPassType::Forward).draw_indirect();
    let last_cull_dispatch = commands[..depth_bind]
        .iter()
        .rposition(|c| matches!(c, GfxCommand::Dispatch(_)))
        .unwrap();
    let indirect_barrier = commands[last_cull_dispatch..depth_bind].iter().any(|c| match c {
        GfxCommand::BufferBarrier(barriers) => barriers.iter().any(|b| {
            b.buffer == draw_indirect && b.mask.dst_stage == vk::PipelineStageFlags2::DRAW_INDIRECT
        }),
        _ => false,
    });
    assert!(indirect_barrier);

    // 3 个 RenderBatch，每个 pass 一个 workgroup
    let cull_dispatches = commands[cull_bind..depth_bind]
        .iter()
        .filter(|c| matches!(c, GfxCommand::Dispatch(groups) if *groups == glam::UVec3::ONE))
        .count();
    assert_eq!(cull_dispatches, 3);
}

#[test]
fn test_steady_frame_skips_uploads() {
    let mut fixture = Fixture::with_simple_scene();
    for _ in 0..2 {
        let mut encoder = RecordingEncoder::new();
        fixture.upload_and_cull(&mut encoder, &camera(0.0), None);
        fixture.renderer.end_frame();
    }

    let mut encoder = RecordingEncoder::new();
    let report = fixture.upload_and_cull(&mut encoder, &camera(0.0), None);
    assert_eq!(report.upload.path, UploadPath::None);
    assert_eq!(report.merged_meshes, 0);
    assert_eq!(report.template_uploads, 0);
    assert_eq!(report.culled_passes, 3);

    // 只剩下每帧的清零拷贝
    let object_buffer = fixture.renderer.object_buffer();
    assert_eq!(encoder.count(|c| matches!(c, GfxCommand::CopyBuffer { dst, .. } if *dst == object_buffer)), 0);
    assert_eq!(encoder.count(|c| matches!(c, GfxCommand::CopyBuffer { .. })), 3);
}

#[test]
fn test_draw_binds_are_minimized() {
    let mut fixture = Fixture::new(RendererSettings::default());
    let shader = shader_pass();
    let stone = material_with_shader("stone", shader);
    let (cube, cone) = (mesh("cube", 8, 36), mesh("cone", 5, 18));
    // 顶点大小不同，不会被合并
    let statue = mesh_with_stride("statue", 100, 300, 48);

    for i in 0..4 {
        fixture.scene.register_object(cube.clone(), stone.clone(), translation(i as f32), MeshPassFlags::FORWARD);
    }
    fixture.scene.register_object(cone, stone.clone(), translation(10.0), MeshPassFlags::FORWARD);
    for i in 0..2 {
        fixture.scene.register_object(statue.clone(), stone.clone(), translation(20.0 + i as f32), MeshPassFlags::FORWARD);
    }

    let mut encoder = RecordingEncoder::new();
    let report = fixture.upload_and_cull(&mut encoder, &camera(0.0), None);
    assert_eq!(report.culled_passes, 1);

    let mut encoder = RecordingEncoder::new();
    let global_set = vk::DescriptorSet::from_raw(1 << 51);
    let stats = fixture.renderer.record_pass_draws(&mut encoder, &fixture.scene, MeshPassType::Forward, global_set);

    assert_eq!(stats.pipeline_binds, 1);
    assert_eq!(stats.material_binds, 1);
    assert_eq!(stats.vertex_binds, 2);
    assert_eq!(stats.indirect_draws, 1);
    assert_eq!(stats.direct_draws, 1);

    let buffers = fixture.renderer.pass_buffers(MeshPassType::Forward);
    let indirect = encoder
        .commands()
        .iter()
        .find_map(|c| match c {
            GfxCommand::DrawIndexedIndirectCount {
                buffer,
                offset,
                count_buffer,
                count_offset,
                max_draw_count,
                stride,
            } => Some((*buffer, *offset, *count_buffer, *count_offset, *max_draw_count, *stride)),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        indirect,
        (buffers.draw_indirect(), 0, buffers.draw_count(), 0, 2, GpuIndirectObject::STRIDE)
    );

    // 未合并的 mesh：CPU 已知的实例数量，first_instance 指向 compacted buffer 中的位置
    let pass = fixture.scene.pass(MeshPassType::Forward);
    let statue_batch = pass.indirect_batches().last().unwrap();
    assert!(encoder.commands().contains(&GfxCommand::DrawIndexed {
        index_count: 300,
        instance_count: 2,
        first_index: 0,
        vertex_offset: 0,
        first_instance: statue_batch.first,
    }));
    assert!(encoder.commands().contains(&GfxCommand::BindVertexBuffers {
        first_binding: 0,
        buffers: vec![statue.vertex_buffer],
    }));
    assert!(encoder.commands().contains(&GfxCommand::BindDescriptorSets {
        bind_point: vk::PipelineBindPoint::GRAPHICS,
        layout: shader.layout,
        first_set: 0,
        sets: vec![global_set, fixture.renderer.object_set(MeshPassType::Forward)],
    }));
}

#[test]
fn test_show_normals_reissues_indirect_draws() {
    let mut fixture = Fixture::with_simple_scene();
    fixture.renderer.settings_mut().cull.show_normals = true;

    let mut encoder = RecordingEncoder::new();
    fixture.upload_and_cull(&mut encoder, &camera(0.0), None);
    let mut encoder = RecordingEncoder::new();
    let stats = fixture.renderer.record_pass_draws(&mut encoder, &fixture.scene, MeshPassType::Forward, vk::DescriptorSet::null());

    assert_eq!(stats.indirect_draws, 2);
    assert_eq!(stats.pipeline_binds, 2);
    let debug_pipeline = fixture.pipelines.show_normals.unwrap().pipeline;
    assert_eq!(
        encoder.count(|c| matches!(c, GfxCommand::BindPipeline { pipeline, .. } if *pipeline == debug_pipeline)),
        1
    );
}

#[test]
fn test_depth_pyramid_build() {
    let mut fixture = Fixture::with_simple_scene();
    let pyramid = fixture.renderer.depth_pyramid();
    assert_eq!(pyramid.extent(), vk::Extent2D { width: 1024, height: 1024 });
    assert_eq!(pyramid.level_count(), 11);
    assert_eq!(fixture.device.sampler_reduction_mode(pyramid.sampler()), Some(vk::SamplerReductionMode::MAX));
    for (level, view) in pyramid.mip_views().iter().enumerate() {
        assert_eq!(fixture.device.view_mips(*view), Some(level as u32..level as u32 + 1));
    }

    // 第一帧还没有 Hi-Z，不做遮挡剔除
    let mut encoder = RecordingEncoder::new();
    fixture.upload_and_cull(&mut encoder, &camera(0.0), None);
    let flags = GpuCullFlags::from_bits_truncate(fixture.cull_data(MeshPassType::Forward).flags);
    assert!(!flags.contains(GpuCullFlags::OCCLUSION));
    assert!(flags.contains(GpuCullFlags::FRUSTUM));

    let mut encoder = RecordingEncoder::new();
    assert!(fixture.renderer.record_depth_pyramid(&mut encoder, &depth_target()).unwrap());
    let dispatches = encoder
        .commands()
        .iter()
        .filter_map(|c| match c {
            GfxCommand::Dispatch(groups) => Some(*groups),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(dispatches.len(), 11);
    assert_eq!(dispatches[0], glam::UVec3::new(32, 32, 1));
    assert_eq!(dispatches[10], glam::UVec3::new(1, 1, 1));

    // 深度图先转换到 shader read，最后回到 attachment
    let image_barriers = encoder
        .commands()
        .iter()
        .filter_map(|c| match c {
            GfxCommand::ImageBarrier(barriers) => Some(barriers.clone()),
            _ => None,
        })
        .collect::<Vec<_>>();
    let depth_image = depth_target().image;
    let first = image_barriers.first().unwrap();
    assert!(first.iter().any(|b| b.image == depth_image
        && b.old_layout == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        && b.new_layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
    let last = image_barriers.last().unwrap();
    assert_eq!(last[0].image, depth_image);
    assert_eq!(last[0].new_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    // 每一级之后都有一个只覆盖该级的 barrier
    let per_level = image_barriers.iter().flatten().filter(|b| b.mip_count == 1 && b.image != depth_image).count();
    assert_eq!(per_level, 11);
    fixture.renderer.end_frame();

    // 之后的帧可以使用遮挡剔除
    let mut encoder = RecordingEncoder::new();
    fixture.upload_and_cull(&mut encoder, &camera(0.0), None);
    let flags = GpuCullFlags::from_bits_truncate(fixture.cull_data(MeshPassType::Forward).flags);
    assert!(flags.contains(GpuCullFlags::OCCLUSION));
}

#[test]
fn test_occlusion_disabled_skips_pyramid() {
    let mut settings = RendererSettings::default();
    settings.cull.occlusion_enabled = false;
    let mut fixture = Fixture::new(settings);

    let mut encoder = RecordingEncoder::new();
    assert!(!fixture.renderer.record_depth_pyramid(&mut encoder, &depth_target()).unwrap());
    assert!(encoder.commands().is_empty());
}

#[test]
fn test_shadow_pass_culls_with_light_aabb() {
    let mut fixture = Fixture::with_simple_scene();
    let shadow = ShadowCullView {
        view: glam::Mat4::look_at_rh(glam::Vec3::new(0.0, 50.0, 0.0), glam::Vec3::ZERO, glam::Vec3::Z),
        aabb_min: glam::Vec3::splat(-20.0),
        aabb_max: glam::Vec3::splat(20.0),
    };

    let mut encoder = RecordingEncoder::new();
    fixture.upload_and_cull(&mut encoder, &camera(0.0), Some(&shadow));
    let data = fixture.cull_data(MeshPassType::DirectionalShadow);
    assert_eq!(GpuCullFlags::from_bits_truncate(data.flags), GpuCullFlags::AABB);
    assert_eq!(data.aabb_min, glam::Vec4::new(-20.0, -20.0, -20.0, 0.0));
    assert_eq!(data.view, shadow.view);
    fixture.renderer.end_frame();

    // 没有光源时阴影 pass 不剔除
    let mut encoder = RecordingEncoder::new();
    fixture.upload_and_cull(&mut encoder, &camera(0.0), None);
    assert!(GpuCullFlags::from_bits_truncate(fixture.cull_data(MeshPassType::DirectionalShadow).flags).is_empty());
}

#[test]
fn test_freeze_cull_keeps_last_view() {
    let mut fixture = Fixture::with_simple_scene();
    let mut encoder = RecordingEncoder::new();
    fixture.upload_and_cull(&mut encoder, &camera(0.0), None);
    fixture.renderer.end_frame();

    fixture.renderer.settings_mut().cull.freeze_cull = true;
    let mut encoder = RecordingEncoder::new();
    fixture.upload_and_cull(&mut encoder, &camera(30.0), None);
    assert_eq!(fixture.cull_data(MeshPassType::Forward).view, camera(0.0).view);
    fixture.renderer.end_frame();

    fixture.renderer.settings_mut().cull.freeze_cull = false;
    let mut encoder = RecordingEncoder::new();
    fixture.upload_and_cull(&mut encoder, &camera(30.0), None);
    assert_eq!(fixture.cull_data(MeshPassType::Forward).view, camera(30.0).view);
}

#[test]
fn test_frame_slots_recycle_transients() {
    let mut fixture = Fixture::with_simple_scene();
    let slots = culvis_renderer::frame::FrameCounter::fif_count();
    for _ in 0..slots {
        let mut encoder = RecordingEncoder::new();
        fixture.upload_and_cull(&mut encoder, &camera(0.0), None);
        fixture.renderer.end_frame();
    }
    assert!(fixture.device.live_descriptor_sets(0) > 0);

    // 回到 slot A：等待 fence，回收 descriptor 和 staging buffer
    fixture.renderer.begin_frame().unwrap();
    assert_eq!(fixture.device.live_descriptor_sets(0), 0);
    assert_eq!(fixture.device.fence_wait_count(), slots + 1);
}

#[test]
fn test_resize_recreates_pyramid() {
    let mut fixture = Fixture::new(RendererSettings::default());
    let old_image = fixture.renderer.depth_pyramid().vk_image();
    fixture.renderer.resize(vk::Extent2D { width: 640, height: 480 }).unwrap();

    let pyramid = fixture.renderer.depth_pyramid();
    assert_eq!(pyramid.extent(), vk::Extent2D { width: 512, height: 256 });
    assert_eq!(pyramid.level_count(), 10);
    assert!(!pyramid.is_built());
    assert_ne!(pyramid.vk_image(), old_image);
    // 旧的 image 等到 frame slot 复用时才销毁
    assert_eq!(fixture.device.live_image_count(), 2);
    fixture.renderer.begin_frame().unwrap();
    assert_eq!(fixture.device.live_image_count(), 1);
}

#[test]
fn test_template_upload_visible_to_reset_copy() {
    let mut fixture = Fixture::with_simple_scene();
    let mut encoder = RecordingEncoder::new();
    fixture.upload_and_cull(&mut encoder, &camera(0.0), None);
    fixture.renderer.end_frame();

    let clear_indirect = fixture.renderer.pass_buffers(MeshPassType::Forward).clear_indirect();
    let commands = encoder.commands();
    let template_write = encoder
        .position(|c| matches!(c, GfxCommand::CopyBuffer { dst, .. } if *dst == clear_indirect))
        .unwrap();
    let reset_copy = encoder
        .position(|c| matches!(c, GfxCommand::CopyBuffer { src, .. } if *src == clear_indirect))
        .unwrap();
    assert!(template_write < reset_copy);

    // 模板写入之后由 transfer 读取，不是 compute
    assert!(has_buffer_barrier(commands, template_write, reset_copy, clear_indirect, TRANSFER_WRITE, TRANSFER_READ));
    // 写入之前等待之前帧 reset copy 的读取
    assert!(has_buffer_barrier(
        commands,
        0,
        template_write,
        clear_indirect,
        (vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::NONE),
        TRANSFER_WRITE
    ));
}

#[test]
fn test_barriers_match_producers_and_consumers() {
    let mut fixture = Fixture::with_simple_scene();
    let mut encoder = RecordingEncoder::new();
    fixture.upload_and_cull(&mut encoder, &camera(0.0), None);
    fixture.renderer.record_pass_draws(&mut encoder, &fixture.scene, MeshPassType::Forward, vk::DescriptorSet::null());
    fixture.renderer.end_frame();

    let object_buffer = fixture.renderer.object_buffer();
    let buffers = fixture.renderer.pass_buffers(MeshPassType::Forward);
    let (draw_indirect, draw_count) = (buffers.draw_indirect(), buffers.draw_count());
    let cull_pipeline = fixture.pipelines.cull.pipeline;
    let commands = encoder.commands();

    let cull_bind = encoder
        .position(|c| matches!(c, GfxCommand::BindPipeline { pipeline, .. } if *pipeline == cull_pipeline))
        .unwrap();
    let first_cull = cull_bind + commands[cull_bind..].iter().position(|c| matches!(c, GfxCommand::Dispatch(_))).unwrap();
    let indirect_draw = encoder.position(|c| matches!(c, GfxCommand::DrawIndexedIndirectCount { .. })).unwrap();
    let last_cull = commands[..indirect_draw]
        .iter()
        .rposition(|c| matches!(c, GfxCommand::Dispatch(_)))
        .unwrap();

    // object buffer: 全量 copy -> 剔除读取
    let object_copy = encoder
        .position(|c| matches!(c, GfxCommand::CopyBuffer { dst, .. } if *dst == object_buffer))
        .unwrap();
    assert!(has_buffer_barrier(commands, object_copy, first_cull, object_buffer, TRANSFER_WRITE, CULL_READ));

    // draw_indirect: reset copy -> 剔除读写 -> DRAW_INDIRECT
    let indirect_reset = encoder
        .position(|c| matches!(c, GfxCommand::CopyBuffer { dst, .. } if *dst == draw_indirect))
        .unwrap();
    assert!(has_buffer_barrier(commands, indirect_reset, first_cull, draw_indirect, TRANSFER_WRITE, CULL_READ));
    assert!(has_buffer_barrier(commands, indirect_reset, first_cull, draw_indirect, TRANSFER_WRITE, CULL_WRITE));
    assert!(has_buffer_barrier(commands, last_cull, indirect_draw, draw_indirect, CULL_WRITE, INDIRECT_READ));

    // draw_count: fill -> 剔除 atomicMax -> DRAW_INDIRECT
    let count_fill = encoder
        .position(|c| matches!(c, GfxCommand::FillBuffer { dst, .. } if *dst == draw_count))
        .unwrap();
    assert!(has_buffer_barrier(commands, count_fill, first_cull, draw_count, TRANSFER_WRITE, CULL_WRITE));
    assert!(has_buffer_barrier(commands, last_cull, indirect_draw, draw_count, CULL_WRITE, INDIRECT_READ));
}
