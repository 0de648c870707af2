use std::ops::AddAssign;

use ash::vk;
use culvis_gfx::commands::encoder::GfxCommandEncoder;
use culvis_scene::{MeshPassType, RenderScene, material::ShaderPass};

use crate::{gpu_types::GpuIndirectObject, pass_buffers::PassGpuBuffers};

/// 一个 pass 录制的绑定与 draw 次数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub pipeline_binds: u32,
    pub material_binds: u32,
    pub vertex_binds: u32,
    pub indirect_draws: u32,
    pub direct_draws: u32,
}

impl AddAssign for DrawStats {
    fn add_assign(&mut self, rhs: Self) {
        self.pipeline_binds += rhs.pipeline_binds;
        self.material_binds += rhs.material_binds;
        self.vertex_binds += rhs.vertex_binds;
        self.indirect_draws += rhs.indirect_draws;
        self.direct_draws += rhs.direct_draws;
    }
}

/// 录制一个 pass 的 draw 需要的资源
///
/// - set 0: `global_set`，外部提供的全局 / pass 数据
/// - set 1: `object_set`，object buffer + 该 pass 的 compacted instance
#[derive(Clone, Copy, Debug)]
pub struct DrawContext<'a> {
    pub pass_type: MeshPassType,
    pub buffers: &'a PassGpuBuffers,
    pub global_set: vk::DescriptorSet,
    pub object_set: vk::DescriptorSet,
    pub merged_vertex_buffer: vk::Buffer,
    pub merged_index_buffer: vk::Buffer,
}

/// 记录当前绑定的状态，只有变化时才重新绑定
#[derive(Default)]
struct BindCache {
    pipeline: Option<vk::Pipeline>,
    material_set: Option<vk::DescriptorSet>,
    vertex_buffer: Option<vk::Buffer>,
}

impl BindCache {
    fn bind_pipeline(
        &mut self,
        encoder: &mut dyn GfxCommandEncoder,
        ctx: &DrawContext<'_>,
        shader_pass: ShaderPass,
        stats: &mut DrawStats,
    ) {
        if self.pipeline == Some(shader_pass.pipeline) {
            return;
        }
        encoder.cmd_bind_pipeline(vk::PipelineBindPoint::GRAPHICS, shader_pass.pipeline);
        encoder.cmd_bind_descriptor_sets(
            vk::PipelineBindPoint::GRAPHICS,
            shader_pass.layout,
            0,
            &[ctx.global_set, ctx.object_set],
        );
        self.pipeline = Some(shader_pass.pipeline);
        // set 2 需要在新的 layout 下重新绑定
        self.material_set = None;
        stats.pipeline_binds += 1;
    }

    fn bind_material(
        &mut self,
        encoder: &mut dyn GfxCommandEncoder,
        shader_pass: ShaderPass,
        material_set: vk::DescriptorSet,
        stats: &mut DrawStats,
    ) {
        if self.material_set == Some(material_set) {
            return;
        }
        encoder.cmd_bind_descriptor_sets(vk::PipelineBindPoint::GRAPHICS, shader_pass.layout, 2, &[material_set]);
        self.material_set = Some(material_set);
        stats.material_binds += 1;
    }

    fn bind_geometry(
        &mut self,
        encoder: &mut dyn GfxCommandEncoder,
        vertex_buffer: vk::Buffer,
        index_buffer: vk::Buffer,
        stats: &mut DrawStats,
    ) {
        if self.vertex_buffer == Some(vertex_buffer) {
            return;
        }
        encoder.cmd_bind_vertex_buffers(0, &[vertex_buffer], &[0]);
        encoder.cmd_bind_index_buffer(index_buffer, 0, vk::IndexType::UINT32);
        self.vertex_buffer = Some(vertex_buffer);
        stats.vertex_binds += 1;
    }
}

fn record_merged_indirect(
    encoder: &mut dyn GfxCommandEncoder,
    buffers: &PassGpuBuffers,
    multibatch_id: u32,
    first: u32,
    count: u32,
) {
    encoder.cmd_draw_indexed_indirect_count(
        buffers.draw_indirect(),
        first as vk::DeviceSize * GpuIndirectObject::STRIDE as vk::DeviceSize,
        buffers.draw_count(),
        multibatch_id as vk::DeviceSize * size_of::<u32>() as vk::DeviceSize,
        count,
        GpuIndirectObject::STRIDE,
    );
}

/// 按 Multibatch 的顺序录制一个 pass 的 draw
///
/// merged mesh 每个 Multibatch 一次 indirect count draw；未合并的 mesh 用 CPU 已知的数量直接绘制
pub fn record_draws(encoder: &mut dyn GfxCommandEncoder, scene: &RenderScene, ctx: &DrawContext<'_>) -> DrawStats {
    let mut stats = DrawStats::default();
    if ctx.buffers.is_empty() {
        return stats;
    }
    culvis_crate_tools::profile_span!("record_draws");

    let pass = scene.pass(ctx.pass_type);
    let indirect_batches = pass.indirect_batches();
    let mut cache = BindCache::default();

    for (multibatch_id, multibatch) in pass.multibatches().iter().enumerate() {
        let first = &indirect_batches[multibatch.first as usize];
        let shader_pass = first.material.shader_pass;
        cache.bind_pipeline(encoder, ctx, shader_pass, &mut stats);
        cache.bind_material(encoder, shader_pass, first.material.material_set, &mut stats);

        if scene.mesh(first.mesh).is_merged {
            cache.bind_geometry(encoder, ctx.merged_vertex_buffer, ctx.merged_index_buffer, &mut stats);
            record_merged_indirect(encoder, ctx.buffers, multibatch_id as u32, multibatch.first, multibatch.count);
            stats.indirect_draws += 1;
            continue;
        }

        let range = multibatch.first as usize..(multibatch.first + multibatch.count) as usize;
        for batch in &indirect_batches[range] {
            let mesh = scene.mesh(batch.mesh);
            cache.bind_geometry(encoder, mesh.original.vertex_buffer, mesh.original.index_buffer, &mut stats);
            encoder.cmd_draw_indexed(mesh.index_count, batch.count, 0, 0, batch.first);
            stats.direct_draws += 1;
        }
    }

    stats
}

/// 用调试 pipeline 把剔除后的 indirect buffer 再画一遍，只包含 merged mesh
pub fn record_debug_draws(
    encoder: &mut dyn GfxCommandEncoder,
    scene: &RenderScene,
    ctx: &DrawContext<'_>,
    debug_pass: ShaderPass,
) -> DrawStats {
    let mut stats = DrawStats::default();
    if ctx.buffers.is_empty() {
        return stats;
    }

    let pass = scene.pass(ctx.pass_type);
    let mut cache = BindCache::default();
    for (multibatch_id, multibatch) in pass.multibatches().iter().enumerate() {
        let first = &pass.indirect_batches()[multibatch.first as usize];
        if !scene.mesh(first.mesh).is_merged {
            continue;
        }
        cache.bind_pipeline(encoder, ctx, debug_pass, &mut stats);
        cache.bind_geometry(encoder, ctx.merged_vertex_buffer, ctx.merged_index_buffer, &mut stats);
        record_merged_indirect(encoder, ctx.buffers, multibatch_id as u32, multibatch.first, multibatch.count);
        stats.indirect_draws += 1;
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_context_debug_includes_buffers() {
        let buffers = PassGpuBuffers::new(MeshPassType::Forward);
        let ctx = DrawContext {
            pass_type: MeshPassType::Forward,
            buffers: &buffers,
            global_set: vk::DescriptorSet::null(),
            object_set: vk::DescriptorSet::null(),
            merged_vertex_buffer: vk::Buffer::null(),
            merged_index_buffer: vk::Buffer::null(),
        };

        let text = format!("{ctx:?}");
        assert!(text.contains("PassGpuBuffers"));
        assert!(text.contains("draw-indirect"));
    }
}
