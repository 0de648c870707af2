#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use ash::vk::{self, Handle as _};
use culvis_gfx::{descriptors::GfxDescriptorWrite, headless::HeadlessDevice};
use culvis_renderer::pipelines::{ComputePipeline, RendererPipelines};
use culvis_scene::{
    MeshPassFlags, PerPassData,
    material::{EffectTemplate, MaterialInstance, ShaderPass},
    mesh::{GpuMesh, RenderBounds},
};

static NEXT_RAW: AtomicU64 = AtomicU64::new(1 << 40);

/// 和 HeadlessDevice 分配的 handle 不会冲突
fn next_raw() -> u64 {
    NEXT_RAW.fetch_add(1, Ordering::Relaxed)
}

pub fn device() -> Arc<HeadlessDevice> {
    culvis_crate_tools::init_log::init_log_with_level(log::LevelFilter::Debug);
    Arc::new(HeadlessDevice::new(3))
}

pub fn mesh(name: &str, vertex_count: u32, index_count: u32) -> Arc<GpuMesh> {
    mesh_with_stride(name, vertex_count, index_count, 32)
}

pub fn mesh_with_stride(name: &str, vertex_count: u32, index_count: u32, vertex_stride: u32) -> Arc<GpuMesh> {
    Arc::new(GpuMesh {
        name: name.to_string(),
        vertex_buffer: vk::Buffer::from_raw(next_raw()),
        index_buffer: vk::Buffer::from_raw(next_raw()),
        vertex_count,
        index_count,
        vertex_stride,
        bounds: RenderBounds::from_aabb(glam::Vec3::splat(-1.0), glam::Vec3::splat(1.0)),
    })
}

pub fn shader_pass() -> ShaderPass {
    ShaderPass {
        pipeline: vk::Pipeline::from_raw(next_raw()),
        layout: vk::PipelineLayout::from_raw(next_raw()),
    }
}

/// 所有 pass 共用同一个 shader
pub fn material_with_shader(name: &str, shader: ShaderPass) -> Arc<MaterialInstance> {
    let template = Arc::new(EffectTemplate {
        name: format!("{}-template", name),
        pass_shaders: PerPassData::from_fn(|_| Some(shader)),
    });
    Arc::new(MaterialInstance {
        name: name.to_string(),
        template,
        pass_sets: PerPassData::from_fn(|_| vk::DescriptorSet::from_raw(next_raw())),
    })
}

pub fn material(name: &str) -> Arc<MaterialInstance> {
    material_with_shader(name, shader_pass())
}

fn compute_pipeline() -> ComputePipeline {
    ComputePipeline {
        pipeline: vk::Pipeline::from_raw(next_raw()),
        layout: vk::PipelineLayout::from_raw(next_raw()),
        set_layout: vk::DescriptorSetLayout::from_raw(next_raw()),
    }
}

pub fn pipelines() -> RendererPipelines {
    RendererPipelines {
        cull: compute_pipeline(),
        depth_reduce: compute_pipeline(),
        sparse_upload: compute_pipeline(),
        object_set_layout: vk::DescriptorSetLayout::from_raw(next_raw()),
        show_normals: Some(shader_pass()),
    }
}

pub fn all_passes() -> MeshPassFlags {
    MeshPassFlags::all()
}

pub fn translation(x: f32) -> glam::Mat4 {
    glam::Mat4::from_translation(glam::Vec3::new(x, 0.0, 0.0))
}

/// descriptor set 中某个 binding 的 buffer
pub fn bound_buffer(device: &HeadlessDevice, set: vk::DescriptorSet, binding: u32) -> vk::Buffer {
    device
        .descriptor_writes(set)
        .expect("descriptor set must be alive")
        .into_iter()
        .find_map(|write| match write {
            GfxDescriptorWrite::StorageBuffer { binding: b, buffer, .. } if b == binding => Some(buffer),
            GfxDescriptorWrite::UniformBuffer { binding: b, buffer, .. } if b == binding => Some(buffer),
            _ => None,
        })
        .unwrap_or_else(|| panic!("binding {} not found", binding))
}

pub fn read_u32s(device: &HeadlessDevice, buffer: vk::Buffer) -> Vec<u32> {
    let bytes = device.vk_buffer_bytes(buffer).expect("buffer must be alive");
    bytes.chunks_exact(4).map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]])).collect()
}
