use std::path::PathBuf;

use ash::vk;
use culvis_crate_tools::resource::CulvisPath;
use culvis_scene::material::ShaderPass;

/// 渲染核心使用的 compute shader
///
/// pipeline 由外部的 pipeline 系统根据 [`ComputeShader::spv_path`] 创建
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComputeShader {
    IndirectCull,
    DepthReduce,
    SparseUpload,
}

impl ComputeShader {
    pub const ALL: [ComputeShader; 3] =
        [ComputeShader::IndirectCull, ComputeShader::DepthReduce, ComputeShader::SparseUpload];

    #[inline]
    pub fn file_name(self) -> &'static str {
        match self {
            ComputeShader::IndirectCull => "indirect_cull.comp",
            ComputeShader::DepthReduce => "depth_reduce.comp",
            ComputeShader::SparseUpload => "sparse_upload.comp",
        }
    }

    /// 每个 workgroup 的线程数，与 shader 中的 local_size 一致
    #[inline]
    pub fn local_size(self) -> glam::UVec3 {
        match self {
            ComputeShader::IndirectCull | ComputeShader::SparseUpload => glam::UVec3::new(256, 1, 1),
            ComputeShader::DepthReduce => glam::UVec3::new(32, 32, 1),
        }
    }

    pub fn src_path(self) -> PathBuf {
        CulvisPath::shader_src_path(self.file_name())
    }

    pub fn spv_path(self) -> PathBuf {
        CulvisPath::shader_build_path(self.file_name())
    }
}

/// 外部创建好的 compute pipeline，descriptor set 0 使用 `set_layout`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComputePipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub set_layout: vk::DescriptorSetLayout,
}

/// 渲染核心需要的全部外部 pipeline
///
/// - `object_set_layout`：图形 pipeline 的 set 1（object buffer + compacted instance）
/// - `show_normals`：调试用，复用剔除后的 indirect buffer 再画一遍
#[derive(Clone, Copy, Debug)]
pub struct RendererPipelines {
    pub cull: ComputePipeline,
    pub depth_reduce: ComputePipeline,
    pub sparse_upload: ComputePipeline,
    pub object_set_layout: vk::DescriptorSetLayout,
    pub show_normals: Option<ShaderPass>,
}
