use std::sync::Arc;

use ash::vk;

/// mesh 的包围体，物体空间
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RenderBounds {
    pub origin: glam::Vec3,
    pub radius: f32,
    pub extents: glam::Vec3,
    /// 包围体是否有效，无效的物体总是被视为可见
    pub valid: bool,
}

impl RenderBounds {
    /// 从 AABB 构造，radius 为对角线的一半
    pub fn from_aabb(min: glam::Vec3, max: glam::Vec3) -> Self {
        let extents = (max - min) * 0.5;
        Self {
            origin: (max + min) * 0.5,
            radius: extents.length(),
            extents,
            valid: true,
        }
    }
}

/// 资源系统解码好的 mesh，GPU 资源已经就绪
///
/// 索引固定为 u32
#[derive(Debug)]
pub struct GpuMesh {
    pub name: String,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub vertex_count: u32,
    pub index_count: u32,
    /// 单个顶点的字节数
    pub vertex_stride: u32,
    pub bounds: RenderBounds,
}

impl GpuMesh {
    pub const INDEX_SIZE: vk::DeviceSize = size_of::<u32>() as vk::DeviceSize;
}

/// 注册到场景中的 mesh
///
/// `first_vertex` / `first_index` 是合并之后在 merged buffer 中的偏移，合并前为 0
#[derive(Clone, Debug)]
pub struct DrawMesh {
    pub first_vertex: u32,
    pub first_index: u32,
    pub vertex_count: u32,
    pub index_count: u32,
    pub is_merged: bool,
    pub original: Arc<GpuMesh>,
}

impl DrawMesh {
    pub(crate) fn new(original: Arc<GpuMesh>) -> Self {
        Self {
            first_vertex: 0,
            first_index: 0,
            vertex_count: original.vertex_count,
            index_count: original.index_count,
            is_merged: false,
            original,
        }
    }

    #[inline]
    pub fn bounds(&self) -> &RenderBounds {
        &self.original.bounds
    }
}

/// 从某个 mesh 自己的 buffer 拷贝到 merged buffer 的区域
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshCopyRegion {
    pub src: vk::Buffer,
    pub dst_offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

impl MeshCopyRegion {
    #[inline]
    pub fn as_buffer_copy(&self) -> vk::BufferCopy {
        vk::BufferCopy {
            src_offset: 0,
            dst_offset: self.dst_offset,
            size: self.size,
        }
    }
}

/// `RenderScene::merge_meshes` 的结果，renderer 根据它构建 merged vertex / index buffer
///
/// `[0, kept_vertices)` 与 `[0, kept_indices)` 是之前已经合并过的部分，需要从旧的 merged buffer 中保留
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeshMergePlan {
    pub vertex_stride: u32,
    pub kept_vertices: u32,
    pub kept_indices: u32,
    pub total_vertices: u32,
    pub total_indices: u32,
    pub vertex_copies: Vec<MeshCopyRegion>,
    pub index_copies: Vec<MeshCopyRegion>,
}

impl MeshMergePlan {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertex_copies.is_empty()
    }

    #[inline]
    pub fn vertex_bytes(&self) -> vk::DeviceSize {
        self.total_vertices as vk::DeviceSize * self.vertex_stride as vk::DeviceSize
    }

    #[inline]
    pub fn index_bytes(&self) -> vk::DeviceSize {
        self.total_indices as vk::DeviceSize * GpuMesh::INDEX_SIZE
    }
}
