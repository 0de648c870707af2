//! 和 shader 共享的数据结构，布局需要和 `shader/` 中的声明保持一致

use bytemuck::{Pod, Zeroable};

/// 和 `VkDrawIndexedIndirectCommand` 相同的布局
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuDrawIndexedCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

/// indirect buffer 中的一项，对应一个 IndirectBatch
///
/// - object_id: batch 的第一个 RenderBatch 的序号
/// - batch_id: IndirectBatch 的序号
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuIndirectObject {
    pub command: GpuDrawIndexedCommand,
    pub object_id: u32,
    pub batch_id: u32,
}

impl GpuIndirectObject {
    pub const STRIDE: u32 = size_of::<Self>() as u32;
}

/// 每个 RenderBatch 一项：物体在 object buffer 中的下标以及所属的 IndirectBatch
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuInstance {
    pub object_id: u32,
    pub batch_id: u32,
}

/// 每个 IndirectBatch 一项
///
/// multibatch_id 为 [`GpuMultibatchEntry::UNCULLED`] 时，batch 的 mesh 没有合并，
/// 由 CPU 直接绘制，剔除 shader 只负责把实例原样写入 compacted buffer
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuMultibatchEntry {
    pub multibatch_id: u32,
    pub first_batch: u32,
}

impl GpuMultibatchEntry {
    pub const UNCULLED: u32 = u32::MAX;
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct GpuCullFlags: u32 {
        const FRUSTUM = 1 << 0;
        const OCCLUSION = 1 << 1;
        const DISTANCE = 1 << 2;
        const AABB = 1 << 3;
    }
}

/// 剔除 shader 的 uniform，std140 布局，大小是 16 的倍数
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuCullData {
    pub view: glam::Mat4,
    pub p00: f32,
    pub p11: f32,
    pub znear: f32,
    pub zfar: f32,
    /// 对称视锥的左右、上下平面：[x.x, x.z, y.y, y.z]
    pub frustum: glam::Vec4,
    /// w 未使用
    pub aabb_min: glam::Vec4,
    pub aabb_max: glam::Vec4,
    pub pyramid_width: f32,
    pub pyramid_height: f32,
    pub draw_count: u32,
    pub flags: u32,
    pub draw_distance: f32,
    pub _padding: [u32; 3],
}

/// 每个 pass 在 uniform buffer 中占用的字节数，满足 minUniformBufferOffsetAlignment 的上限
pub const CULL_DATA_ALIGN: u64 = 256;
