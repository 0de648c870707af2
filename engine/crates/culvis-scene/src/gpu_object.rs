use bytemuck::{Pod, Zeroable};

/// object buffer 中每个物体的数据，std430 布局
///
/// - origin_radius: xyz 为包围球球心（物体空间），w 为半径
/// - extents: xyz 为 AABB 半长，w 为 1 表示包围体有效
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuObjectData {
    pub model: glam::Mat4,
    pub origin_radius: glam::Vec4,
    pub extents: glam::Vec4,
}

impl GpuObjectData {
    /// 一个物体占用的 u32 个数
    pub const WORDS: usize = size_of::<Self>() / size_of::<u32>();
}
