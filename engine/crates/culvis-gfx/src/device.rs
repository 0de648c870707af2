use std::ops::Range;

use ash::vk;

use crate::{
    descriptors::GfxDescriptorWrite,
    error::GfxResult,
    resources::{
        buffer::{GfxBuffer, GfxBufferDesc},
        image::{GfxImage, GfxImageDesc},
    },
};

/// 上层和 GPU 资源打交道的唯一入口
///
/// 所有方法都是 `&self`：backend 内部自己负责加锁，这样 rayon 的任务也可以并行创建资源。
pub trait GfxDevice: Send + Sync {
    // buffer
    fn create_buffer(&self, desc: &GfxBufferDesc) -> GfxResult<GfxBuffer>;

    fn destroy_buffer(&self, buffer: GfxBuffer);

    /// 写入 host 映射过的 buffer，写入之后立即 flush
    fn write_buffer(&self, buffer: &GfxBuffer, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()>;

    // image
    fn create_image(&self, desc: &GfxImageDesc) -> GfxResult<GfxImage>;

    fn destroy_image(&self, image: GfxImage);

    /// 覆盖 `mips` 范围的 2D view
    fn create_image_view(&self, image: &GfxImage, mips: Range<u32>) -> GfxResult<vk::ImageView>;

    fn destroy_image_view(&self, view: vk::ImageView);

    /// clamp to edge 的线性 sampler，带有指定的 reduction mode
    fn create_reduction_sampler(&self, mode: vk::SamplerReductionMode) -> GfxResult<vk::Sampler>;

    fn destroy_sampler(&self, sampler: vk::Sampler);

    // descriptor
    /// 从 `frame_slot` 对应的 pool 中分配并写入一个 descriptor set，
    /// 该 set 在 [`Self::reset_frame_descriptors`] 之前有效
    fn build_descriptor_set(
        &self,
        frame_slot: usize,
        layout: vk::DescriptorSetLayout,
        writes: &[GfxDescriptorWrite],
    ) -> GfxResult<vk::DescriptorSet>;

    fn reset_frame_descriptors(&self, frame_slot: usize) -> GfxResult<()>;

    // sync
    fn create_fence(&self, signaled: bool) -> GfxResult<vk::Fence>;

    /// 没有超时，一直等到 fence 被 signal
    fn wait_and_reset_fence(&self, fence: vk::Fence) -> GfxResult<()>;

    fn destroy_fence(&self, fence: vk::Fence);
}
