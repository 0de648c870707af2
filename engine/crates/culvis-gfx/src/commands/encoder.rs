use ash::vk;

use crate::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};

/// 命令录制接口
///
/// 方法名和 `vkCmd*` 一一对应；`VkCommandEncoder` 直接转发给 ash，
/// `RecordingEncoder` 把命令记录下来，供测试检查顺序和参数。
pub trait GfxCommandEncoder {
    // 数据传输类型
    fn cmd_copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]);

    /// `size` 必须是 4 的倍数，或者为 `vk::WHOLE_SIZE`
    fn cmd_fill_buffer(&mut self, dst: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize, data: u32);

    fn cmd_push_constants(
        &mut self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );

    // 绑定
    fn cmd_bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);

    fn cmd_bind_descriptor_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );

    fn cmd_bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]);

    fn cmd_bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType);

    // 绘制与计算
    fn cmd_draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    #[allow(clippy::too_many_arguments)]
    fn cmd_draw_indexed_indirect_count(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        count_buffer: vk::Buffer,
        count_offset: vk::DeviceSize,
        max_draw_count: u32,
        stride: u32,
    );

    fn cmd_dispatch(&mut self, group_cnt: glam::UVec3);

    // 同步
    fn buffer_memory_barrier(&mut self, barriers: &[GfxBufferBarrier]);

    fn image_memory_barrier(&mut self, barriers: &[GfxImageBarrier]);

    // debug
    fn begin_label(&mut self, label_name: &str, label_color: glam::Vec4);

    fn end_label(&mut self);
}
