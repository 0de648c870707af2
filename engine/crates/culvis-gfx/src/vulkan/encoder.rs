use ash::vk;
use itertools::Itertools;

use crate::commands::{
    barrier::{GfxBufferBarrier, GfxImageBarrier},
    encoder::GfxCommandEncoder,
};

/// 命令缓冲封装
///
/// command buffer 的分配、begin/end 和提交由外部完成，这里只负责录制。
pub struct VkCommandEncoder<'a> {
    device: &'a ash::Device,
    debug_utils: Option<&'a ash::ext::debug_utils::Device>,
    vk_handle: vk::CommandBuffer,
}

// new & init
impl<'a> VkCommandEncoder<'a> {
    /// `vk_handle` 必须处于 recording 状态
    pub fn new(
        device: &'a ash::Device,
        debug_utils: Option<&'a ash::ext::debug_utils::Device>,
        vk_handle: vk::CommandBuffer,
    ) -> Self {
        Self {
            device,
            debug_utils,
            vk_handle,
        }
    }
}

// getter
impl VkCommandEncoder<'_> {
    #[inline]
    pub fn vk_handle(&self) -> vk::CommandBuffer {
        self.vk_handle
    }
}

impl GfxCommandEncoder for VkCommandEncoder<'_> {
    #[inline]
    fn cmd_copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe { self.device.cmd_copy_buffer(self.vk_handle, src, dst, regions) }
    }

    #[inline]
    fn cmd_fill_buffer(&mut self, dst: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize, data: u32) {
        unsafe { self.device.cmd_fill_buffer(self.vk_handle, dst, offset, size, data) }
    }

    #[inline]
    fn cmd_push_constants(
        &mut self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe { self.device.cmd_push_constants(self.vk_handle, layout, stages, offset, data) }
    }

    #[inline]
    fn cmd_bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe { self.device.cmd_bind_pipeline(self.vk_handle, bind_point, pipeline) }
    }

    #[inline]
    fn cmd_bind_descriptor_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe { self.device.cmd_bind_descriptor_sets(self.vk_handle, bind_point, layout, first_set, sets, &[]) }
    }

    #[inline]
    fn cmd_bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        unsafe { self.device.cmd_bind_vertex_buffers(self.vk_handle, first_binding, buffers, offsets) }
    }

    #[inline]
    fn cmd_bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe { self.device.cmd_bind_index_buffer(self.vk_handle, buffer, offset, index_type) }
    }

    #[inline]
    fn cmd_draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.vk_handle,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        }
    }

    #[inline]
    fn cmd_draw_indexed_indirect_count(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        count_buffer: vk::Buffer,
        count_offset: vk::DeviceSize,
        max_draw_count: u32,
        stride: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed_indirect_count(
                self.vk_handle,
                buffer,
                offset,
                count_buffer,
                count_offset,
                max_draw_count,
                stride,
            )
        }
    }

    #[inline]
    fn cmd_dispatch(&mut self, group_cnt: glam::UVec3) {
        unsafe { self.device.cmd_dispatch(self.vk_handle, group_cnt.x, group_cnt.y, group_cnt.z) }
    }

    fn buffer_memory_barrier(&mut self, barriers: &[GfxBufferBarrier]) {
        let barriers = barriers.iter().map(|b| *b.inner()).collect_vec();
        let dependency_info = vk::DependencyInfo::default().buffer_memory_barriers(&barriers);
        unsafe {
            self.device.cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
        }
    }

    fn image_memory_barrier(&mut self, barriers: &[GfxImageBarrier]) {
        let barriers = barriers.iter().map(|b| *b.inner()).collect_vec();
        let dependency_info = vk::DependencyInfo::default().image_memory_barriers(&barriers);
        unsafe {
            self.device.cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
        }
    }

    fn begin_label(&mut self, label_name: &str, label_color: glam::Vec4) {
        let Some(debug_utils) = self.debug_utils else {
            return;
        };
        let name = std::ffi::CString::new(label_name).unwrap_or_default();
        unsafe {
            debug_utils.cmd_begin_debug_utils_label(
                self.vk_handle,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(label_color.to_array()),
            );
        }
    }

    fn end_label(&mut self) {
        if let Some(debug_utils) = self.debug_utils {
            unsafe {
                debug_utils.cmd_end_debug_utils_label(self.vk_handle);
            }
        }
    }
}
