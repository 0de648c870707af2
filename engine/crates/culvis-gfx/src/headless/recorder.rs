use ash::vk;

use crate::commands::{
    barrier::{GfxBarrierMask, GfxBufferBarrier, GfxImageBarrier},
    encoder::GfxCommandEncoder,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordedBufferBarrier {
    pub buffer: vk::Buffer,
    pub mask: GfxBarrierMask,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordedImageBarrier {
    pub image: vk::Image,
    pub mask: GfxBarrierMask,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub base_mip: u32,
    pub mip_count: u32,
}

/// 被记录下来的一条命令
#[derive(Clone, Debug, PartialEq)]
pub enum GfxCommand {
    /// regions: (src_offset, dst_offset, size)
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<(vk::DeviceSize, vk::DeviceSize, vk::DeviceSize)>,
    },
    FillBuffer {
        dst: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    },
    PushConstants {
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindDescriptorSets {
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<vk::Buffer>,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    DrawIndexedIndirectCount {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        count_buffer: vk::Buffer,
        count_offset: vk::DeviceSize,
        max_draw_count: u32,
        stride: u32,
    },
    Dispatch(glam::UVec3),
    BufferBarrier(Vec<RecordedBufferBarrier>),
    ImageBarrier(Vec<RecordedImageBarrier>),
    BeginLabel(String),
    EndLabel,
}

/// 把所有命令记录到 `Vec` 中的 encoder
#[derive(Default, Debug)]
pub struct RecordingEncoder {
    commands: Vec<GfxCommand>,
}

// new & init
impl RecordingEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

// getter
impl RecordingEncoder {
    #[inline]
    pub fn commands(&self) -> &[GfxCommand] {
        &self.commands
    }

    /// 取出已经记录的命令，encoder 变为空
    #[inline]
    pub fn take_commands(&mut self) -> Vec<GfxCommand> {
        std::mem::take(&mut self.commands)
    }

    /// 满足条件的命令数量
    pub fn count(&self, pred: impl Fn(&GfxCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| pred(c)).count()
    }

    /// 第一条满足条件的命令的位置
    pub fn position(&self, pred: impl Fn(&GfxCommand) -> bool) -> Option<usize> {
        self.commands.iter().position(pred)
    }
}

impl GfxCommandEncoder for RecordingEncoder {
    fn cmd_copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.commands.push(GfxCommand::CopyBuffer {
            src,
            dst,
            regions: regions.iter().map(|r| (r.src_offset, r.dst_offset, r.size)).collect(),
        });
    }

    fn cmd_fill_buffer(&mut self, dst: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize, data: u32) {
        self.commands.push(GfxCommand::FillBuffer {
            dst,
            offset,
            size,
            data,
        });
    }

    fn cmd_push_constants(
        &mut self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.commands.push(GfxCommand::PushConstants {
            layout,
            stages,
            offset,
            data: data.to_vec(),
        });
    }

    fn cmd_bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.commands.push(GfxCommand::BindPipeline { bind_point, pipeline });
    }

    fn cmd_bind_descriptor_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.commands.push(GfxCommand::BindDescriptorSets {
            bind_point,
            layout,
            first_set,
            sets: sets.to_vec(),
        });
    }

    fn cmd_bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], _offsets: &[vk::DeviceSize]) {
        self.commands.push(GfxCommand::BindVertexBuffers {
            first_binding,
            buffers: buffers.to_vec(),
        });
    }

    fn cmd_bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        self.commands.push(GfxCommand::BindIndexBuffer {
            buffer,
            offset,
            index_type,
        });
    }

    fn cmd_draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.commands.push(GfxCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
    }

    fn cmd_draw_indexed_indirect_count(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        count_buffer: vk::Buffer,
        count_offset: vk::DeviceSize,
        max_draw_count: u32,
        stride: u32,
    ) {
        self.commands.push(GfxCommand::DrawIndexedIndirectCount {
            buffer,
            offset,
            count_buffer,
            count_offset,
            max_draw_count,
            stride,
        });
    }

    fn cmd_dispatch(&mut self, group_cnt: glam::UVec3) {
        self.commands.push(GfxCommand::Dispatch(group_cnt));
    }

    fn buffer_memory_barrier(&mut self, barriers: &[GfxBufferBarrier]) {
        self.commands.push(GfxCommand::BufferBarrier(
            barriers
                .iter()
                .map(|b| RecordedBufferBarrier {
                    buffer: b.vk_buffer(),
                    mask: b.mask(),
                })
                .collect(),
        ));
    }

    fn image_memory_barrier(&mut self, barriers: &[GfxImageBarrier]) {
        self.commands.push(GfxCommand::ImageBarrier(
            barriers
                .iter()
                .map(|b| {
                    let (old_layout, new_layout) = b.layouts();
                    let range = b.subresource_range();
                    RecordedImageBarrier {
                        image: b.vk_image(),
                        mask: b.mask(),
                        old_layout,
                        new_layout,
                        base_mip: range.base_mip_level,
                        mip_count: range.level_count,
                    }
                })
                .collect(),
        ));
    }

    fn begin_label(&mut self, label_name: &str, _label_color: glam::Vec4) {
        self.commands.push(GfxCommand::BeginLabel(label_name.to_string()));
    }

    fn end_label(&mut self) {
        self.commands.push(GfxCommand::EndLabel);
    }
}
