use ash::vk;
use culvis_gfx::{
    GfxResult,
    commands::{encoder::GfxCommandEncoder, state::GfxBufferState},
    descriptors::GfxDescriptorWrite,
    device::GfxDevice,
    resources::buffer::GfxBufferDesc,
};
use culvis_scene::{RenderScene, gpu_object::GpuObjectData};
use itertools::Itertools;

use crate::{
    frame::FrameResources, growable_buffer::GrowableBuffer, pipelines::ComputePipeline, settings::UploadPolicy,
};

/// object buffer 的消费者：剔除 shader 读写，顶点着色器读取
const OBJECT_CONSUMERS: GfxBufferState = GfxBufferState::new(
    vk::PipelineStageFlags2::from_raw(
        vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw() | vk::PipelineStageFlags2::VERTEX_SHADER.as_raw(),
    ),
    vk::AccessFlags2::from_raw(
        vk::AccessFlags2::SHADER_STORAGE_READ.as_raw() | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
    ),
);

const SPARSE_UPLOAD_GROUP_SIZE: u32 = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadPath {
    /// 没有脏物体
    None,
    /// 所有物体整体拷贝
    Full,
    /// 只写入变化的 word，由 `sparse_upload.comp` 分散写入
    Sparse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadReport {
    pub path: UploadPath,
    /// 写入的物体数量
    pub objects: usize,
    /// 写入的 u32 数量
    pub words: usize,
}

/// 保持 GPU object buffer 和注册表同步
///
/// object buffer 的下标就是 `Handle<SceneObject>` 的下标
pub struct ObjectBufferSync {
    objects: GrowableBuffer,
}

impl Default for ObjectBufferSync {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl ObjectBufferSync {
    pub fn new() -> Self {
        Self {
            objects: GrowableBuffer::storage("object-buffer", size_of::<GpuObjectData>()),
        }
    }
}

// getter
impl ObjectBufferSync {
    #[inline]
    pub fn buffer(&self) -> &GrowableBuffer {
        &self.objects
    }
}

// tools
impl ObjectBufferSync {
    /// 上传脏物体，之后清空脏列表并记录 barrier
    pub fn upload(
        &mut self,
        device: &dyn GfxDevice,
        encoder: &mut dyn GfxCommandEncoder,
        scene: &mut RenderScene,
        policy: &UploadPolicy,
        frame: &mut FrameResources,
        sparse_pipeline: &ComputePipeline,
    ) -> GfxResult<UploadReport> {
        culvis_crate_tools::profile_span!("ObjectBufferSync::upload");

        let object_count = scene.object_count();
        let dirty_count = scene.dirty_objects().len();
        if dirty_count == 0 {
            return Ok(UploadReport {
                path: UploadPath::None,
                objects: 0,
                words: 0,
            });
        }

        let capacity_short = self.objects.capacity() < object_count as u64;
        let report = if capacity_short || policy.prefers_full_upload(dirty_count, object_count) {
            self.upload_full(device, encoder, scene, policy, frame)?
        } else {
            self.upload_sparse(device, encoder, scene, frame, sparse_pipeline)?
        };

        scene.clear_dirty_objects();
        log::debug!("object upload: {:?}", report);
        Ok(report)
    }

    fn upload_full(
        &mut self,
        device: &dyn GfxDevice,
        encoder: &mut dyn GfxCommandEncoder,
        scene: &RenderScene,
        policy: &UploadPolicy,
        frame: &mut FrameResources,
    ) -> GfxResult<UploadReport> {
        let object_count = scene.object_count();
        self.objects.ensure_capacity(device, object_count as u64, policy.growth, frame.deletion_queue())?;

        let data = scene.objects().iter().map(|object| scene.build_object_data(object.handle())).collect_vec();
        let bytes: &[u8] = bytemuck::cast_slice(&data);

        let staging = device.create_buffer(&GfxBufferDesc::staging(bytes.len() as vk::DeviceSize, "object-staging"))?;
        device.write_buffer(&staging, 0, bytes)?;

        let dst = self.objects.vk_buffer();
        encoder.buffer_memory_barrier(&[OBJECT_CONSUMERS.barrier_to(GfxBufferState::TRANSFER_WRITE, dst)]);
        encoder.cmd_copy_buffer(
            staging.vk_buffer(),
            dst,
            &[vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: bytes.len() as vk::DeviceSize,
            }],
        );
        encoder.buffer_memory_barrier(&[GfxBufferState::TRANSFER_WRITE.barrier_to(OBJECT_CONSUMERS, dst)]);
        frame.deletion_queue().retire_buffer(staging);

        Ok(UploadReport {
            path: UploadPath::Full,
            objects: object_count,
            words: bytes.len() / size_of::<u32>(),
        })
    }

    fn upload_sparse(
        &mut self,
        device: &dyn GfxDevice,
        encoder: &mut dyn GfxCommandEncoder,
        scene: &RenderScene,
        frame: &mut FrameResources,
        pipeline: &ComputePipeline,
    ) -> GfxResult<UploadReport> {
        let dirty = scene.dirty_objects();
        let word_count = dirty.len() * GpuObjectData::WORDS;

        let mut words: Vec<u32> = Vec::with_capacity(word_count);
        let mut targets: Vec<u32> = Vec::with_capacity(word_count);
        for &handle in dirty {
            let data = scene.build_object_data(handle);
            let base = handle.index() * GpuObjectData::WORDS as u32;
            words.extend_from_slice(bytemuck::cast_slice(std::slice::from_ref(&data)));
            targets.extend(base..base + GpuObjectData::WORDS as u32);
        }

        let byte_size = (word_count * size_of::<u32>()) as vk::DeviceSize;
        let word_staging = device.create_buffer(&GfxBufferDesc::staging(byte_size, "object-sparse-words"))?;
        let target_staging = device.create_buffer(&GfxBufferDesc::staging(byte_size, "object-sparse-targets"))?;
        device.write_buffer(&word_staging, 0, bytemuck::cast_slice(&words))?;
        device.write_buffer(&target_staging, 0, bytemuck::cast_slice(&targets))?;

        let dst = self.objects.vk_buffer();
        let set = device.build_descriptor_set(
            frame.label().index(),
            pipeline.set_layout,
            &[
                GfxDescriptorWrite::storage(0, word_staging.vk_buffer()),
                GfxDescriptorWrite::storage(1, target_staging.vk_buffer()),
                GfxDescriptorWrite::storage(2, dst),
            ],
        )?;

        encoder.buffer_memory_barrier(&[OBJECT_CONSUMERS.barrier_to(GfxBufferState::COMPUTE_WRITE, dst)]);
        encoder.cmd_bind_pipeline(vk::PipelineBindPoint::COMPUTE, pipeline.pipeline);
        encoder.cmd_bind_descriptor_sets(vk::PipelineBindPoint::COMPUTE, pipeline.layout, 0, &[set]);
        encoder.cmd_push_constants(
            pipeline.layout,
            vk::ShaderStageFlags::COMPUTE,
            0,
            bytemuck::bytes_of(&(word_count as u32)),
        );
        encoder.cmd_dispatch(glam::UVec3::new((word_count as u32).div_ceil(SPARSE_UPLOAD_GROUP_SIZE), 1, 1));
        encoder.buffer_memory_barrier(&[GfxBufferState::COMPUTE_WRITE.barrier_to(OBJECT_CONSUMERS, dst)]);

        frame.deletion_queue().retire_buffer(word_staging);
        frame.deletion_queue().retire_buffer(target_staging);

        Ok(UploadReport {
            path: UploadPath::Sparse,
            objects: dirty.len(),
            words: word_count,
        })
    }

    pub fn destroy(&mut self, device: &dyn GfxDevice) {
        self.objects.destroy(device);
    }
}
