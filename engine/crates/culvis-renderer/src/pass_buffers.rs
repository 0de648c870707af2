use ash::vk;
use culvis_gfx::{
    GfxResult,
    commands::{barrier::GfxBufferBarrier, encoder::GfxCommandEncoder, state::GfxBufferState},
    device::GfxDevice,
    resources::buffer::GfxBufferDesc,
};
use culvis_scene::{MeshPassType, RenderScene, mesh_pass::MeshPass};
use itertools::Itertools;

use crate::{
    frame::DeletionQueue,
    gpu_types::{GpuDrawIndexedCommand, GpuIndirectObject, GpuInstance, GpuMultibatchEntry},
    growable_buffer::GrowableBuffer,
    settings::GrowthPolicy,
};

/// 剔除 shader 读写的 buffer 的状态
const CULL_WRITE: GfxBufferState = GfxBufferState::COMPUTE_READ_WRITE;

/// clear_indirect 只被 record_reset 中的 copy 读取
const TEMPLATE_COPY_READ: GfxBufferState = GfxBufferState::TRANSFER_READ;

/// 一个 pass 的 GPU 端 buffer
///
/// - clear_indirect: instance_count 全为 0 的 indirect 模板，每帧拷贝到 draw_indirect
/// - draw_indirect: 剔除之后的 indirect 参数，每个 IndirectBatch 一项
/// - draw_count: 每个 Multibatch 一个 u32，indirect count 的来源
/// - instances: 每个 RenderBatch 一项 [`GpuInstance`]
/// - compacted: 可见物体的 object id，顶点着色器通过 gl_InstanceIndex 读取
/// - multibatch_table: 每个 IndirectBatch 一项 [`GpuMultibatchEntry`]
#[derive(Debug)]
pub struct PassGpuBuffers {
    pass_type: MeshPassType,

    clear_indirect: GrowableBuffer,
    draw_indirect: GrowableBuffer,
    draw_count: GrowableBuffer,
    instances: GrowableBuffer,
    compacted: GrowableBuffer,
    multibatch_table: GrowableBuffer,

    batch_count: u32,
    indirect_count: u32,
    multibatch_count: u32,
}

/// 模板在 CPU 端的内容
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PassTemplates {
    pub indirect: Vec<GpuIndirectObject>,
    pub instances: Vec<GpuInstance>,
    pub multibatch_table: Vec<GpuMultibatchEntry>,
}

// new & init
impl PassGpuBuffers {
    pub fn new(pass_type: MeshPassType) -> Self {
        let name = |kind: &str| format!("{}-{}", pass_type.name(), kind);
        Self {
            pass_type,
            clear_indirect: GrowableBuffer::storage(name("clear-indirect"), size_of::<GpuIndirectObject>()),
            draw_indirect: GrowableBuffer::indirect(name("draw-indirect"), size_of::<GpuIndirectObject>()),
            draw_count: GrowableBuffer::indirect(name("draw-count"), size_of::<u32>()),
            instances: GrowableBuffer::storage(name("instances"), size_of::<GpuInstance>()),
            compacted: GrowableBuffer::storage(name("compacted-instances"), size_of::<u32>()),
            multibatch_table: GrowableBuffer::storage(name("multibatch-table"), size_of::<GpuMultibatchEntry>()),
            batch_count: 0,
            indirect_count: 0,
            multibatch_count: 0,
        }
    }
}

// getter
impl PassGpuBuffers {
    #[inline]
    pub fn pass_type(&self) -> MeshPassType {
        self.pass_type
    }

    /// 剔除 shader 的线程数
    #[inline]
    pub fn batch_count(&self) -> u32 {
        self.batch_count
    }

    #[inline]
    pub fn indirect_count(&self) -> u32 {
        self.indirect_count
    }

    #[inline]
    pub fn multibatch_count(&self) -> u32 {
        self.multibatch_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.batch_count == 0
    }

    #[inline]
    pub fn draw_indirect(&self) -> vk::Buffer {
        self.draw_indirect.vk_buffer()
    }

    #[inline]
    pub fn draw_count(&self) -> vk::Buffer {
        self.draw_count.vk_buffer()
    }

    #[inline]
    pub fn instances(&self) -> vk::Buffer {
        self.instances.vk_buffer()
    }

    #[inline]
    pub fn compacted(&self) -> vk::Buffer {
        self.compacted.vk_buffer()
    }

    #[inline]
    pub fn multibatch_table(&self) -> vk::Buffer {
        self.multibatch_table.vk_buffer()
    }

    #[inline]
    pub fn clear_indirect(&self) -> vk::Buffer {
        self.clear_indirect.vk_buffer()
    }
}

// tools
impl PassGpuBuffers {
    /// 根据 pass 的 batch 数据生成三份模板，每份一个 rayon 任务
    pub fn build_templates(scene: &RenderScene, pass: &MeshPass) -> PassTemplates {
        let mut templates = PassTemplates::default();
        let PassTemplates {
            indirect,
            instances,
            multibatch_table,
        } = &mut templates;

        rayon::scope(|s| {
            s.spawn(|_| {
                *indirect = pass
                    .indirect_batches()
                    .iter()
                    .enumerate()
                    .map(|(batch_id, batch)| {
                        let mesh = scene.mesh(batch.mesh);
                        GpuIndirectObject {
                            command: GpuDrawIndexedCommand {
                                index_count: mesh.index_count,
                                instance_count: 0,
                                first_index: mesh.first_index,
                                vertex_offset: mesh.first_vertex as i32,
                                first_instance: batch.first,
                            },
                            object_id: batch.first,
                            batch_id: batch_id as u32,
                        }
                    })
                    .collect();
            });
            s.spawn(|_| {
                *instances = pass
                    .indirect_batches()
                    .iter()
                    .enumerate()
                    .flat_map(|(batch_id, batch)| {
                        let range = batch.first as usize..(batch.first + batch.count) as usize;
                        pass.batches()[range].iter().map(move |render_batch| (batch_id, render_batch))
                    })
                    .map(|(batch_id, render_batch)| {
                        let pass_object = pass
                            .pass_object(render_batch.object)
                            .unwrap_or_else(|| panic!("{} pass: dead slot {:?}", pass.pass_type(), render_batch.object));
                        GpuInstance {
                            object_id: pass_object.original.index(),
                            batch_id: batch_id as u32,
                        }
                    })
                    .collect();
            });
            s.spawn(|_| {
                let mut table = vec![GpuMultibatchEntry::default(); pass.indirect_batches().len()];
                for (multibatch_id, multibatch) in pass.multibatches().iter().enumerate() {
                    let first = multibatch.first as usize;
                    for idx in first..first + multibatch.count as usize {
                        let merged = scene.mesh(pass.indirect_batches()[idx].mesh).is_merged;
                        table[idx] = GpuMultibatchEntry {
                            multibatch_id: if merged { multibatch_id as u32 } else { GpuMultibatchEntry::UNCULLED },
                            first_batch: multibatch.first,
                        };
                    }
                }
                *multibatch_table = table;
            });
        });

        templates
    }

    /// pass 的 batch 布局变化之后重新上传模板，没有变化时什么都不做
    ///
    /// 返回是否上传
    pub fn refresh_templates(
        &mut self,
        device: &dyn GfxDevice,
        encoder: &mut dyn GfxCommandEncoder,
        scene: &mut RenderScene,
        growth: GrowthPolicy,
        retired: &mut DeletionQueue,
    ) -> GfxResult<bool> {
        let pass = scene.pass(self.pass_type);
        if !pass.needs_indirect_refresh() && !pass.needs_instance_refresh() {
            return Ok(false);
        }
        culvis_crate_tools::profile_span!("PassGpuBuffers::refresh_templates");

        let templates = Self::build_templates(scene, pass);
        self.batch_count = pass.batches().len() as u32;
        self.indirect_count = pass.indirect_batches().len() as u32;
        self.multibatch_count = pass.multibatches().len() as u32;

        let indirect_count = self.indirect_count as u64;
        let batch_count = self.batch_count as u64;
        self.clear_indirect.ensure_capacity(device, indirect_count, growth, retired)?;
        self.draw_indirect.ensure_capacity(device, indirect_count, growth, retired)?;
        self.multibatch_table.ensure_capacity(device, indirect_count, growth, retired)?;
        self.draw_count.ensure_capacity(device, self.multibatch_count as u64, growth, retired)?;
        self.instances.ensure_capacity(device, batch_count, growth, retired)?;
        self.compacted.ensure_capacity(device, batch_count, growth, retired)?;

        if batch_count > 0 {
            // 第三项是模板的消费者：clear_indirect 由 record_reset 的 copy 读取，其余由剔除 shader 读取
            let uploads = [
                (
                    self.clear_indirect.vk_buffer(),
                    bytemuck::cast_slice::<GpuIndirectObject, u8>(&templates.indirect),
                    TEMPLATE_COPY_READ,
                ),
                (self.instances.vk_buffer(), bytemuck::cast_slice(&templates.instances), GfxBufferState::COMPUTE_READ),
                (
                    self.multibatch_table.vk_buffer(),
                    bytemuck::cast_slice(&templates.multibatch_table),
                    GfxBufferState::COMPUTE_READ,
                ),
            ];
            let total: usize = uploads.iter().map(|(_, bytes, _)| bytes.len()).sum();
            let staging = device.create_buffer(&GfxBufferDesc::staging(
                total as vk::DeviceSize,
                format!("{}-template-staging", self.pass_type.name()),
            ))?;

            let barriers = uploads
                .iter()
                .map(|(dst, _, consumer)| consumer.barrier_to(GfxBufferState::TRANSFER_WRITE, *dst))
                .collect_vec();
            encoder.buffer_memory_barrier(&barriers);

            let mut offset = 0;
            for (dst, bytes, _) in uploads.iter() {
                device.write_buffer(&staging, offset, bytes)?;
                encoder.cmd_copy_buffer(
                    staging.vk_buffer(),
                    *dst,
                    &[vk::BufferCopy {
                        src_offset: offset,
                        dst_offset: 0,
                        size: bytes.len() as vk::DeviceSize,
                    }],
                );
                offset += bytes.len() as vk::DeviceSize;
            }

            let barriers = uploads
                .iter()
                .map(|(dst, _, consumer)| GfxBufferState::TRANSFER_WRITE.barrier_to(*consumer, *dst))
                .collect_vec();
            encoder.buffer_memory_barrier(&barriers);
            retired.retire_buffer(staging);
        }

        log::debug!(
            "{} pass templates uploaded: {} batches, {} indirect, {} multibatches",
            self.pass_type,
            self.batch_count,
            self.indirect_count,
            self.multibatch_count
        );
        scene.pass_mut(self.pass_type).mark_gpu_synced();
        Ok(true)
    }

    /// 每帧剔除之前把 indirect 参数和 draw count 清零
    pub fn record_reset(&self, encoder: &mut dyn GfxCommandEncoder) {
        if self.is_empty() {
            return;
        }

        let draw_indirect = self.draw_indirect.vk_buffer();
        let draw_count = self.draw_count.vk_buffer();
        let indirect_bytes = self.indirect_count as vk::DeviceSize * GpuIndirectObject::STRIDE as vk::DeviceSize;
        let count_bytes = self.multibatch_count as vk::DeviceSize * size_of::<u32>() as vk::DeviceSize;

        // 上一帧的 indirect draw 可能还在读取
        encoder.buffer_memory_barrier(&[
            GfxBufferState::INDIRECT_READ.barrier_to(GfxBufferState::TRANSFER_WRITE, draw_indirect),
            GfxBufferState::INDIRECT_READ.barrier_to(GfxBufferState::TRANSFER_WRITE, draw_count),
        ]);
        encoder.cmd_copy_buffer(
            self.clear_indirect.vk_buffer(),
            draw_indirect,
            &[vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: indirect_bytes,
            }],
        );
        encoder.cmd_fill_buffer(draw_count, 0, count_bytes, 0);
        encoder.buffer_memory_barrier(&[
            GfxBufferState::TRANSFER_WRITE.barrier_to(CULL_WRITE, draw_indirect),
            GfxBufferState::TRANSFER_WRITE.barrier_to(CULL_WRITE, draw_count),
        ]);
    }

    /// 剔除之后：indirect 参数给 DRAW_INDIRECT，compacted instance 给顶点着色器
    pub fn cull_output_barriers(&self) -> [GfxBufferBarrier; 3] {
        [
            CULL_WRITE.barrier_to(GfxBufferState::INDIRECT_READ, self.draw_indirect.vk_buffer()),
            CULL_WRITE.barrier_to(GfxBufferState::INDIRECT_READ, self.draw_count.vk_buffer()),
            GfxBufferState::COMPUTE_WRITE.barrier_to(GfxBufferState::VERTEX_SHADER_READ, self.compacted.vk_buffer()),
        ]
    }

    pub fn destroy(&mut self, device: &dyn GfxDevice) {
        for buffer in [
            &mut self.clear_indirect,
            &mut self.draw_indirect,
            &mut self.draw_count,
            &mut self.instances,
            &mut self.compacted,
            &mut self.multibatch_table,
        ] {
            buffer.destroy(device);
        }
        self.batch_count = 0;
        self.indirect_count = 0;
        self.multibatch_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ash::vk::Handle as _;
    use culvis_scene::{
        MeshPassFlags, PerPassData,
        material::{EffectTemplate, MaterialInstance, ShaderPass},
        mesh::{GpuMesh, RenderBounds},
    };

    use super::*;

    fn mesh(raw: u64) -> Arc<GpuMesh> {
        Arc::new(GpuMesh {
            name: format!("mesh-{}", raw),
            vertex_buffer: vk::Buffer::from_raw(raw),
            index_buffer: vk::Buffer::from_raw(raw + 1),
            vertex_count: 8,
            index_count: 36,
            vertex_stride: 32,
            bounds: RenderBounds::from_aabb(glam::Vec3::splat(-1.0), glam::Vec3::splat(1.0)),
        })
    }

    fn material(raw: u64) -> Arc<MaterialInstance> {
        let shader = ShaderPass {
            pipeline: vk::Pipeline::from_raw(raw),
            layout: vk::PipelineLayout::from_raw(raw + 1),
        };
        let template = Arc::new(EffectTemplate {
            name: format!("effect-{}", raw),
            pass_shaders: PerPassData::from_fn(|_| Some(shader)),
        });
        Arc::new(MaterialInstance {
            name: format!("material-{}", raw),
            template,
            pass_sets: PerPassData::from_fn(|_| vk::DescriptorSet::from_raw(raw + 2)),
        })
    }

    #[test]
    fn test_templates_follow_batches() {
        let mut scene = RenderScene::new();
        let (m1, m2, a) = (mesh(10), mesh(20), material(100));
        for mesh in [&m1, &m2, &m1] {
            scene.register_object(mesh.clone(), a.clone(), glam::Mat4::IDENTITY, MeshPassFlags::FORWARD);
        }
        scene.merge_meshes();
        scene.refresh_pass(MeshPassType::Forward);

        let pass = scene.pass(MeshPassType::Forward);
        let templates = PassGpuBuffers::build_templates(&scene, pass);

        assert_eq!(templates.indirect.len(), 2);
        assert_eq!(templates.instances.len(), 3);
        for (batch_id, (indirect, batch)) in templates.indirect.iter().zip(pass.indirect_batches()).enumerate() {
            assert_eq!(indirect.command.instance_count, 0);
            assert_eq!(indirect.command.first_instance, batch.first);
            assert_eq!(indirect.batch_id, batch_id as u32);
            let mesh = scene.mesh(batch.mesh);
            assert_eq!(indirect.command.first_index, mesh.first_index);
            assert_eq!(indirect.command.vertex_offset, mesh.first_vertex as i32);
        }
        // 同一个材质的 merged mesh 合并成一个 multibatch
        assert!(templates.multibatch_table.iter().all(|entry| entry.multibatch_id == 0 && entry.first_batch == 0));
        let mut object_ids = templates.instances.iter().map(|instance| instance.object_id).collect_vec();
        object_ids.sort();
        assert_eq!(object_ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_unmerged_meshes_are_unculled() {
        let mut scene = RenderScene::new();
        scene.register_object(mesh(10), material(100), glam::Mat4::IDENTITY, MeshPassFlags::FORWARD);
        scene.refresh_pass(MeshPassType::Forward);

        let templates = PassGpuBuffers::build_templates(&scene, scene.pass(MeshPassType::Forward));
        assert_eq!(templates.multibatch_table[0].multibatch_id, GpuMultibatchEntry::UNCULLED);
    }
}
