use std::hash::{DefaultHasher, Hash, Hasher};

use ash::vk;

use crate::{handle::Handle, material::ShaderPass, mesh::DrawMesh, scene_object::SceneObject};

/// 物体在某个 pass 中使用的材质：pipeline + 材质 descriptor set
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PassMaterial {
    pub shader_pass: ShaderPass,
    pub material_set: vk::DescriptorSet,
}

/// SceneObject 在某个 pass 中的投影
#[derive(Clone, Debug, PartialEq)]
pub struct PassObject {
    pub material: PassMaterial,
    pub mesh: Handle<DrawMesh>,
    pub original: Handle<SceneObject>,
    pub sort_key: u64,
}

/// 排序的基本单元
///
/// 字段顺序决定了排序：先按 sort key，相同时按 PassObject handle
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RenderBatch {
    pub sort_key: u64,
    pub object: Handle<PassObject>,
}

/// 共享 mesh 和材质的一段连续 RenderBatch，对应一条 indirect draw
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndirectBatch {
    pub mesh: Handle<DrawMesh>,
    pub material: PassMaterial,
    pub first: u32,
    pub count: u32,
}

/// 一段连续的 IndirectBatch，可以用一次 draw-indirect-count 提交
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Multibatch {
    pub first: u32,
    pub count: u32,
}

fn hash_of(value: impl Hash) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// 低 32 位：pipeline 和材质 set 的哈希与 mesh 序号异或；高 32 位：mesh 序号
///
/// 相同 (pipeline, set, mesh) 的物体 key 相同，排序后相邻
pub fn sort_key(material: &PassMaterial, mesh: Handle<DrawMesh>) -> u64 {
    let material_hash = (hash_of(material.shader_pass.pipeline) ^ hash_of(material.material_set)) as u32;
    let mesh_index = mesh.index();
    ((mesh_index as u64) << 32) | (material_hash ^ mesh_index) as u64
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle as _;

    use super::*;

    fn material(pipeline: u64, set: u64) -> PassMaterial {
        PassMaterial {
            shader_pass: ShaderPass {
                pipeline: vk::Pipeline::from_raw(pipeline),
                layout: vk::PipelineLayout::from_raw(1),
            },
            material_set: vk::DescriptorSet::from_raw(set),
        }
    }

    #[test]
    fn test_sort_key_is_deterministic() {
        let mesh = Handle::<DrawMesh>::new(5);
        assert_eq!(sort_key(&material(10, 20), mesh), sort_key(&material(10, 20), mesh));
        assert_ne!(sort_key(&material(10, 20), mesh), sort_key(&material(10, 21), mesh));
        assert_eq!(sort_key(&material(10, 20), mesh) >> 32, 5);
    }

    #[test]
    fn test_render_batch_ties_break_by_handle() {
        let a = RenderBatch {
            sort_key: 7,
            object: Handle::new(3),
        };
        let b = RenderBatch {
            sort_key: 7,
            object: Handle::new(1),
        };
        let c = RenderBatch {
            sort_key: 2,
            object: Handle::new(9),
        };
        let mut batches = vec![a, b, c];
        batches.sort();
        assert_eq!(batches, vec![c, b, a]);
    }
}
