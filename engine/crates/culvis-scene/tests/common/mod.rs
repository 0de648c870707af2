#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use ash::vk::{self, Handle as _};
use culvis_scene::{
    MeshPassFlags, MeshPassType, PerPassData, RenderScene,
    material::{MaterialInstance, ShaderPass},
    mesh::{GpuMesh, RenderBounds},
};

static NEXT_RAW: AtomicU64 = AtomicU64::new(1000);

fn next_raw() -> u64 {
    NEXT_RAW.fetch_add(1, Ordering::Relaxed)
}

pub fn mesh(name: &str, vertex_count: u32, index_count: u32) -> Arc<GpuMesh> {
    mesh_with_stride(name, vertex_count, index_count, 32)
}

pub fn mesh_with_stride(name: &str, vertex_count: u32, index_count: u32, vertex_stride: u32) -> Arc<GpuMesh> {
    Arc::new(GpuMesh {
        name: name.to_string(),
        vertex_buffer: vk::Buffer::from_raw(next_raw()),
        index_buffer: vk::Buffer::from_raw(next_raw()),
        vertex_count,
        index_count,
        vertex_stride,
        bounds: RenderBounds::from_aabb(glam::Vec3::splat(-1.0), glam::Vec3::splat(1.0)),
    })
}

/// 在 `passes` 中拥有 shader 的材质，每个材质使用独立的 pipeline 和 set
pub fn material(name: &str, passes: MeshPassFlags) -> Arc<MaterialInstance> {
    let pipeline = vk::Pipeline::from_raw(next_raw());
    let layout = vk::PipelineLayout::from_raw(next_raw());
    let template = Arc::new(culvis_scene::material::EffectTemplate {
        name: format!("{}-template", name),
        pass_shaders: PerPassData::from_fn(|pass| {
            passes.contains(pass.flag()).then_some(ShaderPass { pipeline, layout })
        }),
    });
    Arc::new(MaterialInstance {
        name: name.to_string(),
        template,
        pass_sets: PerPassData::from_fn(|_| vk::DescriptorSet::from_raw(next_raw())),
    })
}

pub fn translation(x: f32) -> glam::Mat4 {
    glam::Mat4::from_translation(glam::Vec3::new(x, 0.0, 0.0))
}

/// 检查 pass 的所有结构性约束
pub fn check_pass_invariants(scene: &RenderScene, pass_type: MeshPassType) {
    let pass = scene.pass(pass_type);

    // RenderBatch 按 (key, handle) 单调不减
    for pair in pass.batches().windows(2) {
        assert!(pair[0] <= pair[1], "batches out of order: {:?}", pair);
    }

    // 每个存活物体恰好被一个 slot 引用
    let mut referenced = 0;
    for object in scene.objects() {
        if let Some(slot) = scene.pass_slot(object.handle(), pass_type) {
            referenced += 1;
            let pass_object = pass.pass_object(slot).expect("slot of a live object must be live");
            assert_eq!(pass_object.original, object.handle());
            assert_eq!(pass.batches().iter().filter(|b| b.object == slot).count(), 1);
        }
    }
    assert_eq!(referenced, pass.batches().len());

    // IndirectBatch 恰好是 (mesh, material) 的最大连续段
    let mut expected_runs: Vec<(u32, u32)> = Vec::new();
    let mut prev_key = None;
    for (idx, batch) in pass.batches().iter().enumerate() {
        let pass_object = pass.pass_object(batch.object).unwrap();
        let key = (pass_object.mesh, pass_object.material);
        if prev_key == Some(key) {
            expected_runs.last_mut().unwrap().1 += 1;
        } else {
            expected_runs.push((idx as u32, 1));
        }
        prev_key = Some(key);
    }
    let runs = pass.indirect_batches().iter().map(|b| (b.first, b.count)).collect::<Vec<_>>();
    assert_eq!(runs, expected_runs);

    // Multibatch：相邻两个 IndirectBatch 合并当且仅当 mesh 都已合并且材质相同
    let indirect = pass.indirect_batches();
    let mut covered = 0;
    for multibatch in pass.multibatches() {
        assert_eq!(multibatch.first, covered);
        let range = multibatch.first as usize..(multibatch.first + multibatch.count) as usize;
        for pair in indirect[range.clone()].windows(2) {
            assert!(scene.mesh(pair[0].mesh).is_merged && scene.mesh(pair[1].mesh).is_merged);
            assert_eq!(pair[0].material, pair[1].material);
        }
        if range.end < indirect.len() {
            let (last, next) = (&indirect[range.end - 1], &indirect[range.end]);
            let joinable =
                scene.mesh(last.mesh).is_merged && scene.mesh(next.mesh).is_merged && last.material == next.material;
            assert!(!joinable, "multibatch boundary between joinable batches");
        }
        covered += multibatch.count;
    }
    assert_eq!(covered as usize, indirect.len());
}
