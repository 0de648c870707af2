mod common;

use common::{check_pass_invariants, material, mesh, translation};
use culvis_scene::{MeshPassFlags, MeshPassType, RenderScene};
use rand::{Rng, SeedableRng, rngs::StdRng};

#[test]
fn test_two_materials_two_meshes_make_two_batches() {
    let mut scene = RenderScene::new();
    let (m1, m2) = (mesh("m1", 8, 36), mesh("m2", 24, 36));
    let (a, b) = (material("a", MeshPassFlags::FORWARD), material("b", MeshPassFlags::FORWARD));

    scene.register_object(m1.clone(), a.clone(), translation(0.0), MeshPassFlags::FORWARD);
    scene.register_object(m1.clone(), a.clone(), translation(1.0), MeshPassFlags::FORWARD);
    scene.register_object(m2.clone(), b.clone(), translation(2.0), MeshPassFlags::FORWARD);
    scene.merge_meshes();

    let stats = scene.refresh_pass(MeshPassType::Forward);
    let pass = scene.pass(MeshPassType::Forward);

    assert_eq!(stats.inserted, 3);
    let mut counts = pass.indirect_batches().iter().map(|b| b.count).collect::<Vec<_>>();
    counts.sort();
    assert_eq!(counts, vec![1, 2]);
    // 两个 mesh 都已合并，但材质不同
    assert_eq!(pass.multibatches().len(), 2);
    check_pass_invariants(&scene, MeshPassType::Forward);
}

#[test]
fn test_same_material_merged_meshes_share_multibatch() {
    let mut scene = RenderScene::new();
    let a = material("a", MeshPassFlags::FORWARD);
    for (idx, m) in [mesh("m1", 8, 36), mesh("m2", 8, 36), mesh("m3", 8, 36)].into_iter().enumerate() {
        scene.register_object(m, a.clone(), translation(idx as f32), MeshPassFlags::FORWARD);
    }

    scene.refresh_pass(MeshPassType::Forward);
    assert_eq!(scene.pass(MeshPassType::Forward).indirect_batches().len(), 3);
    // 未合并的 mesh 各自成段
    assert_eq!(scene.pass(MeshPassType::Forward).multibatches().len(), 3);

    scene.merge_meshes();
    let stats = scene.refresh_pass(MeshPassType::Forward);
    assert_eq!(stats.inserted, 0);
    assert_eq!(scene.pass(MeshPassType::Forward).multibatches().len(), 1);
    check_pass_invariants(&scene, MeshPassType::Forward);
}

#[test]
fn test_update_of_unbatched_object_enqueues_no_deletion() {
    let mut scene = RenderScene::new();
    let object = scene.register_object(
        mesh("m", 3, 3),
        material("a", MeshPassFlags::FORWARD),
        translation(0.0),
        MeshPassFlags::FORWARD,
    );

    scene.update_object(object);
    scene.update_transform(object, translation(5.0));

    let pass = scene.pass(MeshPassType::Forward);
    assert!(pass.pending_deletions().is_empty());
    assert_eq!(pass.unbatched(), &[object]);

    let stats = scene.refresh_pass(MeshPassType::Forward);
    assert_eq!((stats.deleted, stats.inserted), (0, 1));
    check_pass_invariants(&scene, MeshPassType::Forward);
}

#[test]
fn test_update_reuses_freed_slot() {
    let mut scene = RenderScene::new();
    let a = material("a", MeshPassFlags::FORWARD);
    let m = mesh("m", 3, 3);
    let first = scene.register_object(m.clone(), a.clone(), translation(0.0), MeshPassFlags::FORWARD);
    scene.register_object(m, a, translation(1.0), MeshPassFlags::FORWARD);
    scene.refresh_pass(MeshPassType::Forward);
    let slot = scene.pass_slot(first, MeshPassType::Forward).unwrap();

    scene.update_transform(first, translation(3.0));
    assert_eq!(scene.pass_slot(first, MeshPassType::Forward), None);
    assert_eq!(scene.pass(MeshPassType::Forward).pending_deletions().len(), 1);

    let stats = scene.refresh_pass(MeshPassType::Forward);
    assert_eq!((stats.deleted, stats.inserted), (1, 1));
    assert_eq!(scene.pass_slot(first, MeshPassType::Forward), Some(slot));
    assert_eq!(scene.pass(MeshPassType::Forward).pass_object_capacity(), 2);
    check_pass_invariants(&scene, MeshPassType::Forward);
}

#[test]
fn test_refresh_without_work_is_identity() {
    let mut scene = RenderScene::new();
    let a = material("a", MeshPassFlags::FORWARD);
    for idx in 0..16 {
        scene.register_object(mesh("m", 3, 3), a.clone(), translation(idx as f32), MeshPassFlags::FORWARD);
    }
    scene.refresh_pass(MeshPassType::Forward);
    scene.pass_mut(MeshPassType::Forward).mark_gpu_synced();

    let before = scene.pass(MeshPassType::Forward).clone();
    let stats = scene.refresh_pass(MeshPassType::Forward);

    assert_eq!((stats.deleted, stats.inserted), (0, 0));
    assert_eq!(scene.pass(MeshPassType::Forward), &before);
    assert!(!scene.pass(MeshPassType::Forward).needs_indirect_refresh());
}

#[test]
fn test_pass_membership_requires_flag_and_shader() {
    let mut scene = RenderScene::new();
    let forward_only = material("a", MeshPassFlags::FORWARD);
    let everywhere = material("b", MeshPassFlags::all());

    let o1 = scene.register_object(mesh("m", 3, 3), forward_only, translation(0.0), MeshPassFlags::all());
    let o2 = scene.register_object(
        mesh("m", 3, 3),
        everywhere,
        translation(0.0),
        MeshPassFlags::FORWARD | MeshPassFlags::DIRECTIONAL_SHADOW,
    );
    scene.refresh_passes();

    assert!(scene.pass_slot(o1, MeshPassType::Forward).is_some());
    assert!(scene.pass_slot(o1, MeshPassType::DirectionalShadow).is_none());
    assert!(scene.pass_slot(o2, MeshPassType::DirectionalShadow).is_some());
    assert!(scene.pass_slot(o2, MeshPassType::Transparency).is_none());
    assert!(scene.pass(MeshPassType::Transparency).batches().is_empty());
}

#[test]
fn test_random_updates_keep_invariants() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let meshes = (0..6).map(|i| mesh(&format!("m{}", i), 4 + i, 6)).collect::<Vec<_>>();
    let materials = (0..4).map(|i| material(&format!("mat{}", i), MeshPassFlags::all())).collect::<Vec<_>>();

    let mut scene = RenderScene::new();
    // 先合并一半的 mesh，剩下的保持独立
    for m in &meshes[..3] {
        scene.register_object(m.clone(), materials[0].clone(), translation(0.0), MeshPassFlags::FORWARD);
    }
    scene.merge_meshes();

    for _round in 0..40 {
        for _ in 0..rng.gen_range(0..12) {
            let m = meshes[rng.gen_range(0..meshes.len())].clone();
            let mat = materials[rng.gen_range(0..materials.len())].clone();
            let flags = MeshPassFlags::from_bits_truncate(rng.gen_range(1..8));
            scene.register_object(m, mat, translation(rng.r#gen()), flags);
        }
        for _ in 0..rng.gen_range(0..12) {
            let object = scene.objects()[rng.gen_range(0..scene.object_count())].handle();
            if rng.gen_bool(0.5) {
                scene.update_object(object);
            } else {
                scene.update_transform(object, translation(rng.r#gen()));
            }
        }

        let stats = scene.refresh_passes();
        for pass in MeshPassType::ALL {
            check_pass_invariants(&scene, pass);
            assert!(scene.pass(pass).unbatched().is_empty());
            assert!(scene.pass(pass).pending_deletions().is_empty());
            assert_eq!(stats[pass].render_batches, scene.pass(pass).batches().len());
        }
        scene.clear_dirty_objects();
    }
}

#[test]
fn test_parallel_refresh_matches_sequential() {
    let mut rng = StdRng::seed_from_u64(7);
    let meshes = (0..4).map(|i| mesh(&format!("m{}", i), 3, 3)).collect::<Vec<_>>();
    let materials = (0..3).map(|i| material(&format!("mat{}", i), MeshPassFlags::all())).collect::<Vec<_>>();

    let mut parallel = RenderScene::new();
    let mut sequential = RenderScene::new();
    for _ in 0..200 {
        let m = meshes[rng.gen_range(0..meshes.len())].clone();
        let mat = materials[rng.gen_range(0..materials.len())].clone();
        let flags = MeshPassFlags::from_bits_truncate(rng.gen_range(1..8));
        parallel.register_object(m.clone(), mat.clone(), translation(0.0), flags);
        sequential.register_object(m, mat, translation(0.0), flags);
    }

    parallel.refresh_passes();
    for pass in MeshPassType::ALL {
        sequential.refresh_pass(pass);
        assert_eq!(parallel.pass(pass), sequential.pass(pass));
    }
}
