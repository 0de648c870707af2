use itertools::Itertools;

use crate::{
    batch::{IndirectBatch, Multibatch, PassMaterial, PassObject, RenderBatch, sort_key},
    handle::Handle,
    material::Material,
    mesh::DrawMesh,
    pass::MeshPassType,
    scene_object::SceneObject,
};

/// refresh 时只读的注册表数据
#[derive(Clone, Copy)]
pub struct SceneView<'a> {
    pub objects: &'a [SceneObject],
    pub meshes: &'a [DrawMesh],
    pub materials: &'a [Material],
}

/// 一次 refresh 的统计信息
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassRefreshStats {
    pub deleted: usize,
    pub inserted: usize,
    pub render_batches: usize,
    pub indirect_batches: usize,
    pub multibatches: usize,
}

/// 某个渲染目的的 batch 数据
///
/// 注册表只往 unbatched / deletion 队列中写入，真正的修改都发生在 [`MeshPass::refresh`] 中。
#[derive(Clone, Debug, PartialEq)]
pub struct MeshPass {
    pass_type: MeshPassType,

    unbatched: Vec<Handle<SceneObject>>,
    /// 入队时快照的 (key, slot)
    deletions: Vec<RenderBatch>,

    /// 以 `Handle<PassObject>` 索引，None 表示该 slot 已经被删除，等待复用
    pass_objects: Vec<Option<PassObject>>,
    reusable_objects: Vec<Handle<PassObject>>,

    /// 以 `Handle<SceneObject>` 索引：物体在本 pass 中的 slot
    object_slots: Vec<Option<Handle<PassObject>>>,

    batches: Vec<RenderBatch>,
    indirect_batches: Vec<IndirectBatch>,
    multibatches: Vec<Multibatch>,

    /// 强制下一次 refresh 重建 IndirectBatch / Multibatch（mesh 合并状态变化之后）
    rebuild_requested: bool,

    needs_indirect_refresh: bool,
    needs_instance_refresh: bool,
}

// new & init
impl MeshPass {
    pub fn new(pass_type: MeshPassType) -> Self {
        Self {
            pass_type,
            unbatched: Vec::new(),
            deletions: Vec::new(),
            pass_objects: Vec::new(),
            reusable_objects: Vec::new(),
            object_slots: Vec::new(),
            batches: Vec::new(),
            indirect_batches: Vec::new(),
            multibatches: Vec::new(),
            rebuild_requested: false,
            needs_indirect_refresh: false,
            needs_instance_refresh: false,
        }
    }
}

// getter
impl MeshPass {
    #[inline]
    pub fn pass_type(&self) -> MeshPassType {
        self.pass_type
    }

    #[inline]
    pub fn batches(&self) -> &[RenderBatch] {
        &self.batches
    }

    #[inline]
    pub fn indirect_batches(&self) -> &[IndirectBatch] {
        &self.indirect_batches
    }

    #[inline]
    pub fn multibatches(&self) -> &[Multibatch] {
        &self.multibatches
    }

    #[inline]
    pub fn pass_object(&self, handle: Handle<PassObject>) -> Option<&PassObject> {
        self.pass_objects.get(handle.as_usize()).and_then(Option::as_ref)
    }

    /// 包括已经失效、等待复用的 slot
    #[inline]
    pub fn pass_object_capacity(&self) -> usize {
        self.pass_objects.len()
    }

    #[inline]
    pub fn object_slot(&self, object: Handle<SceneObject>) -> Option<Handle<PassObject>> {
        self.object_slots.get(object.as_usize()).copied().flatten()
    }

    #[inline]
    pub fn unbatched(&self) -> &[Handle<SceneObject>] {
        &self.unbatched
    }

    #[inline]
    pub fn pending_deletions(&self) -> &[RenderBatch] {
        &self.deletions
    }

    #[inline]
    pub fn has_pending_work(&self) -> bool {
        !self.unbatched.is_empty() || !self.deletions.is_empty() || self.rebuild_requested
    }

    #[inline]
    pub fn needs_indirect_refresh(&self) -> bool {
        self.needs_indirect_refresh
    }

    #[inline]
    pub fn needs_instance_refresh(&self) -> bool {
        self.needs_instance_refresh
    }

    pub fn stats(&self) -> PassRefreshStats {
        PassRefreshStats {
            deleted: 0,
            inserted: 0,
            render_batches: self.batches.len(),
            indirect_batches: self.indirect_batches.len(),
            multibatches: self.multibatches.len(),
        }
    }
}

// 注册表写入的队列
impl MeshPass {
    /// 注册表新增物体时调用，保证 object_slots 覆盖所有物体
    pub(crate) fn grow_object_slots(&mut self, object_count: usize) {
        if self.object_slots.len() < object_count {
            self.object_slots.resize(object_count, None);
        }
    }

    pub(crate) fn enqueue_unbatched(&mut self, object: Handle<SceneObject>) {
        self.unbatched.push(object);
    }

    /// 物体有存活的 slot 时：该 slot 进入删除队列，物体重新进入 unbatched 队列。
    ///
    /// 物体还没有 slot（仍在 unbatched 队列中，或不参与本 pass）时什么也不做。
    pub(crate) fn requeue_object(&mut self, object: Handle<SceneObject>) -> bool {
        let Some(slot) = self.object_slots.get_mut(object.as_usize()).and_then(Option::take) else {
            return false;
        };
        let sort_key = self.pass_objects[slot.as_usize()]
            .as_ref()
            .map(|pass_object| pass_object.sort_key)
            .unwrap_or_else(|| panic!("{} pass: slot {:?} of {:?} is not live", self.pass_type, slot, object));

        self.deletions.push(RenderBatch { sort_key, object: slot });
        self.unbatched.push(object);
        true
    }

    pub(crate) fn request_rebuild(&mut self) {
        self.rebuild_requested = true;
    }

    /// renderer 把模板上传到 GPU 之后调用
    pub fn mark_gpu_synced(&mut self) {
        self.needs_indirect_refresh = false;
        self.needs_instance_refresh = false;
    }
}

// refresh
impl MeshPass {
    /// 把队列中的增量应用到 batch 数据上
    ///
    /// 只能在本帧所有的注册表修改完成之后调用
    pub fn refresh(&mut self, scene: SceneView<'_>) -> PassRefreshStats {
        if !self.has_pending_work() {
            return self.stats();
        }
        culvis_crate_tools::profile_span!("MeshPass::refresh");

        let deleted = self.apply_deletions();
        let new_batches = self.apply_insertions(scene);
        let inserted = new_batches.len();
        self.merge_new_batches(new_batches);

        self.rebuild_indirect_batches();
        self.rebuild_multibatches(scene.meshes);
        self.rebuild_requested = false;

        self.needs_indirect_refresh = true;
        self.needs_instance_refresh = true;

        let stats = PassRefreshStats {
            deleted,
            inserted,
            ..self.stats()
        };
        log::debug!("{} pass refreshed: {:?}", self.pass_type, stats);
        stats
    }

    fn apply_deletions(&mut self) -> usize {
        if self.deletions.is_empty() {
            return 0;
        }

        let mut deletions = std::mem::take(&mut self.deletions);
        for deletion in &deletions {
            self.pass_objects[deletion.object.as_usize()] = None;
            self.reusable_objects.push(deletion.object);
        }

        // 两边使用同样的比较规则排序，线性求差集
        deletions.sort();
        let mut to_delete = deletions.iter().peekable();
        self.batches.retain(|batch| {
            while to_delete.next_if(|deletion| *deletion < batch).is_some() {}
            to_delete.next_if_eq(&batch).is_none()
        });

        deletions.len()
    }

    fn apply_insertions(&mut self, scene: SceneView<'_>) -> Vec<RenderBatch> {
        let unbatched = std::mem::take(&mut self.unbatched);
        let mut new_batches = Vec::with_capacity(unbatched.len());

        for object_handle in unbatched {
            let object = &scene.objects[object_handle.as_usize()];
            let material = &scene.materials[object.material.as_usize()];
            let Some(shader_pass) = material.pass_shader(self.pass_type) else {
                log::warn!("{} pass: material of {:?} has no shader for this pass", self.pass_type, object_handle);
                continue;
            };

            let pass_material = PassMaterial {
                shader_pass,
                material_set: material.pass_set(self.pass_type),
            };
            let pass_object = PassObject {
                material: pass_material,
                mesh: object.mesh,
                original: object_handle,
                sort_key: sort_key(&pass_material, object.mesh),
            };
            let batch = RenderBatch {
                sort_key: pass_object.sort_key,
                object: self.alloc_pass_object(pass_object),
            };

            self.grow_object_slots(object_handle.as_usize() + 1);
            self.object_slots[object_handle.as_usize()] = Some(batch.object);
            new_batches.push(batch);
        }

        new_batches
    }

    fn alloc_pass_object(&mut self, pass_object: PassObject) -> Handle<PassObject> {
        match self.reusable_objects.pop() {
            Some(handle) => {
                self.pass_objects[handle.as_usize()] = Some(pass_object);
                handle
            }
            None => {
                self.pass_objects.push(Some(pass_object));
                Handle::from_usize(self.pass_objects.len() - 1)
            }
        }
    }

    fn merge_new_batches(&mut self, mut new_batches: Vec<RenderBatch>) {
        new_batches.sort();
        if self.batches.is_empty() {
            self.batches = new_batches;
        } else if !new_batches.is_empty() {
            let old_batches = std::mem::take(&mut self.batches);
            self.batches = old_batches.into_iter().merge(new_batches).collect();
        }
    }

    fn rebuild_indirect_batches(&mut self) {
        self.indirect_batches.clear();

        for (idx, batch) in self.batches.iter().enumerate() {
            let pass_object = self.pass_objects[batch.object.as_usize()]
                .as_ref()
                .unwrap_or_else(|| panic!("{} pass: batch refers to dead slot {:?}", self.pass_type, batch.object));

            match self.indirect_batches.last_mut() {
                Some(last) if last.mesh == pass_object.mesh && last.material == pass_object.material => {
                    last.count += 1;
                }
                _ => self.indirect_batches.push(IndirectBatch {
                    mesh: pass_object.mesh,
                    material: pass_object.material,
                    first: idx as u32,
                    count: 1,
                }),
            }
        }
    }

    fn rebuild_multibatches(&mut self, meshes: &[DrawMesh]) {
        self.multibatches.clear();

        let mut prev: Option<&IndirectBatch> = None;
        for (idx, batch) in self.indirect_batches.iter().enumerate() {
            let compatible = prev.is_some_and(|prev| {
                meshes[prev.mesh.as_usize()].is_merged
                    && meshes[batch.mesh.as_usize()].is_merged
                    && prev.material == batch.material
            });

            match self.multibatches.last_mut() {
                Some(last) if compatible => last.count += 1,
                _ => self.multibatches.push(Multibatch {
                    first: idx as u32,
                    count: 1,
                }),
            }
            prev = Some(batch);
        }
    }
}
