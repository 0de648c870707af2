use std::{collections::HashMap, sync::Arc};

use crate::{
    batch::PassObject,
    gpu_object::GpuObjectData,
    handle::Handle,
    material::{Material, MaterialInstance},
    mesh::{DrawMesh, GpuMesh, MeshCopyRegion, MeshMergePlan},
    mesh_pass::{MeshPass, PassRefreshStats, SceneView},
    pass::{MeshPassFlags, MeshPassType, PerPassData},
    scene_object::{SceneObject, SceneObjectDesc},
};

/// 场景对象注册表
///
/// 物体、mesh、材质都保存在稠密数组中，handle 即数组下标。物体不会被销毁，
/// 因此物体的 handle 同时也是它在 GPU object buffer 中的下标。
pub struct RenderScene {
    objects: Vec<SceneObject>,
    meshes: Vec<DrawMesh>,
    materials: Vec<Material>,

    /// 以 Arc 的地址去重；Arc 本身保存在 DrawMesh / Material 中，地址在场景存活期间不会被复用
    mesh_lookup: HashMap<usize, Handle<DrawMesh>>,
    material_lookup: HashMap<usize, Handle<Material>>,

    dirty_objects: Vec<Handle<SceneObject>>,

    passes: PerPassData<MeshPass>,

    /// 已经合并到 merged buffer 中的顶点和索引数量
    merged_vertices: u32,
    merged_indices: u32,
    merged_vertex_stride: Option<u32>,
}

impl Default for RenderScene {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl RenderScene {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            meshes: Vec::new(),
            materials: Vec::new(),
            mesh_lookup: HashMap::new(),
            material_lookup: HashMap::new(),
            dirty_objects: Vec::new(),
            passes: PerPassData::from_fn(MeshPass::new),
            merged_vertices: 0,
            merged_indices: 0,
            merged_vertex_stride: None,
        }
    }
}

// getter
impl RenderScene {
    #[inline]
    pub fn object(&self, handle: Handle<SceneObject>) -> &SceneObject {
        &self.objects[handle.as_usize()]
    }

    #[inline]
    pub fn mesh(&self, handle: Handle<DrawMesh>) -> &DrawMesh {
        &self.meshes[handle.as_usize()]
    }

    #[inline]
    pub fn material(&self, handle: Handle<Material>) -> &Material {
        &self.materials[handle.as_usize()]
    }

    #[inline]
    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    #[inline]
    pub fn meshes(&self) -> &[DrawMesh] {
        &self.meshes
    }

    #[inline]
    pub fn pass(&self, pass: MeshPassType) -> &MeshPass {
        &self.passes[pass]
    }

    #[inline]
    pub fn pass_mut(&mut self, pass: MeshPassType) -> &mut MeshPass {
        &mut self.passes[pass]
    }

    /// 物体在某个 pass 中的 slot，None 表示还没有进入 batch（或者不参与该 pass）
    #[inline]
    pub fn pass_slot(&self, object: Handle<SceneObject>, pass: MeshPassType) -> Option<Handle<PassObject>> {
        self.passes[pass].object_slot(object)
    }

    #[inline]
    pub fn dirty_objects(&self) -> &[Handle<SceneObject>] {
        &self.dirty_objects
    }

    #[inline]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn build_object_data(&self, handle: Handle<SceneObject>) -> GpuObjectData {
        let object = self.object(handle);
        let bounds = self.mesh(object.mesh).bounds();
        GpuObjectData {
            model: object.transform,
            origin_radius: bounds.origin.extend(bounds.radius),
            extents: bounds.extents.extend(if bounds.valid { 1.0 } else { 0.0 }),
        }
    }
}

// 注册与更新
impl RenderScene {
    pub fn register_object(
        &mut self,
        mesh: Arc<GpuMesh>,
        material: Arc<MaterialInstance>,
        transform: glam::Mat4,
        pass_flags: MeshPassFlags,
    ) -> Handle<SceneObject> {
        let mesh = self.get_or_add_mesh(mesh);
        let material = self.get_or_add_material(material);
        let handle = Handle::from_usize(self.objects.len());

        self.objects.push(SceneObject {
            handle,
            mesh,
            material,
            transform,
            pass_flags,
            update_index: None,
        });

        let object_count = self.objects.len();
        let material = &self.materials[material.as_usize()];
        for (pass_type, pass) in self.passes.iter_mut() {
            pass.grow_object_slots(object_count);
            if pass_flags.contains(pass_type.flag()) && material.pass_shader(pass_type).is_some() {
                pass.enqueue_unbatched(handle);
            }
        }

        self.mark_dirty(handle);
        handle
    }

    /// 批量注册，先为所有数组预留空间
    pub fn register_object_batch(
        &mut self,
        descs: impl IntoIterator<Item = SceneObjectDesc>,
    ) -> Vec<Handle<SceneObject>> {
        let descs = descs.into_iter();
        let (lower, _) = descs.size_hint();
        self.objects.reserve(lower);
        self.dirty_objects.reserve(lower);

        descs
            .map(|desc| self.register_object(desc.mesh, desc.material, desc.transform, desc.pass_flags))
            .collect()
    }

    pub fn update_transform(&mut self, handle: Handle<SceneObject>, transform: glam::Mat4) {
        self.objects[handle.as_usize()].transform = transform;
        self.update_object(handle);
    }

    /// 物体在每个 pass 中存活的 slot 都被删除，物体重新进入 unbatched 队列（删除 + 重新插入）
    pub fn update_object(&mut self, handle: Handle<SceneObject>) {
        self.mark_dirty(handle);
        for (_, pass) in self.passes.iter_mut() {
            pass.requeue_object(handle);
        }
    }

    /// 脏标记是幂等的
    fn mark_dirty(&mut self, handle: Handle<SceneObject>) {
        let object = &mut self.objects[handle.as_usize()];
        if object.update_index.is_none() {
            object.update_index = Some(self.dirty_objects.len() as u32);
            self.dirty_objects.push(handle);
        }
    }

    /// renderer 把脏物体上传之后调用
    pub fn clear_dirty_objects(&mut self) {
        for handle in self.dirty_objects.drain(..) {
            self.objects[handle.as_usize()].update_index = None;
        }
    }

    fn get_or_add_mesh(&mut self, mesh: Arc<GpuMesh>) -> Handle<DrawMesh> {
        let key = Arc::as_ptr(&mesh) as usize;
        if let Some(&handle) = self.mesh_lookup.get(&key) {
            return handle;
        }
        let handle = Handle::from_usize(self.meshes.len());
        self.meshes.push(DrawMesh::new(mesh));
        self.mesh_lookup.insert(key, handle);
        handle
    }

    fn get_or_add_material(&mut self, material: Arc<MaterialInstance>) -> Handle<Material> {
        let key = Arc::as_ptr(&material) as usize;
        if let Some(&handle) = self.material_lookup.get(&key) {
            return handle;
        }
        let handle = Handle::from_usize(self.materials.len());
        self.materials.push(Material { original: material });
        self.material_lookup.insert(key, handle);
        handle
    }
}

// refresh
impl RenderScene {
    /// 并行 refresh 所有 pass，每个 pass 一个任务
    ///
    /// 调用之前本帧所有的 update_object / update_transform 都必须已经完成
    pub fn refresh_passes(&mut self) -> PerPassData<PassRefreshStats> {
        culvis_crate_tools::profile_span!("RenderScene::refresh_passes");

        let view = SceneView {
            objects: &self.objects,
            meshes: &self.meshes,
            materials: &self.materials,
        };
        let mut stats = PerPassData::<PassRefreshStats>::default();

        rayon::scope(|s| {
            for ((_, pass), (_, stats)) in self.passes.iter_mut().zip(stats.iter_mut()) {
                s.spawn(move |_| *stats = pass.refresh(view));
            }
        });

        stats
    }

    /// 只 refresh 一个 pass
    pub fn refresh_pass(&mut self, pass: MeshPassType) -> PassRefreshStats {
        let view = SceneView {
            objects: &self.objects,
            meshes: &self.meshes,
            materials: &self.materials,
        };
        self.passes[pass].refresh(view)
    }
}

// mesh 合并
impl RenderScene {
    /// 为所有还没有合并的 mesh 按注册顺序分配 merged buffer 中的偏移
    ///
    /// 顶点大小和第一个合并的 mesh 不同的 mesh 保持未合并状态
    pub fn merge_meshes(&mut self) -> MeshMergePlan {
        let mut plan = MeshMergePlan {
            vertex_stride: self.merged_vertex_stride.unwrap_or_default(),
            kept_vertices: self.merged_vertices,
            kept_indices: self.merged_indices,
            ..Default::default()
        };

        for mesh in self.meshes.iter_mut().filter(|mesh| !mesh.is_merged) {
            let stride = *self.merged_vertex_stride.get_or_insert(mesh.original.vertex_stride);
            if stride != mesh.original.vertex_stride {
                log::warn!(
                    "mesh `{}` has vertex stride {} (merged pool uses {}), keep it standalone",
                    mesh.original.name,
                    mesh.original.vertex_stride,
                    stride
                );
                continue;
            }
            plan.vertex_stride = stride;

            mesh.first_vertex = self.merged_vertices;
            mesh.first_index = self.merged_indices;
            mesh.is_merged = true;

            plan.vertex_copies.push(MeshCopyRegion {
                src: mesh.original.vertex_buffer,
                dst_offset: mesh.first_vertex as u64 * stride as u64,
                size: mesh.vertex_count as u64 * stride as u64,
            });
            plan.index_copies.push(MeshCopyRegion {
                src: mesh.original.index_buffer,
                dst_offset: mesh.first_index as u64 * GpuMesh::INDEX_SIZE,
                size: mesh.index_count as u64 * GpuMesh::INDEX_SIZE,
            });

            self.merged_vertices += mesh.vertex_count;
            self.merged_indices += mesh.index_count;
        }

        plan.total_vertices = self.merged_vertices;
        plan.total_indices = self.merged_indices;

        if !plan.is_empty() {
            log::info!(
                "merged {} meshes: {} vertices, {} indices in pool",
                plan.vertex_copies.len(),
                plan.total_vertices,
                plan.total_indices
            );
            for (_, pass) in self.passes.iter_mut() {
                pass.request_rebuild();
            }
        }
        plan
    }
}
