use std::sync::Arc;

use crate::{
    handle::Handle,
    material::{Material, MaterialInstance},
    mesh::{DrawMesh, GpuMesh},
    pass::MeshPassFlags,
};

/// 场景中的一个可渲染物体
///
/// 物体在各个 pass 中的 slot 按列存放在 `MeshPass` 里，
/// 通过 `RenderScene::pass_slot` 查询。
#[derive(Clone, Debug)]
pub struct SceneObject {
    pub(crate) handle: Handle<SceneObject>,
    pub(crate) mesh: Handle<DrawMesh>,
    pub(crate) material: Handle<Material>,
    pub(crate) transform: glam::Mat4,
    pub(crate) pass_flags: MeshPassFlags,
    /// 在脏列表中的位置，None 表示当前不脏
    pub(crate) update_index: Option<u32>,
}

// getter
impl SceneObject {
    #[inline]
    pub fn handle(&self) -> Handle<SceneObject> {
        self.handle
    }

    #[inline]
    pub fn mesh(&self) -> Handle<DrawMesh> {
        self.mesh
    }

    #[inline]
    pub fn material(&self) -> Handle<Material> {
        self.material
    }

    #[inline]
    pub fn transform(&self) -> &glam::Mat4 {
        &self.transform
    }

    #[inline]
    pub fn pass_flags(&self) -> MeshPassFlags {
        self.pass_flags
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.update_index.is_some()
    }
}

/// 批量注册时的单个物体描述
pub struct SceneObjectDesc {
    pub mesh: Arc<GpuMesh>,
    pub material: Arc<MaterialInstance>,
    pub transform: glam::Mat4,
    pub pass_flags: MeshPassFlags,
}
