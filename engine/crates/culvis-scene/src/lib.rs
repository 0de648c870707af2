//! CPU 侧的场景管理
//!
//! - [`render_scene::RenderScene`]：scene object 的注册表，负责 mesh / material 的去重和脏标记
//! - [`mesh_pass::MeshPass`]：每个渲染目的（forward / transparency / shadow）各一个，
//!   把注册表的增量变化转换为排好序、合并好的 batch

pub mod batch;
pub mod error;
pub mod gpu_object;
pub mod handle;
pub mod material;
pub mod mesh;
pub mod mesh_pass;
pub mod pass;
pub mod render_scene;
pub mod scene_object;

pub use error::{SceneError, SceneResult};
pub use handle::Handle;
pub use pass::{MeshPassFlags, MeshPassType, PerPassData};
pub use render_scene::RenderScene;
