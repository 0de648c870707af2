use std::path::{Path, PathBuf};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
///
/// # 使用示例
/// ```ignore
/// let src = CulvisPath::shader_src_path("indirect_cull.comp");   // shader/indirect_cull.comp
/// let spv = CulvisPath::shader_build_path("indirect_cull.comp"); // shader/.build/indirect_cull.comp.spv
/// ```
pub struct CulvisPath {}
impl CulvisPath {
    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        // 从 engine/crates/culvis-crate-tools 向上三级
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.ancestors().nth(3).unwrap_or(manifest_dir).to_path_buf()
    }

    pub fn shader_root_path() -> PathBuf {
        Self::workspace_path().join("shader")
    }

    /// 获取 `shader/` 目录下的着色器源码路径
    pub fn shader_src_path(filename: &str) -> PathBuf {
        Self::shader_root_path().join(filename)
    }

    /// 获取 `shader/.build/` 目录下的着色器路径（编译后的 SPIR-V）
    pub fn shader_build_path(filename: &str) -> PathBuf {
        Self::shader_root_path().join(".build").join(format!("{filename}.spv"))
    }
}
