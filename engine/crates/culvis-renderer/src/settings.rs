use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// 剔除相关的开关，每帧读取一次
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CullSettings {
    /// 关闭后所有物体都视为可见，但仍然会执行 compaction
    pub culling_enabled: bool,
    pub occlusion_enabled: bool,
    pub draw_distance: f32,
    /// 锁定剔除使用的相机，用于调试
    pub freeze_cull: bool,
    /// 阴影 pass 是否使用光源空间 AABB 剔除
    pub shadow_cull: bool,
    pub show_normals: bool,
}

impl Default for CullSettings {
    fn default() -> Self {
        Self {
            culling_enabled: true,
            occlusion_enabled: true,
            draw_distance: 5000.0,
            freeze_cull: false,
            shadow_cull: true,
            show_normals: false,
        }
    }
}

/// GPU buffer 容量不足时的扩容方式，容量以元素个数计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GrowthPolicy {
    /// 容量等于需求
    #[default]
    Exact,
    /// 容量至少翻倍，且不小于 min_capacity
    Doubling { min_capacity: u64 },
}

impl GrowthPolicy {
    /// 满足 `demand` 的新容量；当前容量足够时返回 None
    pub fn grow(&self, capacity: u64, demand: u64) -> Option<u64> {
        if demand <= capacity {
            return None;
        }
        Some(match *self {
            GrowthPolicy::Exact => demand,
            GrowthPolicy::Doubling { min_capacity } => demand.max(capacity * 2).max(min_capacity),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadPolicy {
    /// 脏物体数量达到 `ratio * 物体数量` 时整体上传
    pub full_reupload_ratio: f32,
    pub growth: GrowthPolicy,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            full_reupload_ratio: 0.8,
            growth: GrowthPolicy::Exact,
        }
    }
}

impl UploadPolicy {
    #[inline]
    pub fn prefers_full_upload(&self, dirty_count: usize, object_count: usize) -> bool {
        dirty_count as f32 >= self.full_reupload_ratio * object_count as f32
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthPyramidSettings {
    /// reduce shader 的 workgroup 边长，需要和 `depth_reduce.comp` 一致
    pub group_size: u32,
}

impl Default for DepthPyramidSettings {
    fn default() -> Self {
        Self { group_size: 32 }
    }
}

/// 渲染核心的全部配置，每个字段都有默认值
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    pub cull: CullSettings,
    pub upload: UploadPolicy,
    pub depth_pyramid: DepthPyramidSettings,
}

impl RendererSettings {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let settings: Self = toml::from_str(text).context("failed to parse renderer settings")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).with_context(|| format!("failed to read settings from {}", path.display()))?;
        let settings = Self::from_toml_str(&text).with_context(|| format!("invalid settings in {}", path.display()))?;
        log::info!("renderer settings loaded from {}", path.display());
        Ok(settings)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.upload.full_reupload_ratio),
            "full_reupload_ratio must be in [0, 1], got {}",
            self.upload.full_reupload_ratio
        );
        anyhow::ensure!(self.depth_pyramid.group_size > 0, "depth pyramid group_size must be positive");
        anyhow::ensure!(self.cull.draw_distance > 0.0, "draw_distance must be positive");
        Ok(())
    }
}
