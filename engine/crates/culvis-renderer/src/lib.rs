//! GPU driven 渲染核心
//!
//! 每帧的 GPU 顺序：
//! object 上传 -> barrier -> 剔除 -> barrier -> depth pyramid（可选）-> barrier -> indirect draw
//!
//! [`gpu_driven_renderer::GpuDrivenRenderer`] 负责把这些步骤串起来，
//! 各个步骤也可以单独使用。

pub mod cull;
pub mod depth_pyramid;
pub mod draw_executor;
pub mod frame;
pub mod gpu_driven_renderer;
pub mod gpu_types;
pub mod growable_buffer;
pub mod object_upload;
pub mod pass_buffers;
pub mod pipelines;
pub mod settings;
