//! Culvis 的 GPU 边界
//!
//! 上层（scene / renderer）只通过这里的两个 trait 和 GPU 打交道：
//!
//! - [`GfxDevice`](device::GfxDevice)：资源的创建与销毁、host 可见内存的写入、逐帧的 descriptor set、fence
//! - [`GfxCommandEncoder`](commands::encoder::GfxCommandEncoder)：命令录制
//!
//! `vulkan` 模块是基于 ash + vk-mem 的实现，`headless` 模块在 CPU 上记录所有调用，用于测试和工具。

pub mod commands;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod headless;
pub mod resources;
pub mod vulkan;

pub use error::{GfxError, GfxResult};
