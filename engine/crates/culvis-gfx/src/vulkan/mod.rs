//! 基于 ash + vk-mem 的实现
//!
//! instance / device / queue 由外部创建，这里只负责资源和命令。

pub mod device;
pub mod encoder;
