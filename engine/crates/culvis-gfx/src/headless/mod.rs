//! 不依赖 GPU 的实现
//!
//! `HeadlessDevice` 把 buffer 内容保存在内存里，`RecordingEncoder` 记录每一条命令。
//! 渲染核心的测试通过它们检查写入的字节以及命令的顺序。

pub mod device;
pub mod recorder;

pub use device::HeadlessDevice;
pub use recorder::{GfxCommand, RecordedBufferBarrier, RecordedImageBarrier, RecordingEncoder};
