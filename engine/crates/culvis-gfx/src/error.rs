use ash::vk;

pub type GfxResult<T> = Result<T, GfxError>;

/// GFX 层的错误
///
/// 初始化阶段的资源创建失败对上层来说是致命的，上层一般直接向外传播。
#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    #[error("vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("buffer `{0}` is not host mapped")]
    NotMapped(String),

    #[error("write of {size} bytes at offset {offset} exceeds buffer `{name}` ({capacity} bytes)")]
    OutOfBounds {
        name: String,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        capacity: vk::DeviceSize,
    },

    #[error("buffer handle is unknown or already destroyed")]
    UnknownBuffer,

    #[error("image handle is unknown or already destroyed")]
    UnknownImage,

    #[error("frame slot {0} has no descriptor pool")]
    InvalidFrameSlot(usize),

    /// 持有锁的线程 panic 之后，被保护的资源表不再可信
    #[error("lock on {0} is poisoned")]
    LockPoisoned(&'static str),
}
