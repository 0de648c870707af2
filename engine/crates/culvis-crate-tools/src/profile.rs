//! 性能分析相关的辅助宏
//!
//! 打开 `tracy` feature 后，`profile_span!` 会创建一个 tracy span，作用域持续到当前 block 结束；
//! 否则展开为空，热路径上没有任何开销。
//!
//! 使用 tracy 时需要在程序入口调用 `tracy_client::Client::start()`。

#[cfg(feature = "tracy")]
#[macro_export]
macro_rules! profile_span {
    ($name:literal) => {
        let _profile_span = $crate::tracy_client::span!($name);
    };
}

#[cfg(not(feature = "tracy"))]
#[macro_export]
macro_rules! profile_span {
    ($name:literal) => {};
}
