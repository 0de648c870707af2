pub mod init_log;
pub mod profile;
pub mod resource;

#[cfg(feature = "tracy")]
pub use tracy_client;
