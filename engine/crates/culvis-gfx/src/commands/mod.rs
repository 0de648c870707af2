pub mod barrier;
pub mod encoder;
pub mod state;
