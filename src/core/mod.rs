pub mod consumer;
pub mod frame_source;
pub mod session;
pub mod status;
