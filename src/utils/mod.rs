//! Logging setup and timing helpers

pub mod log_capture;
pub mod logger;
pub mod timer;
