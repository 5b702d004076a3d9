//! # RustOS Hardware Drivers Module
//!
//! Storage drivers and the raw port I/O backend they run on.

#[cfg(target_arch = "x86_64")]
pub mod port_io;
pub mod storage;
