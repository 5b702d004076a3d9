//! # RustOS IDE bus driver
//!
//! Drives the legacy IDE/ATA task-file interface: two channels (primary and
//! secondary), each with up to two drives (master and slave). Commands are
//! queued per channel, started by a dedicated worker and completed from the
//! channel's interrupt handler, one command in flight at a time.
//!
//! The platform supplies port I/O claims, IRQ registration, a millisecond
//! clock and a logging handle through [`platform::Platform`]; the
//! [`testing::sim`] module provides a simulated channel for all of them.

#[macro_use]
pub mod logging;

pub mod drivers;
pub mod error;
pub mod pci;
pub mod platform;
pub mod resource;
pub mod testing;
pub mod time;

pub use drivers::storage::ide::{
    bus::{BusState, BusStats, IdeBus},
    command::{ErrorCode, IdeCommand},
    config::IdeConfig,
    controller::{DetectionResults, IdeController},
    descriptor::DriveDescriptor,
    device::IdeDevice,
    regs::{ChannelLayout, IdeIo},
};
pub use error::{IdeError, IdeResult};
pub use platform::Platform;
