#![allow(dead_code)]

use std::sync::Arc;

use idebus::drivers::storage::ide::command::ErrorCode;
use idebus::drivers::storage::SECTOR_SIZE;
use idebus::testing::sim::{IrqMode, SimPlatform};
use idebus::{ChannelLayout, IdeBus, IdeCommand, IdeConfig};

/// Short timeouts so failure paths finish quickly
pub fn fast_config() -> IdeConfig {
    IdeConfig::default()
        .with_data_xfer_timeout(2_000)
        .with_probe_timeout(500)
        .with_busy_poll_interval(1)
        .with_reset_timing(1, 20, 1)
        .with_select_settle(0)
}

pub fn primary_bus(sim: &SimPlatform, config: IdeConfig) -> Arc<IdeBus> {
    IdeBus::with_layout(ChannelLayout::legacy(true), sim.platform(), config).unwrap()
}

pub fn manual_sim() -> SimPlatform {
    SimPlatform::with_irq_mode(IrqMode::Manual)
}

/// Sector filled with `seed`, `seed + 1`, ...
pub fn pattern(seed: u8) -> Vec<u8> {
    (0..SECTOR_SIZE).map(|i| seed.wrapping_add(i as u8)).collect()
}

/// How many of {success, Abort, HardwareAbort} describe `command`
pub fn outcomes(command: &IdeCommand) -> usize {
    let success = command.succeeded();
    let abort = command.error() == Some(ErrorCode::Abort);
    let hardware = matches!(command.error(), Some(ErrorCode::HardwareAbort { .. }));
    [success, abort, hardware].iter().filter(|held| **held).count()
}

/// Whether `log` contains `needle` as a contiguous run
pub fn contains_run(log: &[u8], needle: &[u8]) -> bool {
    log.windows(needle.len()).any(|window| window == needle)
}
