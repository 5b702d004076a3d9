mod common;

use std::sync::Arc;

use common::{fast_config, pattern, primary_bus};
use idebus::drivers::storage::ide::LBA28_MAX;
use idebus::drivers::storage::{StorageDeviceType, SECTOR_SIZE};
use idebus::testing::sim::{SimDrive, SimPlatform};
use idebus::{IdeDevice, IdeError};

fn device(sim: &SimPlatform, drive: SimDrive) -> IdeDevice {
    sim.primary().attach(true, drive);
    let bus = primary_bus(sim, fast_config());
    let descriptor = bus.probe(true).unwrap();
    sim.primary().clear_logs();
    IdeDevice::new("hda".to_string(), Arc::clone(&bus), true, descriptor)
}

#[test]
fn sectors_written_are_read_back() {
    let sim = SimPlatform::new();
    let disk = device(&sim, SimDrive::ata(64));

    let mut data = pattern(7);
    data.extend(pattern(9));
    disk.write_sectors(10, &data).unwrap();
    assert_eq!(sim.primary().sector(true, 11), Some(pattern(9)));

    assert_eq!(disk.read_sectors(10, 2).unwrap(), data);
    assert_eq!(sim.primary().command_log(), vec![0x30, 0x20]);
}

#[test]
fn large_transfers_are_split() {
    let sim = SimPlatform::new();
    let disk = device(&sim, SimDrive::ata(1024));

    let data: Vec<u8> = (0..300).flat_map(|sector| pattern(sector as u8)).collect();
    disk.write_sectors(0, &data).unwrap();
    let read = disk.read_sectors(0, 300).unwrap();

    assert_eq!(read.len(), 300 * SECTOR_SIZE);
    assert_eq!(read, data);
    assert_eq!(sim.primary().command_log(), vec![0x30, 0x30, 0x20, 0x20]);
}

#[test]
fn high_lba_uses_48bit_commands() {
    let sim = SimPlatform::new();
    let disk = device(&sim, SimDrive::ata_lba48(LBA28_MAX + 1_000));
    assert_eq!(disk.capacity_sectors(), LBA28_MAX + 1_000);

    let lba = LBA28_MAX;
    let data: Vec<u8> = pattern(3).into_iter().chain(pattern(4)).collect();
    disk.write_sectors(lba, &data).unwrap();
    assert_eq!(sim.primary().sector(true, LBA28_MAX + 1), Some(pattern(4)));
    assert_eq!(disk.read_sectors(lba, 2).unwrap(), data);

    disk.read_sectors(5, 1).unwrap();
    assert_eq!(sim.primary().command_log(), vec![0x34, 0x24, 0x20]);
}

#[test]
fn invalid_transfers_are_refused() {
    let sim = SimPlatform::new();
    let disk = device(&sim, SimDrive::ata(64));

    assert_eq!(disk.read_sectors(0, 0), Err(IdeError::InvalidParameter));
    assert_eq!(disk.read_sectors(63, 2), Err(IdeError::InvalidParameter));
    assert_eq!(disk.write_sectors(0, &[0u8; 100]), Err(IdeError::InvalidParameter));
    assert!(sim.primary().command_log().is_empty());
}

#[test]
fn packet_devices_have_no_sector_io() {
    let sim = SimPlatform::new();
    let drive = device(&sim, SimDrive::atapi());

    assert_eq!(drive.device_type(), StorageDeviceType::OpticalDrive);
    assert!(drive.info().removable);
    assert_eq!(drive.read_sectors(0, 1), Err(IdeError::NotSupported));
}

#[test]
fn drive_errors_surface_as_hardware_abort() {
    let sim = SimPlatform::new();
    let disk = device(&sim, SimDrive::ata(64));

    // The drive shrinks behind the descriptor's back
    sim.primary().attach(true, SimDrive::ata(8));
    assert_eq!(
        disk.read_sectors(20, 1),
        Err(IdeError::HardwareAbort { status: 0x41, error: 0x10 })
    );
    assert_eq!(disk.read_sectors(0, 1).map(|data| data.len()), Ok(SECTOR_SIZE));
}
