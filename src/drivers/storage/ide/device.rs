//! Identified drive on an IDE bus

use std::fmt;
use std::sync::Arc;

use super::bus::IdeBus;
use super::command::IdeCommand;
use super::descriptor::DriveDescriptor;
use super::MAX_SECTORS_PER_COMMAND;
use crate::drivers::storage::{StorageDeviceInfo, StorageDeviceType, SECTOR_SIZE};
use crate::error::{IdeError, IdeResult};

/// A probed drive, addressed through the bus it was found on
pub struct IdeDevice {
    name: String,
    master: bool,
    descriptor: DriveDescriptor,
    bus: Arc<IdeBus>,
}

impl IdeDevice {
    pub fn new(name: String, bus: Arc<IdeBus>, master: bool, descriptor: DriveDescriptor) -> Self {
        Self {
            name,
            master,
            descriptor,
            bus,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary(&self) -> bool {
        self.bus.primary()
    }

    pub fn master(&self) -> bool {
        self.master
    }

    pub fn descriptor(&self) -> &DriveDescriptor {
        &self.descriptor
    }

    pub fn bus(&self) -> &Arc<IdeBus> {
        &self.bus
    }

    pub fn device_type(&self) -> StorageDeviceType {
        if self.descriptor.is_atapi() {
            StorageDeviceType::OpticalDrive
        } else {
            StorageDeviceType::IdeDrive
        }
    }

    /// Addressable sectors; the 48-bit count when the drive supports it
    pub fn capacity_sectors(&self) -> u64 {
        if self.descriptor.supports_48bit_addressing() {
            self.descriptor.sectors_in_48bit_addressing()
        } else {
            u64::from(self.descriptor.sectors_in_28bit_addressing())
        }
    }

    pub fn info(&self) -> StorageDeviceInfo {
        StorageDeviceInfo {
            name: self.name.clone(),
            device_type: self.device_type(),
            primary: self.primary(),
            master: self.master,
            capacity_sectors: self.capacity_sectors(),
            sector_size: SECTOR_SIZE,
            removable: self.descriptor.is_removable(),
            model: self.descriptor.model(),
            serial: self.descriptor.serial_number(),
            firmware: self.descriptor.firmware_revision(),
        }
    }

    fn check_transfer(&self, lba: u64, sectors: usize) -> IdeResult<()> {
        if self.descriptor.is_atapi() || !self.descriptor.supports_lba() {
            return Err(IdeError::NotSupported);
        }
        if sectors == 0 {
            return Err(IdeError::InvalidParameter);
        }
        let end = lba.checked_add(sectors as u64).ok_or(IdeError::InvalidParameter)?;
        if end > self.capacity_sectors() {
            return Err(IdeError::InvalidParameter);
        }
        Ok(())
    }

    fn run(&self, command: &IdeCommand) -> IdeResult<()> {
        if command.requires_lba48() && !self.descriptor.supports_48bit_addressing() {
            return Err(IdeError::NotSupported);
        }
        self.bus
            .execute_and_wait(command, self.bus.config().data_xfer_timeout_ms)?;
        command.result()
    }

    /// Read `count` sectors starting at `lba`, at most 256 per command
    pub fn read_sectors(&self, lba: u64, count: usize) -> IdeResult<Vec<u8>> {
        self.check_transfer(lba, count)?;

        let mut data = Vec::with_capacity(count * SECTOR_SIZE);
        let mut next = lba;
        let mut remaining = count;
        while remaining > 0 {
            let part = remaining.min(MAX_SECTORS_PER_COMMAND);
            let command = IdeCommand::read_sectors(self.primary(), self.master, next, part)?;
            self.run(&command)?;
            data.extend(command.take_data());

            next += part as u64;
            remaining -= part;
        }
        Ok(data)
    }

    /// Write whole sectors from `data` starting at `lba`
    pub fn write_sectors(&self, lba: u64, data: &[u8]) -> IdeResult<()> {
        if data.len() % SECTOR_SIZE != 0 {
            return Err(IdeError::InvalidParameter);
        }
        self.check_transfer(lba, data.len() / SECTOR_SIZE)?;

        let mut next = lba;
        for chunk in data.chunks(MAX_SECTORS_PER_COMMAND * SECTOR_SIZE) {
            let command = IdeCommand::write_sectors(self.primary(), self.master, next, chunk.to_vec())?;
            self.run(&command)?;
            next += (chunk.len() / SECTOR_SIZE) as u64;
        }
        Ok(())
    }
}

impl fmt::Debug for IdeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdeDevice")
            .field("name", &self.name)
            .field("primary", &self.primary())
            .field("master", &self.master)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl fmt::Display for IdeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.descriptor)
    }
}
