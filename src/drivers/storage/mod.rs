//! # Storage Drivers Module
//!
//! IDE/PATA drives and the registry they are published to.

pub mod ide;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use spin::RwLock;

use crate::error::{IdeError, IdeResult};
use ide::device::IdeDevice;

/// Bytes per sector for every drive this stack drives
pub const SECTOR_SIZE: usize = 512;

/// Storage device types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageDeviceType {
    /// IDE/PATA hard drive
    IdeDrive,
    /// ATAPI optical drive
    OpticalDrive,
}

impl fmt::Display for StorageDeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageDeviceType::IdeDrive => write!(f, "IDE Drive"),
            StorageDeviceType::OpticalDrive => write!(f, "Optical Drive"),
        }
    }
}

/// Snapshot of a drive as seen by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageDeviceInfo {
    pub name: String,
    pub device_type: StorageDeviceType,
    pub primary: bool,
    pub master: bool,
    pub capacity_sectors: u64,
    pub sector_size: usize,
    pub removable: bool,
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

impl StorageDeviceInfo {
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_sectors * self.sector_size as u64
    }
}

impl fmt::Display for StorageDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} \"{}\" ({} sectors)",
            self.name, self.device_type, self.model, self.capacity_sectors
        )
    }
}

/// Where discovered drives are published
pub trait DeviceRegistry: Send + Sync {
    fn register(&self, device: Arc<IdeDevice>) -> IdeResult<()>;
    fn unregister(&self, name: &str) -> IdeResult<()>;
}

/// Storage manager statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StorageManagerStats {
    pub devices_registered: u64,
    pub devices_unregistered: u64,
    pub rejected: u64,
}

#[derive(Default)]
struct ManagerState {
    devices: BTreeMap<String, Arc<IdeDevice>>,
    stats: StorageManagerStats,
}

/// In-memory device registry keyed by device name
#[derive(Default)]
pub struct StorageDeviceManager {
    state: RwLock<ManagerState>,
}

impl StorageDeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get device by name
    pub fn get_device(&self, name: &str) -> Option<Arc<IdeDevice>> {
        self.state.read().devices.get(name).cloned()
    }

    /// Info for every registered device, ordered by name
    pub fn get_all_device_info(&self) -> Vec<StorageDeviceInfo> {
        self.state.read().devices.values().map(|device| device.info()).collect()
    }

    pub fn device_count(&self) -> usize {
        self.state.read().devices.len()
    }

    pub fn stats(&self) -> StorageManagerStats {
        self.state.read().stats
    }
}

impl DeviceRegistry for StorageDeviceManager {
    fn register(&self, device: Arc<IdeDevice>) -> IdeResult<()> {
        let mut state = self.state.write();
        if state.devices.contains_key(device.name()) {
            state.stats.rejected += 1;
            return Err(IdeError::DuplicateDevice);
        }

        state.devices.insert(device.name().to_string(), device);
        state.stats.devices_registered += 1;
        Ok(())
    }

    fn unregister(&self, name: &str) -> IdeResult<()> {
        let mut state = self.state.write();
        if state.devices.remove(name).is_some() {
            state.stats.devices_unregistered += 1;
            Ok(())
        } else {
            Err(IdeError::DeviceNotFound)
        }
    }
}

impl fmt::Debug for StorageDeviceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("StorageDeviceManager")
            .field("devices", &state.devices.keys().collect::<Vec<_>>())
            .field("stats", &state.stats)
            .finish()
    }
}
