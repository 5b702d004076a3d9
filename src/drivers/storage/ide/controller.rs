//! IDE controller: both channels and the drives found on them

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spin::Mutex;

use super::bus::IdeBus;
use super::config::IdeConfig;
use super::device::IdeDevice;
use super::target_name;
use crate::drivers::storage::{DeviceRegistry, StorageDeviceInfo};
use crate::error::IdeResult;
use crate::logging::Logger;
use crate::pci::PciDeviceConfig;
use crate::platform::Platform;

/// Probe order: primary master, primary slave, secondary master, secondary slave
const TARGETS: [(bool, bool); 4] = [(true, true), (true, false), (false, true), (false, false)];

/// Outcome of probing the four targets at start-up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionResults {
    /// Drives found and registered, in probe order
    pub drives: Vec<StorageDeviceInfo>,
    /// Targets where no drive answered
    pub empty_targets: Vec<&'static str>,
    /// Registration errors encountered
    pub errors: Vec<String>,
}

impl DetectionResults {
    pub fn total_devices(&self) -> usize {
        self.drives.len()
    }
}

impl fmt::Display for DetectionResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} drive(s), {} empty target(s), {} error(s)",
            self.drives.len(),
            self.empty_targets.len(),
            self.errors.len()
        )
    }
}

/// Owner of the primary and secondary bus
pub struct IdeController {
    primary: Arc<IdeBus>,
    secondary: Arc<IdeBus>,
    devices: Mutex<heapless::Vec<Arc<IdeDevice>, 4>>,
    registry: Arc<dyn DeviceRegistry>,
    detection: DetectionResults,
    logger: Logger,
    stopped: AtomicBool,
}

impl IdeController {
    /// Bring up both channels, probe every target and register what answers
    pub fn start(
        platform: &Platform,
        pci: Option<&PciDeviceConfig>,
        config: IdeConfig,
        registry: Arc<dyn DeviceRegistry>,
    ) -> IdeResult<IdeController> {
        let logger = platform.logger.scoped("controller");
        if let Some(pci) = pci {
            log_info!(logger, "controller {}", pci);
            if pci.is_programmable() && !pci.is_native_mode() {
                log_debug!(logger, "channels are switchable, staying in compatibility mode");
            }
        }

        let primary = IdeBus::new(true, pci, platform, config)?;
        let secondary = match IdeBus::new(false, pci, platform, config) {
            Ok(bus) => bus,
            Err(err) => {
                primary.stop();
                return Err(err);
            }
        };

        let mut controller = IdeController {
            primary,
            secondary,
            devices: Mutex::new(heapless::Vec::new()),
            registry,
            detection: DetectionResults::default(),
            logger,
            stopped: AtomicBool::new(false),
        };
        controller.detection = controller.probe_all();
        log_info!(controller.logger, "detection finished: {}", controller.detection);
        Ok(controller)
    }

    fn probe_all(&self) -> DetectionResults {
        let mut results = DetectionResults::default();

        for (index, &(primary, master)) in TARGETS.iter().enumerate() {
            let target = target_name(primary, master);
            let bus = self.bus(primary);
            let descriptor = match bus.probe(master) {
                Some(descriptor) => descriptor,
                None => {
                    results.empty_targets.push(target);
                    continue;
                }
            };

            let name = format!("hd{}", (b'a' + index as u8) as char);
            let device = Arc::new(IdeDevice::new(name, bus.clone(), master, descriptor));

            if let Err(err) = self.registry.register(device.clone()) {
                log_error!(self.logger, "cannot register {} ({}): {}", device.name(), target, err);
                results.errors.push(format!("{}: {}", device.name(), err));
                continue;
            }

            log_info!(self.logger, "registered {}", device);
            results.drives.push(device.info());
            if self.devices.lock().push(device).is_err() {
                log_error!(self.logger, "device table full at {}", target);
            }
        }

        results
    }

    pub fn primary(&self) -> &Arc<IdeBus> {
        &self.primary
    }

    pub fn secondary(&self) -> &Arc<IdeBus> {
        &self.secondary
    }

    pub fn bus(&self, primary: bool) -> &Arc<IdeBus> {
        if primary {
            &self.primary
        } else {
            &self.secondary
        }
    }

    /// Registered drives in probe order
    pub fn devices(&self) -> Vec<Arc<IdeDevice>> {
        self.devices.lock().iter().cloned().collect()
    }

    pub fn detection(&self) -> &DetectionResults {
        &self.detection
    }

    /// Unregister drives, then stop the secondary and primary bus
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let devices: Vec<Arc<IdeDevice>> = {
            let mut table = self.devices.lock();
            let devices = table.iter().cloned().collect();
            table.clear();
            devices
        };
        for device in devices.iter().rev() {
            if let Err(err) = self.registry.unregister(device.name()) {
                log_warn!(self.logger, "cannot unregister {}: {}", device.name(), err);
            }
        }

        self.secondary.stop();
        self.primary.stop();
        log_info!(self.logger, "stopped");
    }
}

impl Drop for IdeController {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for IdeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdeController")
            .field("primary", &self.primary)
            .field("secondary", &self.secondary)
            .field("detection", &self.detection)
            .finish()
    }
}
