mod common;

use std::sync::Arc;

use common::fast_config;
use idebus::drivers::storage::{DeviceRegistry, StorageDeviceManager, StorageDeviceType};
use idebus::testing::sim::{SimDrive, SimPlatform};
use idebus::{IdeController, IdeDevice, IdeError, IdeResult};

fn full_house(sim: &SimPlatform) {
    sim.primary().attach(true, SimDrive::ata(4096).with_model("DISK ZERO"));
    sim.primary().attach(false, SimDrive::ata(2048).with_model("DISK ONE"));
    sim.secondary().attach(true, SimDrive::atapi());
}

#[test]
fn drives_are_named_by_target() {
    let sim = SimPlatform::new();
    full_house(&sim);
    let registry = Arc::new(StorageDeviceManager::new());

    let controller = IdeController::start(sim.platform(), None, fast_config(), registry.clone()).unwrap();
    let detection = controller.detection();

    let names: Vec<&str> = detection.drives.iter().map(|info| info.name.as_str()).collect();
    assert_eq!(names, vec!["hda", "hdb", "hdc"]);
    assert_eq!(detection.empty_targets, vec!["secondary slave"]);
    assert!(detection.errors.is_empty());

    assert_eq!(registry.device_count(), 3);
    let cdrom = registry.get_device("hdc").unwrap();
    assert_eq!(cdrom.device_type(), StorageDeviceType::OpticalDrive);
    assert!(!cdrom.primary() && cdrom.master());
    assert_eq!(registry.get_device("hdb").unwrap().info().model, "DISK ONE");
}

#[test]
fn names_follow_probe_position() {
    let sim = SimPlatform::new();
    sim.secondary().attach(false, SimDrive::ata(512));
    let registry = Arc::new(StorageDeviceManager::new());

    let controller = IdeController::start(sim.platform(), None, fast_config(), registry.clone()).unwrap();
    assert_eq!(controller.devices().len(), 1);
    assert!(registry.get_device("hdd").is_some());
    assert_eq!(controller.detection().empty_targets.len(), 3);
}

#[test]
fn stop_unregisters_and_releases() {
    let sim = SimPlatform::new();
    full_house(&sim);
    let registry = Arc::new(StorageDeviceManager::new());

    let controller = IdeController::start(sim.platform(), None, fast_config(), registry.clone()).unwrap();
    controller.stop();
    controller.stop();

    assert_eq!(registry.device_count(), 0);
    assert_eq!(registry.stats().devices_unregistered, 3);
    assert_eq!(sim.io().claim_count(), 0);
    assert_eq!(sim.irq().handler_count(14), 0);
    assert_eq!(sim.irq().handler_count(15), 0);
    assert!(controller.primary().is_stopped() && controller.secondary().is_stopped());
}

#[test]
fn failed_secondary_stops_primary() {
    let sim = SimPlatform::new();
    sim.io().deny(0x170);
    let registry = Arc::new(StorageDeviceManager::new());

    let result = IdeController::start(sim.platform(), None, fast_config(), registry);
    assert!(matches!(result, Err(IdeError::ResourceUnavailable)));
    assert_eq!(sim.io().claim_count(), 0);
    assert_eq!(sim.irq().handler_count(14), 0);
}

/// Registry that already holds a drive called `taken`
struct Occupied {
    taken: &'static str,
    inner: StorageDeviceManager,
}

impl DeviceRegistry for Occupied {
    fn register(&self, device: Arc<IdeDevice>) -> IdeResult<()> {
        if device.name() == self.taken {
            return Err(IdeError::DuplicateDevice);
        }
        self.inner.register(device)
    }

    fn unregister(&self, name: &str) -> IdeResult<()> {
        self.inner.unregister(name)
    }
}

#[test]
fn registration_errors_are_reported() {
    let sim = SimPlatform::new();
    full_house(&sim);
    let registry = Arc::new(Occupied {
        taken: "hdb",
        inner: StorageDeviceManager::new(),
    });

    let controller = IdeController::start(sim.platform(), None, fast_config(), registry.clone()).unwrap();
    assert_eq!(controller.detection().errors.len(), 1);
    assert!(controller.detection().errors[0].starts_with("hdb"));
    assert_eq!(registry.inner.device_count(), 2);
    assert!(sim.log().contains("cannot register hdb"));
}

#[test]
fn manager_rejects_duplicate_names() {
    let sim = SimPlatform::new();
    full_house(&sim);
    let registry = Arc::new(StorageDeviceManager::new());
    let controller = IdeController::start(sim.platform(), None, fast_config(), registry.clone()).unwrap();

    let existing = registry.get_device("hda").unwrap();
    let twin = Arc::new(IdeDevice::new(
        "hda".to_string(),
        controller.primary().clone(),
        true,
        existing.descriptor().clone(),
    ));
    assert_eq!(registry.register(twin), Err(IdeError::DuplicateDevice));
    assert_eq!(registry.unregister("hdz"), Err(IdeError::DeviceNotFound));
    assert_eq!(registry.stats().rejected, 1);
}
