mod common;

use common::{fast_config, manual_sim, primary_bus};
use idebus::drivers::storage::ide::IDENTIFY_WORDS;
use idebus::pci::{PciDeviceConfig, CLASS_MASS_STORAGE, PCI_HEADER_SIZE, SUBCLASS_IDE};
use idebus::testing::sim::{put_ascii, IrqMode, SimDrive, SimPlatform};
use idebus::testing::wait_until;
use idebus::{BusState, ChannelLayout, DriveDescriptor, IdeBus, IdeCommand};

fn bare_identify() -> [u16; IDENTIFY_WORDS] {
    let mut words = [0u16; IDENTIFY_WORDS];
    words[0] = 0x0000;
    words[49] = 1 << 9;
    words[60] = 2048;
    put_ascii(&mut words, 27, 20, "BARE DISK");
    words
}

#[test]
fn ata_drive_is_identified() {
    let sim = SimPlatform::new();
    sim.primary()
        .attach(true, SimDrive::ata(64).with_identify(bare_identify()));
    let bus = primary_bus(&sim, fast_config());

    let descriptor = bus.probe(true).expect("primary master answers");
    assert!(descriptor.supports_lba());
    assert!(!descriptor.is_atapi());
    assert!(descriptor.is_ata());
    assert_eq!(descriptor.model(), "BARE DISK");
    assert_eq!(descriptor.sectors_in_28bit_addressing(), 2048);
    assert_eq!(sim.primary().command_log(), vec![0xEC]);
}

#[test]
fn absent_target_issues_no_command() {
    let sim = SimPlatform::new();
    sim.primary().attach(true, SimDrive::ata(64));
    let bus = primary_bus(&sim, fast_config());

    assert_eq!(bus.probe(false), None);
    assert!(sim.primary().command_log().is_empty());

    let secondary = IdeBus::with_layout(ChannelLayout::legacy(false), sim.platform(), fast_config()).unwrap();
    assert_eq!(secondary.probe(true), None);
    assert_eq!(secondary.probe(false), None);
    assert!(sim.secondary().command_log().is_empty());
}

#[test]
fn packet_device_falls_back_to_identify_packet() {
    let sim = SimPlatform::new();
    sim.primary().attach(true, SimDrive::atapi());
    let bus = primary_bus(&sim, fast_config());

    let descriptor = bus.probe(true).expect("packet device answers");
    assert!(descriptor.is_atapi());
    assert!(descriptor.is_atapi_requested());
    assert!(descriptor.is_removable());
    assert_eq!(descriptor.model(), "RustOS SIM DVD-ROM");
    assert_eq!(sim.primary().command_log(), vec![0xEC, 0xA1]);
}

#[test]
fn slave_is_probed_independently() {
    let sim = SimPlatform::new();
    sim.primary().attach(false, SimDrive::ata(128).with_model("SLAVE DISK"));
    let bus = primary_bus(&sim, fast_config());

    assert_eq!(bus.probe(true), None);
    let descriptor = bus.probe(false).expect("primary slave answers");
    assert_eq!(descriptor.model(), "SLAVE DISK");
}

#[test]
fn probe_recovers_after_hung_identify() {
    let sim = SimPlatform::new();
    sim.primary().attach(true, SimDrive::ata(64));
    sim.primary().hang_next_commands(1);
    let bus = primary_bus(&sim, fast_config().with_probe_timeout(100));

    assert_eq!(bus.probe(true), None);
    assert!(bus.probe(true).is_some());
    assert_eq!(sim.primary().reset_count(), 1);
}

#[test]
fn busy_channel_is_not_reselected() {
    let sim = manual_sim();
    let channel = sim.primary();
    channel.attach(true, SimDrive::ata(64));
    channel.attach(false, SimDrive::ata(64));
    let bus = primary_bus(&sim, fast_config().with_probe_timeout(100));

    let read = IdeCommand::read_sectors(true, true, 5, 1).unwrap();
    bus.execute(&read).unwrap();
    assert!(wait_until(1_000, || bus.state() == BusState::AwaitingInterrupt));
    let select = bus.io().select();

    assert_eq!(bus.probe(false), None);
    assert_eq!(channel.command_log(), vec![0x20]);
    assert_eq!(bus.io().select(), select);
    assert!(sim.log().contains("not probing"));

    assert!(channel.fire_irq());
    assert!(read.wait_until_finished(1_000));
    assert!(read.succeeded());
}

#[test]
fn native_mode_uses_pci_bars_and_shared_irq() {
    let mut raw = vec![0u8; PCI_HEADER_SIZE];
    raw[0..2].copy_from_slice(&0x8086u16.to_le_bytes());
    raw[2..4].copy_from_slice(&0x7010u16.to_le_bytes());
    raw[0x09] = 0x8F;
    raw[0x0A] = SUBCLASS_IDE;
    raw[0x0B] = CLASS_MASS_STORAGE;
    for (index, bar) in [0xC001u32, 0xC101, 0xC201, 0xC301].iter().enumerate() {
        let offset = 0x10 + index * 4;
        raw[offset..offset + 4].copy_from_slice(&bar.to_le_bytes());
    }
    raw[0x3C] = 11;
    let pci = PciDeviceConfig::parse(&raw).unwrap();

    let sim = SimPlatform::with_layouts(
        ChannelLayout::from_pci(true, Some(&pci)).unwrap(),
        ChannelLayout::from_pci(false, Some(&pci)).unwrap(),
        IrqMode::Auto,
    );
    sim.primary().attach(true, SimDrive::ata(64));

    let primary = IdeBus::new(true, Some(&pci), sim.platform(), fast_config()).unwrap();
    let secondary = IdeBus::new(false, Some(&pci), sim.platform(), fast_config()).unwrap();
    assert!(primary.layout().native);
    assert_eq!(primary.layout().alt_status_port, 0xC102);
    assert_eq!(sim.irq().handler_count(11), 2);
    assert_eq!(sim.io().owner_of(0xC000).as_deref(), Some("ide0"));
    assert_eq!(sim.io().owner_of(0xC300).as_deref(), Some("ide1"));

    assert!(primary.probe(true).is_some());
    assert_eq!(secondary.probe(true), None);
}

#[test]
fn decoding_is_pure() {
    for drive in [SimDrive::ata(64), SimDrive::atapi()] {
        let packet = drive.identify()[0] & 0x8000 != 0;
        let first = DriveDescriptor::from_words(drive.identify(), packet).unwrap();
        let second = DriveDescriptor::from_words(drive.identify(), packet).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.is_ata(), !first.is_atapi_requested());
    }
}
