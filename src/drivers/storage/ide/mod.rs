//! # IDE/PATA Storage Driver
//!
//! PIO task-file driver for legacy IDE channels. Each channel is run by an
//! [`bus::IdeBus`]; an [`controller::IdeController`] owns the primary and
//! secondary bus, probes the four possible targets and publishes the drives
//! it finds.

pub mod bus;
pub mod command;
pub mod config;
pub mod controller;
pub mod descriptor;
pub mod device;
pub mod regs;

/// Legacy command block of the primary channel
pub const IDE_PRIMARY_IO: u16 = 0x1F0;
/// Legacy command block of the secondary channel
pub const IDE_SECONDARY_IO: u16 = 0x170;
/// Control block distance from the command block in compatibility mode
pub const IDE_CTRL_OFFSET: u16 = 0x206;

pub const IDE_PRIMARY_IRQ: u8 = 14;
pub const IDE_SECONDARY_IRQ: u8 = 15;

/// Ports in a command block
pub const IDE_NR_PORTS: u16 = 8;
/// Ports in a legacy control block
pub const IDE_NR_CTRL_PORTS: u16 = 1;
/// Ports in a native (PCI enhanced) control block
pub const IDE_NR_NATIVE_CTRL_PORTS: u16 = 4;
/// Alt-status/device-control offset inside a native control block
pub const IDE_NATIVE_ALTSTATUS_OFFSET: u16 = 2;

/// Words in an IDENTIFY response
pub const IDENTIFY_WORDS: usize = 256;
/// Words per PIO sector transfer
pub const SECTOR_WORDS: usize = 256;
/// Largest sector count a single read/write command carries
pub const MAX_SECTORS_PER_COMMAND: usize = 256;
/// Highest LBA reachable with 28-bit addressing
pub const LBA28_MAX: u64 = 0x0FFF_FFFF;

/// IDE I/O port registers (relative to the command block base)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum IdeIoReg {
    Data = 0,        // Data port (16 bit)
    Features = 1,    // Error (read) / Features (write)
    SectorCount = 2, // Sector count
    LbaLow = 3,      // Sector number / LBA bits 0-7
    LbaMid = 4,      // Cylinder low / LBA bits 8-15
    LbaHigh = 5,     // Cylinder high / LBA bits 16-23
    DriveHead = 6,   // Drive/Head select
    Status = 7,      // Status (read) / Command (write)
}

bitflags::bitflags! {
    /// IDE status register bits
    pub struct IdeStatus: u8 {
        const ERR = 1 << 0;     // Error
        const IDX = 1 << 1;     // Index (obsolete)
        const CORR = 1 << 2;    // Corrected data (obsolete)
        const DRQ = 1 << 3;     // Data request
        const DSC = 1 << 4;     // Drive seek complete
        const DF = 1 << 5;      // Drive fault
        const DRDY = 1 << 6;    // Drive ready
        const BSY = 1 << 7;     // Busy
    }
}

bitflags::bitflags! {
    /// IDE error register bits
    pub struct IdeErrorReg: u8 {
        const AMNF = 1 << 0;    // Address mark not found
        const TK0NF = 1 << 1;   // Track 0 not found
        const ABRT = 1 << 2;    // Aborted command
        const MCR = 1 << 3;     // Media change request
        const IDNF = 1 << 4;    // ID not found
        const MC = 1 << 5;      // Media changed
        const UNC = 1 << 6;     // Uncorrectable data error
        const BBK = 1 << 7;     // Bad block detected
    }
}

bitflags::bitflags! {
    /// IDE device control register bits
    pub struct IdeDevCtrl: u8 {
        const NIEN = 1 << 1;    // Disable interrupts
        const SRST = 1 << 2;    // Software reset
        const HOB = 1 << 7;     // High Order Byte (48-bit LBA)
    }
}

/// IDE command opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IdeOpcode {
    ReadSectors = 0x20,
    ReadSectorsExt = 0x24,
    WriteSectors = 0x30,
    WriteSectorsExt = 0x34,
    IdentifyPacketDevice = 0xA1,
    IdentifyDevice = 0xEC,
}

/// Task-file contents left behind by a packet device that refused ATA IDENTIFY
pub const PACKET_SIGNATURE: [u8; 4] = [0x01, 0x01, 0x14, 0xEB];

/// Human readable target name, e.g. "primary master"
pub fn target_name(primary: bool, master: bool) -> &'static str {
    match (primary, master) {
        (true, true) => "primary master",
        (true, false) => "primary slave",
        (false, true) => "secondary master",
        (false, false) => "secondary slave",
    }
}
