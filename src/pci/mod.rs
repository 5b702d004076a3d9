//! PCI configuration header decoding for IDE controllers
//!
//! Only the parts of a type-0 header the IDE channel layout depends on are
//! kept: identification, class codes, base address registers and the
//! interrupt line.

use core::fmt;

use crate::error::{IdeError, IdeResult};

/// PCI Configuration Registers
pub const PCI_VENDOR_ID: usize = 0x00;
pub const PCI_DEVICE_ID: usize = 0x02;
pub const PCI_PROG_IF: usize = 0x09;
pub const PCI_SUBCLASS: usize = 0x0A;
pub const PCI_CLASS: usize = 0x0B;
pub const PCI_HEADER_TYPE: usize = 0x0E;
pub const PCI_BAR0: usize = 0x10;
pub const PCI_INTERRUPT_LINE: usize = 0x3C;
pub const PCI_INTERRUPT_PIN: usize = 0x3D;

/// Size of the standard (type-0) header
pub const PCI_HEADER_SIZE: usize = 0x40;

pub const CLASS_MASS_STORAGE: u8 = 0x01;
pub const SUBCLASS_IDE: u8 = 0x01;

/// Prog-if bits: channel runs in native (PCI enhanced) mode
pub const PROG_IF_NATIVE_MASK: u8 = 0x01 | 0x04;
/// Prog-if bits: channel mode can be switched
pub const PROG_IF_PROGRAMMABLE_MASK: u8 = 0x02 | 0x08;

/// Base Address Register types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarType {
    Memory32,
    Memory64,
    Io,
    Unused,
}

/// Base Address Register information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarInfo {
    pub bar_type: BarType,
    pub base_address: u64,
    pub raw_value: u32,
}

impl BarInfo {
    /// Create a new BAR info from raw value
    pub fn from_raw(raw_value: u32) -> Self {
        if raw_value == 0 {
            return Self {
                bar_type: BarType::Unused,
                base_address: 0,
                raw_value,
            };
        }

        if (raw_value & 1) == 1 {
            Self {
                bar_type: BarType::Io,
                base_address: (raw_value & 0xFFFF_FFFC) as u64,
                raw_value,
            }
        } else {
            let bar_type = match (raw_value >> 1) & 0x3 {
                2 => BarType::Memory64,
                _ => BarType::Memory32,
            };
            Self {
                bar_type,
                base_address: (raw_value & 0xFFFF_FFF0) as u64,
                raw_value,
            }
        }
    }
}

/// Decoded configuration header of one PCI function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciDeviceConfig {
    pub vendor_id: u16,
    pub device_id: u16,
    pub class_code: u8,
    pub subclass: u8,
    pub prog_if: u8,
    pub header_type: u8,
    pub bars: [u32; 6],
    pub interrupt_line: u8,
    pub interrupt_pin: u8,
}

impl PciDeviceConfig {
    /// Decode a raw type-0 configuration header (little endian)
    pub fn parse(header: &[u8]) -> IdeResult<Self> {
        if header.len() < PCI_HEADER_SIZE {
            return Err(IdeError::InvalidParameter);
        }

        let read_u16 = |offset: usize| u16::from_le_bytes([header[offset], header[offset + 1]]);
        let read_u32 = |offset: usize| {
            u32::from_le_bytes([
                header[offset],
                header[offset + 1],
                header[offset + 2],
                header[offset + 3],
            ])
        };

        let vendor_id = read_u16(PCI_VENDOR_ID);
        if vendor_id == 0xFFFF {
            return Err(IdeError::DeviceNotFound);
        }

        let header_type = header[PCI_HEADER_TYPE] & 0x7F;
        if header_type != 0 {
            return Err(IdeError::NotSupported);
        }

        let mut bars = [0u32; 6];
        for (index, bar) in bars.iter_mut().enumerate() {
            *bar = read_u32(PCI_BAR0 + index * 4);
        }

        Ok(Self {
            vendor_id,
            device_id: read_u16(PCI_DEVICE_ID),
            class_code: header[PCI_CLASS],
            subclass: header[PCI_SUBCLASS],
            prog_if: header[PCI_PROG_IF],
            header_type,
            bars,
            interrupt_line: header[PCI_INTERRUPT_LINE],
            interrupt_pin: header[PCI_INTERRUPT_PIN],
        })
    }

    pub fn bar(&self, index: usize) -> Option<BarInfo> {
        self.bars.get(index).map(|raw| BarInfo::from_raw(*raw))
    }

    /// I/O port base of BAR `index`, if it is a non-empty I/O BAR
    pub fn io_base(&self, index: usize) -> Option<u16> {
        let bar = self.bar(index)?;
        if bar.bar_type != BarType::Io || bar.base_address == 0 {
            return None;
        }
        u16::try_from(bar.base_address).ok()
    }

    pub fn is_ide_controller(&self) -> bool {
        self.class_code == CLASS_MASS_STORAGE && self.subclass == SUBCLASS_IDE
    }

    /// Both channels run in native (PCI enhanced) mode
    pub fn is_native_mode(&self) -> bool {
        self.prog_if & PROG_IF_NATIVE_MASK == PROG_IF_NATIVE_MASK
    }

    /// Both channels can be switched between compatibility and native mode
    pub fn is_programmable(&self) -> bool {
        self.prog_if & PROG_IF_PROGRAMMABLE_MASK == PROG_IF_PROGRAMMABLE_MASK
    }
}

impl fmt::Display for PciDeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} class {:02x}.{:02x}.{:02x} irq {}",
            self.vendor_id, self.device_id, self.class_code, self.subclass, self.prog_if, self.interrupt_line
        )
    }
}
