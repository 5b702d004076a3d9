//! Task-file register interface of one IDE channel
//!
//! [`ChannelLayout`] decides where the command and control blocks live
//! (legacy fixed ports or PCI native BARs); [`IdeIo`] owns the claimed
//! ranges and exposes each task-file register by name.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{
    IdeIoReg, IdeStatus, IDE_CTRL_OFFSET, IDE_NATIVE_ALTSTATUS_OFFSET, IDE_NR_CTRL_PORTS,
    IDE_NR_NATIVE_CTRL_PORTS, IDE_NR_PORTS, IDE_PRIMARY_IO, IDE_PRIMARY_IRQ, IDE_SECONDARY_IO,
    IDE_SECONDARY_IRQ, PACKET_SIGNATURE,
};
use crate::error::{IdeError, IdeResult};
use crate::pci::PciDeviceConfig;
use crate::resource::{IoResource, IoResourceManager};
use crate::time::Clock;

/// Port layout of a channel, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    pub primary: bool,
    pub cmd_base: u16,
    pub cmd_len: u16,
    pub ctrl_base: u16,
    pub ctrl_len: u16,
    /// Alt-status (read) / device control (write) port
    pub alt_status_port: u16,
    pub irq: u8,
    /// PCI native (enhanced) mode instead of legacy compatibility ports
    pub native: bool,
}

impl ChannelLayout {
    /// Compatibility mode: 0x1F0/0x3F6 on IRQ 14, 0x170/0x376 on IRQ 15
    pub fn legacy(primary: bool) -> Self {
        let cmd_base = if primary { IDE_PRIMARY_IO } else { IDE_SECONDARY_IO };
        let ctrl_base = cmd_base + IDE_CTRL_OFFSET;
        Self {
            primary,
            cmd_base,
            cmd_len: IDE_NR_PORTS,
            ctrl_base,
            ctrl_len: IDE_NR_CTRL_PORTS,
            alt_status_port: ctrl_base,
            irq: if primary { IDE_PRIMARY_IRQ } else { IDE_SECONDARY_IRQ },
            native: false,
        }
    }

    /// Native layout when the controller reports it, legacy otherwise
    pub fn from_pci(primary: bool, pci: Option<&PciDeviceConfig>) -> IdeResult<Self> {
        let config = match pci {
            Some(config) if config.is_native_mode() => config,
            _ => return Ok(Self::legacy(primary)),
        };

        let index = if primary { 0 } else { 2 };
        let cmd_base = config.io_base(index).ok_or(IdeError::InvalidParameter)?;
        let ctrl_base = config.io_base(index + 1).ok_or(IdeError::InvalidParameter)?;

        Ok(Self {
            primary,
            cmd_base,
            cmd_len: IDE_NR_PORTS,
            ctrl_base,
            ctrl_len: IDE_NR_NATIVE_CTRL_PORTS,
            alt_status_port: ctrl_base + IDE_NATIVE_ALTSTATUS_OFFSET,
            irq: config.interrupt_line,
            native: true,
        })
    }

    fn alt_status_offset(&self) -> u16 {
        self.alt_status_port - self.ctrl_base
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:#06x}/{:#06x} irq {} ({})",
            if self.primary { "primary" } else { "secondary" },
            self.cmd_base,
            self.alt_status_port,
            self.irq,
            if self.native { "native" } else { "compatibility" }
        )
    }
}

/// Owner of a channel's command and control blocks
pub struct IdeIo {
    layout: ChannelLayout,
    cmd: Box<dyn IoResource>,
    ctrl: Box<dyn IoResource>,
    clock: Arc<dyn Clock>,
    poll_interval_ms: u64,
    released: AtomicBool,
}

impl IdeIo {
    /// Claim both blocks of `layout`; nothing stays claimed on failure
    pub fn new(
        owner: &str,
        layout: ChannelLayout,
        io: &dyn IoResourceManager,
        clock: Arc<dyn Clock>,
        poll_interval_ms: u64,
    ) -> IdeResult<Self> {
        let cmd = io
            .claim_io(owner, layout.cmd_base, layout.cmd_len)
            .map_err(|_| IdeError::ResourceUnavailable)?;
        let ctrl = match io.claim_io(owner, layout.ctrl_base, layout.ctrl_len) {
            Ok(ctrl) => ctrl,
            Err(_) => {
                cmd.release();
                return Err(IdeError::ResourceUnavailable);
            }
        };

        Ok(Self {
            layout,
            cmd,
            ctrl,
            clock,
            poll_interval_ms: poll_interval_ms.max(1),
            released: AtomicBool::new(false),
        })
    }

    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    pub fn irq(&self) -> u8 {
        self.layout.irq
    }

    fn read(&self, reg: IdeIoReg) -> u8 {
        self.cmd.in_byte(reg as u16)
    }

    fn write(&self, reg: IdeIoReg, value: u8) {
        self.cmd.out_byte(reg as u16, value)
    }

    pub fn data(&self) -> u16 {
        self.cmd.in_word(IdeIoReg::Data as u16)
    }

    pub fn set_data(&self, word: u16) {
        self.cmd.out_word(IdeIoReg::Data as u16, word)
    }

    /// Fill `words` from the data register
    pub fn read_words(&self, words: &mut [u16]) {
        for word in words.iter_mut() {
            *word = self.data();
        }
    }

    pub fn write_words(&self, words: &[u16]) {
        for &word in words {
            self.set_data(word);
        }
    }

    pub fn error(&self) -> u8 {
        self.read(IdeIoReg::Features)
    }

    pub fn set_feature(&self, features: u8) {
        self.write(IdeIoReg::Features, features)
    }

    pub fn sector_count(&self) -> u8 {
        self.read(IdeIoReg::SectorCount)
    }

    pub fn set_sector_count(&self, count: u8) {
        self.write(IdeIoReg::SectorCount, count)
    }

    pub fn sector(&self) -> u8 {
        self.read(IdeIoReg::LbaLow)
    }

    pub fn set_sector(&self, sector: u8) {
        self.write(IdeIoReg::LbaLow, sector)
    }

    /// Cylinder low/high pair as one value
    pub fn cylinder(&self) -> u16 {
        let lsb = self.read(IdeIoReg::LbaMid);
        let msb = self.read(IdeIoReg::LbaHigh);
        u16::from_le_bytes([lsb, msb])
    }

    pub fn set_cylinder(&self, cylinder: u16) {
        let [lsb, msb] = cylinder.to_le_bytes();
        self.write(IdeIoReg::LbaMid, lsb);
        self.write(IdeIoReg::LbaHigh, msb);
    }

    pub fn lba_low(&self) -> u8 {
        self.read(IdeIoReg::LbaLow)
    }

    pub fn set_lba_low(&self, value: u8) {
        self.write(IdeIoReg::LbaLow, value)
    }

    pub fn lba_mid(&self) -> u8 {
        self.read(IdeIoReg::LbaMid)
    }

    pub fn set_lba_mid(&self, value: u8) {
        self.write(IdeIoReg::LbaMid, value)
    }

    pub fn lba_high(&self) -> u8 {
        self.read(IdeIoReg::LbaHigh)
    }

    pub fn set_lba_high(&self, value: u8) {
        self.write(IdeIoReg::LbaHigh, value)
    }

    pub fn select(&self) -> u8 {
        self.read(IdeIoReg::DriveHead)
    }

    pub fn set_select(&self, select: u8) {
        self.write(IdeIoReg::DriveHead, select)
    }

    /// Reading status acknowledges a pending interrupt
    pub fn status(&self) -> u8 {
        self.read(IdeIoReg::Status)
    }

    /// Status without acknowledging a pending interrupt
    pub fn alt_status(&self) -> u8 {
        self.ctrl.in_byte(self.layout.alt_status_offset())
    }

    pub fn set_command(&self, command: u8) {
        self.write(IdeIoReg::Status, command)
    }

    pub fn set_control(&self, control: u8) {
        self.ctrl.out_byte(self.layout.alt_status_offset(), control)
    }

    /// Sector count and LBA bytes, in task-file order
    pub fn signature(&self) -> [u8; 4] {
        [self.sector_count(), self.lba_low(), self.lba_mid(), self.lba_high()]
    }

    pub fn has_packet_signature(&self) -> bool {
        self.signature() == PACKET_SIGNATURE
    }

    pub fn is_busy(&self) -> bool {
        IdeStatus::from_bits_truncate(self.alt_status()).contains(IdeStatus::BSY)
    }

    /// Poll alt-status until BSY clears or `timeout_ms` is used up
    pub fn wait_until_not_busy(&self, timeout_ms: u64) -> IdeResult<()> {
        let mut remaining = timeout_ms;
        while self.is_busy() {
            if remaining == 0 {
                return Err(IdeError::Timeout);
            }
            let step = self.poll_interval_ms.min(remaining);
            self.clock.sleep_ms(step);
            remaining -= step;
        }
        Ok(())
    }

    /// Poll alt-status until the drive asks for data or reports an error
    pub fn wait_for_data_request(&self, timeout_ms: u64) -> IdeResult<IdeStatus> {
        let mut remaining = timeout_ms;
        loop {
            let status = IdeStatus::from_bits_truncate(self.alt_status());
            if !status.contains(IdeStatus::BSY)
                && status.intersects(IdeStatus::DRQ | IdeStatus::ERR | IdeStatus::DF)
            {
                return Ok(status);
            }
            if remaining == 0 {
                return Err(IdeError::Timeout);
            }
            let step = self.poll_interval_ms.min(remaining);
            self.clock.sleep_ms(step);
            remaining -= step;
        }
    }

    /// Give both port ranges back; later calls are no-ops
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cmd.release();
        self.ctrl.release();
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for IdeIo {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for IdeIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdeIo")
            .field("layout", &self.layout)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::storage::ide::{IdeOpcode, SECTOR_WORDS};
    use crate::pci::{PciDeviceConfig, CLASS_MASS_STORAGE, PCI_HEADER_SIZE, SUBCLASS_IDE};
    use crate::testing::sim::{SimDrive, SimPlatform};

    fn native_config() -> PciDeviceConfig {
        let mut raw = vec![0u8; PCI_HEADER_SIZE];
        raw[0..2].copy_from_slice(&0x8086u16.to_le_bytes());
        raw[0x09] = 0x8F;
        raw[0x0A] = SUBCLASS_IDE;
        raw[0x0B] = CLASS_MASS_STORAGE;
        for (index, bar) in [0xD001u32, 0xD101, 0xD201, 0xD301].iter().enumerate() {
            let offset = 0x10 + index * 4;
            raw[offset..offset + 4].copy_from_slice(&bar.to_le_bytes());
        }
        raw[0x3C] = 11;
        PciDeviceConfig::parse(&raw).unwrap()
    }

    #[test]
    fn legacy_layout_uses_fixed_ports() {
        let primary = ChannelLayout::legacy(true);
        assert_eq!((primary.cmd_base, primary.ctrl_base, primary.irq), (0x1F0, 0x3F6, 14));
        assert_eq!(primary.alt_status_port, 0x3F6);

        let secondary = ChannelLayout::from_pci(false, None).unwrap();
        assert_eq!((secondary.cmd_base, secondary.ctrl_base, secondary.irq), (0x170, 0x376, 15));
        assert!(!secondary.native);
    }

    #[test]
    fn native_layout_follows_bars() {
        let config = native_config();
        let primary = ChannelLayout::from_pci(true, Some(&config)).unwrap();
        assert!(primary.native);
        assert_eq!((primary.cmd_base, primary.ctrl_base), (0xD000, 0xD100));
        assert_eq!(primary.ctrl_len, 4);
        assert_eq!(primary.alt_status_port, 0xD102);
        assert_eq!(primary.irq, 11);

        let secondary = ChannelLayout::from_pci(false, Some(&config)).unwrap();
        assert_eq!((secondary.cmd_base, secondary.alt_status_port), (0xD200, 0xD302));
    }

    #[test]
    fn failed_control_claim_releases_command_block() {
        let sim = SimPlatform::new();
        let layout = ChannelLayout::legacy(true);
        sim.io().deny(layout.ctrl_base);

        let result = IdeIo::new("ide0", layout, sim.io().as_ref(), sim.platform().clock.clone(), 1);
        assert_eq!(result.err(), Some(IdeError::ResourceUnavailable));
        assert!(!sim.io().is_claimed(layout.cmd_base));
    }

    #[test]
    fn zero_timeout_busy_wait() {
        let sim = SimPlatform::new();
        let layout = ChannelLayout::legacy(true);
        let io = IdeIo::new("ide0", layout, sim.io().as_ref(), sim.platform().clock.clone(), 1).unwrap();
        sim.primary().attach(true, SimDrive::ata(64));

        sim.primary().set_busy(true);
        assert_eq!(io.wait_until_not_busy(0), Err(IdeError::Timeout));

        sim.primary().set_busy(false);
        assert_eq!(io.wait_until_not_busy(0), Ok(()));
    }

    #[test]
    fn only_status_acknowledges_interrupts() {
        let sim = SimPlatform::new();
        let channel = sim.primary();
        let io = IdeIo::new("ide0", ChannelLayout::legacy(true), sim.io().as_ref(), sim.platform().clock.clone(), 1)
            .unwrap();

        channel.assert_irq_line();
        io.alt_status();
        assert!(channel.irq_asserted());
        io.status();
        assert!(!channel.irq_asserted());
    }

    #[test]
    fn chs_accessors_share_the_lba_registers() {
        let sim = SimPlatform::new();
        sim.primary().attach(true, SimDrive::ata(64));
        let io = IdeIo::new("ide0", ChannelLayout::legacy(true), sim.io().as_ref(), sim.platform().clock.clone(), 1)
            .unwrap();
        io.set_select(0xA0);

        io.set_sector(0x12);
        assert_eq!(io.sector(), 0x12);
        assert_eq!(io.lba_low(), 0x12);

        io.set_cylinder(0xBEEF);
        assert_eq!(io.cylinder(), 0xBEEF);
        assert_eq!((io.lba_mid(), io.lba_high()), (0xEF, 0xBE));

        io.set_lba_mid(0x34);
        io.set_lba_high(0x12);
        assert_eq!(io.cylinder(), 0x1234);
    }

    #[test]
    fn write_words_fill_a_sector() {
        let sim = SimPlatform::new();
        let channel = sim.primary();
        channel.attach(true, SimDrive::ata(1024));
        let io = IdeIo::new("ide0", ChannelLayout::legacy(true), sim.io().as_ref(), sim.platform().clock.clone(), 1)
            .unwrap();

        // LBA 0x0103 through the sector and cylinder registers
        io.set_select(0xE0);
        io.set_sector_count(1);
        io.set_sector(0x03);
        io.set_cylinder(0x0001);
        io.set_command(IdeOpcode::WriteSectors as u8);
        let status = io.wait_for_data_request(100).unwrap();
        assert!(status.contains(IdeStatus::DRQ));

        let words: Vec<u16> = (0..SECTOR_WORDS as u16).map(|i| i.wrapping_mul(0x0101)).collect();
        io.write_words(&words);

        let expected: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).collect();
        assert_eq!(channel.sector(true, 0x0103), Some(expected));
        assert!(!io.is_busy());
        assert!(!IdeStatus::from_bits_truncate(io.alt_status()).contains(IdeStatus::DRQ));
    }

    #[test]
    fn release_is_idempotent() {
        let sim = SimPlatform::new();
        let layout = ChannelLayout::legacy(false);
        let io = IdeIo::new("ide1", layout, sim.io().as_ref(), sim.platform().clock.clone(), 1).unwrap();
        assert!(sim.io().is_claimed(layout.cmd_base));

        io.release();
        io.release();
        assert!(!sim.io().is_claimed(layout.cmd_base));
        assert!(!sim.io().is_claimed(layout.ctrl_base));
    }
}
