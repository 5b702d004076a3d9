//! Simulated IDE channels
//!
//! [`SimChannel`] models the task file of one channel with up to two
//! drives behind it: register latching (including the 48-bit high-order
//! bytes), IDENTIFY and IDENTIFY PACKET responses, PIO sector transfers,
//! SRST and the interrupt line. Interrupts go through an
//! [`IrqDispatcher`], either from a delivery thread ([`IrqMode::Auto`]) or
//! when a test calls [`SimChannel::fire_irq`] ([`IrqMode::Manual`]).

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use spin::Mutex;

use crate::drivers::storage::ide::regs::ChannelLayout;
use crate::drivers::storage::ide::{
    IdeDevCtrl, IdeErrorReg, IdeIoReg, IdeOpcode, IdeStatus, IDENTIFY_WORDS, LBA28_MAX,
    PACKET_SIGNATURE,
};
use crate::drivers::storage::SECTOR_SIZE;
use crate::error::{IdeError, IdeResult};
use crate::logging::{LogLevel, Logger, MemoryLogOutput, MemoryLogReader};
use crate::platform::Platform;
use crate::resource::{IoResource, IoResourceManager, IrqDispatcher};
use crate::time::SystemClock;

/// How raised interrupts reach the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqMode {
    /// A delivery thread dispatches every raised interrupt
    Auto,
    /// Raised interrupts wait for [`SimChannel::fire_irq`]
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimDriveKind {
    Ata,
    Atapi,
}

/// Store `text` as identify words, high byte first, space padded
pub fn put_ascii(words: &mut [u16], start: usize, len: usize, text: &str) {
    let mut bytes = text.as_bytes().to_vec();
    bytes.resize(len * 2, b' ');
    for (i, pair) in bytes.chunks(2).take(len).enumerate() {
        words[start + i] = u16::from_be_bytes([pair[0], pair[1]]);
    }
}

/// A drive behind a simulated channel, with sparse sector storage
#[derive(Debug, Clone)]
pub struct SimDrive {
    kind: SimDriveKind,
    identify: [u16; IDENTIFY_WORDS],
    capacity: u64,
    sectors: BTreeMap<u64, Vec<u8>>,
}

impl SimDrive {
    /// LBA-capable ATA disk with `capacity` sectors (28-bit)
    pub fn ata(capacity: u64) -> Self {
        let capacity = capacity.min(LBA28_MAX + 1);
        let mut identify = [0u16; IDENTIFY_WORDS];
        identify[0] = 0x0040;
        identify[49] = (1 << 9) | (1 << 8);
        identify[60] = capacity as u16;
        identify[61] = (capacity >> 16) as u16;
        put_ascii(&mut identify, 10, 10, "SIM00001");
        put_ascii(&mut identify, 23, 4, "1.0");
        put_ascii(&mut identify, 27, 20, "RustOS SIM ATA DISK");

        Self {
            kind: SimDriveKind::Ata,
            identify,
            capacity,
            sectors: BTreeMap::new(),
        }
    }

    /// ATA disk reporting the 48-bit feature set and count
    pub fn ata_lba48(capacity: u64) -> Self {
        let mut drive = Self::ata(capacity);
        drive.identify[83] |= 1 << 6;
        for i in 0..4 {
            drive.identify[100 + i] = (capacity >> (16 * i)) as u16;
        }
        drive.capacity = capacity;
        drive
    }

    /// Removable ATAPI drive
    pub fn atapi() -> Self {
        let mut identify = [0u16; IDENTIFY_WORDS];
        identify[0] = 0x85C0;
        identify[49] = 1 << 9;
        put_ascii(&mut identify, 10, 10, "SIMCD0001");
        put_ascii(&mut identify, 23, 4, "2.5");
        put_ascii(&mut identify, 27, 20, "RustOS SIM DVD-ROM");

        Self {
            kind: SimDriveKind::Atapi,
            identify,
            capacity: 0,
            sectors: BTreeMap::new(),
        }
    }

    pub fn with_identify(mut self, identify: [u16; IDENTIFY_WORDS]) -> Self {
        self.identify = identify;
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        put_ascii(&mut self.identify, 27, 20, model);
        self
    }

    pub fn kind(&self) -> SimDriveKind {
        self.kind
    }

    pub fn identify(&self) -> &[u16; IDENTIFY_WORDS] {
        &self.identify
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Sector contents; never written sectors read as zeros
    pub fn sector(&self, lba: u64) -> Vec<u8> {
        self.sectors
            .get(&lba)
            .cloned()
            .unwrap_or_else(|| vec![0u8; SECTOR_SIZE])
    }

    pub fn set_sector(&mut self, lba: u64, data: &[u8]) {
        let mut sector = vec![0u8; SECTOR_SIZE];
        let len = data.len().min(SECTOR_SIZE);
        sector[..len].copy_from_slice(&data[..len]);
        self.sectors.insert(lba, sector);
    }
}

/// Register that keeps the previous write for 48-bit high-order bytes
#[derive(Debug, Clone, Copy, Default)]
struct Latch {
    current: u8,
    previous: u8,
}

impl Latch {
    fn write(&mut self, value: u8) {
        self.previous = self.current;
        self.current = value;
    }

    fn set(&mut self, value: u8) {
        self.previous = 0;
        self.current = value;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TaskFile {
    feature: u8,
    sector_count: Latch,
    lba_low: Latch,
    lba_mid: Latch,
    lba_high: Latch,
    select: u8,
}

impl TaskFile {
    fn set_signature(&mut self, signature: [u8; 4]) {
        self.sector_count.set(signature[0]);
        self.lba_low.set(signature[1]);
        self.lba_mid.set(signature[2]);
        self.lba_high.set(signature[3]);
    }

    fn address28(&self) -> (u64, u64) {
        let lba = u64::from(self.lba_low.current)
            | u64::from(self.lba_mid.current) << 8
            | u64::from(self.lba_high.current) << 16
            | u64::from(self.select & 0x0F) << 24;
        let count = match self.sector_count.current {
            0 => 256,
            count => u64::from(count),
        };
        (lba, count)
    }

    fn address48(&self) -> (u64, u64) {
        let lba = u64::from(self.lba_low.current)
            | u64::from(self.lba_mid.current) << 8
            | u64::from(self.lba_high.current) << 16
            | u64::from(self.lba_low.previous) << 24
            | u64::from(self.lba_mid.previous) << 32
            | u64::from(self.lba_high.previous) << 40;
        let count = match u64::from(self.sector_count.current) | u64::from(self.sector_count.previous) << 8 {
            0 => 65536,
            count => count,
        };
        (lba, count)
    }
}

#[derive(Debug, Clone)]
enum Transfer {
    Idle,
    Identify,
    Read { lba: u64, remaining: u64 },
    Write { lba: u64, remaining: u64, buffer: Vec<u8> },
}

struct ChannelState {
    drives: [Option<SimDrive>; 2],
    task: TaskFile,
    status: u8,
    error: u8,
    control: u8,
    data_out: VecDeque<u16>,
    transfer: Transfer,
    hang_commands: usize,
    hung: bool,
    forced_busy: bool,
    srst_asserted: bool,
    irq_asserted: bool,
    command_log: Vec<u8>,
    control_log: Vec<u8>,
    resets: usize,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            drives: [None, None],
            task: TaskFile {
                select: 0xA0,
                ..TaskFile::default()
            },
            status: IdeStatus::DRDY.bits(),
            error: 0,
            control: 0,
            data_out: VecDeque::new(),
            transfer: Transfer::Idle,
            hang_commands: 0,
            hung: false,
            forced_busy: false,
            srst_asserted: false,
            irq_asserted: false,
            command_log: Vec::new(),
            control_log: Vec::new(),
            resets: 0,
        }
    }

    fn selected(&self) -> usize {
        usize::from((self.task.select >> 4) & 1)
    }

    fn selected_present(&self) -> bool {
        self.drives[self.selected()].is_some()
    }

    /// What an absent drive's registers read as
    fn floating(&self) -> u8 {
        if self.drives.iter().any(Option::is_some) {
            0x00
        } else {
            0xFF
        }
    }

    fn status_value(&self) -> u8 {
        if self.srst_asserted || self.hung || self.forced_busy {
            self.status | IdeStatus::BSY.bits()
        } else {
            self.status
        }
    }

    fn abort_command(&mut self, error: IdeErrorReg) -> bool {
        self.status = (IdeStatus::DRDY | IdeStatus::ERR).bits();
        self.error = error.bits();
        self.transfer = Transfer::Idle;
        true
    }

    fn load_sector(&mut self, lba: u64) {
        let sector = self.drives[self.selected()]
            .as_ref()
            .map(|drive| drive.sector(lba))
            .unwrap_or_else(|| vec![0u8; SECTOR_SIZE]);
        self.data_out = sector
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        self.status = (IdeStatus::DRDY | IdeStatus::DRQ).bits();
    }

    /// Run a command; returns whether the drive raises an interrupt
    fn execute(&mut self, opcode: u8) -> bool {
        self.command_log.push(opcode);

        let drive = self.selected();
        let kind = match &self.drives[drive] {
            Some(sim) => sim.kind(),
            None => return false,
        };
        if self.hang_commands > 0 {
            self.hang_commands -= 1;
            self.hung = true;
            return false;
        }

        self.error = 0;
        self.data_out.clear();
        self.transfer = Transfer::Idle;

        let identify_words = |state: &ChannelState| -> VecDeque<u16> {
            state.drives[drive]
                .as_ref()
                .map(|sim| sim.identify().iter().copied().collect())
                .unwrap_or_default()
        };

        match (opcode, kind) {
            (op, SimDriveKind::Ata) if op == IdeOpcode::IdentifyDevice as u8 => {
                self.data_out = identify_words(self);
                self.transfer = Transfer::Identify;
                self.status = (IdeStatus::DRDY | IdeStatus::DRQ).bits();
                true
            }
            (op, SimDriveKind::Atapi) if op == IdeOpcode::IdentifyDevice as u8 => {
                self.task.set_signature(PACKET_SIGNATURE);
                self.abort_command(IdeErrorReg::ABRT)
            }
            (op, SimDriveKind::Atapi) if op == IdeOpcode::IdentifyPacketDevice as u8 => {
                self.data_out = identify_words(self);
                self.transfer = Transfer::Identify;
                self.status = (IdeStatus::DRDY | IdeStatus::DRQ).bits();
                true
            }
            (op, SimDriveKind::Ata)
                if op == IdeOpcode::ReadSectors as u8 || op == IdeOpcode::ReadSectorsExt as u8 =>
            {
                let (lba, count) = if op == IdeOpcode::ReadSectorsExt as u8 {
                    self.task.address48()
                } else {
                    self.task.address28()
                };
                if !self.in_range(lba, count) {
                    return self.abort_command(IdeErrorReg::IDNF);
                }
                self.transfer = Transfer::Read { lba, remaining: count };
                self.load_sector(lba);
                true
            }
            (op, SimDriveKind::Ata)
                if op == IdeOpcode::WriteSectors as u8 || op == IdeOpcode::WriteSectorsExt as u8 =>
            {
                let (lba, count) = if op == IdeOpcode::WriteSectorsExt as u8 {
                    self.task.address48()
                } else {
                    self.task.address28()
                };
                if !self.in_range(lba, count) {
                    return self.abort_command(IdeErrorReg::IDNF);
                }
                self.transfer = Transfer::Write {
                    lba,
                    remaining: count,
                    buffer: Vec::with_capacity(SECTOR_SIZE),
                };
                self.status = (IdeStatus::DRDY | IdeStatus::DRQ).bits();
                false
            }
            _ => self.abort_command(IdeErrorReg::ABRT),
        }
    }

    fn in_range(&self, lba: u64, count: u64) -> bool {
        self.drives[self.selected()]
            .as_ref()
            .map_or(false, |drive| lba + count <= drive.capacity())
    }

    /// A data word left the drive; returns whether it raises an interrupt
    fn data_read(&mut self) -> (u16, bool) {
        let word = match self.data_out.pop_front() {
            Some(word) => word,
            None => return (0xFFFF, false),
        };
        if !self.data_out.is_empty() {
            return (word, false);
        }

        match self.transfer.clone() {
            Transfer::Read { lba, remaining } if remaining > 1 => {
                self.transfer = Transfer::Read {
                    lba: lba + 1,
                    remaining: remaining - 1,
                };
                self.load_sector(lba + 1);
                (word, true)
            }
            _ => {
                self.transfer = Transfer::Idle;
                self.status = IdeStatus::DRDY.bits();
                (word, false)
            }
        }
    }

    /// A data word reached the drive; returns whether it raises an interrupt
    fn data_written(&mut self, word: u16) -> bool {
        let (lba, remaining, mut buffer) = match std::mem::replace(&mut self.transfer, Transfer::Idle) {
            Transfer::Write { lba, remaining, buffer } => (lba, remaining, buffer),
            other => {
                self.transfer = other;
                return false;
            }
        };

        buffer.extend_from_slice(&word.to_le_bytes());
        if buffer.len() < SECTOR_SIZE {
            self.transfer = Transfer::Write { lba, remaining, buffer };
            return false;
        }

        let drive = self.selected();
        if let Some(sim) = self.drives[drive].as_mut() {
            sim.set_sector(lba, &buffer);
        }

        if remaining > 1 {
            self.transfer = Transfer::Write {
                lba: lba + 1,
                remaining: remaining - 1,
                buffer: Vec::with_capacity(SECTOR_SIZE),
            };
            self.status = (IdeStatus::DRDY | IdeStatus::DRQ).bits();
        } else {
            self.status = IdeStatus::DRDY.bits();
        }
        true
    }

    fn control_written(&mut self, value: u8) {
        self.control_log.push(value);
        let control = IdeDevCtrl::from_bits_truncate(value);
        if control.contains(IdeDevCtrl::SRST) {
            self.srst_asserted = true;
        } else if self.srst_asserted {
            self.srst_asserted = false;
            self.reset();
        }
        self.control = value;
    }

    fn reset(&mut self) {
        self.resets += 1;
        self.hung = false;
        self.transfer = Transfer::Idle;
        self.data_out.clear();
        self.irq_asserted = false;
        self.error = 0x01;
        self.status = IdeStatus::DRDY.bits();
        self.task.select = 0xA0;
        let signature = match &self.drives[0] {
            Some(drive) if drive.kind() == SimDriveKind::Atapi => PACKET_SIGNATURE,
            _ => [0x01, 0x01, 0x00, 0x00],
        };
        self.task.set_signature(signature);
    }
}

/// One simulated channel with its interrupt line
pub struct SimChannel {
    layout: ChannelLayout,
    state: Mutex<ChannelState>,
    dispatcher: IrqDispatcher,
    mode: IrqMode,
    delivery: Mutex<Option<mpsc::Sender<()>>>,
    pending: AtomicUsize,
    raised: AtomicUsize,
}

impl SimChannel {
    pub fn new(layout: ChannelLayout, dispatcher: IrqDispatcher, mode: IrqMode) -> Arc<Self> {
        let delivery = match mode {
            IrqMode::Auto => {
                let (sender, receiver) = mpsc::channel::<()>();
                let dispatcher = dispatcher.clone();
                let irq = layout.irq;
                let spawned = thread::Builder::new()
                    .name(format!("sim-irq{}", irq))
                    .spawn(move || {
                        while receiver.recv().is_ok() {
                            dispatcher.dispatch(irq);
                        }
                    });
                spawned.ok().map(|_| sender)
            }
            IrqMode::Manual => None,
        };

        Arc::new(Self {
            layout,
            state: Mutex::new(ChannelState::new()),
            dispatcher,
            mode,
            delivery: Mutex::new(delivery),
            pending: AtomicUsize::new(0),
            raised: AtomicUsize::new(0),
        })
    }

    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    pub fn mode(&self) -> IrqMode {
        self.mode
    }

    pub fn attach(&self, master: bool, drive: SimDrive) {
        self.state.lock().drives[if master { 0 } else { 1 }] = Some(drive);
    }

    pub fn detach(&self, master: bool) -> Option<SimDrive> {
        self.state.lock().drives[if master { 0 } else { 1 }].take()
    }

    pub fn drive(&self, master: bool) -> Option<SimDrive> {
        self.state.lock().drives[if master { 0 } else { 1 }].clone()
    }

    pub fn sector(&self, master: bool, lba: u64) -> Option<Vec<u8>> {
        self.state.lock().drives[if master { 0 } else { 1 }]
            .as_ref()
            .map(|drive| drive.sector(lba))
    }

    pub fn write_sector(&self, master: bool, lba: u64, data: &[u8]) {
        if let Some(drive) = self.state.lock().drives[if master { 0 } else { 1 }].as_mut() {
            drive.set_sector(lba, data);
        }
    }

    /// Hold BSY regardless of command state
    pub fn set_busy(&self, busy: bool) {
        self.state.lock().forced_busy = busy;
    }

    /// The next `count` commands leave the drive busy with no interrupt until SRST
    pub fn hang_next_commands(&self, count: usize) {
        self.state.lock().hang_commands = count;
    }

    /// Latch the interrupt line without delivering anything
    pub fn assert_irq_line(&self) {
        self.state.lock().irq_asserted = true;
    }

    pub fn irq_asserted(&self) -> bool {
        self.state.lock().irq_asserted
    }

    /// Opcodes written to the command register, oldest first
    pub fn command_log(&self) -> Vec<u8> {
        self.state.lock().command_log.clone()
    }

    /// Values written to the device control register, oldest first
    pub fn control_log(&self) -> Vec<u8> {
        self.state.lock().control_log.clone()
    }

    pub fn clear_logs(&self) {
        let mut state = self.state.lock();
        state.command_log.clear();
        state.control_log.clear();
    }

    pub fn reset_count(&self) -> usize {
        self.state.lock().resets
    }

    pub fn raised_irqs(&self) -> usize {
        self.raised.load(Ordering::SeqCst)
    }

    /// Raised interrupts not yet delivered (manual mode)
    pub fn pending_irqs(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Dispatch the channel's interrupt, pending or not
    pub fn fire_irq(&self) -> bool {
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| pending.checked_sub(1));
        self.dispatcher.dispatch(self.layout.irq)
    }

    /// Deliver every pending interrupt, including ones raised while delivering
    pub fn deliver_pending(&self) -> usize {
        let mut delivered = 0;
        while self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| pending.checked_sub(1))
            .is_ok()
        {
            self.dispatcher.dispatch(self.layout.irq);
            delivered += 1;
        }
        delivered
    }

    /// Called with the state lock held
    fn raise_irq(&self, state: &mut ChannelState) {
        if IdeDevCtrl::from_bits_truncate(state.control).contains(IdeDevCtrl::NIEN) {
            return;
        }
        state.irq_asserted = true;
        self.raised.fetch_add(1, Ordering::SeqCst);

        match self.mode {
            IrqMode::Auto => {
                if let Some(sender) = self.delivery.lock().as_ref() {
                    let _ = sender.send(());
                }
            }
            IrqMode::Manual => {
                self.pending.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn read_command_block(&self, offset: u16) -> u8 {
        let mut state = self.state.lock();
        if offset == IdeIoReg::Status as u16 {
            state.irq_asserted = false;
        }
        if !state.selected_present() {
            return state.floating();
        }

        match offset {
            o if o == IdeIoReg::Features as u16 => state.error,
            o if o == IdeIoReg::SectorCount as u16 => state.task.sector_count.current,
            o if o == IdeIoReg::LbaLow as u16 => state.task.lba_low.current,
            o if o == IdeIoReg::LbaMid as u16 => state.task.lba_mid.current,
            o if o == IdeIoReg::LbaHigh as u16 => state.task.lba_high.current,
            o if o == IdeIoReg::DriveHead as u16 => state.task.select,
            o if o == IdeIoReg::Status as u16 => state.status_value(),
            _ => 0xFF,
        }
    }

    fn write_command_block(&self, offset: u16, value: u8) {
        let mut state = self.state.lock();
        match offset {
            o if o == IdeIoReg::Features as u16 => state.task.feature = value,
            o if o == IdeIoReg::SectorCount as u16 => state.task.sector_count.write(value),
            o if o == IdeIoReg::LbaLow as u16 => state.task.lba_low.write(value),
            o if o == IdeIoReg::LbaMid as u16 => state.task.lba_mid.write(value),
            o if o == IdeIoReg::LbaHigh as u16 => state.task.lba_high.write(value),
            o if o == IdeIoReg::DriveHead as u16 => state.task.select = value,
            o if o == IdeIoReg::Status as u16 => {
                if state.execute(value) {
                    self.raise_irq(&mut state);
                }
            }
            _ => {}
        }
    }

    fn read_data(&self) -> u16 {
        let mut state = self.state.lock();
        if !state.selected_present() {
            return u16::from(state.floating()) * 0x0101;
        }
        let (word, raise) = state.data_read();
        if raise {
            self.raise_irq(&mut state);
        }
        word
    }

    fn write_data(&self, word: u16) {
        let mut state = self.state.lock();
        if !state.selected_present() {
            return;
        }
        if state.data_written(word) {
            self.raise_irq(&mut state);
        }
    }

    fn alt_status_offset(&self) -> u16 {
        self.layout.alt_status_port - self.layout.ctrl_base
    }

    fn read_control_block(&self, offset: u16) -> u8 {
        if offset != self.alt_status_offset() {
            return 0xFF;
        }
        let state = self.state.lock();
        if !state.selected_present() {
            return state.floating();
        }
        state.status_value()
    }

    fn write_control_block(&self, offset: u16, value: u8) {
        if offset == self.alt_status_offset() {
            self.state.lock().control_written(value);
        }
    }
}

impl Drop for SimChannel {
    fn drop(&mut self) {
        // Ends the delivery thread
        self.delivery.lock().take();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Command,
    Control,
    Floating,
}

#[derive(Debug, Clone)]
struct SimClaim {
    id: u64,
    owner: String,
    base: u16,
    len: u16,
}

/// Port arbiter backed by simulated channels
pub struct SimResourceManager {
    channels: Vec<Arc<SimChannel>>,
    claims: Arc<Mutex<Vec<SimClaim>>>,
    denied: Mutex<Vec<u16>>,
    next_id: AtomicU64,
}

impl SimResourceManager {
    pub fn new(channels: Vec<Arc<SimChannel>>) -> Self {
        Self {
            channels,
            claims: Arc::new(Mutex::new(Vec::new())),
            denied: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Refuse every claim starting at `base`
    pub fn deny(&self, base: u16) {
        self.denied.lock().push(base);
    }

    pub fn allow(&self, base: u16) {
        self.denied.lock().retain(|denied| *denied != base);
    }

    /// Whether `port` lies inside a live claim
    pub fn is_claimed(&self, port: u16) -> bool {
        self.owner_of(port).is_some()
    }

    pub fn owner_of(&self, port: u16) -> Option<String> {
        self.claims
            .lock()
            .iter()
            .find(|claim| port >= claim.base && u32::from(port) < u32::from(claim.base) + u32::from(claim.len))
            .map(|claim| claim.owner.clone())
    }

    pub fn claim_count(&self) -> usize {
        self.claims.lock().len()
    }

    fn backing(&self, base: u16) -> (Block, Option<Arc<SimChannel>>) {
        for channel in &self.channels {
            if channel.layout().cmd_base == base {
                return (Block::Command, Some(channel.clone()));
            }
            if channel.layout().ctrl_base == base {
                return (Block::Control, Some(channel.clone()));
            }
        }
        (Block::Floating, None)
    }
}

impl IoResourceManager for SimResourceManager {
    fn claim_io(&self, owner: &str, base: u16, len: u16) -> IdeResult<Box<dyn IoResource>> {
        if self.denied.lock().contains(&base) {
            return Err(IdeError::ResourceUnavailable);
        }

        let mut claims = self.claims.lock();
        let end = u32::from(base) + u32::from(len);
        let overlaps = claims.iter().any(|claim| {
            let claim_end = u32::from(claim.base) + u32::from(claim.len);
            u32::from(base) < claim_end && u32::from(claim.base) < end
        });
        if overlaps {
            return Err(IdeError::ResourceUnavailable);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        claims.push(SimClaim {
            id,
            owner: owner.to_string(),
            base,
            len,
        });

        let (block, channel) = self.backing(base);
        Ok(Box::new(SimPort {
            id,
            base,
            len,
            block,
            channel,
            claims: self.claims.clone(),
            released: AtomicBool::new(false),
        }))
    }
}

struct SimPort {
    id: u64,
    base: u16,
    len: u16,
    block: Block,
    channel: Option<Arc<SimChannel>>,
    claims: Arc<Mutex<Vec<SimClaim>>>,
    released: AtomicBool,
}

impl IoResource for SimPort {
    fn base(&self) -> u16 {
        self.base
    }

    fn len(&self) -> u16 {
        self.len
    }

    fn in_byte(&self, offset: u16) -> u8 {
        match (self.block, &self.channel) {
            (Block::Command, Some(channel)) => channel.read_command_block(offset),
            (Block::Control, Some(channel)) => channel.read_control_block(offset),
            _ => 0xFF,
        }
    }

    fn out_byte(&self, offset: u16, value: u8) {
        match (self.block, &self.channel) {
            (Block::Command, Some(channel)) => channel.write_command_block(offset, value),
            (Block::Control, Some(channel)) => channel.write_control_block(offset, value),
            _ => {}
        }
    }

    fn in_word(&self, offset: u16) -> u16 {
        match (self.block, &self.channel) {
            (Block::Command, Some(channel)) if offset == IdeIoReg::Data as u16 => channel.read_data(),
            _ => 0xFFFF,
        }
    }

    fn out_word(&self, offset: u16, value: u16) {
        if let (Block::Command, Some(channel)) = (self.block, &self.channel) {
            if offset == IdeIoReg::Data as u16 {
                channel.write_data(value);
            }
        }
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.claims.lock().retain(|claim| claim.id != self.id);
    }
}

impl Drop for SimPort {
    fn drop(&mut self) {
        self.release();
    }
}

/// Two simulated channels wired into a [`Platform`]
pub struct SimPlatform {
    platform: Platform,
    io: Arc<SimResourceManager>,
    irq: IrqDispatcher,
    primary: Arc<SimChannel>,
    secondary: Arc<SimChannel>,
    log: MemoryLogReader,
}

impl SimPlatform {
    /// Legacy layout, interrupts delivered automatically
    pub fn new() -> Self {
        Self::with_irq_mode(IrqMode::Auto)
    }

    pub fn with_irq_mode(mode: IrqMode) -> Self {
        Self::with_layouts(ChannelLayout::legacy(true), ChannelLayout::legacy(false), mode)
    }

    pub fn with_layouts(primary: ChannelLayout, secondary: ChannelLayout, mode: IrqMode) -> Self {
        let irq = IrqDispatcher::new();
        let primary = SimChannel::new(primary, irq.clone(), mode);
        let secondary = SimChannel::new(secondary, irq.clone(), mode);
        let io = Arc::new(SimResourceManager::new(vec![primary.clone(), secondary.clone()]));

        let logger = Logger::new();
        logger.set_min_level(LogLevel::Debug);
        let output = MemoryLogOutput::new(4096);
        let log = output.reader();
        logger.add_output(Box::new(output));

        let platform = Platform::new(io.clone(), Arc::new(irq.clone()), Arc::new(SystemClock::new()), logger);

        Self {
            platform,
            io,
            irq,
            primary,
            secondary,
            log,
        }
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn io(&self) -> &Arc<SimResourceManager> {
        &self.io
    }

    pub fn irq(&self) -> &IrqDispatcher {
        &self.irq
    }

    pub fn primary(&self) -> &Arc<SimChannel> {
        &self.primary
    }

    pub fn secondary(&self) -> &Arc<SimChannel> {
        &self.secondary
    }

    pub fn channel(&self, primary: bool) -> &Arc<SimChannel> {
        if primary {
            &self.primary
        } else {
            &self.secondary
        }
    }

    pub fn log(&self) -> &MemoryLogReader {
        &self.log
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}
