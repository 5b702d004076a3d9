//! Commands executed by an IDE bus
//!
//! Every command runs in two phases: [`IdeCommand::setup`] programs the
//! task file and issues the opcode from the bus worker, then
//! [`IdeCommand::handle_irq`] is called once per interrupt until the
//! command reports completion. Completion (success, hardware error or a
//! forced abort) happens exactly once and wakes every waiter.
//!
//! The payload and the completion state sit behind separate locks. Status
//! polling never runs with either held, so the interrupt path and the
//! waiters only ever block for a register access.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::config::IdeConfig;
use super::descriptor::DriveDescriptor;
use super::regs::IdeIo;
use super::{
    IdeOpcode, IdeStatus, IDENTIFY_WORDS, LBA28_MAX, MAX_SECTORS_PER_COMMAND, SECTOR_WORDS,
};
use crate::drivers::storage::SECTOR_SIZE;
use crate::error::{IdeError, IdeResult};

/// Highest sector number reachable with 48-bit addressing, plus one
const LBA48_LIMIT: u64 = 1 << 48;

/// Drive-select register value for a target, without LBA mode
pub fn select_byte(master: bool) -> u8 {
    0xA0 | if master { 0x00 } else { 0x10 }
}

/// Terminal error of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Forced completion after a timeout or shutdown
    Abort,
    /// The drive set ERR; register contents at that moment
    HardwareAbort { status: u8, error: u8 },
}

impl From<ErrorCode> for IdeError {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Abort => IdeError::Timeout,
            ErrorCode::HardwareAbort { status, error } => IdeError::HardwareAbort { status, error },
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Abort => write!(f, "aborted"),
            ErrorCode::HardwareAbort { status, error } => {
                write!(f, "hardware abort (status={:#04x}, error={:#04x})", status, error)
            }
        }
    }
}

/// Outcome of one protocol step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Wait for another interrupt
    Pending,
    Complete,
    Failed(ErrorCode),
}

/// Target addressing shared by every command kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub primary: bool,
    pub master: bool,
}

/// The two-phase contract each command kind implements
///
/// Selecting the drive and waiting for BSY to clear is done by the caller
/// before [`Protocol::issue`]; none of these methods may wait on the drive.
pub trait Protocol {
    /// How long the selected drive may stay busy before the command is dropped
    fn ready_timeout(&self, config: &IdeConfig) -> u64;

    /// Program the task file and write the command register
    fn issue(&mut self, target: Target, io: &IdeIo) -> IdeResult<Progress>;

    /// Whether the first data block goes out on DRQ instead of an interrupt
    fn sends_first_block(&self) -> bool {
        false
    }

    /// Hand over the first data block once the drive raised DRQ
    fn send_first_block(&mut self, _io: &IdeIo, _status: IdeStatus) -> Progress {
        Progress::Pending
    }

    /// Continue after an interrupt
    fn handle_irq(&mut self, target: Target, io: &IdeIo) -> IdeResult<Progress>;
}

/// Status read that also acknowledges the interrupt, split into BSY/ERR outcomes
fn acknowledge(io: &IdeIo) -> Result<IdeStatus, Progress> {
    let status = IdeStatus::from_bits_truncate(io.status());
    if status.contains(IdeStatus::BSY) {
        return Err(Progress::Pending);
    }
    if status.intersects(IdeStatus::ERR | IdeStatus::DF) {
        return Err(Progress::Failed(ErrorCode::HardwareAbort {
            status: status.bits(),
            error: io.error(),
        }));
    }
    Ok(status)
}

/// IDENTIFY DEVICE (0xEC) or IDENTIFY PACKET DEVICE (0xA1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyCommand {
    pub packet: bool,
    pub result: Option<DriveDescriptor>,
    /// The drive refused ATA IDENTIFY with the packet-device signature
    pub packet_signature: bool,
}

impl Protocol for IdentifyCommand {
    fn ready_timeout(&self, config: &IdeConfig) -> u64 {
        config.probe_timeout_ms
    }

    fn issue(&mut self, _target: Target, io: &IdeIo) -> IdeResult<Progress> {
        io.set_feature(0);
        io.set_sector_count(0);
        io.set_lba_low(0);
        io.set_lba_mid(0);
        io.set_lba_high(0);

        let opcode = if self.packet {
            IdeOpcode::IdentifyPacketDevice
        } else {
            IdeOpcode::IdentifyDevice
        };
        io.set_command(opcode as u8);
        Ok(Progress::Pending)
    }

    fn handle_irq(&mut self, _target: Target, io: &IdeIo) -> IdeResult<Progress> {
        let status = match acknowledge(io) {
            Ok(status) => status,
            Err(Progress::Failed(_)) if !self.packet && io.has_packet_signature() => {
                self.packet_signature = true;
                return Ok(Progress::Complete);
            }
            Err(progress) => return Ok(progress),
        };

        if !status.contains(IdeStatus::DRQ) {
            return Ok(Progress::Pending);
        }

        let mut words = [0u16; IDENTIFY_WORDS];
        io.read_words(&mut words);
        self.result = Some(DriveDescriptor::new(words, self.packet));
        Ok(Progress::Complete)
    }
}

/// Program LBA and sector count, 48-bit writes the high-order bytes first
fn program_lba(target: Target, io: &IdeIo, lba: u64, count: usize, lba48: bool) {
    // 256 sectors is encoded as 0 in 28-bit mode
    let count = count as u16;
    if lba48 {
        io.set_select(select_byte(target.master) | 0x40);
        io.set_sector_count((count >> 8) as u8);
        io.set_lba_low((lba >> 24) as u8);
        io.set_lba_mid((lba >> 32) as u8);
        io.set_lba_high((lba >> 40) as u8);
    } else {
        io.set_select(select_byte(target.master) | 0x40 | ((lba >> 24) & 0x0F) as u8);
    }
    io.set_sector_count(count as u8);
    io.set_lba_low(lba as u8);
    io.set_lba_mid((lba >> 8) as u8);
    io.set_lba_high((lba >> 16) as u8);
}

fn needs_lba48(lba: u64, count: usize) -> bool {
    let last = lba.saturating_add((count as u64).saturating_sub(1));
    last > LBA28_MAX
}

fn check_range(lba: u64, count: usize) -> IdeResult<()> {
    let past_end = lba
        .checked_add(count as u64)
        .map_or(true, |end| end > LBA48_LIMIT);
    if count == 0 || count > MAX_SECTORS_PER_COMMAND || past_end {
        return Err(IdeError::InvalidParameter);
    }
    Ok(())
}

/// PIO READ SECTORS (0x20) / READ SECTORS EXT (0x24)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadSectorsCommand {
    pub lba: u64,
    pub count: usize,
    pub data: Vec<u8>,
}

impl ReadSectorsCommand {
    pub fn lba48(&self) -> bool {
        needs_lba48(self.lba, self.count)
    }

    fn sectors_read(&self) -> usize {
        self.data.len() / SECTOR_SIZE
    }
}

impl Protocol for ReadSectorsCommand {
    fn ready_timeout(&self, config: &IdeConfig) -> u64 {
        config.data_xfer_timeout_ms
    }

    fn issue(&mut self, target: Target, io: &IdeIo) -> IdeResult<Progress> {
        io.set_feature(0);
        program_lba(target, io, self.lba, self.count, self.lba48());

        let opcode = if self.lba48() {
            IdeOpcode::ReadSectorsExt
        } else {
            IdeOpcode::ReadSectors
        };
        io.set_command(opcode as u8);
        Ok(Progress::Pending)
    }

    fn handle_irq(&mut self, _target: Target, io: &IdeIo) -> IdeResult<Progress> {
        let status = match acknowledge(io) {
            Ok(status) => status,
            Err(progress) => return Ok(progress),
        };
        if !status.contains(IdeStatus::DRQ) {
            return Ok(Progress::Pending);
        }

        let mut words = [0u16; SECTOR_WORDS];
        io.read_words(&mut words);
        self.data.extend(words.iter().flat_map(|word| word.to_le_bytes()));

        if self.sectors_read() == self.count {
            Ok(Progress::Complete)
        } else {
            Ok(Progress::Pending)
        }
    }
}

/// PIO WRITE SECTORS (0x30) / WRITE SECTORS EXT (0x34)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSectorsCommand {
    pub lba: u64,
    pub data: Vec<u8>,
    /// Sectors handed to the drive so far
    pub sent: usize,
}

impl WriteSectorsCommand {
    pub fn count(&self) -> usize {
        self.data.len() / SECTOR_SIZE
    }

    pub fn lba48(&self) -> bool {
        needs_lba48(self.lba, self.count())
    }

    fn push_sector(&mut self, io: &IdeIo) {
        let start = self.sent * SECTOR_SIZE;
        let sector = &self.data[start..start + SECTOR_SIZE];
        for pair in sector.chunks_exact(2) {
            io.set_data(u16::from_le_bytes([pair[0], pair[1]]));
        }
        self.sent += 1;
    }
}

impl Protocol for WriteSectorsCommand {
    fn ready_timeout(&self, config: &IdeConfig) -> u64 {
        config.data_xfer_timeout_ms
    }

    fn issue(&mut self, target: Target, io: &IdeIo) -> IdeResult<Progress> {
        io.set_feature(0);
        program_lba(target, io, self.lba, self.count(), self.lba48());

        let opcode = if self.lba48() {
            IdeOpcode::WriteSectorsExt
        } else {
            IdeOpcode::WriteSectors
        };
        io.set_command(opcode as u8);
        Ok(Progress::Pending)
    }

    // The first sector goes out without an interrupt
    fn sends_first_block(&self) -> bool {
        true
    }

    fn send_first_block(&mut self, io: &IdeIo, status: IdeStatus) -> Progress {
        if self.sent > 0 {
            return Progress::Pending;
        }
        if status.intersects(IdeStatus::ERR | IdeStatus::DF) {
            return Progress::Failed(ErrorCode::HardwareAbort {
                status: io.status(),
                error: io.error(),
            });
        }
        self.push_sector(io);
        Progress::Pending
    }

    fn handle_irq(&mut self, _target: Target, io: &IdeIo) -> IdeResult<Progress> {
        let status = match acknowledge(io) {
            Ok(status) => status,
            Err(progress) => return Ok(progress),
        };

        // The first sector is still owed by the setup path
        if self.sent == 0 {
            return Ok(Progress::Pending);
        }
        if self.sent == self.count() {
            return Ok(Progress::Complete);
        }
        if status.contains(IdeStatus::DRQ) {
            self.push_sector(io);
        }
        Ok(Progress::Pending)
    }
}

/// Closed set of command kinds with their payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Identify(IdentifyCommand),
    ReadSectors(ReadSectorsCommand),
    WriteSectors(WriteSectorsCommand),
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Identify(identify) if identify.packet => "IDENTIFY PACKET",
            CommandKind::Identify(_) => "IDENTIFY",
            CommandKind::ReadSectors(_) => "READ SECTORS",
            CommandKind::WriteSectors(_) => "WRITE SECTORS",
        }
    }
}

impl CommandKind {
    fn requires_lba48(&self) -> bool {
        match self {
            CommandKind::ReadSectors(read) => read.lba48(),
            CommandKind::WriteSectors(write) => write.lba48(),
            CommandKind::Identify(_) => false,
        }
    }
}

impl Protocol for CommandKind {
    fn ready_timeout(&self, config: &IdeConfig) -> u64 {
        match self {
            CommandKind::Identify(command) => command.ready_timeout(config),
            CommandKind::ReadSectors(command) => command.ready_timeout(config),
            CommandKind::WriteSectors(command) => command.ready_timeout(config),
        }
    }

    fn issue(&mut self, target: Target, io: &IdeIo) -> IdeResult<Progress> {
        match self {
            CommandKind::Identify(command) => command.issue(target, io),
            CommandKind::ReadSectors(command) => command.issue(target, io),
            CommandKind::WriteSectors(command) => command.issue(target, io),
        }
    }

    fn sends_first_block(&self) -> bool {
        match self {
            CommandKind::Identify(command) => command.sends_first_block(),
            CommandKind::ReadSectors(command) => command.sends_first_block(),
            CommandKind::WriteSectors(command) => command.sends_first_block(),
        }
    }

    fn send_first_block(&mut self, io: &IdeIo, status: IdeStatus) -> Progress {
        match self {
            CommandKind::Identify(command) => command.send_first_block(io, status),
            CommandKind::ReadSectors(command) => command.send_first_block(io, status),
            CommandKind::WriteSectors(command) => command.send_first_block(io, status),
        }
    }

    fn handle_irq(&mut self, target: Target, io: &IdeIo) -> IdeResult<Progress> {
        match self {
            CommandKind::Identify(command) => command.handle_irq(target, io),
            CommandKind::ReadSectors(command) => command.handle_irq(target, io),
            CommandKind::WriteSectors(command) => command.handle_irq(target, io),
        }
    }
}

/// Command payload; only touched for register programming and data transfer
struct Payload {
    kind: CommandKind,
    /// The opcode has been written; interrupts before that are not ours
    issued: bool,
}

#[derive(Default)]
struct Completion {
    error: Option<ErrorCode>,
    finished: bool,
}

impl Completion {
    /// Flip `finished` once; false when someone else already completed it
    fn finish(&mut self, error: Option<ErrorCode>) -> bool {
        if self.finished {
            return false;
        }
        self.error = error;
        self.finished = true;
        true
    }
}

struct CommandShared {
    target: Target,
    name: &'static str,
    lba48: bool,
    payload: Mutex<Payload>,
    completion: Mutex<Completion>,
    done: Condvar,
}

/// Shared handle to a queued or running command
#[derive(Clone)]
pub struct IdeCommand {
    shared: Arc<CommandShared>,
}

impl IdeCommand {
    fn new(primary: bool, master: bool, kind: CommandKind) -> Self {
        Self {
            shared: Arc::new(CommandShared {
                target: Target { primary, master },
                name: kind.name(),
                lba48: kind.requires_lba48(),
                payload: Mutex::new(Payload { kind, issued: false }),
                completion: Mutex::new(Completion::default()),
                done: Condvar::new(),
            }),
        }
    }

    pub fn identify(primary: bool, master: bool) -> Self {
        Self::new(
            primary,
            master,
            CommandKind::Identify(IdentifyCommand {
                packet: false,
                result: None,
                packet_signature: false,
            }),
        )
    }

    pub fn identify_packet(primary: bool, master: bool) -> Self {
        Self::new(
            primary,
            master,
            CommandKind::Identify(IdentifyCommand {
                packet: true,
                result: None,
                packet_signature: false,
            }),
        )
    }

    /// Read `count` sectors (1..=256) starting at `lba`
    pub fn read_sectors(primary: bool, master: bool, lba: u64, count: usize) -> IdeResult<Self> {
        check_range(lba, count)?;
        Ok(Self::new(
            primary,
            master,
            CommandKind::ReadSectors(ReadSectorsCommand {
                lba,
                count,
                data: Vec::with_capacity(count * SECTOR_SIZE),
            }),
        ))
    }

    /// Write whole sectors from `data` starting at `lba`
    pub fn write_sectors(primary: bool, master: bool, lba: u64, data: Vec<u8>) -> IdeResult<Self> {
        if data.len() % SECTOR_SIZE != 0 {
            return Err(IdeError::InvalidParameter);
        }
        check_range(lba, data.len() / SECTOR_SIZE)?;
        Ok(Self::new(
            primary,
            master,
            CommandKind::WriteSectors(WriteSectorsCommand { lba, data, sent: 0 }),
        ))
    }

    // Lock order: payload before completion
    fn payload(&self) -> MutexGuard<'_, Payload> {
        self.shared.payload.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn completion(&self) -> MutexGuard<'_, Completion> {
        self.shared.completion.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn primary(&self) -> bool {
        self.shared.target.primary
    }

    pub fn master(&self) -> bool {
        self.shared.target.master
    }

    pub fn select_byte(&self) -> u8 {
        select_byte(self.master())
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    /// Whether addressing needs the 48-bit command set
    pub fn requires_lba48(&self) -> bool {
        self.shared.lba48
    }

    pub fn is_finished(&self) -> bool {
        self.completion().finished
    }

    pub fn error(&self) -> Option<ErrorCode> {
        self.completion().error
    }

    /// Finished without an error
    pub fn succeeded(&self) -> bool {
        let completion = self.completion();
        completion.finished && completion.error.is_none()
    }

    /// Result of a finished command as an `IdeResult`
    pub fn result(&self) -> IdeResult<()> {
        let completion = self.completion();
        match (completion.finished, completion.error) {
            (true, None) => Ok(()),
            (true, Some(code)) => Err(code.into()),
            (false, _) => Err(IdeError::Timeout),
        }
    }

    fn finish(&self, error: Option<ErrorCode>) -> bool {
        let completed = self.completion().finish(error);
        if completed {
            self.shared.done.notify_all();
        }
        completed
    }

    fn apply(&self, progress: Progress) {
        match progress {
            Progress::Pending => {}
            Progress::Complete => {
                self.finish(None);
            }
            Progress::Failed(code) => {
                self.finish(Some(code));
            }
        }
    }

    /// Force completion with `Abort`; true only for the call that completed it
    pub fn abort(&self) -> bool {
        self.finish(Some(ErrorCode::Abort))
    }

    /// Block until finished or `timeout_ms` elapses; returns `is_finished()`
    pub fn wait_until_finished(&self, timeout_ms: u64) -> bool {
        let guard = self.completion();
        let (guard, _) = self
            .shared
            .done
            .wait_timeout_while(guard, Duration::from_millis(timeout_ms), |completion| {
                !completion.finished
            })
            .unwrap_or_else(PoisonError::into_inner);
        guard.finished
    }

    /// Identify result, if this was a successful identify
    pub fn descriptor(&self) -> Option<DriveDescriptor> {
        match &self.payload().kind {
            CommandKind::Identify(identify) => identify.result.clone(),
            _ => None,
        }
    }

    /// An ATA identify that ended with the packet-device signature
    pub fn is_packet_signature(&self) -> bool {
        matches!(&self.payload().kind, CommandKind::Identify(identify) if identify.packet_signature)
    }

    /// Move the sectors read out of a read command
    pub fn take_data(&self) -> Vec<u8> {
        match &mut self.payload().kind {
            CommandKind::ReadSectors(read) => std::mem::take(&mut read.data),
            _ => Vec::new(),
        }
    }

    pub fn ptr_eq(&self, other: &IdeCommand) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Run the setup phase; an already finished command is left alone.
    ///
    /// Waits for the drive happen with no lock held, so an interrupt or a
    /// waiter arriving meanwhile is served right away.
    pub(crate) fn setup(&self, io: &IdeIo, config: &IdeConfig) -> IdeResult<()> {
        if self.is_finished() {
            return Ok(());
        }

        io.set_select(self.select_byte());
        let ready_timeout = self.payload().kind.ready_timeout(config);
        io.wait_until_not_busy(ready_timeout)?;

        let sends_first_block = {
            let mut payload = self.payload();
            if self.is_finished() {
                return Ok(());
            }
            let progress = payload.kind.issue(self.shared.target, io)?;
            payload.issued = true;
            self.apply(progress);
            payload.kind.sends_first_block()
        };
        if !sends_first_block || self.is_finished() {
            return Ok(());
        }

        let status = io.wait_for_data_request(config.data_xfer_timeout_ms)?;
        let mut payload = self.payload();
        if self.is_finished() {
            return Ok(());
        }
        let progress = payload.kind.send_first_block(io, status);
        self.apply(progress);
        Ok(())
    }

    /// Run the interrupt continuation; returns whether the command is finished
    pub(crate) fn handle_irq(&self, io: &IdeIo) -> IdeResult<bool> {
        let mut payload = self.payload();
        if self.is_finished() {
            return Ok(true);
        }
        if !payload.issued {
            return Ok(false);
        }
        let progress = payload.kind.handle_irq(self.shared.target, io)?;
        self.apply(progress);
        Ok(self.is_finished())
    }
}

impl fmt::Debug for IdeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let completion = self.completion();
        f.debug_struct("IdeCommand")
            .field("kind", &self.name())
            .field("primary", &self.primary())
            .field("master", &self.master())
            .field("finished", &completion.finished)
            .field("error", &completion.error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn select_byte_follows_target() {
        assert_eq!(select_byte(true), 0xA0);
        assert_eq!(select_byte(false), 0xB0);
        assert_eq!(IdeCommand::identify(false, false).select_byte(), 0xB0);
    }

    #[test]
    fn abort_completes_exactly_once() {
        let command = IdeCommand::identify(true, true);
        assert!(!command.is_finished());

        assert!(command.abort());
        assert!(!command.abort());
        assert!(command.is_finished());
        assert_eq!(command.error(), Some(ErrorCode::Abort));
        assert_eq!(command.result(), Err(IdeError::Timeout));
    }

    #[test]
    fn waiters_wake_on_completion() {
        let command = IdeCommand::identify_packet(true, false);
        let waiter = {
            let command = command.clone();
            thread::spawn(move || command.wait_until_finished(5_000))
        };

        thread::sleep(Duration::from_millis(20));
        command.abort();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn wait_times_out_when_nobody_completes() {
        let command = IdeCommand::identify(true, true);
        assert!(!command.wait_until_finished(10));
        assert!(!command.is_finished());
        assert_eq!(command.error(), None);
    }

    #[test]
    fn sector_ranges_are_validated() {
        assert_eq!(IdeCommand::read_sectors(true, true, 0, 0).err(), Some(IdeError::InvalidParameter));
        assert_eq!(IdeCommand::read_sectors(true, true, 0, 257).err(), Some(IdeError::InvalidParameter));
        assert!(IdeCommand::read_sectors(true, true, 0, 256).is_ok());
        assert_eq!(
            IdeCommand::write_sectors(true, true, 0, vec![0u8; 100]).err(),
            Some(IdeError::InvalidParameter)
        );
    }

    #[test]
    fn ranges_near_the_top_of_u64_are_refused() {
        assert_eq!(
            IdeCommand::read_sectors(true, true, u64::MAX, 1).err(),
            Some(IdeError::InvalidParameter)
        );
        assert_eq!(
            IdeCommand::write_sectors(false, true, u64::MAX - 1, vec![0u8; 4 * SECTOR_SIZE]).err(),
            Some(IdeError::InvalidParameter)
        );
        assert_eq!(
            IdeCommand::read_sectors(true, true, LBA48_LIMIT, 1).err(),
            Some(IdeError::InvalidParameter)
        );
        assert!(IdeCommand::read_sectors(true, true, LBA48_LIMIT - 1, 1).is_ok());
        assert!(needs_lba48(u64::MAX, 0));
    }

    #[test]
    fn completion_is_readable_while_payload_is_held() {
        let command = IdeCommand::write_sectors(true, true, 0, vec![0u8; SECTOR_SIZE]).unwrap();
        let payload = command.payload();

        assert!(!command.wait_until_finished(10));
        assert!(command.abort());
        assert!(command.is_finished());
        assert_eq!(command.name(), "WRITE SECTORS");
        assert!(!command.requires_lba48());
        drop(payload);
    }

    #[test]
    fn lba48_only_past_28bit_range() {
        let low = IdeCommand::read_sectors(true, true, LBA28_MAX, 1).unwrap();
        assert!(!low.requires_lba48());
        let straddling = IdeCommand::read_sectors(true, true, LBA28_MAX, 2).unwrap();
        assert!(straddling.requires_lba48());
        let write = IdeCommand::write_sectors(true, true, LBA28_MAX + 1, vec![0u8; SECTOR_SIZE]).unwrap();
        assert!(write.requires_lba48());
    }

    #[test]
    fn error_codes_map_to_driver_errors() {
        assert_eq!(IdeError::from(ErrorCode::Abort), IdeError::Timeout);
        assert_eq!(
            IdeError::from(ErrorCode::HardwareAbort { status: 0x51, error: 0x04 }),
            IdeError::HardwareAbort { status: 0x51, error: 0x04 }
        );
    }
}
