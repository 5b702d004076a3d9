//! Command scheduler for one IDE channel
//!
//! A dedicated worker thread pulls commands off a FIFO and starts them;
//! the channel's interrupt handler drives each started command to
//! completion. At most one command is in flight: the worker only starts
//! the next command after the current one finished or was aborted, and an
//! aborted command leaves a software reset pending before anything else
//! touches the task file.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use spin::Mutex as SpinMutex;

use super::command::{select_byte, ErrorCode, IdeCommand};
use super::config::IdeConfig;
use super::descriptor::DriveDescriptor;
use super::regs::{ChannelLayout, IdeIo};
use super::{target_name, IdeDevCtrl};
use crate::error::{IdeError, IdeResult};
use crate::logging::Logger;
use crate::pci::PciDeviceConfig;
use crate::platform::Platform;
use crate::resource::{IrqClaim, IrqHandler};
use crate::time::{Clock, Timer};

/// Where the channel is in its command cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BusState {
    Idle = 0,
    /// Waiting for the drive to drop BSY before a command
    Selecting = 1,
    IssuingSetup = 2,
    AwaitingInterrupt = 3,
    Completing = 4,
    /// Aborting a command and resetting the channel
    TimedOut = 5,
    Stopped = 6,
}

impl BusState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BusState::Idle,
            1 => BusState::Selecting,
            2 => BusState::IssuingSetup,
            3 => BusState::AwaitingInterrupt,
            4 => BusState::Completing,
            5 => BusState::TimedOut,
            _ => BusState::Stopped,
        }
    }
}

impl fmt::Display for BusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BusState::Idle => "IDLE",
            BusState::Selecting => "SELECTING",
            BusState::IssuingSetup => "ISSUING_SETUP",
            BusState::AwaitingInterrupt => "AWAITING_INTERRUPT",
            BusState::Completing => "COMPLETING",
            BusState::TimedOut => "TIMED_OUT",
            BusState::Stopped => "STOPPED",
        };
        write!(f, "{}", name)
    }
}

/// Snapshot of a channel's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub commands_started: u64,
    pub commands_completed: u64,
    pub commands_failed: u64,
    pub timeouts: u64,
    pub resets: u64,
    /// Resets after which the channel still reported BSY
    pub reset_failures: u64,
    pub interrupts: u64,
    pub spurious_interrupts: u64,
}

// Thread-safe counters using atomic operations
#[derive(Default)]
struct BusCounters {
    commands_started: AtomicU64,
    commands_completed: AtomicU64,
    commands_failed: AtomicU64,
    timeouts: AtomicU64,
    resets: AtomicU64,
    reset_failures: AtomicU64,
    interrupts: AtomicU64,
    spurious_interrupts: AtomicU64,
}

impl BusCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BusStats {
        BusStats {
            commands_started: self.commands_started.load(Ordering::Relaxed),
            commands_completed: self.commands_completed.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            reset_failures: self.reset_failures.load(Ordering::Relaxed),
            interrupts: self.interrupts.load(Ordering::Relaxed),
            spurious_interrupts: self.spurious_interrupts.load(Ordering::Relaxed),
        }
    }
}

struct Queue {
    commands: VecDeque<IdeCommand>,
    /// The worker holds a popped command it has not finished starting
    active: bool,
    stopped: bool,
}

struct BusShared {
    primary: bool,
    config: IdeConfig,
    io: IdeIo,
    clock: Arc<dyn Clock>,
    logger: Logger,
    queue: Mutex<Queue>,
    queue_ready: Condvar,
    current: SpinMutex<Option<IdeCommand>>,
    state: AtomicU8,
    reset_pending: AtomicBool,
    counters: BusCounters,
}

impl BusShared {
    fn lock_queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> BusState {
        BusState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: BusState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn enqueue(&self, command: &IdeCommand) -> IdeResult<()> {
        {
            let mut queue = self.lock_queue();
            if queue.stopped {
                command.abort();
                return Err(IdeError::Stopped);
            }
            queue.commands.push_back(command.clone());
        }
        self.queue_ready.notify_one();
        Ok(())
    }

    /// Block until a command is queued; `None` once the bus is stopped
    fn next_command(&self) -> Option<IdeCommand> {
        let mut queue = self.lock_queue();
        queue.active = false;
        loop {
            if queue.stopped {
                return None;
            }
            if let Some(command) = queue.commands.pop_front() {
                queue.active = true;
                return Some(command);
            }
            queue = self
                .queue_ready
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Empty the current slot if it still holds `command`
    fn clear_current_if(&self, command: &IdeCommand) -> bool {
        let mut current = self.current.lock();
        match current.as_ref() {
            Some(running) if running.ptr_eq(command) => {
                *current = None;
                self.set_state(BusState::Idle);
                true
            }
            _ => false,
        }
    }

    /// Count a command's completion by how it ended
    fn note_finished(&self, command: &IdeCommand) {
        match command.error() {
            None => BusCounters::bump(&self.counters.commands_completed),
            Some(ErrorCode::HardwareAbort { status, error }) => {
                BusCounters::bump(&self.counters.commands_failed);
                log_warn!(
                    self.logger,
                    "{} on {} failed (status={:#04x}, error={:#04x})",
                    command.name(),
                    target_name(command.primary(), command.master()),
                    status,
                    error
                );
            }
            // Counted by whoever forced the abort
            Some(ErrorCode::Abort) => {}
        }
    }

    /// Force `command` to `Abort`; true when this call completed it
    fn abort_timed_out(&self, command: &IdeCommand) -> bool {
        if !command.abort() {
            return false;
        }
        BusCounters::bump(&self.counters.timeouts);
        log_warn!(
            self.logger,
            "{} on {} timed out",
            command.name(),
            target_name(command.primary(), command.master())
        );
        true
    }

    fn run(self: Arc<Self>) {
        log_debug!(self.logger, "worker started");
        while let Some(command) = self.next_command() {
            // Aborted while it sat in the queue
            if command.is_finished() {
                continue;
            }

            self.retire_current();
            if self.lock_queue().stopped {
                command.abort();
                break;
            }
            if self.reset_pending.swap(false, Ordering::AcqRel) {
                self.recover();
            }
            self.start(command);
        }
        log_debug!(self.logger, "worker stopped");
    }

    /// Wait out a previous command that is still current, aborting it when it never completes
    fn retire_current(&self) {
        let current = self.current.lock().clone();
        let previous = match current {
            Some(previous) => previous,
            None => return,
        };

        if !previous.is_finished() {
            log_debug!(self.logger, "waiting for {} to finish", previous.name());
            previous.wait_until_finished(self.config.data_xfer_timeout_ms);
        }
        if self.abort_timed_out(&previous) {
            self.set_state(BusState::TimedOut);
            self.reset_pending.store(true, Ordering::Release);
        }
        self.clear_current_if(&previous);
    }

    fn start(&self, command: IdeCommand) {
        self.set_state(BusState::Selecting);
        if let Err(err) = self.io.wait_until_not_busy(self.config.data_xfer_timeout_ms) {
            log_warn!(self.logger, "channel stays busy, dropping {}: {}", command.name(), err);
            self.abort_timed_out(&command);
            self.recover();
            return;
        }

        *self.current.lock() = Some(command.clone());
        self.set_state(BusState::IssuingSetup);
        BusCounters::bump(&self.counters.commands_started);
        log_trace!(
            self.logger,
            "starting {} on {}",
            command.name(),
            target_name(command.primary(), command.master())
        );

        match command.setup(&self.io, &self.config) {
            Ok(()) if command.is_finished() => {
                self.note_finished(&command);
                self.clear_current_if(&command);
            }
            Ok(()) => {
                let current = self.current.lock();
                if current.as_ref().map_or(false, |running| running.ptr_eq(&command)) {
                    self.set_state(BusState::AwaitingInterrupt);
                }
            }
            Err(err) => {
                log_warn!(self.logger, "setup of {} failed: {}", command.name(), err);
                self.abort_timed_out(&command);
                self.clear_current_if(&command);
                self.recover();
            }
        }
    }

    fn handle_irq(&self) {
        BusCounters::bump(&self.counters.interrupts);

        let current = self.current.lock().clone();
        let command = match current {
            Some(command) => command,
            None => {
                let status = self.io.status();
                BusCounters::bump(&self.counters.spurious_interrupts);
                log_debug!(self.logger, "spurious interrupt (status={:#04x})", status);
                return;
            }
        };

        if command.is_finished() {
            let status = self.io.status();
            BusCounters::bump(&self.counters.spurious_interrupts);
            log_debug!(
                self.logger,
                "late interrupt for finished {} (status={:#04x})",
                command.name(),
                status
            );
            self.clear_current_if(&command);
            return;
        }

        self.set_state(BusState::Completing);
        match command.handle_irq(&self.io) {
            Ok(true) => {
                self.note_finished(&command);
                self.clear_current_if(&command);
            }
            Ok(false) => {
                let current = self.current.lock();
                if current.as_ref().map_or(false, |running| running.ptr_eq(&command)) {
                    self.set_state(BusState::AwaitingInterrupt);
                }
            }
            Err(err) => {
                log_warn!(self.logger, "interrupt handling of {} failed: {}", command.name(), err);
                self.abort_timed_out(&command);
                if self.clear_current_if(&command) {
                    self.reset_pending.store(true, Ordering::Release);
                }
            }
        }
    }

    /// Reset after an aborted command.
    ///
    /// A channel that stays busy keeps `TimedOut` and another reset pending
    /// for the next command.
    fn recover(&self) {
        self.set_state(BusState::TimedOut);
        match self.software_reset() {
            Ok(()) => {
                self.reset_pending.store(false, Ordering::Release);
                self.set_state(BusState::Idle);
            }
            Err(err) => {
                BusCounters::bump(&self.counters.reset_failures);
                self.reset_pending.store(true, Ordering::Release);
                log_error!(self.logger, "channel did not recover: {}", err);
            }
        }
    }

    /// No command queued, current or being started
    fn is_quiet(&self) -> bool {
        let queue = self.lock_queue();
        !queue.active && queue.commands.is_empty() && self.current.lock().is_none()
    }

    /// Poll for [`BusShared::is_quiet`] for up to `timeout_ms`
    fn wait_until_quiet(&self, timeout_ms: u64) -> bool {
        let interval = self.config.busy_poll_interval_ms;
        let mut remaining = timeout_ms;
        while !self.is_quiet() {
            if remaining == 0 {
                return false;
            }
            let step = interval.min(remaining);
            self.clock.sleep_ms(step);
            remaining -= step;
        }
        true
    }

    /// Pulse SRST, then poll for the drives to drop BSY
    fn software_reset(&self) -> IdeResult<()> {
        BusCounters::bump(&self.counters.resets);
        log_info!(self.logger, "software reset");
        let timer = Timer::new(self.clock.clone());

        self.io.set_control(IdeDevCtrl::SRST.bits());
        self.clock.sleep_ms(self.config.reset_hold_ms);
        self.io.set_control(IdeDevCtrl::empty().bits());

        for attempt in 0..self.config.reset_poll_attempts {
            if attempt > 0 {
                self.clock.sleep_ms(self.config.reset_poll_interval_ms);
            }
            if !self.io.is_busy() {
                log_debug!(self.logger, "channel ready {} ms after reset", timer.elapsed_ms());
                return Ok(());
            }
        }

        log_warn!(self.logger, "channel still busy {} ms after software reset", timer.elapsed_ms());
        Err(IdeError::Timeout)
    }
}

/// One IDE channel: register interface, IRQ claim, queue and worker
pub struct IdeBus {
    shared: Arc<BusShared>,
    worker: SpinMutex<Option<JoinHandle<()>>>,
    irq_claim: SpinMutex<Option<Box<dyn IrqClaim>>>,
    stopped: AtomicBool,
}

impl IdeBus {
    /// Start the channel, using the PCI native layout when `pci` reports it
    pub fn new(
        primary: bool,
        pci: Option<&PciDeviceConfig>,
        platform: &Platform,
        config: IdeConfig,
    ) -> IdeResult<Arc<IdeBus>> {
        let layout = ChannelLayout::from_pci(primary, pci)?;
        Self::with_layout(layout, platform, config)
    }

    pub fn with_layout(layout: ChannelLayout, platform: &Platform, config: IdeConfig) -> IdeResult<Arc<IdeBus>> {
        let owner = if layout.primary { "ide0" } else { "ide1" };
        let logger = platform
            .logger
            .scoped(if layout.primary { "primary" } else { "secondary" });

        log_info!(
            logger,
            "Using PCI IDE {} mode [irq={}]",
            if layout.native { "Native" } else { "Compatibility" },
            layout.irq
        );

        let io = IdeIo::new(
            owner,
            layout,
            platform.io.as_ref(),
            platform.clock.clone(),
            config.busy_poll_interval_ms,
        )
        .map_err(|err| {
            log_error!(logger, "cannot claim ports {}: {}", layout, err);
            err
        })?;

        let shared = Arc::new(BusShared {
            primary: layout.primary,
            config,
            io,
            clock: platform.clock.clone(),
            logger: logger.clone(),
            queue: Mutex::new(Queue {
                commands: VecDeque::new(),
                active: false,
                stopped: false,
            }),
            queue_ready: Condvar::new(),
            current: SpinMutex::new(None),
            state: AtomicU8::new(BusState::Idle as u8),
            reset_pending: AtomicBool::new(false),
            counters: BusCounters::default(),
        });

        let weak = Arc::downgrade(&shared);
        let handler: IrqHandler = Arc::new(move |_irq| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_irq();
            }
        });

        let claim = match platform.irq.register_irq(owner, layout.irq, handler) {
            Ok(claim) => claim,
            Err(err) => {
                log_error!(logger, "cannot claim irq {}: {}", layout.irq, err);
                shared.io.release();
                return Err(IdeError::ResourceUnavailable);
            }
        };

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name(format!("{}-worker", owner))
            .spawn(move || worker_shared.run());
        let worker = match worker {
            Ok(worker) => worker,
            Err(err) => {
                log_error!(logger, "cannot spawn worker: {}", err);
                claim.release();
                shared.io.release();
                return Err(IdeError::ResourceUnavailable);
            }
        };

        Ok(Arc::new(IdeBus {
            shared,
            worker: SpinMutex::new(Some(worker)),
            irq_claim: SpinMutex::new(Some(claim)),
            stopped: AtomicBool::new(false),
        }))
    }

    pub fn primary(&self) -> bool {
        self.shared.primary
    }

    pub fn layout(&self) -> &ChannelLayout {
        self.shared.io.layout()
    }

    pub fn config(&self) -> &IdeConfig {
        &self.shared.config
    }

    pub fn io(&self) -> &IdeIo {
        &self.shared.io
    }

    pub fn logger(&self) -> &Logger {
        &self.shared.logger
    }

    pub fn state(&self) -> BusState {
        self.shared.state()
    }

    pub fn stats(&self) -> BusStats {
        self.shared.counters.snapshot()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Commands waiting behind the current one
    pub fn queued(&self) -> usize {
        self.shared.lock_queue().commands.len()
    }

    pub fn current_command(&self) -> Option<IdeCommand> {
        self.shared.current.lock().clone()
    }

    /// Queue `command` and return immediately
    pub fn execute(&self, command: &IdeCommand) -> IdeResult<()> {
        if command.primary() != self.shared.primary {
            return Err(IdeError::InvalidParameter);
        }
        self.shared.enqueue(command)
    }

    /// Queue `command` and wait up to `timeout_ms` for it to finish.
    ///
    /// `Ok` means the command finished; its own error field tells whether it
    /// succeeded. On timeout the command is aborted and, if it had already
    /// been started, a software reset runs before the next command.
    pub fn execute_and_wait(&self, command: &IdeCommand, timeout_ms: u64) -> IdeResult<()> {
        self.execute(command)?;
        if command.wait_until_finished(timeout_ms) {
            return Ok(());
        }

        if self.shared.abort_timed_out(command) {
            if self.shared.clear_current_if(command) {
                self.shared.reset_pending.store(true, Ordering::Release);
            }
            return Err(IdeError::Timeout);
        }
        // Completed between the wait and the abort
        Ok(())
    }

    /// Look for a drive at `master`/slave and identify it.
    ///
    /// Probing writes the select register directly, so it only runs on a
    /// quiet channel; `None` when other commands keep it busy for longer
    /// than the probe timeout.
    pub fn probe(&self, master: bool) -> Option<DriveDescriptor> {
        if self.is_stopped() {
            return None;
        }

        let io = &self.shared.io;
        let logger = &self.shared.logger;
        let target = target_name(self.shared.primary, master);
        let timeout = self.shared.config.probe_timeout_ms;

        if !self.shared.wait_until_quiet(timeout) {
            log_debug!(logger, "{}: channel busy with other commands, not probing", target);
            return None;
        }

        let select = select_byte(master);
        io.set_select(select);
        self.shared.clock.sleep_ms(self.shared.config.select_settle_ms);
        let readback = io.select();
        if readback != select {
            log_debug!(logger, "{}: select {:#04x} read back as {:#04x}, no drive", target, select, readback);
            return None;
        }

        io.set_control(IdeDevCtrl::empty().bits());
        let ata = IdeCommand::identify(self.shared.primary, master);
        match self.execute_and_wait(&ata, timeout) {
            Ok(()) => {
                if let Some(descriptor) = ata.descriptor() {
                    log_info!(logger, "{}: {}", target, descriptor);
                    return Some(descriptor);
                }
                if ata.is_packet_signature() {
                    log_debug!(logger, "{}: packet device signature", target);
                } else if let Some(error) = ata.error() {
                    log_debug!(logger, "{}: IDENTIFY {}", target, error);
                }
            }
            Err(err) => {
                io.status();
                log_debug!(logger, "{}: IDENTIFY {}", target, err);
                return None;
            }
        }

        if !self.shared.wait_until_quiet(timeout) {
            log_debug!(logger, "{}: channel busy with other commands, not probing", target);
            return None;
        }
        io.status();
        io.set_control(IdeDevCtrl::empty().bits());
        let packet = IdeCommand::identify_packet(self.shared.primary, master);
        match self.execute_and_wait(&packet, timeout) {
            Ok(()) => {
                let descriptor = packet.descriptor();
                match &descriptor {
                    Some(descriptor) => log_info!(logger, "{}: {}", target, descriptor),
                    None => log_debug!(logger, "{}: no drive answered IDENTIFY PACKET", target),
                }
                descriptor
            }
            Err(err) => {
                io.status();
                log_debug!(logger, "{}: IDENTIFY PACKET {}", target, err);
                None
            }
        }
    }

    /// Pulse SRST on an idle channel
    pub fn software_reset(&self) -> IdeResult<()> {
        if self.is_stopped() {
            return Err(IdeError::Stopped);
        }
        self.shared.software_reset()
    }

    /// Abort all work, join the worker, then release the IRQ and the ports
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let drained: Vec<IdeCommand> = {
            let mut queue = self.shared.lock_queue();
            queue.stopped = true;
            queue.commands.drain(..).collect()
        };
        self.shared.queue_ready.notify_all();
        for command in drained {
            command.abort();
        }

        let current = self.shared.current.lock().take();
        if let Some(command) = current {
            command.abort();
        }

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                log_error!(self.shared.logger, "worker panicked");
            }
        }

        // The worker may have started one last command before it saw the stop
        let current = self.shared.current.lock().take();
        if let Some(command) = current {
            command.abort();
        }

        if let Some(claim) = self.irq_claim.lock().take() {
            claim.release();
        }
        self.shared.io.release();
        self.shared.set_state(BusState::Stopped);
        log_info!(self.shared.logger, "stopped");
    }
}

impl Drop for IdeBus {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for IdeBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdeBus")
            .field("layout", self.layout())
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}
