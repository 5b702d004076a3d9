// RustOS Logging
// Structured logging handle injected into each driver component

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use spin::Mutex;

/// Log levels for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            4 => LogLevel::Error,
            _ => LogLevel::Fatal,
        }
    }

    /// Matching level of the `log` facade; `Fatal` has no counterpart there
    pub fn to_facade(self) -> log::Level {
        match self {
            LogLevel::Trace => log::Level::Trace,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error | LogLevel::Fatal => log::Level::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Log entry structure
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Milliseconds since the logger was created
    pub timestamp: u64,
    pub level: LogLevel,
    pub module: String,
    pub message: String,
    pub file: Option<&'static str>,
    pub line: Option<u32>,
    pub thread: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, module: &str, message: String, timestamp: u64) -> Self {
        Self {
            timestamp,
            level,
            module: module.to_string(),
            message,
            file: None,
            line: None,
            thread: None,
        }
    }

    pub fn with_location(mut self, file: &'static str, line: u32) -> Self {
        self.file = Some(file);
        self.line = Some(line);
        self
    }

    pub fn with_thread(mut self, thread: Option<&str>) -> Self {
        self.thread = thread.map(|name| name.to_string());
        self
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:6}.{:03}] ", self.timestamp / 1000, self.timestamp % 1000)?;
        write!(f, "{:5} ", self.level)?;
        write!(f, "{:18} ", self.module)?;

        if let (Some(file), Some(line)) = (self.file, self.line) {
            write!(f, "{}:{} ", file, line)?;
        }

        if let Some(ref thread) = self.thread {
            write!(f, "[{}] ", thread)?;
        }

        write!(f, "{}", self.message)
    }
}

/// Log output targets
pub trait LogOutput: Send {
    fn write_log(&mut self, entry: &LogEntry);
    fn flush(&mut self);
    fn name(&self) -> &str;
}

/// Forwards entries to the `log` facade, using the module as target
pub struct FacadeLogOutput {
    name: String,
}

impl FacadeLogOutput {
    pub fn new() -> Self {
        Self {
            name: "Facade".to_string(),
        }
    }
}

impl Default for FacadeLogOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl LogOutput for FacadeLogOutput {
    fn write_log(&mut self, entry: &LogEntry) {
        log::log!(target: entry.module.as_str(), entry.level.to_facade(), "{}", entry.message);
    }

    fn flush(&mut self) {
        log::logger().flush();
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Memory buffer log output for debugging and tests
pub struct MemoryLogOutput {
    name: String,
    buffer: Arc<Mutex<VecDeque<LogEntry>>>,
    max_entries: usize,
}

impl MemoryLogOutput {
    pub fn new(max_entries: usize) -> Self {
        Self {
            name: "Memory".to_string(),
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(max_entries))),
            max_entries,
        }
    }

    /// Handle that stays valid after the output is moved into a logger
    pub fn reader(&self) -> MemoryLogReader {
        MemoryLogReader {
            buffer: self.buffer.clone(),
        }
    }
}

impl LogOutput for MemoryLogOutput {
    fn write_log(&mut self, entry: &LogEntry) {
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.max_entries {
            buffer.pop_front();
        }
        buffer.push_back(entry.clone());
    }

    fn flush(&mut self) {
        // Memory buffer doesn't need flushing
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Read side of a [`MemoryLogOutput`]
#[derive(Clone)]
pub struct MemoryLogReader {
    buffer: Arc<Mutex<VecDeque<LogEntry>>>,
}

impl MemoryLogReader {
    pub fn entries(&self) -> Vec<LogEntry> {
        self.buffer.lock().iter().cloned().collect()
    }

    /// Whether any entry's message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.buffer.lock().iter().any(|entry| entry.message.contains(needle))
    }

    pub fn count_at(&self, level: LogLevel) -> usize {
        self.buffer.lock().iter().filter(|entry| entry.level == level).count()
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

struct LoggerInner {
    outputs: Mutex<Vec<Box<dyn LogOutput>>>,
    min_level: AtomicU8,
    enabled: AtomicBool,
    started: Instant,
}

/// Logging handle passed to each component at construction.
///
/// Clones share sinks and level settings; [`Logger::scoped`] only changes
/// the module name stamped on entries.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
    module: Arc<str>,
}

impl Logger {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                outputs: Mutex::new(Vec::new()),
                min_level: AtomicU8::new(LogLevel::Info as u8),
                enabled: AtomicBool::new(true),
                started: Instant::now(),
            }),
            module: Arc::from("ide"),
        }
    }

    /// Logger that forwards everything to the `log` facade
    pub fn with_facade() -> Self {
        let logger = Self::new();
        logger.add_output(Box::new(FacadeLogOutput::new()));
        logger
    }

    pub fn add_output(&self, output: Box<dyn LogOutput>) {
        self.inner.outputs.lock().push(output);
    }

    pub fn set_min_level(&self, level: LogLevel) {
        self.inner.min_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn min_level(&self) -> LogLevel {
        LogLevel::from_u8(self.inner.min_level.load(Ordering::Relaxed))
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Child handle whose entries carry `<module>.<name>`
    pub fn scoped(&self, name: &str) -> Logger {
        Logger {
            inner: self.inner.clone(),
            module: Arc::from(format!("{}.{}", self.module, name)),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        self.inner.enabled.load(Ordering::Relaxed) && level >= self.min_level()
    }

    pub fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        self.write(self.entry(level, args));
    }

    pub fn log_with_location(
        &self,
        level: LogLevel,
        args: fmt::Arguments<'_>,
        file: &'static str,
        line: u32,
    ) {
        if !self.enabled(level) {
            return;
        }
        self.write(self.entry(level, args).with_location(file, line));
    }

    pub fn flush(&self) {
        for output in self.inner.outputs.lock().iter_mut() {
            output.flush();
        }
    }

    fn entry(&self, level: LogLevel, args: fmt::Arguments<'_>) -> LogEntry {
        let timestamp = self.inner.started.elapsed().as_millis() as u64;
        LogEntry::new(level, &self.module, args.to_string(), timestamp)
            .with_thread(std::thread::current().name())
    }

    fn write(&self, entry: LogEntry) {
        for output in self.inner.outputs.lock().iter_mut() {
            output.write_log(&entry);
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("module", &self.module)
            .field("min_level", &self.min_level())
            .finish()
    }
}

/// Logging macros
#[macro_export]
macro_rules! log_trace {
    ($logger:expr, $($arg:tt)*) => {
        $logger.log_with_location(
            $crate::logging::LogLevel::Trace,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)*) => {
        $logger.log_with_location(
            $crate::logging::LogLevel::Debug,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)*) => {
        $logger.log_with_location(
            $crate::logging::LogLevel::Info,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)*) => {
        $logger.log_with_location(
            $crate::logging::LogLevel::Warn,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)*) => {
        $logger.log_with_location(
            $crate::logging::LogLevel::Error,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_logger() -> (Logger, MemoryLogReader) {
        let logger = Logger::new();
        let output = MemoryLogOutput::new(4);
        let reader = output.reader();
        logger.add_output(Box::new(output));
        (logger, reader)
    }

    #[test]
    fn entries_below_min_level_are_dropped() {
        let (logger, reader) = memory_logger();
        logger.set_min_level(LogLevel::Warn);

        log_info!(logger, "probe {}", 1);
        log_warn!(logger, "probe {}", 2);

        let entries = reader.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "probe 2");
        assert_eq!(entries[0].level, LogLevel::Warn);
        assert!(entries[0].line.is_some());
    }

    #[test]
    fn scoped_handles_share_sinks() {
        let (logger, reader) = memory_logger();
        let bus = logger.scoped("bus").scoped("primary");
        assert_eq!(bus.module(), "ide.bus.primary");

        log_error!(bus, "reset");
        assert_eq!(reader.entries()[0].module, "ide.bus.primary");

        logger.set_enabled(false);
        log_error!(bus, "dropped");
        assert!(!reader.contains("dropped"));
    }

    #[test]
    fn memory_output_is_bounded() {
        let (logger, reader) = memory_logger();
        for i in 0..6 {
            log_info!(logger, "line {}", i);
        }
        let entries = reader.entries();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].message, "line 2");
    }
}
