// RustOS IDE Error Handling
// Error taxonomy shared by the register interface, the bus scheduler and the controller

use core::fmt;

/// IDE driver error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdeError {
    /// A port range or IRQ line could not be claimed
    ResourceUnavailable,
    /// Register polling or command completion exceeded its budget
    Timeout,
    /// The drive raised ERR in the status register
    HardwareAbort { status: u8, error: u8 },
    /// The drive answered with an unexpected response shape
    ProtocolMismatch,
    /// No drive answers at the requested target
    DeviceNotFound,
    /// A device with the same name is already registered
    DuplicateDevice,
    /// Argument outside of what the command set accepts
    InvalidParameter,
    /// Operation not supported by this kind of drive
    NotSupported,
    /// The bus worker has been stopped
    Stopped,
}

impl fmt::Display for IdeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdeError::ResourceUnavailable => write!(f, "IDE resource unavailable"),
            IdeError::Timeout => write!(f, "IDE timeout"),
            IdeError::HardwareAbort { status, error } => {
                write!(f, "IDE hardware abort (status={:#04x}, error={:#04x})", status, error)
            }
            IdeError::ProtocolMismatch => write!(f, "IDE protocol mismatch"),
            IdeError::DeviceNotFound => write!(f, "IDE device not found"),
            IdeError::DuplicateDevice => write!(f, "IDE device already registered"),
            IdeError::InvalidParameter => write!(f, "Invalid IDE parameter"),
            IdeError::NotSupported => write!(f, "Not supported by IDE device"),
            IdeError::Stopped => write!(f, "IDE bus stopped"),
        }
    }
}

impl std::error::Error for IdeError {}

/// Result type for IDE operations
pub type IdeResult<T> = Result<T, IdeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_register_values() {
        let err = IdeError::HardwareAbort { status: 0x51, error: 0x04 };
        assert_eq!(err.to_string(), "IDE hardware abort (status=0x51, error=0x04)");
    }

    #[test]
    fn command_errors_convert() {
        use crate::drivers::storage::ide::command::ErrorCode;

        assert_eq!(IdeError::from(ErrorCode::Abort), IdeError::Timeout);
        assert_eq!(
            IdeError::from(ErrorCode::HardwareAbort { status: 0x41, error: 0x04 }),
            IdeError::HardwareAbort { status: 0x41, error: 0x04 }
        );
    }
}
