//! Error types for the data abstraction layer.

use thiserror::Error;

/// Result type alias for DAL operations.
pub type DalResult<T> = Result<T, DalError>;

/// Error variants for DAL configuration, registry and stream operations.
#[derive(Debug, Error)]
pub enum DalError {
    /// Wraps standard I/O errors from the local filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration key the driver does not recognize.
    #[error("Unrecognized option '{key}' for DAL '{dal}'")]
    UnknownOption {
        /// Driver being configured.
        dal: String,
        /// The offending key.
        key: String,
    },

    /// A required configuration key was not supplied.
    #[error("Missing option '{key}' for DAL '{dal}'")]
    MissingOption {
        /// Driver being configured.
        dal: String,
        /// The key that is required.
        key: &'static str,
    },

    /// A configuration value could not be used.
    #[error("Invalid value for option '{key}': {reason}")]
    InvalidOption {
        /// The key carrying the bad value.
        key: String,
        /// Description of the problem.
        reason: String,
    },

    /// A fault rule could not be parsed.
    #[error("Malformed fault rule '{rule}': {reason}")]
    RuleSyntax {
        /// The raw rule text.
        rule: String,
        /// Description of the problem.
        reason: String,
    },

    /// A driver with this name is already installed.
    #[error("DAL named '{0}' already exists")]
    DriverExists(String),

    /// A driver is missing one of the required operations.
    #[error("DAL '{name}' has no operation '{op}'")]
    DriverIncomplete {
        /// Name of the rejected driver.
        name: String,
        /// First missing operation.
        op: &'static str,
    },

    /// The registry has no room left.
    #[error("No room for DAL '{name}': registry holds at most {capacity} drivers")]
    RegistryFull {
        /// Name of the rejected driver.
        name: String,
        /// Registry capacity.
        capacity: usize,
    },

    /// No driver is installed under this name.
    #[error("Unknown DAL '{0}'")]
    DriverNotFound(String),

    /// A runtime module could not be loaded.
    #[error("Failed to load DAL module '{module}': {reason}")]
    DynamicLoad {
        /// Path of the shared module.
        module: String,
        /// Description of the problem.
        reason: String,
    },

    /// `open` was called before `update_object_location`.
    #[error("No object location computed for DAL '{0}'")]
    LocationNotComputed(&'static str),

    /// A stream operation was invoked on a stream that is not open.
    #[error("Stream {url} is not open")]
    NotOpen {
        /// URL of the stream.
        url: String,
    },

    /// The context was created by a different driver.
    #[error("Context does not belong to DAL '{expected}'")]
    ContextMismatch {
        /// Driver that received the context.
        expected: &'static str,
    },

    /// The erasure engine refused or failed an operation.
    #[error("Erasure engine error on {path}: {reason}")]
    Engine {
        /// Path template of the object.
        path: String,
        /// Description of the problem.
        reason: String,
    },

    /// The erasure engine reported an unrecoverable close.
    #[error("Erasure engine close failed on {path} (status {status})")]
    EngineFatal {
        /// Path template of the object.
        path: String,
        /// Raw status returned by the engine.
        status: i32,
    },

    /// A write exceeds the size the erasure engine accepts in one call.
    #[error("Write of {size} bytes exceeds engine limit of {limit} bytes")]
    WriteTooLarge {
        /// Requested size.
        size: usize,
        /// Largest accepted size.
        limit: usize,
    },

    /// The operation is not provided by this driver.
    #[error("DAL '{dal}' does not support {op}")]
    Unsupported {
        /// Driver name.
        dal: String,
        /// Operation name.
        op: &'static str,
    },

    /// A fault injected by a fault rule.
    #[error("Injected fault (code {code})")]
    Injected {
        /// The code configured on the rule.
        code: i32,
    },

    /// A runtime module returned a failure status.
    #[error("DAL module operation {op} returned {status}")]
    Module {
        /// Operation name.
        op: &'static str,
        /// Raw status returned by the module.
        status: i64,
    },
}

impl DalError {
    /// Signed status for this error as seen through the C ABI.
    ///
    /// Injected faults report their configured code verbatim, module
    /// failures report the module's own status, everything else maps to a
    /// negative errno.
    pub fn status(&self) -> i64 {
        match self {
            DalError::Injected { code } => *code as i64,
            DalError::Module { status, .. } => *status,
            DalError::Io(e) => -(e.raw_os_error().unwrap_or(libc::EIO) as i64),
            other => -(other.errno() as i64),
        }
    }

    /// errno value describing this error.
    pub fn errno(&self) -> i32 {
        match self {
            DalError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            DalError::UnknownOption { .. }
            | DalError::MissingOption { .. }
            | DalError::InvalidOption { .. }
            | DalError::RuleSyntax { .. }
            | DalError::LocationNotComputed(_)
            | DalError::ContextMismatch { .. } => libc::EINVAL,
            DalError::DriverExists(_) => libc::EEXIST,
            DalError::DriverIncomplete { .. } | DalError::Unsupported { .. } => libc::ENOSYS,
            DalError::RegistryFull { .. } => libc::ENOSPC,
            DalError::DriverNotFound(_) | DalError::DynamicLoad { .. } => libc::ENOENT,
            DalError::NotOpen { .. } => libc::EBADF,
            DalError::Engine { .. }
            | DalError::EngineFatal { .. }
            | DalError::WriteTooLarge { .. }
            | DalError::Module { .. } => libc::EIO,
            DalError::Injected { code } => *code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_from_std() {
        let std_err = std::io::Error::from_raw_os_error(libc::ENOENT);
        let err: DalError = std_err.into();
        assert!(matches!(err, DalError::Io(_)));
        assert_eq!(err.status(), -(libc::ENOENT as i64));
    }

    #[test]
    fn test_injected_status_is_verbatim() {
        let err = DalError::Injected { code: 5 };
        assert_eq!(err.status(), 5);
        assert_eq!(format!("{}", err), "Injected fault (code 5)");
    }

    #[test]
    fn test_state_errors_are_negative() {
        let err = DalError::LocationNotComputed("POSIX");
        assert_eq!(err.status(), -(libc::EINVAL as i64));

        let err = DalError::NotOpen {
            url: "obj".to_string(),
        };
        assert_eq!(err.status(), -(libc::EBADF as i64));
    }

    #[test]
    fn test_write_too_large_message() {
        let err = DalError::WriteTooLarge {
            size: 1 << 32,
            limit: i32::MAX as usize,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("4294967296"));
        assert!(msg.contains("2147483647"));
    }

    #[test]
    fn test_driver_incomplete_message() {
        let err = DalError::DriverIncomplete {
            name: "CUSTOM".to_string(),
            op: "sync",
        };
        assert_eq!(format!("{}", err), "DAL 'CUSTOM' has no operation 'sync'");
    }
}
