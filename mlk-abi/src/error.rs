//! Syscall error codes
//!
//! Negative values indicate errors, zero indicates success, positive values
//! carry syscall-specific results (pids, port ids, byte counts, addresses).

/// Syscall error codes.
#[repr(i64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SysError {
    /// Unknown syscall number.
    InvalidSyscall = -1,
    /// An argument was out of range or malformed.
    InvalidArgument = -2,
    /// The caller is not allowed to perform the operation.
    NoPermission = -3,
    /// Out of frames or table slots.
    NoMemory = -4,
    /// The operation would block and non-blocking behaviour was requested,
    /// or a sender queue is at capacity.
    WouldBlock = -5,
    /// A blocking operation was interrupted.
    Interrupted = -6,
    /// The referenced object does not exist.
    NotFound = -7,
    /// The object already exists.
    AlreadyExists = -8,
    /// The port id is invalid, reserved, or closed.
    InvalidPort = -9,
    /// A queue is at capacity.
    QueueFull = -10,
    /// A queue is empty (non-blocking receive found no message).
    QueueEmpty = -11,
    /// The caller has no children to wait for.
    NoChildren = -12,
    /// The targeted child is still running.
    ChildRunning = -13,
}

/// Successful return value.
pub const SUCCESS: i64 = 0;

impl SysError {
    /// Convert to the raw i64 carried in x0.
    #[inline]
    pub const fn as_i64(self) -> i64 {
        self as i64
    }

    /// Get the error name for logging.
    pub const fn name(self) -> &'static str {
        match self {
            Self::InvalidSyscall => "InvalidSyscall",
            Self::InvalidArgument => "InvalidArgument",
            Self::NoPermission => "NoPermission",
            Self::NoMemory => "NoMemory",
            Self::WouldBlock => "WouldBlock",
            Self::Interrupted => "Interrupted",
            Self::NotFound => "NotFound",
            Self::AlreadyExists => "AlreadyExists",
            Self::InvalidPort => "InvalidPort",
            Self::QueueFull => "QueueFull",
            Self::QueueEmpty => "QueueEmpty",
            Self::NoChildren => "NoChildren",
            Self::ChildRunning => "ChildRunning",
        }
    }
}

/// Syscall result type: `Ok` carries the x0 return value.
pub type SysResult = Result<i64, SysError>;

/// Collapse a syscall result to the raw x0 value.
#[inline]
pub fn to_return_value(result: SysResult) -> i64 {
    match result {
        Ok(v) => v,
        Err(e) => e.as_i64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_error_values() {
        // Wire ABI; the magnitudes are contractual.
        assert_eq!(SysError::InvalidSyscall.as_i64(), -1);
        assert_eq!(SysError::InvalidArgument.as_i64(), -2);
        assert_eq!(SysError::NoPermission.as_i64(), -3);
        assert_eq!(SysError::NoMemory.as_i64(), -4);
        assert_eq!(SysError::WouldBlock.as_i64(), -5);
        assert_eq!(SysError::Interrupted.as_i64(), -6);
        assert_eq!(SysError::NotFound.as_i64(), -7);
        assert_eq!(SysError::AlreadyExists.as_i64(), -8);
        assert_eq!(SysError::InvalidPort.as_i64(), -9);
        assert_eq!(SysError::QueueFull.as_i64(), -10);
        assert_eq!(SysError::QueueEmpty.as_i64(), -11);
        assert_eq!(SysError::NoChildren.as_i64(), -12);
        assert_eq!(SysError::ChildRunning.as_i64(), -13);
    }

    #[test]
    fn test_to_return_value() {
        assert_eq!(to_return_value(Ok(42)), 42);
        assert_eq!(to_return_value(Err(SysError::InvalidPort)), -9);
    }
}
