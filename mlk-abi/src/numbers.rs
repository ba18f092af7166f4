//! Syscall numbers
//!
//! Defines the syscall ABI for the MLK microkernel:
//! - x8: syscall number
//! - x0-x3: arguments
//! - x0: return value (negative = error; x1/x2 for multi-value returns)

/// Syscall numbers, grouped by subsystem.
///
/// The numbering is part of the ABI and must not be reshuffled.
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Syscall {
    // === Process / thread ===
    /// Terminate the calling process with an exit code.
    Exit = 0,
    /// Give up the remainder of the current time slice.
    Yield = 1,
    /// Get the calling process id.
    GetPid = 2,
    /// Get the calling thread id.
    GetTid = 3,
    /// Spawn a process from an embedded binary id, with a priority.
    Spawn = 4,
    /// Wait for a child to exit; reaps the zombie.
    Wait = 5,
    /// Get the parent process id.
    GetPpid = 6,

    // === IPC ===
    /// Send a message to a port (blocks until a receiver takes it).
    Send = 10,
    /// Receive a message from a port (blocks until one arrives).
    Recv = 11,
    /// Send then atomically wait for the reply.
    Call = 12,
    /// Reply to a thread blocked in `Call`.
    Reply = 13,
    /// Post a badge to a port without blocking; coalesces.
    Notify = 14,

    // === Ports ===
    /// Create a rendezvous port owned by the calling thread.
    PortCreate = 20,
    /// Destroy a port; queued peers fail with `InvalidPort`.
    PortDestroy = 21,

    // === Memory ===
    /// Map an allowlisted device region into the caller's address space.
    MapDevice = 32,
    /// Allocate physically-contiguous DMA memory; returns (virt, phys).
    AllocDma = 33,
    /// Translate a virtual address of the caller to its physical address.
    GetPhys = 34,

    // === Console ===
    /// Write bytes from a user buffer to the console.
    Write = 40,
    /// Drain pending console input into a user buffer (non-blocking).
    Read = 41,

    // === Debug ===
    /// Print a user buffer through the kernel log path.
    DebugPrint = 100,
    /// Get the timer tick count since boot.
    GetTicks = 101,
}

impl Syscall {
    /// Try to convert from a raw syscall number.
    pub fn from_number(num: u64) -> Option<Self> {
        match num {
            0 => Some(Self::Exit),
            1 => Some(Self::Yield),
            2 => Some(Self::GetPid),
            3 => Some(Self::GetTid),
            4 => Some(Self::Spawn),
            5 => Some(Self::Wait),
            6 => Some(Self::GetPpid),
            10 => Some(Self::Send),
            11 => Some(Self::Recv),
            12 => Some(Self::Call),
            13 => Some(Self::Reply),
            14 => Some(Self::Notify),
            20 => Some(Self::PortCreate),
            21 => Some(Self::PortDestroy),
            32 => Some(Self::MapDevice),
            33 => Some(Self::AllocDma),
            34 => Some(Self::GetPhys),
            40 => Some(Self::Write),
            41 => Some(Self::Read),
            100 => Some(Self::DebugPrint),
            101 => Some(Self::GetTicks),
            _ => None,
        }
    }

    /// Get the syscall name for logging.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Exit => "Exit",
            Self::Yield => "Yield",
            Self::GetPid => "GetPid",
            Self::GetTid => "GetTid",
            Self::Spawn => "Spawn",
            Self::Wait => "Wait",
            Self::GetPpid => "GetPpid",
            Self::Send => "Send",
            Self::Recv => "Recv",
            Self::Call => "Call",
            Self::Reply => "Reply",
            Self::Notify => "Notify",
            Self::PortCreate => "PortCreate",
            Self::PortDestroy => "PortDestroy",
            Self::MapDevice => "MapDevice",
            Self::AllocDma => "AllocDma",
            Self::GetPhys => "GetPhys",
            Self::Write => "Write",
            Self::Read => "Read",
            Self::DebugPrint => "DebugPrint",
            Self::GetTicks => "GetTicks",
        }
    }
}

/// Non-blocking receive flag for `Recv`'s x2 argument.
pub const RECV_NONBLOCK: u64 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_round_trip() {
        for &sc in &[
            Syscall::Exit,
            Syscall::Yield,
            Syscall::GetPid,
            Syscall::GetTid,
            Syscall::Spawn,
            Syscall::Wait,
            Syscall::GetPpid,
            Syscall::Send,
            Syscall::Recv,
            Syscall::Call,
            Syscall::Reply,
            Syscall::Notify,
            Syscall::PortCreate,
            Syscall::PortDestroy,
            Syscall::MapDevice,
            Syscall::AllocDma,
            Syscall::GetPhys,
            Syscall::Write,
            Syscall::Read,
            Syscall::DebugPrint,
            Syscall::GetTicks,
        ] {
            assert_eq!(Syscall::from_number(sc as u64), Some(sc));
        }
    }

    #[test]
    fn test_unknown_numbers_rejected() {
        assert_eq!(Syscall::from_number(7), None);
        assert_eq!(Syscall::from_number(15), None);
        assert_eq!(Syscall::from_number(99), None);
        assert_eq!(Syscall::from_number(u64::MAX), None);
    }

    #[test]
    fn test_fixed_abi_values() {
        // These values are wire ABI and must never change.
        assert_eq!(Syscall::Exit as u64, 0);
        assert_eq!(Syscall::Spawn as u64, 4);
        assert_eq!(Syscall::Send as u64, 10);
        assert_eq!(Syscall::Recv as u64, 11);
        assert_eq!(Syscall::PortCreate as u64, 20);
        assert_eq!(Syscall::MapDevice as u64, 32);
        assert_eq!(Syscall::Write as u64, 40);
        assert_eq!(Syscall::DebugPrint as u64, 100);
    }
}
