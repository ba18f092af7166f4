//! System Register Helpers
//!
//! Thin wrappers over the registers the kernel programs directly, plus the
//! ESR/SPSR bit decoding used by exception dispatch and fault reporting.

#[cfg(target_arch = "aarch64")]
use aarch64_cpu::registers::{SP_EL0, VBAR_EL1};
#[cfg(target_arch = "aarch64")]
use tock_registers::interfaces::{Readable, Writeable};

/// Read VBAR_EL1 (Vector Base Address Register).
#[cfg(target_arch = "aarch64")]
#[must_use]
#[inline]
pub fn read_vbar_el1() -> u64 {
    VBAR_EL1.get()
}

/// Write VBAR_EL1 (Vector Base Address Register).
///
/// The address must point at a valid, 2 KB-aligned vector table.
#[cfg(target_arch = "aarch64")]
#[inline]
pub fn write_vbar_el1(value: u64) {
    VBAR_EL1.set(value);
}

/// Read SP_EL0 (user stack pointer).
#[cfg(target_arch = "aarch64")]
#[must_use]
#[inline]
pub fn read_sp_el0() -> u64 {
    SP_EL0.get()
}

/// Exception Syndrome Register (ESR) decoding.
pub mod esr {
    /// Exception class (EC) field.
    #[inline]
    #[must_use]
    pub const fn exception_class(esr: u64) -> u8 {
        ((esr >> 26) & 0x3F) as u8
    }

    /// Instruction Specific Syndrome (ISS) field.
    #[inline]
    #[must_use]
    pub const fn iss(esr: u64) -> u32 {
        (esr & 0x1FF_FFFF) as u32
    }

    /// Exception class values the kernel dispatches on.
    pub mod ec {
        /// Unknown reason.
        pub const UNKNOWN: u8 = 0x00;
        /// Illegal execution state.
        pub const ILLEGAL_EXECUTION: u8 = 0x0E;
        /// SVC from AArch64.
        pub const SVC_AARCH64: u8 = 0x15;
        /// Instruction abort from a lower EL (user fault).
        pub const INSTRUCTION_ABORT_LOWER: u8 = 0x20;
        /// Instruction abort from the current EL (kernel bug).
        pub const INSTRUCTION_ABORT_SAME: u8 = 0x21;
        /// PC alignment fault.
        pub const PC_ALIGNMENT: u8 = 0x22;
        /// Data abort from a lower EL (user fault).
        pub const DATA_ABORT_LOWER: u8 = 0x24;
        /// Data abort from the current EL (kernel bug).
        pub const DATA_ABORT_SAME: u8 = 0x25;
        /// SP alignment fault.
        pub const SP_ALIGNMENT: u8 = 0x26;
        /// BRK instruction from AArch64.
        pub const BRK_AARCH64: u8 = 0x3C;
    }

    /// Get a human-readable name for an exception class.
    #[must_use]
    pub fn ec_name(ec_value: u8) -> &'static str {
        match ec_value {
            ec::UNKNOWN => "Unknown",
            ec::ILLEGAL_EXECUTION => "Illegal execution state",
            ec::SVC_AARCH64 => "SVC (AArch64)",
            ec::INSTRUCTION_ABORT_LOWER => "Instruction abort (lower EL)",
            ec::INSTRUCTION_ABORT_SAME => "Instruction abort (same EL)",
            ec::PC_ALIGNMENT => "PC alignment fault",
            ec::DATA_ABORT_LOWER => "Data abort (lower EL)",
            ec::DATA_ABORT_SAME => "Data abort (same EL)",
            ec::SP_ALIGNMENT => "SP alignment fault",
            ec::BRK_AARCH64 => "BRK (AArch64)",
            _ => "Unhandled class",
        }
    }

    /// Data/instruction abort syndrome helpers.
    pub mod abort {
        /// Fault status code, low 6 bits of the ISS.
        #[inline]
        #[must_use]
        pub const fn fsc(iss: u32) -> u32 {
            iss & 0x3F
        }

        /// Write-not-Read: true if the faulting access was a write.
        #[inline]
        #[must_use]
        pub const fn wnr(iss: u32) -> bool {
            (iss >> 6) & 1 != 0
        }
    }
}

/// Saved Program Status Register (SPSR) decoding.
pub mod spsr {
    /// SPSR value for dropping into EL0t with all interrupts enabled.
    pub const EL0T: u64 = 0x0000_0000;

    /// Mode field for EL1h (kernel, SP_EL1).
    pub const EL1H: u64 = 0x0000_0005;

    /// True if the saved state was EL0.
    #[inline]
    #[must_use]
    pub const fn from_el0(spsr: u64) -> bool {
        (spsr & 0x0F) == 0
    }

    /// Get a short name for the saved exception level.
    #[must_use]
    pub fn el_name(spsr: u64) -> &'static str {
        match spsr & 0x0F {
            0b0000 => "EL0t",
            0b0100 => "EL1t",
            0b0101 => "EL1h",
            _ => "EL?",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_esr_decode() {
        // EC is bits [31:26].
        let esr = (esr::ec::SVC_AARCH64 as u64) << 26 | 0x0;
        assert_eq!(esr::exception_class(esr), esr::ec::SVC_AARCH64);

        let abort = (esr::ec::DATA_ABORT_LOWER as u64) << 26 | (1 << 6) | 0x04;
        let iss = esr::iss(abort);
        assert!(esr::abort::wnr(iss));
        assert_eq!(esr::abort::fsc(iss), 0x04);
    }

    #[test]
    fn test_spsr_el_decode() {
        assert!(spsr::from_el0(spsr::EL0T));
        assert!(!spsr::from_el0(spsr::EL1H));
        assert_eq!(spsr::el_name(spsr::EL1H), "EL1h");
        assert_eq!(spsr::el_name(spsr::EL0T), "EL0t");
    }
}
