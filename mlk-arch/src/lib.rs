//! # mlk-arch
//!
//! AArch64 architecture support for the MLK microkernel:
//!
//! - CPU control: interrupt masking, barriers, WFI/WFE ([`cpu`])
//! - System-register helpers and ESR/SPSR decoding ([`registers`])
//! - The exception vector table and trap-frame plumbing ([`exceptions`])
//! - MMU control: MAIR/TCR programming, descriptor flags, TLB maintenance
//!   ([`mmu`])
//! - Interrupt-safe spinlocks ([`sync`])
//!
//! Inline assembly and system-register accesses are confined to
//! `target_arch = "aarch64"`; on other targets the crate compiles with inert
//! fallbacks so the kernel's table logic can be unit tested on the host.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod cpu;
pub mod exceptions;
pub mod mmu;
pub mod registers;
pub mod sync;

pub use cpu::halt;
pub use sync::IrqSpinMutex;
