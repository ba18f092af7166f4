//! # mlk-pal
//!
//! Platform abstraction for the QEMU `virt` machine (Cortex-A72 class):
//! the physical memory map and device windows ([`platform`]), the PL011
//! console ([`console`]), the GICv2 interrupt controller ([`gic`]) and the
//! ARM generic timer ([`timer`]).
//!
//! The kernel core never touches MMIO addresses directly; everything
//! platform-specific funnels through this crate.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod console;
pub mod gic;
pub mod platform;
pub mod timer;
