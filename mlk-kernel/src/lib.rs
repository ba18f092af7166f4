//! # mlk-kernel
//!
//! The MLK microkernel for 64-bit ARM (QEMU `virt`, Cortex-A72 class).
//! The privileged core multiplexes CPU, memory and IPC among isolated
//! user processes; drivers, filesystems and services live in user space
//! and cooperate over synchronous message passing.
//!
//! # Subsystems, in dependency order
//!
//! - [`memory::frame`] — bitmap allocator over physical RAM
//! - [`memory`] — address spaces, ASIDs, the kernel identity window
//! - [`sched::context`] — context switch and drop-to-EL0 primitives
//! - [`sched`] — priority scheduling, process lifecycle, resource ledger
//! - [`ipc`] — rendezvous ports: send/receive/call/reply/notify
//! - [`syscall`] / [`irq`] — exception dispatch and deferred reschedule
//!
//! # Boot state
//!
//! `_start` (in the kernel binary) runs with the MMU off at the load
//! address; everything here assumes the identity window once
//! [`memory::init`] has switched translation on.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod ipc;
pub mod irq;
pub mod loader;
pub mod logging;
pub mod memory;
pub mod sched;
pub mod syscall;
