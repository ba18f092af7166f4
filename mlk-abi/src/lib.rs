//! # mlk-abi
//!
//! The user-visible contract of the MLK microkernel: syscall numbers and
//! argument conventions, the error enumeration, the IPC message record, and
//! the MLK executable image format consumed by `SPAWN`.
//!
//! # Syscall convention
//!
//! `svc #0` with the syscall number in `x8`, arguments in `x0`-`x3`, and the
//! result in `x0`. Negative results are errors drawn from [`error::SysError`].
//! Multi-value syscalls (`RECV`, `CALL`, `WAIT`, `ALLOC_DMA`) return their
//! secondary values in `x1` and `x2`.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod image;
pub mod message;
pub mod numbers;

pub use error::{SysError, SysResult};
pub use message::Message;
pub use numbers::Syscall;
