//! # mlk-common
//!
//! Shared leaf types for the MLK microkernel: physical/virtual address
//! newtypes and page-size constants. This crate has no dependencies and
//! is usable from both the kernel and userspace support code.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod addr;
pub mod memory;

pub use addr::{PhysAddr, VirtAddr};
