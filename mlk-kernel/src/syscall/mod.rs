//! Syscall and fault dispatch
//!
//! The synchronous exception handler: SVC from user mode dispatches on the
//! syscall number in `x8`, faults from user mode terminate the offending
//! process, and faults from kernel mode are kernel bugs that halt the
//! system behind a structured dump.
//!
//! A handler that suspended its caller returns the [`BLOCKED`] sentinel;
//! `x0` in the saved frame is then left untouched, and the unblocking side
//! (IPC handoff, reply delivery, child exit) writes the user-visible
//! result into the frame before the thread is next dispatched.

pub mod mem_ops;

use mlk_abi::error::to_return_value;
use mlk_abi::{Syscall, SysError, SysResult, numbers};
use mlk_arch::exceptions::TrapFrame;
use mlk_arch::registers::{esr, spsr};
use mlk_pal::console;

use crate::sched::{self, Priority, WaitOutcome};
use crate::{ipc, irq, loader};

/// Sentinel from handlers that blocked the caller: do not write `x0`.
pub const BLOCKED: i64 = i64::MIN;

/// Largest single console transfer.
const CONSOLE_MAX: u64 = 64 * 1024;

/// Install the exception handlers.
pub fn init() {
    mlk_arch::exceptions::set_sync_handler(sync_exception_handler);
    mlk_arch::exceptions::set_irq_handler(irq::irq_exception_handler);
    mlk_arch::exceptions::set_serror_handler(serror_handler);
    log::info!("Exception handlers installed");
}

/// Dispatch one syscall from the saved frame.
///
/// Number in `x8`, arguments in `x0`-`x3`, result to `x0` unless the
/// handler blocked the caller.
pub fn handle_syscall(frame: &mut TrapFrame) {
    let num = frame.gpr[8];
    let result = dispatch_syscall(num, frame);

    match result {
        Ok(BLOCKED) => {}
        other => frame.gpr[0] = to_return_value(other) as u64,
    }
}

fn dispatch_syscall(num: u64, frame: &mut TrapFrame) -> SysResult {
    let Some(syscall) = Syscall::from_number(num) else {
        log::warn!("Invalid syscall number {}", num);
        return Err(SysError::InvalidSyscall);
    };

    let (arg0, arg1, arg2, arg3) = (frame.gpr[0], frame.gpr[1], frame.gpr[2], frame.gpr[3]);
    log::trace!(
        "Syscall {} (x0={:#x}, x1={:#x}, x2={:#x}, x3={:#x})",
        syscall.name(),
        arg0,
        arg1,
        arg2,
        arg3
    );

    let tid = sched::current_tid();

    match syscall {
        // -- Process / thread
        Syscall::Exit => {
            sched::exit_current_process(arg0 as i64);
            Ok(BLOCKED) // the thread is dead; no result is ever observed
        }
        Syscall::Yield => {
            sched::yield_current();
            Ok(0)
        }
        Syscall::GetPid => Ok(sched::current_pid() as i64),
        Syscall::GetTid => Ok(tid as i64),
        Syscall::GetPpid => Ok(sched::current_ppid() as i64),
        Syscall::Spawn => {
            let priority = Priority::from_raw(arg1).ok_or(SysError::InvalidArgument)?;
            let pid = loader::spawn(arg0 as u32, priority, Some(sched::current_pid()))?;
            Ok(pid as i64)
        }
        Syscall::Wait => match sched::wait_child(arg0 as i64) {
            WaitOutcome::Done { pid, code } => {
                frame.gpr[1] = code as u64;
                Ok(pid as i64)
            }
            WaitOutcome::Blocked => Ok(BLOCKED),
            WaitOutcome::NoChildren => Err(SysError::NoChildren),
        },

        // -- IPC
        Syscall::Send => ipc::send(tid, arg0 as u32, arg1, arg2, arg3),
        Syscall::Recv => {
            let nonblocking = arg2 & numbers::RECV_NONBLOCK != 0;
            ipc::recv(tid, arg0 as u32, arg1, nonblocking, frame)
        }
        Syscall::Call => ipc::call(tid, arg0 as u32, arg1, arg2, arg3),
        Syscall::Reply => ipc::reply(arg0 as u32, arg1, arg2, arg3),
        Syscall::Notify => ipc::notify(arg0 as u32, arg1),

        // -- Ports
        Syscall::PortCreate => ipc::port_create(tid),
        Syscall::PortDestroy => ipc::port_destroy(tid, arg0 as u32),

        // -- Memory
        Syscall::MapDevice => mem_ops::map_device(arg0, arg1),
        Syscall::AllocDma => mem_ops::alloc_dma(arg0, frame),
        Syscall::GetPhys => mem_ops::get_phys(arg0),

        // -- Console
        Syscall::Write => sys_write(arg0, arg1),
        Syscall::Read => sys_read(arg0, arg1),

        // -- Debug
        Syscall::DebugPrint => sys_debug_print(arg0, arg1),
        Syscall::GetTicks => Ok(irq::ticks() as i64),
    }
}

/// `WRITE(addr, len)`: copy a user buffer to the console.
fn sys_write(addr: u64, len: u64) -> SysResult {
    if len == 0 {
        return Ok(0);
    }
    if len > CONSOLE_MAX || !crate::memory::layout::is_user_range(addr, len) {
        return Err(SysError::InvalidArgument);
    }

    let mut written = 0u64;
    let mut chunk = [0u8; 256];
    while written < len {
        let take = ((len - written) as usize).min(chunk.len());
        let copied = sched::with_current_aspace(|aspace| {
            aspace.copy_from_user(
                mlk_common::VirtAddr::new(addr + written),
                &mut chunk[..take],
            )
        })
        .ok_or(SysError::InvalidArgument)?;
        if copied.is_err() {
            return Err(SysError::InvalidArgument);
        }

        for &byte in &chunk[..take] {
            if byte == b'\n' {
                console::putc(b'\r');
            }
            console::putc(byte);
        }
        written += take as u64;
    }

    Ok(written as i64)
}

/// `READ(addr, len)`: drain pending console input. Never blocks; returns
/// the number of bytes delivered (possibly 0).
fn sys_read(addr: u64, len: u64) -> SysResult {
    if len == 0 {
        return Ok(0);
    }
    if len > CONSOLE_MAX || !crate::memory::layout::is_user_range(addr, len) {
        return Err(SysError::InvalidArgument);
    }

    let mut buf = [0u8; 256];
    let take = (len as usize).min(buf.len());
    let mut count = 0;
    while count < take {
        match console::try_getc() {
            Some(byte) => {
                buf[count] = byte;
                count += 1;
            }
            None => break,
        }
    }

    if count > 0 {
        let copied = sched::with_current_aspace(|aspace| {
            aspace.copy_to_user(mlk_common::VirtAddr::new(addr), &buf[..count])
        })
        .ok_or(SysError::InvalidArgument)?;
        if copied.is_err() {
            return Err(SysError::InvalidArgument);
        }
    }

    Ok(count as i64)
}

/// `DEBUG_PRINT(addr, len)`: route a user buffer through the kernel log.
fn sys_debug_print(addr: u64, len: u64) -> SysResult {
    if len == 0 || len > 256 || !crate::memory::layout::is_user_range(addr, len) {
        return Err(SysError::InvalidArgument);
    }

    let mut buf = [0u8; 256];
    let take = len as usize;
    let copied = sched::with_current_aspace(|aspace| {
        aspace.copy_from_user(mlk_common::VirtAddr::new(addr), &mut buf[..take])
    })
    .ok_or(SysError::InvalidArgument)?;
    if copied.is_err() {
        return Err(SysError::InvalidArgument);
    }

    let text = core::str::from_utf8(&buf[..take]).unwrap_or("<non-utf8>");
    log::info!(target: "user", "{}", text.trim_end_matches('\n'));
    Ok(take as i64)
}

// -- Fault handling

/// Exit code for a process killed by a fault (128 + SIGSEGV).
const FAULT_EXIT_CODE: i64 = 139;

/// A user-mode fault: log it, terminate the process, reschedule.
///
/// Sibling processes are unaffected; the dying thread never returns to
/// user mode because the reschedule below switches away for good.
fn user_fault(frame: &mut TrapFrame) {
    let ec = frame.exception_class();
    log::warn!(
        "Process {} fault: {} at ELR={:#x} FAR={:#x} ESR={:#x}",
        sched::current_pid(),
        esr::ec_name(ec),
        frame.elr,
        frame.far,
        frame.esr
    );
    sched::exit_current_process(FAULT_EXIT_CODE);
    sched::maybe_reschedule();
}

/// Structured register/fault dump for kernel-mode faults.
fn dump_fault(frame: &TrapFrame) {
    let ec = frame.exception_class();
    let iss = esr::iss(frame.esr);

    log::error!("Exception: {}", esr::ec_name(ec));
    log::error!("ESR:  {:#018x} [EC={:#04x} ISS={:#09x}]", frame.esr, ec, iss);
    log::error!("ELR:  {:#018x}", frame.elr);
    log::error!("FAR:  {:#018x}", frame.far);
    log::error!(
        "SPSR: {:#018x} [{}]",
        frame.spsr,
        spsr::el_name(frame.spsr)
    );

    if matches!(ec, esr::ec::DATA_ABORT_LOWER | esr::ec::DATA_ABORT_SAME) {
        log::error!(
            "Abort: {} access, FSC={:#04x}",
            if esr::abort::wnr(iss) { "write" } else { "read" },
            esr::abort::fsc(iss)
        );
    }

    for i in (0..30).step_by(2) {
        log::error!(
            "  X{:02}: {:#018x}    X{:02}: {:#018x}",
            i,
            frame.gpr[i],
            i + 1,
            frame.gpr[i + 1]
        );
    }
    log::error!("  X30: {:#018x}     SP: {:#018x}", frame.gpr[30], frame.sp);
}

/// Synchronous exception entry: syscalls and faults.
fn sync_exception_handler(frame: &mut TrapFrame) {
    if frame.from_el0() {
        sched::set_current_trap_frame(frame);

        match frame.exception_class() {
            esr::ec::SVC_AARCH64 => {
                handle_syscall(frame);
                sched::maybe_reschedule();
            }
            // Aborts, alignment faults and unknown classes from user mode
            // all isolate to the faulting process.
            _ => user_fault(frame),
        }
    } else {
        // Any synchronous exception from kernel mode is a kernel bug.
        dump_fault(frame);
        panic!(
            "Synchronous exception from kernel mode: {}",
            esr::ec_name(frame.exception_class())
        );
    }
}

/// SErrors are fatal regardless of origin.
fn serror_handler(frame: &mut TrapFrame) {
    dump_fault(frame);
    panic!("SError at ELR={:#x}", frame.elr);
}
