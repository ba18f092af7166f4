//! Synchronous rendezvous IPC
//!
//! Syscall-level operations over the port table. The pattern throughout:
//! compute the outcome inside the port lock, then apply thread effects
//! (wake, block, frame writes) with the lock released — the scheduler lock
//! is never taken under the port lock.
//!
//! Messages are copied, never shared: the fast path writes `(op, arg0,
//! arg1)` straight into the peer's saved syscall frame, and the full
//! record lands in the peer's user buffer when one was supplied.

pub mod port;

use mlk_abi::{Message, SysError, SysResult};
use mlk_arch::IrqSpinMutex;
use mlk_arch::exceptions::TrapFrame;
use mlk_common::VirtAddr;

use crate::memory::layout;
use crate::sched::{self, ThreadState};
use crate::syscall::BLOCKED;

pub use port::{
    MAX_PORTS, PORT_INVALID, PORT_KERNEL, PortTable, QueuedSender, SEND_QUEUE_CAP,
    StrandedWaiters, WaitingReceiver,
};
use port::{NotifyOutcome, RecvOutcome, SendOutcome};

/// Global port table.
static PORTS: IrqSpinMutex<PortTable> = IrqSpinMutex::new(PortTable::new());

/// Copy the full message record and the register triple to a parked
/// receiver.
fn deliver_to_receiver(rx: &WaitingReceiver, msg: &Message) {
    if rx.buf != 0 {
        sched::with_aspace_of_thread(rx.tid, |aspace| {
            if aspace
                .copy_to_user(VirtAddr::new(rx.buf), msg.as_bytes())
                .is_err()
            {
                log::warn!("IPC delivery: receiver buffer unmapped, dropping copy");
            }
        });
    }

    if rx.frame != 0 {
        // SAFETY: The frame sits on the parked receiver's kernel stack,
        // recorded at its kernel entry; the thread has not run since.
        let frame = unsafe { &mut *(rx.frame as *mut TrapFrame) };
        frame.gpr[0] = msg.op as u64;
        frame.gpr[1] = msg.args[0];
        frame.gpr[2] = msg.args[1];
    }
}

/// Copy a message into the *current* process's user buffer.
fn copy_to_current(buf: u64, msg: &Message) -> Result<(), SysError> {
    sched::with_current_aspace(|aspace| {
        aspace
            .copy_to_user(VirtAddr::new(buf), msg.as_bytes())
            .map_err(|_| SysError::InvalidArgument)
    })
    .unwrap_or(Err(SysError::InvalidArgument))
}

/// `SEND`: deliver to a parked receiver or join the sender queue.
pub fn send(tid: u32, port: u32, op: u64, arg0: u64, arg1: u64) -> SysResult {
    let mut msg = Message::from_regs(op, arg0, arg1);
    msg.sender = tid;

    let outcome = PORTS.lock().send(
        port,
        QueuedSender {
            tid,
            msg,
            is_call: false,
        },
    )?;

    match outcome {
        SendOutcome::Delivered { receiver, msg } => {
            deliver_to_receiver(&receiver, &msg);
            sched::unblock(receiver.tid);
            Ok(0)
        }
        SendOutcome::Queued => {
            sched::block_current(ThreadState::BlockedIpc);
            Ok(BLOCKED)
        }
    }
}

/// `RECV`: consume a pending notification or queued sender, or park.
///
/// Returns the message `op`; `arg0`/`arg1` are written to the caller's
/// frame directly. A user buffer (x1) receives the full record, including
/// the `sender` tid needed for `REPLY`.
pub fn recv(tid: u32, port: u32, buf: u64, nonblocking: bool, frame: &mut TrapFrame) -> SysResult {
    if buf != 0 && !layout::is_user_range(buf, Message::SIZE as u64) {
        return Err(SysError::InvalidArgument);
    }

    let rx = WaitingReceiver {
        tid,
        buf,
        frame: frame as *mut TrapFrame as u64,
    };

    let outcome = PORTS.lock().recv(port, rx, !nonblocking)?;

    match outcome {
        RecvOutcome::Notification(badge) => {
            if buf != 0 {
                copy_to_current(buf, &Message::notification(badge))?;
            }
            frame.gpr[1] = badge;
            frame.gpr[2] = 0;
            Ok(0)
        }
        RecvOutcome::Delivered { sender } => {
            if buf != 0 {
                copy_to_current(buf, &sender.msg)?;
            }
            frame.gpr[1] = sender.msg.args[0];
            frame.gpr[2] = sender.msg.args[1];

            if sender.is_call {
                // The sender was mid-Call: it stays blocked until the
                // reply, it only changes what it is blocked on.
                sched::mark_awaiting_reply(sender.tid);
            } else {
                sched::complete_blocked(sender.tid, 0, None, None);
            }
            Ok(sender.msg.op as i64)
        }
        RecvOutcome::Blocked => {
            sched::block_current(ThreadState::BlockedIpc);
            Ok(BLOCKED)
        }
        RecvOutcome::Empty => Err(SysError::QueueEmpty),
    }
}

/// `CALL`: send, then atomically wait for the reply.
///
/// The caller enters the blocked state in the same syscall, so the reply
/// can never race ahead of the wait.
pub fn call(tid: u32, port: u32, op: u64, arg0: u64, arg1: u64) -> SysResult {
    let mut msg = Message::from_regs(op, arg0, arg1);
    msg.sender = tid;

    let outcome = PORTS.lock().send(
        port,
        QueuedSender {
            tid,
            msg,
            is_call: true,
        },
    )?;

    match outcome {
        SendOutcome::Delivered { receiver, msg } => {
            deliver_to_receiver(&receiver, &msg);
            sched::unblock(receiver.tid);
            sched::mark_awaiting_reply(tid);
            sched::block_current(ThreadState::BlockedIpc);
            Ok(BLOCKED)
        }
        SendOutcome::Queued => {
            // awaiting_reply is set when a receiver dequeues the call.
            sched::block_current(ThreadState::BlockedIpc);
            Ok(BLOCKED)
        }
    }
}

/// `REPLY`: complete a thread blocked in `CALL`.
///
/// The reply lands in the caller's return registers `(op, arg0, arg1)`.
/// A caller that died in the meantime yields `NotFound`.
pub fn reply(target_tid: u32, op: u64, arg0: u64, arg1: u64) -> SysResult {
    sched::deliver_reply(target_tid, op, arg0, arg1)?;
    Ok(0)
}

/// `NOTIFY`: post a badge without blocking.
///
/// A parked receiver wakes immediately with the badge in `x1`; otherwise
/// the badge is stored, overwriting any earlier pending badge.
pub fn notify(port: u32, badge: u64) -> SysResult {
    let outcome = PORTS.lock().notify(port, badge)?;

    match outcome {
        NotifyOutcome::Woken { receiver, badge } => {
            let msg = Message::notification(badge);
            if receiver.buf != 0 {
                sched::with_aspace_of_thread(receiver.tid, |aspace| {
                    if aspace
                        .copy_to_user(VirtAddr::new(receiver.buf), msg.as_bytes())
                        .is_err()
                    {
                        log::warn!("IPC delivery: receiver buffer unmapped, dropping copy");
                    }
                });
            }
            if receiver.frame != 0 {
                // SAFETY: Parked receiver's saved frame, as in delivery.
                let frame = unsafe { &mut *(receiver.frame as *mut TrapFrame) };
                frame.gpr[0] = 0;
                frame.gpr[1] = badge;
                frame.gpr[2] = 0;
            }
            sched::unblock(receiver.tid);
            Ok(0)
        }
        NotifyOutcome::Stored => Ok(0),
    }
}

/// `PORT_CREATE`: allocate a port owned by the calling thread.
pub fn port_create(tid: u32) -> SysResult {
    let id = PORTS.lock().create(tid)?;
    Ok(id as i64)
}

/// `PORT_DESTROY`: tear down a port; every parked peer fails with
/// `InvalidPort`.
pub fn port_destroy(tid: u32, port: u32) -> SysResult {
    let mut stranded = StrandedWaiters::new();
    PORTS.lock().destroy(port, tid, &mut stranded)?;

    for &waiter in stranded.tids() {
        sched::complete_blocked(waiter, SysError::InvalidPort.as_i64() as u64, None, None);
    }
    Ok(0)
}

/// Scrub a dying process's threads out of the port table.
///
/// Returns the threads of *other* processes stranded by ports the dying
/// threads owned; the exit path fails them with `InvalidPort`.
pub fn purge_process(tids: &[u32]) -> StrandedWaiters {
    let mut stranded = StrandedWaiters::new();
    PORTS.lock().purge_threads(tids, &mut stranded);
    stranded
}
