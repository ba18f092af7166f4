//! Scheduler
//!
//! Priority-based preemptive scheduling over fixed thread and process
//! tables. The design hinges on one rule: the context switch happens only
//! at the exception-return boundary. Timer ticks, yields and blocking
//! syscalls merely set the process-wide reschedule flag; the dispatch tail
//! calls [`maybe_reschedule`], which re-enqueues the outgoing thread and
//! performs the actual switch. Nothing ever switches from inside a nested
//! handler.
//!
//! # Thread states
//!
//! `Ready -> Running` on dispatch; `Running -> Ready` on timeslice expiry
//! or yield; `Running -> BlockedIpc/BlockedWait` in a blocking syscall;
//! `Blocked* -> Ready` on unblock; anything -> `Dead` on exit. Exactly one
//! thread is `Running` at any time and it is `current`.

pub mod context;
pub mod process;
pub mod thread;

use core::sync::atomic::{AtomicBool, Ordering};

use mlk_abi::SysError;
use mlk_arch::exceptions::TrapFrame;
use mlk_arch::mmu;
use mlk_arch::{IrqSpinMutex, cpu};

use crate::memory::{self, AddressSpace};

pub use process::{MAX_PROCESSES, MAX_REGIONS, Process, ProcessState, ProcessTable};
pub use thread::{
    MAX_THREADS, NO_SLOT, Priority, ReadyQueues, TID_IDLE, Thread, ThreadState, ThreadTable,
};

/// Slot index of the idle thread.
const IDLE_SLOT: usize = 0;

// -- Reschedule Flag

/// Set by the timer tick, yields and blocking syscalls; consumed by
/// [`maybe_reschedule`] at exception return.
static NEEDS_RESCHEDULE: AtomicBool = AtomicBool::new(false);

/// Request a reschedule at the next exception-return boundary.
#[inline]
pub fn request_reschedule() {
    NEEDS_RESCHEDULE.store(true, Ordering::Release);
}

/// Consume the reschedule flag.
#[inline]
fn take_reschedule() -> bool {
    NEEDS_RESCHEDULE.swap(false, Ordering::AcqRel)
}

// -- Scheduler State

/// All scheduling state, behind one interrupt-safe lock.
pub struct Scheduler {
    /// Thread table.
    pub threads: ThreadTable,
    /// Process table.
    pub processes: ProcessTable,
    /// Per-priority ready queues.
    pub queues: ReadyQueues,
    /// Slot of the running thread.
    pub current: usize,
}

impl Scheduler {
    const fn new() -> Self {
        Self {
            threads: ThreadTable::new(),
            processes: ProcessTable::new(),
            queues: ReadyQueues::new(),
            current: IDLE_SLOT,
        }
    }
}

static SCHED: IrqSpinMutex<Scheduler> = IrqSpinMutex::new(Scheduler::new());

/// Initialise the scheduler: the boot context becomes the idle thread.
///
/// The idle thread is a kernel thread that never sits on a ready queue;
/// `maybe_reschedule` falls back to it when every queue is empty.
pub fn init() {
    let mut sched = SCHED.lock();
    let slot = sched.threads.alloc().expect("thread table empty at init");
    assert_eq!(slot, IDLE_SLOT);

    let idle = &mut sched.threads.slots[slot];
    idle.state = ThreadState::Running;
    idle.priority = Priority::Idle;
    idle.time_slice = Priority::Idle.time_slice();
    idle.is_user = false;
    sched.current = IDLE_SLOT;

    log::info!(
        "Scheduler ready: {} thread slots, {} process slots",
        MAX_THREADS,
        MAX_PROCESSES
    );
}

// -- Current-thread queries

/// Thread id of the running thread.
#[must_use]
pub fn current_tid() -> u32 {
    let sched = SCHED.lock();
    sched.threads.slots[sched.current].tid
}

/// Process id of the running thread (0 for the idle thread).
#[must_use]
pub fn current_pid() -> u32 {
    let sched = SCHED.lock();
    sched.threads.slots[sched.current].pid.unwrap_or(0)
}

/// Parent pid of the running process (0 when there is none).
#[must_use]
pub fn current_ppid() -> u32 {
    let sched = SCHED.lock();
    let Some(pid) = sched.threads.slots[sched.current].pid else {
        return 0;
    };
    sched
        .processes
        .find(pid)
        .and_then(|slot| sched.processes.slots[slot].parent)
        .unwrap_or(0)
}

/// Whether the running thread is a kernel thread.
#[must_use]
pub fn current_is_kernel() -> bool {
    let sched = SCHED.lock();
    !sched.threads.slots[sched.current].is_user
}

/// Record the running thread's live trap frame.
///
/// Called at every user-mode kernel entry so unblockers can write syscall
/// results into the saved frame.
pub fn set_current_trap_frame(frame: &mut TrapFrame) {
    let mut sched = SCHED.lock();
    let cur = sched.current;
    sched.threads.slots[cur].trap_frame = frame as *mut TrapFrame as u64;
}

/// First-run parameters of the running thread, for the entry trampoline.
#[must_use]
pub fn current_entry_info() -> (bool, u64, u64) {
    let sched = SCHED.lock();
    let t = &sched.threads.slots[sched.current];
    (t.is_user, t.user_entry, t.user_sp)
}

/// Run a closure over the running process's address space.
pub fn with_current_aspace<R>(f: impl FnOnce(&mut AddressSpace) -> R) -> Option<R> {
    let mut sched = SCHED.lock();
    let pid = sched.threads.slots[sched.current].pid?;
    let pslot = sched.processes.find(pid)?;
    sched.processes.slots[pslot].aspace.as_mut().map(f)
}

/// Record a frame range in the running process's ledger (DMA buffers).
pub fn add_region_to_current(phys_base: u64, page_count: usize) -> Result<(), SysError> {
    let mut sched = SCHED.lock();
    let s = &mut *sched;
    let pid = s.threads.slots[s.current]
        .pid
        .ok_or(SysError::InvalidArgument)?;
    let pslot = s.processes.find(pid).ok_or(SysError::InvalidArgument)?;
    s.processes.slots[pslot]
        .add_region(phys_base, page_count)
        .map_err(|()| SysError::NoMemory)
}

/// Run a closure over the address space owning thread `tid`.
pub fn with_aspace_of_thread<R>(tid: u32, f: impl FnOnce(&AddressSpace) -> R) -> Option<R> {
    let sched = SCHED.lock();
    let tslot = sched.threads.find(tid)?;
    let pid = sched.threads.slots[tslot].pid?;
    let pslot = sched.processes.find(pid)?;
    sched.processes.slots[pslot].aspace.as_ref().map(f)
}

// -- Frame access for unblockers

/// Write result registers into a blocked thread's saved trap frame.
///
/// The frame lives on the blocked thread's kernel stack, which stays valid
/// until the thread is reaped; the identity window makes it writable from
/// any context.
fn write_frame(thread: &Thread, x0: u64, x1: Option<u64>, x2: Option<u64>) {
    if thread.trap_frame == 0 {
        return;
    }
    // SAFETY: trap_frame was recorded at kernel entry and the thread has
    // not run since it blocked.
    let frame = unsafe { &mut *(thread.trap_frame as *mut TrapFrame) };
    frame.gpr[0] = x0;
    if let Some(v) = x1 {
        frame.gpr[1] = v;
    }
    if let Some(v) = x2 {
        frame.gpr[2] = v;
    }
}

// -- Scheduling operations

/// Give up the rest of the current slice; the switch happens at syscall
/// return.
pub fn yield_current() {
    request_reschedule();
}

/// Block the running thread with the given state.
///
/// The thread goes on no ready queue; whatever blocked it (port queue,
/// child-wait relation) holds the only reference. The switch happens at
/// exception return.
pub fn block_current(state: ThreadState) {
    debug_assert!(matches!(
        state,
        ThreadState::BlockedIpc | ThreadState::BlockedWait
    ));
    let mut sched = SCHED.lock();
    let cur = sched.current;
    sched.threads.slots[cur].state = state;
    request_reschedule();
}

/// Move a blocked thread back to the tail of its priority's ready queue.
///
/// Returns false when the tid no longer names a blocked thread.
pub fn unblock(tid: u32) -> bool {
    let mut sched = SCHED.lock();
    let s = &mut *sched;
    let Some(slot) = s.threads.find(tid) else {
        return false;
    };
    if !matches!(
        s.threads.slots[slot].state,
        ThreadState::BlockedIpc | ThreadState::BlockedWait
    ) {
        return false;
    }
    s.threads.slots[slot].state = ThreadState::Ready;
    s.threads.slots[slot].awaiting_reply = false;
    s.queues.push_back(&mut s.threads, slot);

    // A strictly higher-priority wakeup preempts at the next boundary.
    if s.threads.slots[slot].priority < s.threads.slots[s.current].priority {
        request_reschedule();
    }
    true
}

/// Write a syscall result into a blocked thread's frame and wake it.
pub fn complete_blocked(tid: u32, x0: u64, x1: Option<u64>, x2: Option<u64>) -> bool {
    {
        let sched = SCHED.lock();
        let Some(slot) = sched.threads.find(tid) else {
            return false;
        };
        write_frame(&sched.threads.slots[slot], x0, x1, x2);
    }
    unblock(tid)
}

/// Transition a sender blocked in `Call` from send-queued to
/// awaiting-reply. The thread stays blocked; only a `Reply` releases it.
pub fn mark_awaiting_reply(tid: u32) {
    let mut sched = SCHED.lock();
    if let Some(slot) = sched.threads.find(tid) {
        sched.threads.slots[slot].awaiting_reply = true;
    }
}

/// Deliver a reply to a thread blocked in `Call`.
///
/// Writes the reply into the caller's return registers and wakes it.
pub fn deliver_reply(tid: u32, op: u64, arg0: u64, arg1: u64) -> Result<(), SysError> {
    {
        let sched = SCHED.lock();
        let Some(slot) = sched.threads.find(tid) else {
            return Err(SysError::NotFound);
        };
        let t = &sched.threads.slots[slot];
        if t.state != ThreadState::BlockedIpc || !t.awaiting_reply {
            return Err(SysError::NotFound);
        }
        write_frame(t, op, Some(arg0), Some(arg1));
    }
    unblock(tid);
    Ok(())
}

// -- Timer tick

/// Account one timer tick against the running thread.
///
/// Sets the reschedule flag when the slice is spent, and whenever a
/// strictly higher-priority thread is ready — strict priority must win at
/// the next tick boundary.
pub fn tick() {
    let mut sched = SCHED.lock();
    let s = &mut *sched;
    let cur = s.current;
    let t = &mut s.threads.slots[cur];

    if t.time_slice > 0 {
        t.time_slice -= 1;
    }
    if t.time_slice == 0 {
        t.time_slice = t.priority.time_slice();
        request_reschedule();
    }

    let cur_prio = t.priority as usize;
    if let Some(best) = s.queues.highest_ready()
        && best < cur_prio
    {
        request_reschedule();
    }
}

// -- The switch

/// Consume the reschedule flag and, if set, switch to the best ready
/// thread.
///
/// Called from the dispatch tails (syscall return, IRQ return) only. The
/// outgoing thread, if still `Running`, is re-enqueued at the tail of its
/// priority; a blocked or dead thread is left to whatever structure holds
/// it. When every queue is empty the idle thread runs.
pub fn maybe_reschedule() {
    if !take_reschedule() {
        return;
    }

    let daif = cpu::disable_interrupts();

    let switch = {
        let mut sched = SCHED.lock();
        let s = &mut *sched;
        let cur = s.current;

        if s.threads.slots[cur].state == ThreadState::Running {
            if cur == IDLE_SLOT {
                // The idle thread is the fallback, never queued.
                s.threads.slots[cur].state = ThreadState::Ready;
            } else {
                s.threads.slots[cur].state = ThreadState::Ready;
                s.queues.push_back(&mut s.threads, cur);
            }
        }

        let next = s.queues.pop_highest(&mut s.threads).unwrap_or(IDLE_SLOT);

        if next == cur {
            s.threads.slots[cur].state = ThreadState::Running;
            None
        } else {
            s.threads.slots[next].state = ThreadState::Running;
            s.current = next;

            // Install the next thread's translation regime. Kernel and
            // idle threads run on the kernel root so translation stays
            // identical either way.
            let ttbr0 = if s.threads.slots[next].is_user {
                s.threads.slots[next]
                    .pid
                    .and_then(|pid| s.processes.find(pid))
                    .and_then(|pslot| {
                        s.processes.slots[pslot]
                            .aspace
                            .as_ref()
                            .map(AddressSpace::ttbr0_value)
                    })
                    .unwrap_or_else(memory::kernel_ttbr0)
            } else {
                memory::kernel_ttbr0()
            };
            mmu::mmu().set_ttbr0(ttbr0);

            let prev_ctx = &mut s.threads.slots[cur].ctx as *mut context::CpuContext;
            let next_ctx = &s.threads.slots[next].ctx as *const context::CpuContext;
            Some((prev_ctx, next_ctx))
        }
    };

    if let Some((prev, next)) = switch {
        // SAFETY: Both contexts live in the static thread table; interrupts
        // are masked; next holds either a saved context or a first-run
        // image over a valid kernel stack.
        unsafe { context::cpu_switch(prev, next) };
    }

    cpu::restore_interrupts(daif);
}

// -- Process lifecycle

/// Everything the loader assembled for a new process, handed over in one
/// piece so table insertion is transactional.
pub struct NewProcess {
    /// The populated address space.
    pub aspace: AddressSpace,
    /// Parent pid, if spawned by a process.
    pub parent: Option<u32>,
    /// Main thread priority.
    pub priority: Priority,
    /// User entry point.
    pub entry: u64,
    /// Initial user stack pointer.
    pub user_sp: u64,
    /// Physical base of the kernel stack.
    pub kstack_base: u64,
    /// Kernel stack size in pages.
    pub kstack_pages: usize,
    /// Owned frame ranges: (phys_base, page_count).
    pub regions: [(u64, usize); 3],
}

/// Install a fully-built process and enqueue its main thread.
///
/// On failure no table state is retained and the `NewProcess` is handed
/// back so the caller can unwind its allocations.
pub fn install_process(new: NewProcess) -> Result<u32, NewProcess> {
    let mut sched = SCHED.lock();
    let s = &mut *sched;

    let Some(pslot) = s.processes.alloc() else {
        return Err(new);
    };
    let Some(tslot) = s.threads.alloc() else {
        s.processes.release(pslot);
        return Err(new);
    };

    let kstack_top = new.kstack_base + (new.kstack_pages * mlk_common::memory::page::SIZE) as u64;

    let proc = &mut s.processes.slots[pslot];
    proc.parent = new.parent;
    proc.state = ProcessState::Running;
    proc.thread_count = 1;
    for (phys, count) in new.regions {
        proc.add_region(phys, count)
            .expect("fresh process ledger cannot be full");
    }
    proc.aspace = Some(new.aspace);
    let pid = proc.pid;

    let t = &mut s.threads.slots[tslot];
    t.state = ThreadState::Ready;
    t.priority = new.priority;
    t.time_slice = new.priority.time_slice();
    t.ctx = context::CpuContext::first_run(kstack_top);
    t.pid = Some(pid);
    t.is_user = true;
    t.user_entry = new.entry;
    t.user_sp = new.user_sp;
    t.kstack_base = new.kstack_base;
    t.kstack_pages = new.kstack_pages;

    s.queues.push_back(&mut s.threads, tslot);

    if new.priority < s.threads.slots[s.current].priority {
        request_reschedule();
    }

    log::debug!("Installed process {} (priority {:?})", pid, new.priority);
    Ok(pid)
}

/// Free everything a process owns. Must run with the scheduler lock held.
///
/// Order matters: data frames first (the ledger is authoritative for them),
/// then the page-table tree and ASID, then the table slots.
fn reap_locked(s: &mut Scheduler, pslot: usize) {
    let pid = s.processes.slots[pslot].pid;

    for region in &mut s.processes.slots[pslot].regions {
        if region.in_use {
            crate::memory::frame::free_frames(
                mlk_common::PhysAddr::new(region.phys_base),
                region.page_count,
            );
            region.in_use = false;
        }
    }

    if let Some(aspace) = s.processes.slots[pslot].aspace.take() {
        aspace.destroy();
    }

    for slot in 0..MAX_THREADS {
        if s.threads.slots[slot].state == ThreadState::Dead
            && s.threads.slots[slot].pid == Some(pid)
        {
            s.threads.release(slot);
        }
    }

    s.processes.release(pslot);
    log::debug!("Reaped process {}", pid);
}

/// Terminate the running thread's process.
///
/// Every thread of the process dies, its IPC footprint is scrubbed from
/// the port table, a parent blocked in `WAIT` is completed (including the
/// reap), and the reschedule flag is raised. The caller must not return to
/// user mode without passing through [`maybe_reschedule`].
pub fn exit_current_process(exit_code: i64) {
    // Snapshot the dying thread set without holding the port lock.
    let (pid, dying_tids, dying_count) = {
        let sched = SCHED.lock();
        let Some(pid) = sched.threads.slots[sched.current].pid else {
            panic!("idle thread attempted exit");
        };
        let mut tids = [0u32; MAX_THREADS];
        let mut count = 0;
        for t in &sched.threads.slots {
            if t.state != ThreadState::Unused && t.pid == Some(pid) {
                tids[count] = t.tid;
                count += 1;
            }
        }
        (pid, tids, count)
    };

    // Scrub the port table: dying threads leave every sender queue and
    // receiver slot, and ports they own close, stranding their waiters.
    let failed = crate::ipc::purge_process(&dying_tids[..dying_count]);

    let mut sched = SCHED.lock();
    let s = &mut *sched;

    for slot in 0..MAX_THREADS {
        let t = &s.threads.slots[slot];
        if t.state != ThreadState::Unused && t.pid == Some(pid) {
            s.queues.remove(&mut s.threads, slot);
            s.threads.slots[slot].state = ThreadState::Dead;
        }
    }

    // Strand-failure delivery: waiters of closed ports see InvalidPort.
    for &tid in failed.tids() {
        let Some(slot) = s.threads.find(tid) else {
            continue;
        };
        if s.threads.slots[slot].pid == Some(pid) {
            continue; // dying thread, already dead
        }
        if s.threads.slots[slot].state == ThreadState::BlockedIpc {
            write_frame(
                &s.threads.slots[slot],
                SysError::InvalidPort.as_i64() as u64,
                None,
                None,
            );
            s.threads.slots[slot].state = ThreadState::Ready;
            s.threads.slots[slot].awaiting_reply = false;
            s.queues.push_back(&mut s.threads, slot);
        }
    }

    let pslot = s.processes.find(pid).expect("exiting process not in table");
    s.processes.slots[pslot].state = ProcessState::Zombie;
    s.processes.slots[pslot].exit_code = exit_code;
    s.processes.slots[pslot].thread_count = 0;

    // A parent already blocked in WAIT collects the exit immediately: its
    // return registers are written here and the zombie is reaped on the
    // spot. Otherwise the zombie waits for a future WAIT call.
    if let Some(ppid) = s.processes.slots[pslot].parent
        && s.processes.find(ppid).is_some()
    {
        for tslot in 0..MAX_THREADS {
            let t = &s.threads.slots[tslot];
            if t.state == ThreadState::BlockedWait
                && t.pid == Some(ppid)
                && (t.wait_target < 0 || t.wait_target == pid as i64)
            {
                write_frame(t, pid as u64, Some(exit_code as u64), None);
                reap_locked(s, pslot);
                s.threads.slots[tslot].state = ThreadState::Ready;
                s.queues.push_back(&mut s.threads, tslot);
                break;
            }
        }
    }

    request_reschedule();
    log::debug!("Process {} exited with code {}", pid, exit_code);
}

/// Outcome of a `WAIT` operation.
pub enum WaitOutcome {
    /// A zombie child was collected and reaped.
    Done {
        /// The child's pid.
        pid: u32,
        /// The child's exit code.
        code: i64,
    },
    /// A matching child is still running; the caller has been blocked.
    Blocked,
    /// No child matches the request.
    NoChildren,
}

/// Wait for a child to exit.
///
/// A matching zombie is collected and reaped immediately. Otherwise, if a
/// matching child is still live, the caller blocks; the child's exit path
/// completes the wait. With nothing to wait for, `NoChildren`.
pub fn wait_child(target: i64) -> WaitOutcome {
    let mut sched = SCHED.lock();
    let s = &mut *sched;
    let cur = s.current;
    let Some(pid) = s.threads.slots[cur].pid else {
        return WaitOutcome::NoChildren;
    };

    if let Some(child_slot) = s.processes.find_zombie_child(pid, target) {
        let child_pid = s.processes.slots[child_slot].pid;
        let code = s.processes.slots[child_slot].exit_code;
        reap_locked(s, child_slot);
        return WaitOutcome::Done {
            pid: child_pid,
            code,
        };
    }

    if s.processes.has_child_matching(pid, target) {
        s.threads.slots[cur].wait_target = target;
        s.threads.slots[cur].state = ThreadState::BlockedWait;
        request_reschedule();
        return WaitOutcome::Blocked;
    }

    WaitOutcome::NoChildren
}
