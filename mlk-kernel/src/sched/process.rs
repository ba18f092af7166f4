//! Process table and memory-region ledger
//!
//! Each process owns an address space and a fixed ledger of the physical
//! frame ranges allocated on its behalf (code pages, user stack, kernel
//! stacks, DMA buffers). The ledger is the single source of truth for data
//! frames; cleanup walks it to release everything deterministically.
//! Page-table pages are not in the ledger — they belong to the address
//! space and fall with it.

use crate::memory::AddressSpace;

/// Maximum number of processes.
pub const MAX_PROCESSES: usize = 32;

/// Maximum tracked memory regions per process.
pub const MAX_REGIONS: usize = 16;

/// Process lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Slot is free.
    Unused,
    /// Has at least one live thread.
    Running,
    /// All threads dead; exit code held until the parent collects it.
    Zombie,
}

/// A contiguous physical frame range owned by a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRegion {
    /// Physical base address.
    pub phys_base: u64,
    /// Length in frames.
    pub page_count: usize,
    /// Whether the entry is live.
    pub in_use: bool,
}

impl MemRegion {
    /// An empty ledger entry.
    pub const EMPTY: Self = Self {
        phys_base: 0,
        page_count: 0,
        in_use: false,
    };
}

/// A process: address space, thread bookkeeping and resource ledger.
pub struct Process {
    /// Process id (unique across the boot).
    pub pid: u32,
    /// Parent pid; `None` for the root process.
    pub parent: Option<u32>,
    /// The process's address space; taken at reap.
    pub aspace: Option<AddressSpace>,
    /// Number of live threads.
    pub thread_count: u32,
    /// Lifecycle state.
    pub state: ProcessState,
    /// Exit code, valid in `Zombie`.
    pub exit_code: i64,
    /// Owned physical frame ranges.
    pub regions: [MemRegion; MAX_REGIONS],
}

impl Process {
    /// An unused slot.
    pub const EMPTY: Self = Self {
        pid: 0,
        parent: None,
        aspace: None,
        thread_count: 0,
        state: ProcessState::Unused,
        exit_code: 0,
        regions: [MemRegion::EMPTY; MAX_REGIONS],
    };

    /// Record an owned frame range. Fails when the ledger is full.
    pub fn add_region(&mut self, phys_base: u64, page_count: usize) -> Result<(), ()> {
        for region in &mut self.regions {
            if !region.in_use {
                *region = MemRegion {
                    phys_base,
                    page_count,
                    in_use: true,
                };
                return Ok(());
            }
        }
        Err(())
    }
}

/// Fixed-capacity process table.
pub struct ProcessTable {
    /// Process slots.
    pub slots: [Process; MAX_PROCESSES],
    next_pid: u32,
}

impl ProcessTable {
    /// Create an empty table. Pids start at 1; pid 0 is never assigned.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [Process::EMPTY; MAX_PROCESSES],
            next_pid: 1,
        }
    }

    /// Claim a free slot and stamp a fresh pid.
    #[must_use]
    pub fn alloc(&mut self) -> Option<usize> {
        for (slot, proc) in self.slots.iter_mut().enumerate() {
            if proc.state == ProcessState::Unused {
                *proc = Process::EMPTY;
                proc.pid = self.next_pid;
                self.next_pid += 1;
                return Some(slot);
            }
        }
        None
    }

    /// Find the slot holding process `pid`.
    #[must_use]
    pub fn find(&self, pid: u32) -> Option<usize> {
        self.slots
            .iter()
            .position(|p| p.state != ProcessState::Unused && p.pid == pid)
    }

    /// Release a slot back to the table.
    pub fn release(&mut self, slot: usize) {
        self.slots[slot] = Process::EMPTY;
    }

    /// Whether `pid` has any children (running or zombie).
    #[must_use]
    pub fn has_children(&self, pid: u32) -> bool {
        self.slots
            .iter()
            .any(|p| p.state != ProcessState::Unused && p.parent == Some(pid))
    }

    /// Find a zombie child of `parent` matching `target` (-1 = any).
    #[must_use]
    pub fn find_zombie_child(&self, parent: u32, target: i64) -> Option<usize> {
        self.slots.iter().position(|p| {
            p.state == ProcessState::Zombie
                && p.parent == Some(parent)
                && (target < 0 || p.pid as i64 == target)
        })
    }

    /// Whether `parent` has any child matching `target` (-1 = any), in any
    /// state. Decides between blocking and `NoChildren` in `WAIT`.
    #[must_use]
    pub fn has_child_matching(&self, parent: u32, target: i64) -> bool {
        self.slots.iter().any(|p| {
            p.state != ProcessState::Unused
                && p.parent == Some(parent)
                && (target < 0 || p.pid as i64 == target)
        })
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_ledger() {
        let mut proc = Process::EMPTY;
        assert!(proc.add_region(0x4100_0000, 3).is_ok());
        assert!(proc.add_region(0x4200_0000, 16).is_ok());
        assert_eq!(proc.regions.iter().filter(|r| r.in_use).count(), 2);
    }

    #[test]
    fn test_region_ledger_overflow() {
        let mut proc = Process::EMPTY;
        for i in 0..MAX_REGIONS {
            assert!(proc.add_region(0x4100_0000 + (i as u64) * 0x1000, 1).is_ok());
        }
        assert!(proc.add_region(0x5000_0000, 1).is_err());
    }

    #[test]
    fn test_pid_assignment_and_lookup() {
        let mut table = ProcessTable::new();
        let a = table.alloc().unwrap();
        table.slots[a].state = ProcessState::Running;
        let pid_a = table.slots[a].pid;
        assert!(pid_a >= 1);
        assert_eq!(table.find(pid_a), Some(a));
        assert_eq!(table.find(9999), None);
    }

    #[test]
    fn test_zombie_child_matching() {
        let mut table = ProcessTable::new();
        let parent = table.alloc().unwrap();
        table.slots[parent].state = ProcessState::Running;
        let ppid = table.slots[parent].pid;

        let live = table.alloc().unwrap();
        table.slots[live].state = ProcessState::Running;
        table.slots[live].parent = Some(ppid);

        let dead = table.alloc().unwrap();
        table.slots[dead].state = ProcessState::Zombie;
        table.slots[dead].parent = Some(ppid);
        table.slots[dead].exit_code = 7;
        let dead_pid = table.slots[dead].pid;

        assert!(table.has_children(ppid));
        // Any-child wait finds the zombie, not the live child.
        assert_eq!(table.find_zombie_child(ppid, -1), Some(dead));
        // Targeted wait on the live child finds nothing.
        let live_pid = table.slots[live].pid;
        assert_eq!(table.find_zombie_child(ppid, live_pid as i64), None);
        assert_eq!(table.find_zombie_child(ppid, dead_pid as i64), Some(dead));
    }

    #[test]
    fn test_slot_reuse_after_release() {
        let mut table = ProcessTable::new();
        let a = table.alloc().unwrap();
        table.slots[a].state = ProcessState::Running;
        let pid_a = table.slots[a].pid;
        table.release(a);
        let b = table.alloc().unwrap();
        assert_eq!(a, b);
        assert_ne!(table.slots[b].pid, pid_a);
    }
}
