//! Port table
//!
//! Pure rendezvous bookkeeping: fixed-capacity ports, each with a FIFO
//! queue of blocked senders, at most one waiting receiver, and a one-slot
//! coalescing notification. Operations compute an outcome while the table
//! lock is held; the effect layer in [`super`] applies thread wake/block
//! transitions afterwards. That split keeps the rendezvous invariant —
//! never both queued senders and a waiting receiver — checkable in
//! isolation.

use mlk_abi::{Message, SysError};

/// Number of port slots.
pub const MAX_PORTS: usize = 64;

/// Sender queue depth per port.
pub const SEND_QUEUE_CAP: usize = 8;

/// Port id 0: never valid.
pub const PORT_INVALID: u32 = 0;

/// Port id 1: reserved for the kernel.
pub const PORT_KERNEL: u32 = 1;

/// Port lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    /// Slot free for `PORT_CREATE`.
    Free,
    /// Permanently reserved slot (ids 0 and 1).
    Reserved,
    /// Live rendezvous point.
    Active,
}

/// A sender parked on a port, with the message it tried to deliver.
#[derive(Debug, Clone, Copy)]
pub struct QueuedSender {
    /// Blocked thread.
    pub tid: u32,
    /// The message, sender field already stamped.
    pub msg: Message,
    /// True when the sender is mid-`Call` and must await a reply instead
    /// of waking on delivery.
    pub is_call: bool,
}

/// The receiver parked on a port.
#[derive(Debug, Clone, Copy)]
pub struct WaitingReceiver {
    /// Blocked thread.
    pub tid: u32,
    /// User-space `Message` buffer to copy the full record into (0 = none).
    pub buf: u64,
    /// Address of the receiver's saved syscall frame, for the direct
    /// register handoff.
    pub frame: u64,
}

/// One rendezvous port.
pub struct Port {
    /// Lifecycle state.
    pub state: PortState,
    /// Owning thread (the creator).
    pub owner: u32,
    /// FIFO ring of parked senders.
    senders: [Option<QueuedSender>; SEND_QUEUE_CAP],
    head: usize,
    len: usize,
    /// At most one parked receiver.
    pub receiver: Option<WaitingReceiver>,
    /// Coalescing pending notification.
    pub pending_badge: u64,
    /// Whether a notification is pending.
    pub has_pending: bool,
}

impl Port {
    const EMPTY: Self = Self {
        state: PortState::Free,
        owner: 0,
        senders: [None; SEND_QUEUE_CAP],
        head: 0,
        len: 0,
        receiver: None,
        pending_badge: 0,
        has_pending: false,
    };

    /// Number of parked senders.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.len
    }

    fn push_sender(&mut self, sender: QueuedSender) -> Result<(), SysError> {
        if self.len == SEND_QUEUE_CAP {
            return Err(SysError::WouldBlock);
        }
        let idx = (self.head + self.len) % SEND_QUEUE_CAP;
        self.senders[idx] = Some(sender);
        self.len += 1;
        Ok(())
    }

    fn pop_sender(&mut self) -> Option<QueuedSender> {
        if self.len == 0 {
            return None;
        }
        let sender = self.senders[self.head].take();
        self.head = (self.head + 1) % SEND_QUEUE_CAP;
        self.len -= 1;
        sender
    }

    /// Drop every queue entry belonging to `tid`, preserving FIFO order of
    /// the rest.
    fn scrub_sender(&mut self, tid: u32) {
        let mut kept = [None; SEND_QUEUE_CAP];
        let mut kept_len = 0;
        while let Some(s) = self.pop_sender() {
            if s.tid != tid {
                kept[kept_len] = Some(s);
                kept_len += 1;
            }
        }
        self.senders = kept;
        self.head = 0;
        self.len = kept_len;
    }
}

/// Outcome of a send attempt.
pub enum SendOutcome {
    /// A receiver was parked; deliver to it and wake it.
    Delivered {
        /// The receiver that was parked on the port.
        receiver: WaitingReceiver,
        /// The stamped message to hand over.
        msg: Message,
    },
    /// The sender was parked; block it.
    Queued,
}

/// Outcome of a receive attempt.
pub enum RecvOutcome {
    /// A pending notification was consumed.
    Notification(u64),
    /// A parked sender's message was taken.
    Delivered {
        /// The dequeued sender, to be woken (or parked on reply).
        sender: QueuedSender,
    },
    /// The receiver was parked; block it.
    Blocked,
    /// Non-blocking receive found nothing.
    Empty,
}

/// Outcome of a notify.
pub enum NotifyOutcome {
    /// A parked receiver takes the badge immediately.
    Woken {
        /// The receiver that was parked on the port.
        receiver: WaitingReceiver,
        /// The badge to deliver.
        badge: u64,
    },
    /// The badge was stored (overwriting any earlier pending badge).
    Stored,
}

/// Threads stranded by a port teardown, to be failed with `InvalidPort`.
pub struct StrandedWaiters {
    tids: [u32; MAX_PORTS + SEND_QUEUE_CAP],
    count: usize,
}

impl StrandedWaiters {
    /// An empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tids: [0; MAX_PORTS + SEND_QUEUE_CAP],
            count: 0,
        }
    }

    fn push(&mut self, tid: u32) {
        if self.count < self.tids.len() {
            self.tids[self.count] = tid;
            self.count += 1;
        }
    }

    /// The stranded thread ids.
    #[must_use]
    pub fn tids(&self) -> &[u32] {
        &self.tids[..self.count]
    }
}

/// The fixed table of ports.
pub struct PortTable {
    ports: [Port; MAX_PORTS],
}

impl PortTable {
    /// Create the table with ids 0 and 1 permanently reserved.
    #[must_use]
    pub const fn new() -> Self {
        let mut ports = [Port::EMPTY; MAX_PORTS];
        ports[PORT_INVALID as usize].state = PortState::Reserved;
        ports[PORT_KERNEL as usize].state = PortState::Reserved;
        Self { ports }
    }

    fn port_mut(&mut self, id: u32) -> Result<&mut Port, SysError> {
        let port = self
            .ports
            .get_mut(id as usize)
            .ok_or(SysError::InvalidPort)?;
        if port.state != PortState::Active {
            return Err(SysError::InvalidPort);
        }
        Ok(port)
    }

    /// Allocate a port owned by `owner`. Returns the new port id.
    pub fn create(&mut self, owner: u32) -> Result<u32, SysError> {
        for (id, port) in self.ports.iter_mut().enumerate() {
            if port.state == PortState::Free {
                *port = Port::EMPTY;
                port.state = PortState::Active;
                port.owner = owner;
                return Ok(id as u32);
            }
        }
        Err(SysError::NoMemory)
    }

    /// Destroy a port. Only the owner may destroy it. Every parked thread
    /// is returned for failure delivery.
    pub fn destroy(
        &mut self,
        id: u32,
        caller: u32,
        stranded: &mut StrandedWaiters,
    ) -> Result<(), SysError> {
        let port = self.port_mut(id)?;
        if port.owner != caller {
            return Err(SysError::NoPermission);
        }
        while let Some(sender) = port.pop_sender() {
            stranded.push(sender.tid);
        }
        if let Some(rx) = port.receiver.take() {
            stranded.push(rx.tid);
        }
        *port = Port::EMPTY;
        Ok(())
    }

    /// Attempt to send `msg` on port `id`.
    ///
    /// A parked receiver gets the message immediately; otherwise the sender
    /// joins the FIFO queue, or `WouldBlock` when the queue is full.
    pub fn send(&mut self, id: u32, sender: QueuedSender) -> Result<SendOutcome, SysError> {
        let port = self.port_mut(id)?;

        if let Some(receiver) = port.receiver.take() {
            debug_assert_eq!(port.len, 0, "receiver parked with queued senders");
            return Ok(SendOutcome::Delivered {
                receiver,
                msg: sender.msg,
            });
        }

        port.push_sender(sender)?;
        Ok(SendOutcome::Queued)
    }

    /// Attempt to receive on port `id`.
    ///
    /// Pending notifications are consumed before queued senders, so badges
    /// stay timely. With nothing available the receiver parks (blocking)
    /// or gets [`RecvOutcome::Empty`].
    pub fn recv(
        &mut self,
        id: u32,
        rx: WaitingReceiver,
        blocking: bool,
    ) -> Result<RecvOutcome, SysError> {
        let port = self.port_mut(id)?;

        if port.has_pending {
            port.has_pending = false;
            let badge = port.pending_badge;
            port.pending_badge = 0;
            return Ok(RecvOutcome::Notification(badge));
        }

        if let Some(sender) = port.pop_sender() {
            return Ok(RecvOutcome::Delivered { sender });
        }

        if blocking {
            debug_assert!(port.receiver.is_none(), "second receiver parked on port");
            port.receiver = Some(rx);
            Ok(RecvOutcome::Blocked)
        } else {
            Ok(RecvOutcome::Empty)
        }
    }

    /// Post a badge to port `id`. Never blocks; badges coalesce to the
    /// most recent value while no receiver waits.
    pub fn notify(&mut self, id: u32, badge: u64) -> Result<NotifyOutcome, SysError> {
        let port = self.port_mut(id)?;

        if let Some(receiver) = port.receiver.take() {
            return Ok(NotifyOutcome::Woken { receiver, badge });
        }

        port.pending_badge = badge;
        port.has_pending = true;
        Ok(NotifyOutcome::Stored)
    }

    /// Remove every trace of the given threads: queue entries and receiver
    /// slots they occupy, and ports they own (whose remaining waiters are
    /// reported in `stranded`).
    pub fn purge_threads(&mut self, tids: &[u32], stranded: &mut StrandedWaiters) {
        for port in &mut self.ports {
            if port.state != PortState::Active {
                continue;
            }

            if tids.contains(&port.owner) {
                // Owner is dying: the port closes and every other parked
                // thread is stranded.
                while let Some(sender) = port.pop_sender() {
                    if !tids.contains(&sender.tid) {
                        stranded.push(sender.tid);
                    }
                }
                if let Some(rx) = port.receiver.take()
                    && !tids.contains(&rx.tid)
                {
                    stranded.push(rx.tid);
                }
                *port = Port::EMPTY;
                continue;
            }

            for &tid in tids {
                port.scrub_sender(tid);
                if port.receiver.is_some_and(|rx| rx.tid == tid) {
                    port.receiver = None;
                }
            }
        }
    }
}

impl Default for PortTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(tid: u32, op: u64) -> QueuedSender {
        let mut msg = Message::from_regs(op, 0, 0);
        msg.sender = tid;
        QueuedSender {
            tid,
            msg,
            is_call: false,
        }
    }

    fn receiver(tid: u32) -> WaitingReceiver {
        WaitingReceiver {
            tid,
            buf: 0,
            frame: 0,
        }
    }

    #[test]
    fn test_reserved_ids_rejected() {
        let mut table = PortTable::new();
        assert_eq!(
            table.send(PORT_INVALID, sender(1, 0)).err(),
            Some(SysError::InvalidPort)
        );
        assert_eq!(
            table.send(PORT_KERNEL, sender(1, 0)).err(),
            Some(SysError::InvalidPort)
        );
        assert_eq!(
            table.recv(999, receiver(1), true).err(),
            Some(SysError::InvalidPort)
        );
    }

    #[test]
    fn test_create_skips_reserved() {
        let mut table = PortTable::new();
        let id = table.create(1).unwrap();
        assert!(id >= 2);
    }

    #[test]
    fn test_sender_queue_fifo() {
        let mut table = PortTable::new();
        let id = table.create(1).unwrap();

        for tid in 10..13 {
            assert!(matches!(
                table.send(id, sender(tid, tid as u64)).unwrap(),
                SendOutcome::Queued
            ));
        }

        // Deliveries come back in send order.
        for expect in 10..13u32 {
            match table.recv(id, receiver(1), true).unwrap() {
                RecvOutcome::Delivered { sender } => assert_eq!(sender.tid, expect),
                _ => panic!("expected a queued sender"),
            }
        }
    }

    #[test]
    fn test_queue_capacity_would_block() {
        let mut table = PortTable::new();
        let id = table.create(1).unwrap();

        for tid in 0..SEND_QUEUE_CAP as u32 {
            assert!(table.send(id, sender(tid, 0)).is_ok());
        }
        assert_eq!(
            table.send(id, sender(99, 0)).err(),
            Some(SysError::WouldBlock)
        );
    }

    #[test]
    fn test_rendezvous_exclusivity() {
        // A port never holds queued senders and a parked receiver at once.
        let mut table = PortTable::new();
        let id = table.create(1).unwrap();

        assert!(matches!(
            table.recv(id, receiver(5), true).unwrap(),
            RecvOutcome::Blocked
        ));

        // The parked receiver takes the send directly; nothing queues.
        match table.send(id, sender(6, 7)).unwrap() {
            SendOutcome::Delivered { receiver, msg } => {
                assert_eq!(receiver.tid, 5);
                assert_eq!(msg.op, 7);
            }
            SendOutcome::Queued => panic!("sender queued past a parked receiver"),
        }
        assert_eq!(table.ports[id as usize].queued(), 0);
        assert!(table.ports[id as usize].receiver.is_none());
    }

    #[test]
    fn test_notification_coalesces_to_latest() {
        let mut table = PortTable::new();
        let id = table.create(1).unwrap();

        assert!(matches!(
            table.notify(id, 0xAA).unwrap(),
            NotifyOutcome::Stored
        ));
        assert!(matches!(
            table.notify(id, 0xBB).unwrap(),
            NotifyOutcome::Stored
        ));

        match table.recv(id, receiver(1), true).unwrap() {
            RecvOutcome::Notification(badge) => assert_eq!(badge, 0xBB),
            _ => panic!("expected a notification"),
        }
    }

    #[test]
    fn test_notification_before_queued_sender() {
        let mut table = PortTable::new();
        let id = table.create(1).unwrap();

        table.send(id, sender(3, 1)).unwrap();
        table.notify(id, 0xCC).unwrap();

        // Notification first, then the queued message.
        assert!(matches!(
            table.recv(id, receiver(1), true).unwrap(),
            RecvOutcome::Notification(0xCC)
        ));
        assert!(matches!(
            table.recv(id, receiver(1), true).unwrap(),
            RecvOutcome::Delivered { .. }
        ));
    }

    #[test]
    fn test_notify_wakes_parked_receiver() {
        let mut table = PortTable::new();
        let id = table.create(1).unwrap();

        table.recv(id, receiver(9), true).unwrap();
        match table.notify(id, 0x11).unwrap() {
            NotifyOutcome::Woken { receiver, badge } => {
                assert_eq!(receiver.tid, 9);
                assert_eq!(badge, 0x11);
            }
            NotifyOutcome::Stored => panic!("badge stored past a parked receiver"),
        }
    }

    #[test]
    fn test_nonblocking_recv_empty() {
        let mut table = PortTable::new();
        let id = table.create(1).unwrap();
        assert!(matches!(
            table.recv(id, receiver(1), false).unwrap(),
            RecvOutcome::Empty
        ));
        // A non-blocking miss must not park the receiver.
        assert!(table.ports[id as usize].receiver.is_none());
    }

    #[test]
    fn test_destroy_strands_waiters() {
        let mut table = PortTable::new();
        let id = table.create(1).unwrap();
        table.send(id, sender(4, 0)).unwrap();
        table.send(id, sender(5, 0)).unwrap();

        let mut stranded = StrandedWaiters::new();
        table.destroy(id, 1, &mut stranded).unwrap();
        assert_eq!(stranded.tids(), &[4, 5]);

        assert_eq!(
            table.send(id, sender(6, 0)).err(),
            Some(SysError::InvalidPort)
        );
    }

    #[test]
    fn test_destroy_requires_owner() {
        let mut table = PortTable::new();
        let id = table.create(1).unwrap();
        let mut stranded = StrandedWaiters::new();
        assert_eq!(
            table.destroy(id, 2, &mut stranded).err(),
            Some(SysError::NoPermission)
        );
    }

    #[test]
    fn test_purge_scrubs_dying_threads() {
        let mut table = PortTable::new();
        let owned = table.create(7).unwrap();
        let other = table.create(1).unwrap();

        // Thread 7 owns `owned` and queues on `other`; thread 8 queues on
        // `owned` and must be stranded when 7 dies.
        table.send(owned, sender(8, 0)).unwrap();
        table.send(other, sender(7, 0)).unwrap();

        let mut stranded = StrandedWaiters::new();
        table.purge_threads(&[7], &mut stranded);

        assert_eq!(stranded.tids(), &[8]);
        assert_eq!(
            table.send(owned, sender(9, 0)).err(),
            Some(SysError::InvalidPort)
        );
        assert_eq!(table.ports[other as usize].queued(), 0);
    }

    #[test]
    fn test_purge_clears_receiver_slot() {
        let mut table = PortTable::new();
        let id = table.create(1).unwrap();
        table.recv(id, receiver(7), true).unwrap();

        let mut stranded = StrandedWaiters::new();
        table.purge_threads(&[7], &mut stranded);
        assert!(table.ports[id as usize].receiver.is_none());
        assert_eq!(stranded.tids(), &[] as &[u32]);
    }
}
