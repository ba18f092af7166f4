//! IPC message record.
//!
//! Messages are fixed scalar records copied between address spaces by the
//! kernel; they never carry pointers across the privilege boundary. On the
//! fast path only `(op, args[0], args[1])` travel in registers; the full
//! record is copied to the receiver's buffer when one is supplied, which is
//! how a server learns the `sender` thread id it must `Reply` to.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// A fixed-size IPC message.
///
/// The layout is part of the user ABI: 56 bytes, no implicit padding, all
/// fields little-endian on this architecture.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct Message {
    /// Operation code, chosen by the sender.
    pub op: u32,
    /// Reserved; must be zero.
    pub _reserved: u32,
    /// Scalar payload.
    pub args: [u64; 4],
    /// Sending thread id, stamped by the kernel at delivery.
    pub sender: u32,
    /// Port the receiver should reply on, if the protocol uses one.
    pub reply_to: u32,
    /// Badge value; meaningful only for notification deliveries.
    pub badge: u64,
}

impl Message {
    /// Serialised size in bytes.
    pub const SIZE: usize = core::mem::size_of::<Self>();

    /// Create an empty message.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            op: 0,
            _reserved: 0,
            args: [0; 4],
            sender: 0,
            reply_to: 0,
            badge: 0,
        }
    }

    /// Build a message from the send-side register convention
    /// (`op` in x1, `args[0]` in x2, `args[1]` in x3).
    #[inline]
    #[must_use]
    pub const fn from_regs(op: u64, arg0: u64, arg1: u64) -> Self {
        Self {
            op: op as u32,
            _reserved: 0,
            args: [arg0, arg1, 0, 0],
            sender: 0,
            reply_to: 0,
            badge: 0,
        }
    }

    /// View the serialised record for copying across the ABI boundary.
    ///
    /// The derive guarantees no padding, so this is the exact wire image.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        zerocopy::IntoBytes::as_bytes(self)
    }

    /// Build a notification delivery: only the badge is meaningful.
    #[inline]
    #[must_use]
    pub const fn notification(badge: u64) -> Self {
        Self {
            op: 0,
            _reserved: 0,
            args: [0; 4],
            sender: 0,
            reply_to: 0,
            badge,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_size_and_layout() {
        // ABI: exactly 56 bytes, no padding.
        assert_eq!(Message::SIZE, 56);
        let msg = Message::from_regs(7, 42, 43);
        let bytes = msg.as_bytes();
        assert_eq!(bytes.len(), 56);
        assert_eq!(&bytes[0..4], &7u32.to_le_bytes());
    }

    #[test]
    fn test_from_regs() {
        let msg = Message::from_regs(1, 42, 0);
        assert_eq!(msg.op, 1);
        assert_eq!(msg.args, [42, 0, 0, 0]);
        assert_eq!(msg.sender, 0);
    }

    #[test]
    fn test_notification_only_badge() {
        let msg = Message::notification(0xBEEF);
        assert_eq!(msg.badge, 0xBEEF);
        assert_eq!(msg.op, 0);
        assert_eq!(msg.args, [0; 4]);
    }
}
