//! The notification/indication priority queue.
//!
//! A [`GattServer`](super::GattServer) hosts one slot per notify- or indicate-capable
//! characteristic, plus a single server-wide "awaiting confirmation" gate (the Attribute Protocol
//! only allows one outstanding *Handle Value Indication* per connection at a time). Priorities are
//! assigned when the characteristic is added to the attribute table (mirroring the source
//! project's compile-time `higher_outgoing_priority<UUID...>` declarations, expressed here as a
//! per-slot priority number instead of a type-level list); [`NotificationQueue::dequeue`] always
//! picks the highest-priority pending slot, and slots of equal priority are served in ascending
//! index order, which is also each characteristic's declaration order in the attribute table.

/// Maximum number of notify-/indicate-capable characteristics a single [`NotificationQueue`] can
/// track. Matches [`super::MAX_ATTRIBUTES`]'s order of magnitude; a real attribute table has far
/// fewer characteristics with `NOTIFY`/`INDICATE` set than total attributes.
pub const MAX_NOTIFY_SLOTS: usize = 16;

/// What a pending queue entry describes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NotifyKind {
    /// A *Handle Value Notification*: fire-and-forget, no confirmation expected.
    Notification,
    /// A *Handle Value Indication*: the peer must send a *Handle Value Confirmation* before
    /// another indication (for any characteristic) may be sent.
    Indication,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Entry {
    Empty,
    Notification,
    Indication,
}

/// Per-connection notification/indication scheduling state.
///
/// This only tracks *which* characteristic indices have pending outgoing work and in what order
/// to service them; it has no notion of ATT handles, MTUs, or PDU encoding. The caller is expected
/// to map a dequeued index back to the characteristic's value handle and perform the actual
/// `notify_raw`/`indicate_raw` call.
pub struct NotificationQueue {
    entries: [Entry; MAX_NOTIFY_SLOTS],
    priorities: [u8; MAX_NOTIFY_SLOTS],
    len: usize,
    /// `Some(index)` while an indication is outstanding and unconfirmed; blocks dequeuing any
    /// further indication (from any index) until `confirmed()` is called.
    awaiting_confirmation: Option<usize>,
}

impl NotificationQueue {
    /// Creates an empty queue with room for `len` characteristic slots (`len <=
    /// MAX_NOTIFY_SLOTS`), all initially at priority 0.
    pub const fn new(len: usize) -> Self {
        Self {
            entries: [Entry::Empty; MAX_NOTIFY_SLOTS],
            priorities: [0; MAX_NOTIFY_SLOTS],
            len,
            awaiting_confirmation: None,
        }
    }

    /// Assigns a priority to slot `index`; higher numbers are served first by `dequeue`.
    ///
    /// Panics if `index` is out of range. Meant to be called once, while the server is being
    /// built, before any connection exists.
    pub fn set_priority(&mut self, index: usize, priority: u8) {
        assert!(index < self.len, "notification slot index out of range");
        self.priorities[index] = priority;
    }

    /// Marks slot `index` as having a pending `kind` of outgoing work.
    ///
    /// Returns `true` if this created new work the link layer should wake up for (the entry was
    /// previously empty or of a different kind), `false` if an identical entry was already
    /// queued (no change needed).
    ///
    /// Panics if `index` is out of range.
    pub fn queue(&mut self, index: usize, kind: NotifyKind) -> bool {
        assert!(index < self.len, "notification slot index out of range");

        let new_entry = match kind {
            NotifyKind::Notification => Entry::Notification,
            NotifyKind::Indication => Entry::Indication,
        };

        if self.entries[index] == new_entry {
            false
        } else {
            self.entries[index] = new_entry;
            true
        }
    }

    /// Removes any pending entry for slot `index` without sending it.
    pub fn cancel(&mut self, index: usize) {
        assert!(index < self.len, "notification slot index out of range");
        self.entries[index] = Entry::Empty;
    }

    /// Picks the highest-priority pending entry and removes it from the "pending" state.
    ///
    /// If the picked entry is an indication, it moves into the "awaiting confirmation" state
    /// (tracked separately from `entries`) rather than simply disappearing; no further indication
    /// will be dequeued until [`confirmed`](Self::confirmed) is called.
    pub fn dequeue(&mut self) -> Option<(NotifyKind, usize)> {
        let mut best: Option<(u8, usize, Entry)> = None;

        for index in 0..self.len {
            let entry = self.entries[index];
            if entry == Entry::Empty {
                continue;
            }
            if entry == Entry::Indication && self.awaiting_confirmation.is_some() {
                // Only one indication may be outstanding per connection; try a lower-priority
                // entry (which might be a notification) instead.
                continue;
            }

            let priority = self.priorities[index];
            let better = match best {
                None => true,
                // Ties are broken by ascending index (attribute declaration order / FIFO).
                Some((best_priority, best_index, _)) => {
                    priority > best_priority || (priority == best_priority && index < best_index)
                }
            };
            if better {
                best = Some((priority, index, entry));
            }
        }

        let (_, index, entry) = best?;
        self.entries[index] = Entry::Empty;

        match entry {
            Entry::Notification => Some((NotifyKind::Notification, index)),
            Entry::Indication => {
                self.awaiting_confirmation = Some(index);
                Some((NotifyKind::Indication, index))
            }
            Entry::Empty => unreachable!(),
        }
    }

    /// Clears the "awaiting confirmation" gate after the peer's *Handle Value Confirmation* is
    /// received.
    ///
    /// A confirmation received with no outstanding indication is tolerated (the gate is already
    /// clear, so this is a no-op) rather than surfaced as a protocol error.
    pub fn confirmed(&mut self) {
        self.awaiting_confirmation = None;
    }

    /// Whether an indication is currently awaiting the peer's confirmation.
    pub fn indication_pending(&self) -> bool {
        self.awaiting_confirmation.is_some()
    }

    /// Whether any slot currently has pending work that `dequeue` could return.
    pub fn has_pending(&self) -> bool {
        self.entries[..self.len].iter().enumerate().any(|(i, e)| {
            *e != Entry::Empty && !(*e == Entry::Indication && self.awaiting_confirmation.is_some() && self.awaiting_confirmation != Some(i))
        })
    }

    /// Resets all queue state. Called when the connection ends.
    pub fn reset(&mut self) {
        for entry in self.entries[..self.len].iter_mut() {
            *entry = Entry::Empty;
        }
        self.awaiting_confirmation = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dequeues_highest_priority_first() {
        let mut q = NotificationQueue::new(3);
        q.set_priority(0, 0);
        q.set_priority(1, 5);
        q.set_priority(2, 2);

        assert!(q.queue(0, NotifyKind::Notification));
        assert!(q.queue(1, NotifyKind::Notification));
        assert!(q.queue(2, NotifyKind::Notification));

        assert_eq!(q.dequeue(), Some((NotifyKind::Notification, 1)));
        assert_eq!(q.dequeue(), Some((NotifyKind::Notification, 2)));
        assert_eq!(q.dequeue(), Some((NotifyKind::Notification, 0)));
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn equal_priority_is_fifo_by_index() {
        let mut q = NotificationQueue::new(4);
        assert!(q.queue(3, NotifyKind::Notification));
        assert!(q.queue(1, NotifyKind::Notification));

        assert_eq!(q.dequeue(), Some((NotifyKind::Notification, 1)));
        assert_eq!(q.dequeue(), Some((NotifyKind::Notification, 3)));
    }

    #[test]
    fn requeueing_identical_entry_reports_no_new_work() {
        let mut q = NotificationQueue::new(2);
        assert!(q.queue(0, NotifyKind::Notification));
        assert!(!q.queue(0, NotifyKind::Notification));
        assert!(q.queue(0, NotifyKind::Indication));
    }

    #[test]
    fn only_one_indication_outstanding_at_a_time() {
        let mut q = NotificationQueue::new(2);
        q.queue(0, NotifyKind::Indication);
        q.queue(1, NotifyKind::Indication);

        assert_eq!(q.dequeue(), Some((NotifyKind::Indication, 0)));
        assert!(q.indication_pending());
        // Index 1's indication can't go out yet; no notification is pending either.
        assert_eq!(q.dequeue(), None);

        q.confirmed();
        assert!(!q.indication_pending());
        assert_eq!(q.dequeue(), Some((NotifyKind::Indication, 1)));
    }

    #[test]
    fn notifications_still_flow_while_an_indication_is_outstanding() {
        let mut q = NotificationQueue::new(2);
        q.queue(0, NotifyKind::Indication);
        assert_eq!(q.dequeue(), Some((NotifyKind::Indication, 0)));

        q.queue(1, NotifyKind::Notification);
        assert_eq!(q.dequeue(), Some((NotifyKind::Notification, 1)));
    }

    #[test]
    fn confirmation_without_outstanding_indication_is_tolerated() {
        let mut q = NotificationQueue::new(1);
        q.confirmed();
        assert!(!q.indication_pending());
    }

    #[test]
    fn reset_clears_all_state() {
        let mut q = NotificationQueue::new(2);
        q.queue(0, NotifyKind::Indication);
        q.dequeue();
        q.queue(1, NotifyKind::Notification);

        q.reset();
        assert!(!q.indication_pending());
        assert_eq!(q.dequeue(), None);
    }
}
