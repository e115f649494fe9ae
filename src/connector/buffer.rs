use aigent_protocol::MessageType;
use std::collections::VecDeque;

/// Default number of queued messages before the overflow policy applies
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// What to give up when the buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the head to make room for the new message
    #[default]
    DropOldest,
    /// Reject the new message
    DropNewest,
}

/// A message waiting for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending {
    pub message_type: MessageType,
    pub payload: Vec<u8>,
}

/// FIFO of messages not yet handed to the transport
#[derive(Debug)]
pub struct OutboundBuffer {
    items: VecDeque<Pending>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl OutboundBuffer {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: capacity.max(1),
            policy,
        }
    }

    /// Append a message; returns the one that was dropped, if any
    pub fn push(&mut self, pending: Pending) -> Option<Pending> {
        if self.items.len() < self.capacity {
            self.items.push_back(pending);
            return None;
        }

        match self.policy {
            OverflowPolicy::DropOldest => {
                let evicted = self.items.pop_front();
                self.items.push_back(pending);
                evicted
            }
            OverflowPolicy::DropNewest => Some(pending),
        }
    }

    /// Remove the head after it was transmitted
    pub fn pop_front(&mut self) -> Option<Pending> {
        self.items.pop_front()
    }

    /// Put back a head that could not be transmitted
    pub fn restore_front(&mut self, pending: Pending) {
        self.items.push_front(pending);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
