//! Thread-safe FIFO of inbound messages
//!
//! Written by the reactor thread, drained by the application thread once per
//! tick. The consumer polls; pushing never wakes anyone.

use crate::error::TransportError;
use crate::Message;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Unbounded message queue owned by exactly one connection
#[derive(Debug, Default)]
pub struct InboundQueue {
    messages: Mutex<VecDeque<Message>>,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message at the back of the queue
    pub fn push(&self, message: Message) {
        self.lock().push_back(message);
    }

    /// Removes and returns the oldest message
    ///
    /// Fails with [`TransportError::EmptyQueue`] when nothing is pending,
    /// leaving the queue untouched.
    pub fn pop(&self) -> Result<Message, TransportError> {
        self.lock().pop_front().ok_or(TransportError::EmptyQueue)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    // A panicking producer cannot leave the deque half-modified, so a
    // poisoned lock still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
