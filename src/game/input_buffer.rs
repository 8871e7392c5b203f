//! Lock-free input buffer between connection handlers and the tick
//!
//! Connection handlers push movement and zoom inputs without touching the
//! session lock; the tick drains everything at its start, in arrival order.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::time::Instant;

use crate::game::state::{ConnectionId, Key};
use crate::util::vec2::Vec2;

/// Input that mutates live session state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputKind {
    KeyDown(Key),
    KeyUp(Key),
    SubmitPosition(Vec2),
    SetZoom(f32),
}

/// One input stamped with its receipt time
#[derive(Debug, Clone, Copy)]
pub struct InputEvent {
    pub connection_id: ConnectionId,
    pub received_at: Instant,
    pub kind: InputKind,
}

/// Input buffer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InputBufferError {
    /// Buffer is full (backpressure)
    #[error("Input buffer full")]
    Full,
    /// Channel disconnected (game loop stopped)
    #[error("Input buffer disconnected")]
    Disconnected,
}

pub struct InputBuffer {
    sender: Sender<InputEvent>,
    receiver: Receiver<InputEvent>,
    capacity: usize,
}

impl InputBuffer {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Create a sender handle for a connection
    pub fn sender(&self) -> InputSender {
        InputSender {
            sender: self.sender.clone(),
        }
    }

    /// Drain all pending inputs for this tick
    pub fn drain(&self) -> Vec<InputEvent> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new(crate::game::constants::net::INPUT_BUFFER_CAPACITY)
    }
}

/// Clonable sender handle for connection handlers
#[derive(Clone)]
pub struct InputSender {
    sender: Sender<InputEvent>,
}

impl InputSender {
    /// Submit an input stamped with `received_at` (non-blocking)
    #[inline]
    pub fn try_send(
        &self,
        connection_id: ConnectionId,
        kind: InputKind,
        received_at: Instant,
    ) -> Result<(), InputBufferError> {
        self.sender
            .try_send(InputEvent {
                connection_id,
                received_at,
                kind,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => InputBufferError::Full,
                TrySendError::Disconnected(_) => InputBufferError::Disconnected,
            })
    }
}
