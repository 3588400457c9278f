//! Per-slot lifecycle

use std::fmt;

use super::close::CloseReason;

/// Where one connection slot is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Connecting,
    Connected,
    Closing,
    Reconnecting,
    Deleted,
}

impl SlotState {
    /// Whether `self → next` is a legal move
    pub fn can_transition(self, next: SlotState) -> bool {
        use SlotState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connecting, Deleted)
                | (Connected, Closing)
                | (Closing, Reconnecting)
                | (Closing, Deleted)
                | (Reconnecting, Connecting)
                | (Reconnecting, Deleted)
        )
    }

    /// State a closing slot moves to
    pub fn after_close(reason: &CloseReason, reconnect: bool) -> SlotState {
        if reason.is_administrative() || !reconnect {
            SlotState::Deleted
        } else {
            SlotState::Reconnecting
        }
    }

    pub fn is_terminal(self) -> bool {
        self == SlotState::Deleted
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotState::Idle => "idle",
            SlotState::Connecting => "connecting",
            SlotState::Connected => "connected",
            SlotState::Closing => "closing",
            SlotState::Reconnecting => "reconnecting",
            SlotState::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// A slot's state with transitions checked
#[derive(Debug)]
pub struct Slot {
    state: SlotState,
}

impl Slot {
    pub fn new() -> Self {
        Self {
            state: SlotState::Idle,
        }
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Move to `next`, returning false and staying put if the move is illegal
    pub fn advance(&mut self, next: SlotState) -> bool {
        if self.state.can_transition(next) {
            self.state = next;
            true
        } else {
            tracing::warn!(from = %self.state, to = %next, "Ignoring illegal slot transition");
            false
        }
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::new()
    }
}
