//! Response context phases.
//!
//! # State Transitions
//! ```text
//! Open -> Delivering        pipe_response
//! Open -> Completed         respond_* / pipe_error
//! Delivering -> Completed   pipe_end / pipe_error / respond_*
//! Open|Delivering -> Cancelled
//! ```
//!
//! `Completed` and `Cancelled` are terminal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Phase of a response context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Open = 0,
    Delivering = 1,
    Completed = 2,
    Cancelled = 3,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Open => "open",
            Phase::Delivering => "delivering",
            Phase::Completed => "completed",
            Phase::Cancelled => "cancelled",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Open,
            1 => Phase::Delivering,
            2 => Phase::Completed,
            _ => Phase::Cancelled,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic phase cell. Only the first caller to leave a given phase wins.
#[derive(Debug)]
pub(crate) struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(Phase::Open as u8))
    }

    pub(crate) fn load(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `to` if the current phase is one of `from`.
    ///
    /// Returns the phase that was left, or `None` if the transition lost.
    pub(crate) fn transition(&self, from: &[Phase], to: Phase) -> Option<Phase> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let phase = Phase::from_u8(current);
            if !from.contains(&phase) {
                return None;
            }
            match self
                .0
                .compare_exchange(current, to as u8, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(phase),
                Err(actual) => current = actual,
            }
        }
    }
}

/// Caching intent carried through to the consumer. Not enforced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    #[default]
    Allowed,
    AllowedInMemoryOnly,
    NotAllowed,
}

impl CachePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            CachePolicy::Allowed => "allowed",
            CachePolicy::AllowedInMemoryOnly => "allowed_in_memory_only",
            CachePolicy::NotAllowed => "not_allowed",
        }
    }
}
