//! Replay cursors
//!
//! A subscription names the position in a channel's history it wants to
//! resume from. The remote service reserves two negative sentinels; any other
//! negative value is rejected.

use crate::error::{ForcestreamError, Result};

/// Position in a channel's event history to subscribe from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayId {
    /// `-2`: deliver all retained events, then new ones
    AllRetained,
    /// `-1`: deliver only events published after registration
    NewOnly,
    /// Deliver events strictly after this replay id
    After(u64),
}

impl ReplayId {
    /// Parse a raw wire cursor. `-2` and `-1` are the only valid negatives.
    pub fn from_raw(raw: i64) -> Result<Self> {
        match raw {
            -2 => Ok(ReplayId::AllRetained),
            -1 => Ok(ReplayId::NewOnly),
            n if n >= 0 => Ok(ReplayId::After(n as u64)),
            n => Err(ForcestreamError::InvalidReplayId(n)),
        }
    }

    /// Wire representation of this cursor
    pub fn as_raw(&self) -> i64 {
        match self {
            ReplayId::AllRetained => -2,
            ReplayId::NewOnly => -1,
            ReplayId::After(n) => *n as i64,
        }
    }
}

impl From<u64> for ReplayId {
    fn from(replay_id: u64) -> Self {
        ReplayId::After(replay_id)
    }
}
