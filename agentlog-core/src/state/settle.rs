//! Initial-load settle tracking.
//!
//! The first few session loads after startup arrive in quick succession as
//! adapters report in. The list is considered settled once no further load
//! lands within [`SETTLE_DELAY`]; until then the front end shows a skeleton.

use crate::cache::{StalenessTokens, TokenKind};
use std::time::Duration;

pub const SETTLE_DELAY: Duration = Duration::from_millis(300);

/// Timer the runtime should start; deliver `token` back when it elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleTimer {
    pub token: u64,
    pub delay: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct SettleState {
    initial_load_done: bool,
    tokens: StalenessTokens,
}

impl SettleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_load_done(&self) -> bool {
        self.initial_load_done
    }

    /// A session list arrived; restart the settle timer.
    pub fn on_sessions_loaded(&mut self) -> SettleTimer {
        SettleTimer {
            token: self.tokens.next(TokenKind::Settle),
            delay: SETTLE_DELAY,
        }
    }

    /// The timer for `token` elapsed. Returns true if this settled the list.
    pub fn on_settle_elapsed(&mut self, token: u64) -> bool {
        if self.initial_load_done || !self.tokens.is_current(TokenKind::Settle, token) {
            return false;
        }
        self.initial_load_done = true;
        true
    }
}
