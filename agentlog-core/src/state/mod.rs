//! UI-integration state machines.
//!
//! Pure state: nothing here touches the filesystem or spawns tasks. A front
//! end feeds results in and executes the commands that come back out.

pub mod browser;
pub mod search_modal;
pub mod settle;

pub use browser::{CoreCommand, CoreMsg, SessionBrowser};
pub use search_modal::{ContentSearchModal, ModalCommand, ModalState};
pub use settle::{SettleState, SettleTimer, SETTLE_DELAY};

use std::time::{Duration, Instant};

pub const INFO_TOAST_DURATION: Duration = Duration::from_secs(2);
pub const ERROR_TOAST_DURATION: Duration = Duration::from_secs(4);

/// A transient notification.
#[derive(Debug, Clone)]
pub struct Toast {
    pub message: String,
    pub is_error: bool,
    pub duration: Duration,
    pub shown_at: Instant,
}

impl Toast {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: false,
            duration: INFO_TOAST_DURATION,
            shown_at: Instant::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: true,
            duration: ERROR_TOAST_DURATION,
            shown_at: Instant::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.shown_at.elapsed() >= self.duration
    }
}
