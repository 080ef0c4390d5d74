//! Versioned debounce for search-as-you-type.
//!
//! Every keystroke bumps the version and schedules a delayed message. Only
//! the message whose version is still current when it arrives is allowed to
//! start a search.

use std::future::Future;
use std::time::Duration;

/// Delivered when a debounce delay elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSearchDebounce {
    pub version: u64,
    pub query: String,
}

#[derive(Debug, Clone)]
pub struct SearchDebouncer {
    version: u64,
    delay: Duration,
}

impl SearchDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self { version: 0, delay }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Supersede any pending message and return the one to deliver after [`Self::delay`].
    pub fn next(&mut self, query: &str) -> ContentSearchDebounce {
        self.version += 1;
        ContentSearchDebounce {
            version: self.version,
            query: query.to_string(),
        }
    }

    /// [`Self::next`], delivered by a future that sleeps for the delay.
    pub fn schedule(
        &mut self,
        query: &str,
    ) -> impl Future<Output = ContentSearchDebounce> + Send + 'static {
        let msg = self.next(query);
        let delay = self.delay;
        async move {
            tokio::time::sleep(delay).await;
            msg
        }
    }

    /// Invalidate anything pending without scheduling.
    pub fn cancel(&mut self) {
        self.version += 1;
    }

    pub fn is_current(&self, msg: &ContentSearchDebounce) -> bool {
        msg.version == self.version
    }
}

impl Default for SearchDebouncer {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}
