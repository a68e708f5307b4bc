//! ---
//! vend_section: "05-orchestration"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Injectable delay used for the restart settle time and dispensing."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

/// Source of the delays the orchestrator waits out. Delays are not
/// cancellable.
#[async_trait]
pub trait SettleTimer: Send + Sync {
    /// Wait for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Timer backed by the tokio clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTimer;

#[async_trait]
impl SettleTimer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Timer that returns immediately and remembers every requested delay.
#[derive(Debug, Default, Clone)]
pub struct RecordingTimer {
    requests: Arc<Mutex<Vec<Duration>>>,
    journal: Option<Arc<Mutex<Vec<String>>>>,
}

impl RecordingTimer {
    /// Empty timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Timer that also appends `sleep <secs>s` to a shared journal.
    pub fn with_journal(journal: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            requests: Arc::default(),
            journal: Some(journal),
        }
    }

    /// Delays requested so far.
    pub fn requests(&self) -> Vec<Duration> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl SettleTimer for RecordingTimer {
    async fn sleep(&self, duration: Duration) {
        self.requests.lock().push(duration);
        if let Some(journal) = &self.journal {
            journal.lock().push(format!("sleep {}s", duration.as_secs()));
        }
        tokio::task::yield_now().await;
    }
}
