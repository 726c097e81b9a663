//! Interrupt handling for the control loop.
//!
//! Callers never touch orchestrator state directly: requests land in a
//! single-slot mailbox and the control loop honours them at the next safe
//! point (between phases, between per-function generations). A notifier
//! wakes the loop when it is parked in `Paused`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Kinds of interrupt the loop honours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    Pause,
    Resume,
    Cancel,
}

/// Where the interrupt came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptSource {
    User,
    Keyboard,
    Budget,
}

/// An interrupt request awaiting a safe point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptRequest {
    pub kind: InterruptKind,
    pub source: InterruptSource,
    pub timestamp: DateTime<Utc>,
}

impl InterruptRequest {
    pub fn pause(source: InterruptSource) -> Self {
        Self {
            kind: InterruptKind::Pause,
            source,
            timestamp: Utc::now(),
        }
    }

    pub fn resume() -> Self {
        Self {
            kind: InterruptKind::Resume,
            source: InterruptSource::User,
            timestamp: Utc::now(),
        }
    }

    pub fn cancel() -> Self {
        Self {
            kind: InterruptKind::Cancel,
            source: InterruptSource::User,
            timestamp: Utc::now(),
        }
    }
}

/// Single-slot interrupt mailbox shared between callers and the loop.
///
/// A second request before the first is consumed replaces it; a second
/// pause while already paused is a no-op at processing time.
#[derive(Debug, Clone, Default)]
pub struct InterruptMailbox {
    slot: Arc<Mutex<Option<InterruptRequest>>>,
    notify: Arc<Notify>,
}

impl InterruptMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post a request and wake the loop if it is parked.
    pub fn post(&self, request: InterruptRequest) {
        {
            let mut slot = self.slot.lock().expect("mailbox poisoned");
            *slot = Some(request);
        }
        self.notify.notify_one();
    }

    /// Take the pending request, if any.
    pub fn take(&self) -> Option<InterruptRequest> {
        self.slot.lock().expect("mailbox poisoned").take()
    }

    /// Peek without consuming.
    pub fn pending(&self) -> Option<InterruptRequest> {
        self.slot.lock().expect("mailbox poisoned").clone()
    }

    /// Park until a request is posted.
    pub async fn wait(&self) {
        // Check after registering interest so a post between `pending` and
        // `notified` is not lost.
        loop {
            let notified = self.notify.notified();
            if self.pending().is_some() {
                return;
            }
            notified.await;
        }
    }

    /// Drop any pending request.
    pub fn clear(&self) {
        self.slot.lock().expect("mailbox poisoned").take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_single_slot_replaces() {
        let mailbox = InterruptMailbox::new();
        mailbox.post(InterruptRequest::pause(InterruptSource::User));
        mailbox.post(InterruptRequest::cancel());

        let taken = mailbox.take().expect("pending request");
        assert_eq!(taken.kind, InterruptKind::Cancel);
        assert!(mailbox.take().is_none());
    }

    #[test]
    fn test_pending_does_not_consume() {
        let mailbox = InterruptMailbox::new();
        mailbox.post(InterruptRequest::resume());
        assert!(mailbox.pending().is_some());
        assert!(mailbox.take().is_some());
        assert!(mailbox.pending().is_none());
    }

    #[tokio::test]
    async fn test_wait_wakes_on_post() {
        let mailbox = InterruptMailbox::new();
        let waiter = mailbox.clone();

        let handle = tokio::spawn(async move {
            waiter.wait().await;
            waiter.take().unwrap().kind
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        mailbox.post(InterruptRequest::resume());

        let kind = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter woke")
            .unwrap();
        assert_eq!(kind, InterruptKind::Resume);
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_pending() {
        let mailbox = InterruptMailbox::new();
        mailbox.post(InterruptRequest::cancel());
        tokio::time::timeout(Duration::from_millis(100), mailbox.wait())
            .await
            .expect("no parking needed");
    }
}
