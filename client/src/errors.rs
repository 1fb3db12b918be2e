//! Ordered queue of user-facing errors.
//!
//! Configuration and replication failures are collected here in the order
//! they were raised. A UI shows [`ErrorQueue::current`] and calls
//! [`ErrorQueue::dismiss_next`] when the user closes it.

use crate::{Error, SyncFailure};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::watch;

/// One error as presented to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEntry {
    pub title: String,
    pub message: String,
    /// Whether the user may dismiss it
    pub closable: bool,
}

impl ErrorEntry {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            closable: true,
        }
    }

    /// Entry for a configuration problem.
    pub fn config(error: &Error) -> Self {
        let title = match error {
            Error::ConfigMissing => "Configuration Missing",
            _ => "Configuration Error",
        };
        Self::new(title, error.to_string())
    }

    /// Entry for a failed replication attempt.
    pub fn sync(failure: &SyncFailure) -> Self {
        Self::new("Sync Error", failure.to_string())
    }
}

/// FIFO of pending errors with a watch channel on the head.
#[derive(Debug)]
pub struct ErrorQueue {
    entries: Mutex<VecDeque<ErrorEntry>>,
    head: watch::Sender<Option<ErrorEntry>>,
}

impl Default for ErrorQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorQueue {
    pub fn new() -> Self {
        let (head, _) = watch::channel(None);
        Self {
            entries: Mutex::new(VecDeque::new()),
            head,
        }
    }

    /// Append an error behind every pending one.
    pub fn push(&self, entry: ErrorEntry) {
        tracing::debug!(title = %entry.title, message = %entry.message, "error queued");
        self.update(|entries| entries.push_back(entry));
    }

    /// The error to show now.
    pub fn current(&self) -> Option<ErrorEntry> {
        self.head.borrow().clone()
    }

    /// Drop the oldest error, returning it.
    pub fn dismiss_next(&self) -> Option<ErrorEntry> {
        let mut dismissed = None;
        self.update(|entries| dismissed = entries.pop_front());
        dismissed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every pending error, oldest first.
    pub fn pending(&self) -> Vec<ErrorEntry> {
        self.lock().iter().cloned().collect()
    }

    /// Follow the error currently at the head of the queue.
    pub fn watch(&self) -> watch::Receiver<Option<ErrorEntry>> {
        self.head.subscribe()
    }

    fn update(&self, change: impl FnOnce(&mut VecDeque<ErrorEntry>)) {
        let mut entries = self.lock();
        change(&mut entries);
        self.head.send_replace(entries.front().cloned());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ErrorEntry>> {
        // Entries stay consistent even if a holder panicked
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_raised_is_shown_first() {
        let queue = ErrorQueue::new();
        assert!(queue.current().is_none());

        queue.push(ErrorEntry::new("First", "one"));
        queue.push(ErrorEntry::new("Second", "two"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.current().unwrap().title, "First");

        assert_eq!(queue.dismiss_next().unwrap().title, "First");
        assert_eq!(queue.current().unwrap().title, "Second");

        queue.dismiss_next();
        assert!(queue.is_empty());
        assert!(queue.dismiss_next().is_none());
    }

    #[test]
    fn config_titles() {
        assert_eq!(
            ErrorEntry::config(&Error::ConfigMissing).title,
            "Configuration Missing"
        );
        let invalid = ErrorEntry::config(&Error::ConfigInvalid("username is empty".into()));
        assert_eq!(invalid.title, "Configuration Error");
        assert!(invalid.message.contains("username is empty"));
        assert!(invalid.closable);
    }

    #[tokio::test]
    async fn watch_follows_head() {
        let queue = ErrorQueue::new();
        let mut rx = queue.watch();

        queue.push(ErrorEntry::new("Sync Error", "offline"));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().message, "offline");

        queue.dismiss_next();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }
}
