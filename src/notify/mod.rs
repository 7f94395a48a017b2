//! Notification adapter.
//!
//! Translates controller decisions into post/cancel calls on an external
//! sink. No policy and no text formatting here: the sink receives the
//! structured content and owns presentation. Posting the same content twice
//! is a no-op so the evaluation loop can re-post freely.

use crate::schedule::ms_to_string;

/// Structured content for a charging status notification
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NotificationContent {
    /// Limit mode: charging held at a percentage cap
    Limit { limit: u32, done: bool },
    /// Auto/manual mode: charging paced toward a target time (epoch ms)
    Target { target_time: i64, done: bool },
}

impl NotificationContent {
    pub fn is_done(&self) -> bool {
        match self {
            Self::Limit { done, .. } | Self::Target { done, .. } => *done,
        }
    }
}

/// Receives post/cancel requests from the controller
pub trait NotificationSink: Send {
    fn post(&self, content: &NotificationContent);
    fn cancel(&self);
}

/// Stateful wrapper that suppresses redundant posts
pub struct ChargingNotification {
    sink: Box<dyn NotificationSink>,
    posted: Option<NotificationContent>,
}

impl ChargingNotification {
    pub fn new(sink: Box<dyn NotificationSink>) -> Self {
        Self { sink, posted: None }
    }

    pub fn post_limit(&mut self, limit: u32, done: bool) {
        self.post(NotificationContent::Limit { limit, done });
    }

    pub fn post_target(&mut self, target_time: i64, done: bool) {
        self.post(NotificationContent::Target { target_time, done });
    }

    fn post(&mut self, content: NotificationContent) {
        if self.posted == Some(content) {
            return;
        }

        log::debug!("Posting charging notification: {:?}", content);
        self.sink.post(&content);
        self.posted = Some(content);
    }

    pub fn cancel(&mut self) {
        self.sink.cancel();
        self.posted = None;
    }

    pub fn is_posted(&self) -> bool {
        self.posted.is_some()
    }

    pub fn is_done(&self) -> bool {
        self.posted.map(|c| c.is_done()).unwrap_or(false)
    }

    pub fn dump(&self) -> String {
        match self.posted {
            Some(NotificationContent::Limit { limit, done }) => {
                format!("posted limit notification: {}%, done: {}", limit, done)
            }
            Some(NotificationContent::Target { target_time, done }) => format!(
                "posted target notification: {}, done: {}",
                ms_to_string(target_time),
                done
            ),
            None => "no notification posted".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingSink {
        posts: Arc<AtomicU32>,
        cancels: Arc<AtomicU32>,
    }

    impl NotificationSink for CountingSink {
        fn post(&self, _content: &NotificationContent) {
            self.posts.fetch_add(1, Ordering::SeqCst);
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_notification() -> (ChargingNotification, Arc<AtomicU32>, Arc<AtomicU32>) {
        let sink = CountingSink::default();
        let posts = sink.posts.clone();
        let cancels = sink.cancels.clone();
        (ChargingNotification::new(Box::new(sink)), posts, cancels)
    }

    #[test]
    fn test_duplicate_post_is_noop() {
        let (mut notification, posts, _) = counting_notification();

        notification.post_limit(80, false);
        notification.post_limit(80, false);
        assert_eq!(posts.load(Ordering::SeqCst), 1);

        // The done transition is a different content, so it posts
        notification.post_limit(80, true);
        assert_eq!(posts.load(Ordering::SeqCst), 2);
        assert!(notification.is_done());
    }

    #[test]
    fn test_cancel_clears_posted_state() {
        let (mut notification, posts, cancels) = counting_notification();

        notification.post_target(1_000_000, false);
        notification.cancel();
        assert!(!notification.is_posted());
        assert_eq!(cancels.load(Ordering::SeqCst), 1);

        // Same content posts again after a cancel
        notification.post_target(1_000_000, false);
        assert_eq!(posts.load(Ordering::SeqCst), 2);
    }
}
