//! User-facing notifications

use crate::traits::Notifier;

/// Kind of notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Failure,
    /// A remote job stopped reporting progress
    Stalled,
}

/// Action that reopens the UI that owns a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnMore {
    pub label: String,
    pub target: String,
}

/// A notification shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    /// Persistent notifications stay until dismissed by the user
    pub persistent: bool,
    pub learn_more: Option<LearnMore>,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Success,
            message: message.into(),
            persistent: false,
            learn_more: None,
        }
    }

    pub fn failure(message: impl Into<String>, learn_more: Option<LearnMore>) -> Self {
        Self {
            kind: NotificationKind::Failure,
            message: message.into(),
            persistent: true,
            learn_more,
        }
    }

    pub fn stalled(message: impl Into<String>, learn_more: Option<LearnMore>) -> Self {
        Self {
            kind: NotificationKind::Stalled,
            message: message.into(),
            persistent: true,
            learn_more,
        }
    }
}

/// Notifier that logs to tracing
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: &Notification) {
        match notification.kind {
            NotificationKind::Success => tracing::info!("{}", notification.message),
            NotificationKind::Failure | NotificationKind::Stalled => {
                tracing::warn!(
                    learn_more = notification.learn_more.as_ref().map(|l| l.target.as_str()),
                    "{}",
                    notification.message
                )
            }
        }
    }

    fn dismiss(&self) {}
}

/// Notifier that collects notifications for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    notifications: std::sync::Mutex<Vec<Notification>>,
    dismissals: std::sync::atomic::AtomicUsize,
}

impl CollectingNotifier {
    /// Get all collected notifications
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of collected notifications of one kind
    pub fn count(&self, kind: NotificationKind) -> usize {
        self.notifications().iter().filter(|n| n.kind == kind).count()
    }

    /// How many times `dismiss` was called
    pub fn dismissals(&self) -> usize {
        self.dismissals.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, notification: &Notification) {
        self.notifications
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(notification.clone());
    }

    fn dismiss(&self) {
        self.dismissals
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_is_persistent() {
        let n = Notification::failure("Resigning failed", None);
        assert!(n.persistent);
        assert!(!Notification::success("done").persistent);
    }

    #[test]
    fn test_collecting_notifier_counts() {
        let notifier = CollectingNotifier::default();
        notifier.notify(&Notification::success("a"));
        notifier.notify(&Notification::failure("b", None));
        notifier.notify(&Notification::success("c"));
        notifier.dismiss();

        assert_eq!(notifier.count(NotificationKind::Success), 2);
        assert_eq!(notifier.count(NotificationKind::Failure), 1);
        assert_eq!(notifier.dismissals(), 1);
    }
}
