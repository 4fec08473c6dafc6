//! Output formatting utilities

mod progress;

use console::style;

use launchpad_distribute::notify::{Notification, NotificationKind};
use launchpad_distribute::traits::Notifier;

pub use progress::UploadProgressBar;

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("{} {}", style("!").yellow().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", style("→").blue(), message);
}

/// Create a styled header
pub fn header(text: &str) -> String {
    style(text).bold().to_string()
}

/// Create a styled key-value line
pub fn key_value(key: &str, value: &str) -> String {
    format!("  {}: {}", style(key).dim(), value)
}

/// Prints notifications to the terminal
#[derive(Debug, Default)]
pub struct ConsoleNotifier {
    quiet: bool,
}

impl ConsoleNotifier {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, notification: &Notification) {
        match notification.kind {
            NotificationKind::Success if !self.quiet => success(&notification.message),
            NotificationKind::Success => {}
            NotificationKind::Failure => error(&notification.message),
            NotificationKind::Stalled => warning(&notification.message),
        }

        if let Some(learn_more) = &notification.learn_more {
            if !self.quiet {
                println!("  {}: {}", learn_more.label, style(&learn_more.target).cyan());
            }
        }
    }

    fn dismiss(&self) {}
}
