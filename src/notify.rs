//! Outbound user notifications.
//!
//! Delivery is fire-and-forget: a failed delivery is reported but never undoes
//! the action that triggered it.

use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    EmailVerification,
    PasswordReset,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::EmailVerification => "email_verification",
            NotificationKind::PasswordReset => "password_reset",
        }
    }

    fn subject(&self) -> &'static str {
        match self {
            NotificationKind::EmailVerification => "Your account verification code",
            NotificationKind::PasswordReset => "Your password reset token",
        }
    }
}

/// A message for one recipient carrying a one-time secret.
#[derive(Clone)]
pub struct Notification {
    pub kind: NotificationKind,
    pub recipient: String,
    /// Presentable one-time secret
    pub secret: String,
    /// Client link that embeds the secret
    pub link: String,
}

impl Notification {
    /// Build a notification whose link is `{origin}/{path}/{secret}`.
    pub fn new(
        kind: NotificationKind,
        recipient: &str,
        secret: &str,
        origin: &Url,
        path: &str,
    ) -> Self {
        let link = format!(
            "{}/{}/{}",
            origin.as_str().trim_end_matches('/'),
            path.trim_matches('/'),
            secret
        );
        Self {
            kind,
            recipient: recipient.to_string(),
            secret: secret.to_string(),
            link,
        }
    }

    pub fn subject(&self) -> &'static str {
        self.kind.subject()
    }
}

impl std::fmt::Debug for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notification")
            .field("kind", &self.kind)
            .field("recipient", &self.recipient)
            .field("secret", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to deliver notification: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

/// Delivery channel for notifications.
pub trait Notifier: Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of sending email.
///
/// The link is only logged at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            kind = notification.kind.as_str(),
            recipient = %notification.recipient,
            subject = notification.subject(),
            "Notification sent"
        );
        tracing::debug!(link = %notification.link, "Notification link");
        Ok(())
    }
}
