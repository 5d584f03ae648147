//! Password reset flow.
//!
//! Per email: `NoActiveReset -> ResetRequested -> ResetConsumed | ResetExpired`.
//! A new request overwrites any earlier secret for the same email. A secret
//! is consumed at most once.

use std::sync::Arc;

use tracing::{info, warn};
use url::Url;

use crate::clock::Clock;
use crate::notify::{Notification, NotificationKind, Notifier, NotifyError};
use crate::password::{PasswordError, hash_password, validate_password};
use crate::secret::{OneTimeSecret, stored_form};

/// How long a reset secret stays valid: 24 hours.
pub const DEFAULT_RESET_WINDOW_SECS: u64 = 24 * 60 * 60;

/// Client path the reset link points at.
pub const RESET_LINK_PATH: &str = "reset-password";

/// A persisted reset secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ResetRecord {
    pub email: String,
    /// Stored form, see [`crate::secret`]
    pub reset_secret: String,
    /// Unix seconds
    pub expires_at: u64,
}

impl std::fmt::Debug for ResetRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetRecord")
            .field("email", &self.email)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Persistence for reset records, keyed by email.
#[trait_variant::make(ResetStore: Send)]
pub trait LocalResetStore {
    /// Overwrite the record for `email`. Returns false if no such account.
    async fn put_reset(
        &self,
        email: &str,
        reset_secret: &str,
        expires_at: u64,
    ) -> Result<bool, sqlx::Error>;

    async fn get_reset(&self, reset_secret: &str) -> Result<Option<ResetRecord>, sqlx::Error>;

    async fn clear_reset(&self, email: &str) -> Result<(), sqlx::Error>;

    /// Set the password and clear the record in one update, only if the
    /// record is still live at `now`. Returns false if another consumer won.
    async fn replace_password_and_clear(
        &self,
        reset_secret: &str,
        password_hash: &str,
        now: u64,
    ) -> Result<bool, sqlx::Error>;
}

#[derive(Debug)]
pub enum ResetError {
    /// Undecodable, unknown or already used secret
    InvalidToken,
    /// Secret found but past its expiry. The caller should discard the record.
    TimeExpired(ResetRecord),
    PasswordMismatch,
    WeakPassword(PasswordError),
    Hashing(PasswordError),
    UnknownEmail,
    /// The record was saved but the notification could not be delivered
    Notification(NotifyError),
    Store(sqlx::Error),
}

impl ResetError {
    pub fn kind(&self) -> &'static str {
        match self {
            ResetError::InvalidToken => "invalid_token",
            ResetError::TimeExpired(_) => "time_expired",
            ResetError::PasswordMismatch => "password_mismatch",
            ResetError::WeakPassword(_) => "weak_password",
            ResetError::Hashing(_) => "hashing",
            ResetError::UnknownEmail => "unknown_email",
            ResetError::Notification(_) => "notification",
            ResetError::Store(_) => "store",
        }
    }
}

impl std::fmt::Display for ResetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResetError::InvalidToken => write!(f, "Invalid reset token"),
            ResetError::TimeExpired(record) => {
                write!(f, "Reset token expired at {}", record.expires_at)
            }
            ResetError::PasswordMismatch => write!(f, "Passwords do not match"),
            ResetError::WeakPassword(e) | ResetError::Hashing(e) => write!(f, "{}", e),
            ResetError::UnknownEmail => write!(f, "No account for this email"),
            ResetError::Notification(e) => write!(f, "{}", e),
            ResetError::Store(e) => write!(f, "Reset store error: {}", e),
        }
    }
}

impl std::error::Error for ResetError {}

impl From<sqlx::Error> for ResetError {
    fn from(e: sqlx::Error) -> Self {
        ResetError::Store(e)
    }
}

pub struct PasswordResetFlow<S> {
    store: S,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    origin: Url,
    window_secs: u64,
}

impl<S> PasswordResetFlow<S>
where
    S: ResetStore + Sync,
{
    pub fn new(store: S, clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>, origin: Url) -> Self {
        Self {
            store,
            clock,
            notifier,
            origin,
            window_secs: DEFAULT_RESET_WINDOW_SECS,
        }
    }

    pub fn with_window(mut self, window_secs: u64) -> Self {
        self.window_secs = window_secs;
        self
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    /// Create or replace the reset secret for `email` and notify its owner.
    pub async fn request_reset(&self, email: &str) -> Result<(), ResetError> {
        let secret = OneTimeSecret::generate();
        let expires_at = self.clock.now().saturating_add(self.window_secs);

        if !self.store.put_reset(email, &secret.stored, expires_at).await? {
            return Err(ResetError::UnknownEmail);
        }

        let notification = Notification::new(
            NotificationKind::PasswordReset,
            email,
            &secret.presentable,
            &self.origin,
            RESET_LINK_PATH,
        );
        self.notifier
            .deliver(&notification)
            .map_err(ResetError::Notification)?;

        info!(expires_at, "Password reset requested");
        Ok(())
    }

    /// Replace the password of the account holding `presented_secret`.
    pub async fn consume_reset(
        &self,
        presented_secret: &str,
        new_password: &str,
        password_confirm: &str,
    ) -> Result<(), ResetError> {
        if new_password != password_confirm {
            return Err(ResetError::PasswordMismatch);
        }

        let stored = stored_form(presented_secret).ok_or(ResetError::InvalidToken)?;
        let record = self
            .store
            .get_reset(&stored)
            .await?
            .ok_or(ResetError::InvalidToken)?;

        let now = self.clock.now();
        if now > record.expires_at {
            warn!(record = ?record, now, "Reset token expired");
            return Err(ResetError::TimeExpired(record));
        }

        validate_password(new_password).map_err(ResetError::WeakPassword)?;
        let password_hash = hash_password(new_password).map_err(ResetError::Hashing)?;

        if !self
            .store
            .replace_password_and_clear(&stored, &password_hash, now)
            .await?
        {
            return Err(ResetError::InvalidToken);
        }

        info!("Password reset completed");
        Ok(())
    }

    /// Remove a record returned in [`ResetError::TimeExpired`].
    pub async fn discard(&self, record: &ResetRecord) -> Result<(), ResetError> {
        self.store.clear_reset(&record.email).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{Database, UserStore};
    use crate::password::verify_password;
    use std::sync::Mutex;
    use std::time::Duration;

    const START: u64 = 1_700_000_000;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Notification>>,
    }

    impl Recorder {
        fn last_secret(&self) -> String {
            self.sent.lock().unwrap().last().unwrap().secret.clone()
        }
    }

    impl Notifier for Recorder {
        fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct Failing;

    impl Notifier for Failing {
        fn deliver(&self, _: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError("smtp down".into()))
        }
    }

    struct Fixture {
        db: Database,
        flow: PasswordResetFlow<UserStore>,
        clock: Arc<ManualClock>,
        recorder: Arc<Recorder>,
    }

    async fn fixture() -> Fixture {
        let db = Database::open(":memory:").await.unwrap();
        db.users()
            .create("uuid-1", "Alice", "a@example.com", "old-hash", "code")
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::new(START));
        let recorder = Arc::new(Recorder::default());
        let flow = PasswordResetFlow::new(
            db.users(),
            clock.clone(),
            recorder.clone(),
            Url::parse("https://example.com").unwrap(),
        );
        Fixture {
            db,
            flow,
            clock,
            recorder,
        }
    }

    async fn password_hash(db: &Database) -> String {
        db.users()
            .get_by_email("a@example.com")
            .await
            .unwrap()
            .unwrap()
            .password_hash
    }

    #[tokio::test]
    async fn test_reset_is_single_use() {
        let f = fixture().await;
        f.flow.request_reset("a@example.com").await.unwrap();
        let secret = f.recorder.last_secret();

        f.flow
            .consume_reset(&secret, "new-password", "new-password")
            .await
            .unwrap();
        assert!(verify_password("new-password", &password_hash(&f.db).await));

        let again = f
            .flow
            .consume_reset(&secret, "other-password", "other-password")
            .await;
        assert!(matches!(again, Err(ResetError::InvalidToken)));
        assert!(verify_password("new-password", &password_hash(&f.db).await));
    }

    #[tokio::test]
    async fn test_second_request_replaces_first() {
        let f = fixture().await;
        f.flow.request_reset("a@example.com").await.unwrap();
        let first = f.recorder.last_secret();
        f.flow.request_reset("a@example.com").await.unwrap();
        let second = f.recorder.last_secret();
        assert_ne!(first, second);

        assert!(matches!(
            f.flow.consume_reset(&first, "new-password", "new-password").await,
            Err(ResetError::InvalidToken)
        ));
        f.flow
            .consume_reset(&second, "new-password", "new-password")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_expired_secret_leaves_password() {
        let f = fixture().await;
        f.flow.request_reset("a@example.com").await.unwrap();
        let secret = f.recorder.last_secret();

        f.clock
            .advance(Duration::from_secs(DEFAULT_RESET_WINDOW_SECS + 1));

        let result = f
            .flow
            .consume_reset(&secret, "new-password", "new-password")
            .await;
        let record = match result {
            Err(ResetError::TimeExpired(record)) => record,
            other => panic!("expected TimeExpired, got {:?}", other),
        };
        assert_eq!(record.email, "a@example.com");
        assert_eq!(password_hash(&f.db).await, "old-hash");

        f.flow.discard(&record).await.unwrap();
        assert!(matches!(
            f.flow.consume_reset(&secret, "new-password", "new-password").await,
            Err(ResetError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_secret_valid_at_window_end() {
        let f = fixture().await;
        f.flow.request_reset("a@example.com").await.unwrap();
        let secret = f.recorder.last_secret();

        f.clock.advance(Duration::from_secs(DEFAULT_RESET_WINDOW_SECS));

        f.flow
            .consume_reset(&secret, "new-password", "new-password")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_user_errors() {
        let f = fixture().await;
        f.flow.request_reset("a@example.com").await.unwrap();
        let secret = f.recorder.last_secret();

        assert!(matches!(
            f.flow.consume_reset(&secret, "new-password", "different").await,
            Err(ResetError::PasswordMismatch)
        ));
        assert!(matches!(
            f.flow.consume_reset(&secret, "short", "short").await,
            Err(ResetError::WeakPassword(PasswordError::TooShort))
        ));
        assert!(matches!(
            f.flow.consume_reset("%%%", "new-password", "new-password").await,
            Err(ResetError::InvalidToken)
        ));
        assert!(matches!(
            f.flow.request_reset("nobody@example.com").await,
            Err(ResetError::UnknownEmail)
        ));

        // Failed attempts do not burn the secret
        f.flow
            .consume_reset(&secret, "new-password", "new-password")
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_consumers_one_wins() {
        let Fixture {
            db, flow, recorder, ..
        } = fixture().await;
        let flow = Arc::new(flow);

        for round in 0..3 {
            flow.request_reset("a@example.com").await.unwrap();
            let secret = recorder.last_secret();

            let attempts: Vec<_> = ["first-password", "second-password"]
                .into_iter()
                .map(|password| {
                    let flow = flow.clone();
                    let secret = secret.clone();
                    tokio::spawn(async move {
                        flow.consume_reset(&secret, password, password)
                            .await
                            .map(|()| password)
                    })
                })
                .collect();

            let mut winners = Vec::new();
            for attempt in attempts {
                match attempt.await.unwrap() {
                    Ok(password) => winners.push(password),
                    Err(ResetError::InvalidToken) => {}
                    Err(e) => panic!("round {}: unexpected error {:?}", round, e),
                }
            }

            assert_eq!(winners.len(), 1, "round {}", round);
            assert!(verify_password(winners[0], &password_hash(&db).await));
        }
    }

    #[tokio::test]
    async fn test_failed_notification_keeps_record() {
        let f = fixture().await;
        let flow = PasswordResetFlow::new(
            f.db.users(),
            f.clock.clone(),
            Arc::new(Failing),
            Url::parse("https://example.com").unwrap(),
        );

        assert!(matches!(
            flow.request_reset("a@example.com").await,
            Err(ResetError::Notification(_))
        ));

        let row: (Option<String>,) =
            sqlx::query_as("SELECT reset_token FROM users WHERE email = 'a@example.com'")
                .fetch_one(f.db.pool())
                .await
                .unwrap();
        assert!(row.0.is_some());
    }

    #[tokio::test]
    async fn test_custom_window() {
        let f = fixture().await;
        let flow = PasswordResetFlow::new(
            f.db.users(),
            f.clock.clone(),
            f.recorder.clone(),
            Url::parse("https://example.com").unwrap(),
        )
        .with_window(60);

        flow.request_reset("a@example.com").await.unwrap();
        let secret = f.recorder.last_secret();
        assert!(f.recorder.sent.lock().unwrap()[0]
            .link
            .starts_with("https://example.com/reset-password/"));

        f.clock.advance(Duration::from_secs(61));
        assert!(matches!(
            flow.consume_reset(&secret, "new-password", "new-password").await,
            Err(ResetError::TimeExpired(_))
        ));
    }
}
