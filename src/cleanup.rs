//! Scheduled cleanup of stale reset records and idle rate-limit buckets.

use crate::clock::Clock;
use crate::db::Database;
use crate::rate_limit::RateLimitConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Reset records that expired less than one window ago are kept so their
/// owners still see "expired" rather than "invalid".
fn reset_cutoff(now: u64, reset_window_secs: u64) -> u64 {
    now.saturating_sub(reset_window_secs)
}

/// Run all cleanup tasks once.
pub async fn run_cleanup(db: &Database, clock: &dyn Clock, reset_window_secs: u64) {
    let cutoff = reset_cutoff(clock.now(), reset_window_secs);
    match db.users().clear_expired_resets(cutoff).await {
        Ok(count) if count > 0 => info!("Cleaned up {} expired reset tokens", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up expired reset tokens: {}", e),
    }
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(
    db: Database,
    clock: Arc<dyn Clock>,
    reset_window_secs: u64,
    rate_limits: Arc<RateLimitConfig>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(&db, clock.as_ref(), reset_window_secs).await;
            rate_limits.retain_recent();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::reset::ResetStore;

    const WINDOW: u64 = 100;

    async fn db_with_resets(resets: &[(&str, &str, u64)]) -> Database {
        let db = Database::open(":memory:").await.unwrap();
        let users = db.users();
        for (i, (email, stored, expires_at)) in resets.iter().enumerate() {
            users
                .create(&format!("u{}", i), "User", email, "hash", &format!("code-{}", i))
                .await
                .unwrap();
            users.put_reset(email, stored, *expires_at).await.unwrap();
        }
        db
    }

    #[tokio::test]
    async fn test_cleanup_clears_records_expired_over_a_window_ago() {
        let db = db_with_resets(&[
            ("a@example.com", "stale", 100),
            ("b@example.com", "recent", 250),
            ("c@example.com", "live", 400),
        ])
        .await;

        run_cleanup(&db, &ManualClock::new(300), WINDOW).await;

        let users = db.users();
        assert!(users.get_reset("stale").await.unwrap().is_none());
        assert!(users.get_reset("recent").await.unwrap().is_some());
        assert!(users.get_reset("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_just_expired_record() {
        let db = db_with_resets(&[("a@example.com", "just-expired", 1_000)]).await;

        // Expired 20 seconds ago, well inside the window
        run_cleanup(&db, &ManualClock::new(1_020), WINDOW).await;
        assert!(db.users().get_reset("just-expired").await.unwrap().is_some());

        run_cleanup(&db, &ManualClock::new(1_000 + WINDOW + 1), WINDOW).await;
        assert!(db.users().get_reset("just-expired").await.unwrap().is_none());
    }

    #[test]
    fn test_reset_cutoff_saturates() {
        assert_eq!(reset_cutoff(300, WINDOW), 200);
        assert_eq!(reset_cutoff(50, WINDOW), 0);
    }
}
