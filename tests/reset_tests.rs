mod common;

use axum::http::StatusCode;
use common::{PASSWORD, TestApp, TestResponse, TestSetup, post_json, setup, with_bearer};
use gatehouse::cleanup::run_cleanup;
use gatehouse::db::UserRole;
use gatehouse::notify::NotificationKind;
use gatehouse::password::verify_password;
use serde_json::json;
use std::time::Duration;

const NEW_PASSWORD: &str = "a brand new password";

async fn request_reset(app: &TestApp, email: &str) -> TestResponse {
    app.send(post_json(
        "/api/users/forgotten-password",
        json!({ "email": email }),
    ))
    .await
}

async fn consume(app: &TestApp, secret: &str, password: &str, confirm: &str) -> TestResponse {
    app.send(post_json(
        &format!("/api/users/reset-password/{}", secret),
        json!({ "password": password, "password_confirm": confirm }),
    ))
    .await
}

async fn stored_hash(app: &TestApp) -> String {
    app.db
        .users()
        .get_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap()
        .password_hash
}

#[tokio::test]
async fn test_reset_password_once() {
    let app = setup().await;
    app.create_user("Alice", "alice@example.com", UserRole::User)
        .await;

    let response = request_reset(&app, "alice@example.com").await;
    assert_eq!(response.status, StatusCode::OK);
    let notification = app.notifier.last(NotificationKind::PasswordReset).unwrap();
    assert_eq!(
        notification.link,
        format!("http://localhost:3000/reset-password/{}", notification.secret)
    );

    let response = consume(&app, &notification.secret, NEW_PASSWORD, NEW_PASSWORD).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.json()["notification"],
        "Congratulations! Your password was updated successfully! Please sign in again."
    );
    assert!(
        response
            .set_cookies()
            .iter()
            .all(|c| c.contains("Max-Age=0"))
    );
    assert!(verify_password(NEW_PASSWORD, &stored_hash(&app).await));

    let response = consume(&app, &notification.secret, "yet another one", "yet another one").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json()["notification"],
        "The token is invalid. Please use the correct token."
    );
    assert!(verify_password(NEW_PASSWORD, &stored_hash(&app).await));

    app.login("alice@example.com", NEW_PASSWORD).await;
}

#[tokio::test]
async fn test_second_request_invalidates_first() {
    let app = setup().await;
    app.create_user("Alice", "alice@example.com", UserRole::User)
        .await;

    request_reset(&app, "alice@example.com").await;
    let first = app.notifier.last_secret(NotificationKind::PasswordReset);
    request_reset(&app, "alice@example.com").await;
    let second = app.notifier.last_secret(NotificationKind::PasswordReset);

    let response = consume(&app, &first, NEW_PASSWORD, NEW_PASSWORD).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = consume(&app, &second, NEW_PASSWORD, NEW_PASSWORD).await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_email_looks_like_success() {
    let app = setup().await;
    app.create_user("Alice", "alice@example.com", UserRole::User)
        .await;

    let known = request_reset(&app, "alice@example.com").await;
    let unknown = request_reset(&app, "nobody@example.com").await;

    assert_eq!(known.status, StatusCode::OK);
    assert_eq!(known.body, unknown.body);
    assert_eq!(
        unknown.json()["notification"],
        "You will receive an email with detailed instructions shortly."
    );
    assert_eq!(app.notifier.count(NotificationKind::PasswordReset), 1);
}

#[tokio::test]
async fn test_expired_secret_is_discarded() {
    let app = TestSetup::new().with_reset_window(600).build().await;
    app.create_user("Alice", "alice@example.com", UserRole::User)
        .await;
    let original_hash = stored_hash(&app).await;

    request_reset(&app, "alice@example.com").await;
    let secret = app.notifier.last_secret(NotificationKind::PasswordReset);

    app.clock.advance(Duration::from_secs(601));
    let response = consume(&app, &secret, NEW_PASSWORD, NEW_PASSWORD).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json()["notification"],
        "Sorry, the time is expired and not valid anymore"
    );
    assert_eq!(stored_hash(&app).await, original_hash);

    // The expired record is gone, not just stale
    let response = consume(&app, &secret, NEW_PASSWORD, NEW_PASSWORD).await;
    assert_eq!(
        response.json()["notification"],
        "The token is invalid. Please use the correct token."
    );
}

#[tokio::test]
async fn test_cleanup_keeps_recently_expired_secret() {
    let app = TestSetup::new().with_reset_window(600).build().await;
    app.create_user("Alice", "alice@example.com", UserRole::User)
        .await;

    request_reset(&app, "alice@example.com").await;
    let secret = app.notifier.last_secret(NotificationKind::PasswordReset);

    app.clock.advance(Duration::from_secs(600 + 120));
    run_cleanup(&app.db, app.clock.as_ref(), 600).await;

    let response = consume(&app, &secret, NEW_PASSWORD, NEW_PASSWORD).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json()["notification"],
        "Sorry, the time is expired and not valid anymore"
    );
}

#[tokio::test]
async fn test_reset_user_errors() {
    let app = setup().await;
    app.create_user("Alice", "alice@example.com", UserRole::User)
        .await;
    request_reset(&app, "alice@example.com").await;
    let secret = app.notifier.last_secret(NotificationKind::PasswordReset);

    let response = consume(&app, &secret, NEW_PASSWORD, "something else").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["notification"], "Passwords do not match");

    let response = consume(&app, &secret, "short", "short").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = consume(&app, "bm90LXRoZS1zZWNyZXQ", NEW_PASSWORD, NEW_PASSWORD).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    // None of the above used up the secret
    let response = consume(&app, &secret, NEW_PASSWORD, NEW_PASSWORD).await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_failed_email_is_reported() {
    let app = setup().await;
    app.create_user("Alice", "alice@example.com", UserRole::User)
        .await;
    app.notifier.set_failing(true);

    let response = request_reset(&app, "alice@example.com").await;
    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(
        response.json()["notification"],
        "There was an error sending the email."
    );
}

#[tokio::test]
async fn test_reset_routes_reject_logged_in_users() {
    let app = setup().await;
    let (_, tokens) = app
        .user_with_session("Alice", "alice@example.com", UserRole::User)
        .await;

    let response = app
        .send(with_bearer(
            post_json(
                "/api/users/forgotten-password",
                json!({ "email": "alice@example.com" }),
            ),
            &tokens.access,
        ))
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(app.notifier.count(NotificationKind::PasswordReset), 0);
}

#[tokio::test]
async fn test_forgotten_password_rate_limit() {
    let app = TestSetup::new().with_rate_limits(1000, 1).build().await;

    assert_eq!(
        request_reset(&app, "a@example.com").await.status,
        StatusCode::OK
    );
    assert_eq!(
        request_reset(&app, "a@example.com").await.status,
        StatusCode::TOO_MANY_REQUESTS
    );

    // Login is limited separately
    app.create_user("Alice", "alice@example.com", UserRole::User)
        .await;
    app.login("alice@example.com", PASSWORD).await;
}
