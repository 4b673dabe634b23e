//! Integration tests for status code handling over real HTTP
use anyhow::Result;
use mockito::Matcher;
use std::sync::Arc;

use super::test_harness::{store_with, TestBackend};
use iris_client::{ApiError, ErrorCategory, MemoryTokenStore};

#[tokio::test]
async fn test_anonymous_requests_carry_no_authorization() -> Result<()> {
    let mut backend = TestBackend::start().await;
    let posts = backend
        .server
        .mock("GET", "/api/blog/posts")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body("[]")
        .expect(1)
        .create_async()
        .await;

    let client = backend.client(Arc::new(MemoryTokenStore::new()))?;
    let response = client.get("/api/blog/posts").await?;
    assert_eq!(response.body(), "[]");

    posts.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_error_statuses_are_not_retried() -> Result<()> {
    let mut backend = TestBackend::start().await;

    let limited = backend
        .resource("/api/chat/messages", "a1", 429, r#"{"retry_after":30}"#, 1)
        .await;
    let forbidden = backend
        .resource("/api/users/7", "a1", 403, r#"{"message":"admins only"}"#, 1)
        .await;
    let broken = backend
        .resource("/api/reports/sales", "a1", 500, "stack trace", 1)
        .await;
    let validation = backend
        .server
        .mock("POST", "/api/clients")
        .match_header("authorization", "Bearer a1")
        .match_header("content-type", "application/json")
        .with_status(422)
        .with_body(r#"{"errors":{"email":"is invalid"}}"#)
        .expect(1)
        .create_async()
        .await;

    let client = backend.client(store_with("a1", "r1"))?;

    let err = client.get("/api/chat/messages").await.unwrap_err();
    assert!(matches!(err, ApiError::RateLimited { .. }));
    assert_eq!(err.category(), ErrorCategory::RateLimit);

    let err = client.get("/api/users/7").await.unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert_eq!(err.category(), ErrorCategory::Permission);
    assert!(err.response().unwrap().body().contains("admins only"));

    let err = client.get("/api/reports/sales").await.unwrap_err();
    assert!(matches!(err, ApiError::Server { .. }));
    assert!(err.is_retryable());

    let err = client
        .post_json("/api/clients", &serde_json::json!({"email": "nope"}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(422));
    let details: serde_json::Value = err.response().unwrap().json()?;
    assert_eq!(details["errors"]["email"], "is invalid");

    for mock in [limited, forbidden, broken, validation] {
        mock.assert_async().await;
    }
    assert_eq!(client.refresh_stats().refreshes_started, 0);
    Ok(())
}
