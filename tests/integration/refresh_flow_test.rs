//! Integration tests for transparent session refresh
use anyhow::Result;
use serde_json::json;

use super::test_harness::{store_with, TestBackend};
use iris_client::{ApiError, CredentialPair, RefreshError, SessionEvent, TokenStore};

/// Three near-simultaneous calls all rejected with the old token
#[tokio::test]
async fn test_concurrent_calls_replay_after_single_refresh() -> Result<()> {
    let mut backend = TestBackend::start().await;

    let rejected = [
        backend.resource("/api/clients", "old", 401, "{}", 1).await,
        backend.resource("/api/projects", "old", 401, "{}", 1).await,
        backend.resource("/api/tasks", "old", 401, "{}", 1).await,
    ];
    let accepted = [
        backend
            .resource("/api/clients", "new", 200, r#"[{"id":1}]"#, 1)
            .await,
        backend
            .resource("/api/projects", "new", 200, r#"[{"id":2}]"#, 1)
            .await,
        backend
            .resource("/api/tasks", "new", 200, r#"[{"id":3}]"#, 1)
            .await,
    ];
    let refresh = backend
        .refresh(
            "r1",
            200,
            json!({"access_token": "new", "refresh_token": "r2"}),
            1,
        )
        .await;

    let store = store_with("old", "r1");
    let client = backend.client(store.clone())?;

    let (clients, projects, tasks) = tokio::join!(
        client.get_json::<serde_json::Value>("/api/clients"),
        client.get_json::<serde_json::Value>("/api/projects"),
        client.get_json::<serde_json::Value>("/api/tasks"),
    );
    assert_eq!(clients?, json!([{"id": 1}]));
    assert_eq!(projects?, json!([{"id": 2}]));
    assert_eq!(tasks?, json!([{"id": 3}]));

    refresh.assert_async().await;
    for mock in rejected.iter().chain(accepted.iter()) {
        mock.assert_async().await;
    }

    assert_eq!(
        store.credentials().await?,
        Some(CredentialPair::new("new", "r2"))
    );
    assert_eq!(client.refresh_stats().refreshes_started, 1);
    Ok(())
}

#[tokio::test]
async fn test_rejected_refresh_signs_out() -> Result<()> {
    let mut backend = TestBackend::start().await;

    let rejected = backend.resource("/api/invoices", "old", 401, "{}", 1).await;
    let refresh = backend
        .refresh("r1", 401, json!({"message": "Invalid refresh token"}), 1)
        .await;

    let store = store_with("old", "r1");
    let client = backend.client(store.clone())?;
    let mut events = client.subscribe();

    let err = client.get("/api/invoices").await.unwrap_err();
    match err {
        ApiError::SessionExpired(RefreshError::Rejected { status, body }) => {
            assert_eq!(status, 401);
            assert!(body.contains("Invalid refresh token"));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    rejected.assert_async().await;
    refresh.assert_async().await;
    assert!(store.credentials().await?.is_none());
    assert!(!client.is_authenticated().await?);

    match events.recv().await? {
        SessionEvent::SessionExpired { redirect_to, .. } => assert_eq!(redirect_to, "/admin/login"),
        other => panic!("unexpected event: {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_refresh_without_rotation_keeps_refresh_token() -> Result<()> {
    let mut backend = TestBackend::start().await;

    // Mocks stay registered only while they are alive
    let _rejected = backend.resource("/api/tickets", "old", 401, "{}", 1).await;
    let _accepted = backend
        .resource("/api/tickets", "fresh", 200, r#"{"open":4}"#, 1)
        .await;
    let refresh = backend
        .refresh("r1", 200, json!({"access_token": "fresh"}), 1)
        .await;

    let store = store_with("old", "r1");
    let client = backend.client(store.clone())?;

    let response = client.get("/api/tickets").await?;
    assert_eq!(response.status(), 200);
    assert_eq!(response.body(), r#"{"open":4}"#);

    refresh.assert_async().await;
    assert_eq!(
        store.credentials().await?,
        Some(CredentialPair::new("fresh", "r1"))
    );
    Ok(())
}

#[tokio::test]
async fn test_login_then_authenticated_request() -> Result<()> {
    let mut backend = TestBackend::start().await;

    let login = backend
        .server
        .mock("POST", "/api/auth/login")
        .match_body(mockito::Matcher::Json(json!({
            "email": "ada@iris.test",
            "password": "hunter2"
        })))
        .with_status(200)
        .with_body(r#"{"access_token":"a1","refresh_token":"r1"}"#)
        .expect(1)
        .create_async()
        .await;
    let users = backend
        .resource("/api/users", "a1", 200, r#"[{"name":"Ada"}]"#, 1)
        .await;

    let store = std::sync::Arc::new(iris_client::MemoryTokenStore::new());
    let client = backend.client(store.clone())?;

    client.login("ada@iris.test", "hunter2").await?;
    let body: serde_json::Value = client.get_json("/api/users").await?;
    assert_eq!(body[0]["name"], "Ada");

    login.assert_async().await;
    users.assert_async().await;
    assert_eq!(
        client.default_header("Authorization").as_deref(),
        Some("Bearer a1")
    );
    Ok(())
}
