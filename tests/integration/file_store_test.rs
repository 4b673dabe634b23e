//! Integration tests for file-backed token persistence
use anyhow::Result;
use serde_json::json;
use std::collections::HashMap;

use super::test_harness::TestBackend;
use iris_client::{ApiClient, TokenStoreConfig};

fn read_token_file(path: &std::path::Path) -> Result<HashMap<String, String>> {
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

#[tokio::test]
async fn test_refreshed_tokens_survive_restart() -> Result<()> {
    let mut backend = TestBackend::start().await;
    let dir = tempfile::tempdir()?;
    let token_file = dir.path().join("tokens.json");
    std::fs::write(
        &token_file,
        json!({"accessToken": "old", "refreshToken": "r1"}).to_string(),
    )?;

    let _rejected = backend.resource("/api/reports", "old", 401, "{}", 1).await;
    let accepted = backend
        .resource("/api/reports", "new", 200, r#"{"revenue":100}"#, 2)
        .await;
    let refresh = backend
        .refresh(
            "r1",
            200,
            json!({"access_token": "new", "refresh_token": "r2"}),
            1,
        )
        .await;

    let mut config = backend.config();
    config.token_store = TokenStoreConfig::File {
        path: token_file.clone(),
    };

    let client = ApiClient::from_config(config.clone()).await?;
    client.get("/api/reports").await?;

    let saved = read_token_file(&token_file)?;
    assert_eq!(saved.get("accessToken").map(String::as_str), Some("new"));
    assert_eq!(saved.get("refreshToken").map(String::as_str), Some("r2"));

    // A new process picks up the refreshed pair without refreshing again
    let restarted = ApiClient::from_config(config).await?;
    restarted.get("/api/reports").await?;
    assert_eq!(restarted.refresh_stats().refreshes_started, 0);

    accepted.assert_async().await;
    refresh.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_logout_empties_token_file() -> Result<()> {
    let backend = TestBackend::start().await;
    let dir = tempfile::tempdir()?;
    let token_file = dir.path().join("tokens.json");
    std::fs::write(
        &token_file,
        json!({"accessToken": "a1", "refreshToken": "r1"}).to_string(),
    )?;

    let mut config = backend.config();
    config.token_store = TokenStoreConfig::File {
        path: token_file.clone(),
    };
    let client = ApiClient::from_config(config).await?;
    assert!(client.is_authenticated().await?);

    client.logout().await?;
    assert!(read_token_file(&token_file)?.is_empty());
    Ok(())
}
