//! Blackbox tests for the invoker endpoint.
//!
//! Azure services, the token endpoint and Application Insights are replaced by a mock server.

use anyhow::Result;
use httpmock::Mock;
use httpmock::prelude::*;
use secrecy::SecretBox;
use triggerbench_server::config::{Azure, Config, ConfigSecret, Telemetry};
use triggerbench_test::server::TestServer;

const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
const OPERATION_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
const PARENT_ID: &str = "00f067aa0ba902b7";

fn secret(value: &str) -> Option<SecretBox<ConfigSecret>> {
    Some(SecretBox::new(Box::new(ConfigSecret::from(value))))
}

fn config(mock: &MockServer) -> Config {
    Config {
        azure: Azure {
            tenant_id: Some("tenant".into()),
            client_id: Some("client".into()),
            client_secret: secret("secret"),
            authority_host: Some(mock.base_url()),
            cosmos_endpoint: Some(mock.url("/cosmos/")),
            cosmos_key: secret("c2VjcmV0"),
            timer_master_key: secret("master"),
            blob_endpoint: mock.url("/blob/{account}"),
            queue_endpoint: mock.url("/queue/{account}"),
            service_bus_endpoint: mock.url("/bus/{namespace}"),
            request_timeout: None,
        },
        telemetry: Telemetry {
            connection_string: secret(&format!(
                "InstrumentationKey=0000-1111;IngestionEndpoint={}",
                mock.base_url()
            )),
            cloud_role: Some("invoker".into()),
            runtime: Some("rust".into()),
        },
        ..Default::default()
    }
}

async fn mock_token(mock: &MockServer) -> Mock<'_> {
    mock.mock_async(|when, then| {
        when.method(POST).path("/tenant/oauth2/v2.0/token");
        then.status(200).json_body(serde_json::json!({
            "token_type": "Bearer",
            "expires_in": 3599,
            "access_token": "token",
        }));
    })
    .await
}

async fn invoke(server: &TestServer, query: &str) -> Result<reqwest::Response> {
    let response = reqwest::Client::new()
        .get(server.url(&format!("/api/invoker?{query}")))
        .header("traceparent", TRACEPARENT)
        .send()
        .await?;
    Ok(response)
}

#[tokio::test]
async fn test_health() -> Result<()> {
    let server = TestServer::new().await;

    let response = reqwest::get(server.url("/health")).await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.headers()["server"]
        .to_str()?
        .starts_with("triggerbench/"));
    assert_eq!(response.text().await?, "OK");

    let response = reqwest::get(server.url("/ready")).await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn test_unsupported_trigger_is_echoed() -> Result<()> {
    triggerbench_test::tracing::init();
    let mock = MockServer::start_async().await;
    let outbound = mock
        .mock_async(|when, then| {
            when.path_contains("/");
            then.status(500);
        })
        .await;
    let server = TestServer::with_config(config(&mock)).await;

    for query in ["trigger=ftp&input=x", "trigger=storage", "trigger=storage&input=a,b,c"] {
        let response = invoke(&server, query).await?;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/plain");

        let echoed: serde_json::Value = serde_json::from_str(&response.text().await?)?;
        assert_eq!(echoed["method"], "GET");
        assert_eq!(echoed["headers"]["traceparent"], TRACEPARENT);
        assert!(echoed["query"]["trigger"].is_string());
    }

    // Nothing is sent anywhere, not even telemetry.
    outbound.assert_hits_async(0).await;
    Ok(())
}

#[tokio::test]
async fn test_large_body_is_echoed() -> Result<()> {
    let server = TestServer::new().await;
    let body = "x".repeat(3 * 1024 * 1024);

    let response = reqwest::Client::new()
        .post(server.url("/api/invoker?trigger=ftp&input=x"))
        .body(body.clone())
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let echoed: serde_json::Value = serde_json::from_str(&response.text().await?)?;
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["query"]["trigger"], "ftp");
    assert_eq!(echoed["rawBody"].as_str().map(str::len), Some(body.len()));
    assert_eq!(echoed["body"], body.as_str());

    Ok(())
}

#[tokio::test]
async fn test_storage_trigger() -> Result<()> {
    let mock = MockServer::start_async().await;
    let token = mock_token(&mock).await;
    let blob = mock
        .mock_async(|when, then| {
            when.method(PUT)
                .path_contains("/blob/accountB/containerA/")
                .header("authorization", "Bearer token")
                .header("x-ms-blob-type", "BlockBlob")
                .header("x-ms-meta-operationid", PARENT_ID)
                .body("Hello world!");
            then.status(201);
        })
        .await;
    let telemetry = mock
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v2.1/track")
                .body_contains("\"name\":\"CompletionTrackStorage\"")
                .body_contains(format!("\"id\":\"{PARENT_ID}\""))
                .body_contains("InvokerEndpoint details");
            then.status(200);
        })
        .await;

    let server = TestServer::with_config(config(&mock)).await;
    let response = invoke(&server, "trigger=storage&input=containerA,accountB").await?;

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.text().await?,
        "AZURE - Storage trigger benchmark successfully started"
    );
    token.assert_hits_async(1).await;
    blob.assert_hits_async(1).await;
    telemetry.assert_hits_async(1).await;

    Ok(())
}

#[tokio::test]
async fn test_queue_trigger() -> Result<()> {
    let mock = MockServer::start_async().await;
    mock_token(&mock).await;
    let queue = mock
        .mock_async(|when, then| {
            when.method(POST).path("/queue/accountB/queueA/messages").body(
                "<QueueMessage><MessageText>NGJmOTJmMzU3N2IzNGRhNmEzY2U5MjlkMGUwZTQ3MzY=</MessageText></QueueMessage>",
            );
            then.status(201);
        })
        .await;

    let server = TestServer::with_config(config(&mock)).await;
    let response = invoke(&server, "trigger=queue&input=queueA,accountB").await?;

    assert_eq!(
        response.text().await?,
        "AZURE - Queue trigger benchmark successfully started"
    );
    queue.assert_hits_async(1).await;

    Ok(())
}

#[tokio::test]
async fn test_database_trigger() -> Result<()> {
    let mock = MockServer::start_async().await;
    let item = mock
        .mock_async(|when, then| {
            when.method(POST)
                .path("/cosmos/dbs/dbA/colls/containerB/docs")
                .header_exists("authorization")
                .header(
                    "x-ms-documentdb-partitionkey",
                    format!("[\"{OPERATION_ID}\"]"),
                )
                .body_contains(format!("\"newOperationId\":\"{OPERATION_ID}\""))
                .body_contains("\"isComplete\":false");
            then.status(201);
        })
        .await;

    let server = TestServer::with_config(config(&mock)).await;
    let response = invoke(&server, "trigger=database&input=dbA,containerB").await?;

    assert_eq!(
        response.text().await?,
        "AZURE - Database trigger benchmark successfully started"
    );
    item.assert_hits_async(1).await;

    Ok(())
}

#[tokio::test]
async fn test_http_trigger_returns_operation_id() -> Result<()> {
    let mock = MockServer::start_async().await;
    let target = mock
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/target")
                .query_param("operationId", OPERATION_ID);
            then.status(200);
        })
        .await;

    let server = TestServer::with_config(config(&mock)).await;
    let target_url = mock.url("/api/target");
    let response = reqwest::Client::new()
        .get(server.url("/api/invoker"))
        .query(&[("trigger", "http"), ("input", target_url.as_str())])
        .header("traceparent", TRACEPARENT)
        .send()
        .await?;

    assert_eq!(response.headers()["operationid"], OPERATION_ID);
    assert_eq!(
        response.text().await?,
        "AZURE - HTTP trigger successfully started"
    );
    target.assert_hits_async(1).await;

    Ok(())
}

#[tokio::test]
async fn test_rejected_call_reports_failure() -> Result<()> {
    let mock = MockServer::start_async().await;
    mock_token(&mock).await;
    mock.mock_async(|when, then| {
        when.method(PUT).path_contains("/blob/");
        then.status(403).body("AuthorizationPermissionMismatch");
    })
    .await;

    let server = TestServer::with_config(config(&mock)).await;
    let response = invoke(&server, "trigger=eventGrid&input=accountB,containerA").await?;

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.text().await?;
    assert!(
        body.starts_with("AZURE - Event Grid trigger failed to start\n\nError: "),
        "{body}"
    );
    assert!(body.contains("403"), "{body}");
    assert!(body.contains("AuthorizationPermissionMismatch"), "{body}");

    Ok(())
}

#[tokio::test]
async fn test_missing_credentials_report_failure() -> Result<()> {
    let server = TestServer::new().await;
    let response = invoke(&server, "trigger=serviceBusTopic&input=ns,topic").await?;

    let body = response.text().await?;
    assert_eq!(
        body,
        "AZURE - Service Bus trigger failed to start\n\nError: authentication failed: \
         credential is not configured: AZURE_TENANT_ID is not set"
    );

    Ok(())
}
