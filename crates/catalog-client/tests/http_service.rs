use std::sync::Arc;
use std::time::Duration;

use catalog_client::{
    HEADER_API_KEY, HEADER_REQUEST_ID, HttpDataService, MutationRoute, MutationRoutes,
    ServiceRoutes,
};
use catalog_config::EngineConfig;
use catalog_engine::{
    CancellationToken, EngineError, FetchRequest, JobEndpoint, JobState, ListSource, ListView,
    MemoryLocation, MutationEndpoint, MutationIntent, MutationReply, RowId, RowKey,
};
use catalog_test_support::fixtures::product_schema;
use httpmock::prelude::*;
use serde_json::{Value, json};

fn config(server: &MockServer) -> EngineConfig {
    EngineConfig {
        base_url: server.base_url(),
        api_key: Some("console-key".into()),
        ..EngineConfig::default()
    }
}

fn routes() -> ServiceRoutes {
    ServiceRoutes::new("api/products")
        .mutations(
            MutationRoutes::new(MutationRoute::patch("api/products"))
                .route_field("removed", MutationRoute::delete("api/products"))
                .route_field("liked", MutationRoute::post("api/likes")),
        )
        .job("api/jobs/drafts")
}

fn request(query: &str) -> FetchRequest {
    let schema = product_schema();
    FetchRequest {
        seq: 1,
        filter: catalog_engine::codec::decode(&schema, query),
        query: query.to_string(),
        page: 1,
        page_size: 25,
    }
}

fn intent(id: &str, field: &str, value: Value) -> MutationIntent {
    MutationIntent {
        target: RowId::new(id),
        field: field.into(),
        next_value: value,
        previous_value: None,
    }
}

#[tokio::test]
async fn list_requests_carry_paging_and_credentials() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/products")
            .query_param("q", "desk lamp")
            .query_param("page", "1")
            .query_param("pageSize", "25")
            .header(HEADER_API_KEY, "console-key")
            .header_exists(HEADER_REQUEST_ID);
        then.status(200).json_body(json!({
            "items": [
                {"id": "p1", "title": "Desk lamp", "liked": true},
                {"id": "p2", "title": "Floor lamp"}
            ],
            "total": 47,
            "page": 1,
            "pageSize": 25,
            "facets": {}
        }));
    });

    let service = HttpDataService::new(&config(&server), routes())?;
    let result = service
        .fetch(&request("q=desk%20lamp&page=1&pageSize=25"), CancellationToken::new())
        .await?;

    mock.assert();
    assert_eq!(result.total, 47);
    assert_eq!(result.page_count(), 2);
    assert_eq!(result.items[0].id(), &RowId::new("p1"));
    assert_eq!(result.items[1].get("title"), Some(&json!("Floor lamp")));
    Ok(())
}

#[tokio::test]
async fn composite_keys_identify_rows() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/api/products");
        then.status(200).json_body(json!({
            "items": [{"sku": "A1", "variant": "red"}],
            "total": 1
        }));
    });

    let service = HttpDataService::new(
        &config(&server),
        routes().row_key(RowKey::composite(["sku", "variant"])),
    )?;
    let result = service.fetch(&request(""), CancellationToken::new()).await?;
    assert_eq!(result.items[0].id().as_str(), "A1:red");
    assert_eq!(result.page, 1);
    assert_eq!(result.page_size, 25);
    Ok(())
}

#[tokio::test]
async fn error_bodies_become_server_errors() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/api/products");
        then.status(422).json_body(json!({"error": "unknown sort key"}));
    });

    let service = HttpDataService::new(&config(&server), routes())?;
    let err = service
        .fetch(&request("sort=bogus"), CancellationToken::new())
        .await
        .expect_err("422 must fail");
    assert_eq!(
        err,
        EngineError::Server {
            status: 422,
            message: "unknown sort key".into()
        }
    );
    assert_eq!(err.user_message().as_deref(), Some("unknown sort key"));
    Ok(())
}

#[tokio::test]
async fn cancelled_fetches_yield_cancellation() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/api/products");
        then.status(200)
            .delay(Duration::from_secs(5))
            .json_body(json!({"items": [], "total": 0}));
    });

    let service = HttpDataService::new(&config(&server), routes())?;
    let token = CancellationToken::new();
    token.cancel();
    let err = service
        .fetch(&request(""), token)
        .await
        .expect_err("cancelled");
    assert!(err.is_cancellation());
    Ok(())
}

#[tokio::test]
async fn unreachable_services_are_network_errors() -> anyhow::Result<()> {
    let config = EngineConfig {
        base_url: "http://127.0.0.1:9".into(),
        request_timeout_ms: 2_000,
        ..EngineConfig::default()
    };
    let service = HttpDataService::new(&config, routes())?;
    let err = service
        .fetch(&request(""), CancellationToken::new())
        .await
        .expect_err("nothing listens there");
    assert!(matches!(err, EngineError::Network { .. }));
    assert!(err.is_retryable());
    Ok(())
}

#[tokio::test]
async fn mutations_follow_their_field_route() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let like = server.mock(|when, then| {
        when.method(POST)
            .path("/api/likes")
            .json_body(json!({"id": "p1", "field": "liked", "value": true}));
        then.status(200).json_body(json!({"liked": true, "likes": 12}));
    });
    let remove = server.mock(|when, then| {
        when.method(DELETE)
            .path("/api/products")
            .json_body(json!({"id": "p2", "field": "removed", "value": true}));
        then.status(204);
    });
    let patch = server.mock(|when, then| {
        when.method(PATCH)
            .path("/api/products")
            .json_body(json!({"id": "p3", "field": "status", "value": "published"}));
        then.status(200).json_body(json!({"ok": true}));
    });

    let service = HttpDataService::new(&config(&server), routes())?;
    let reply = service.mutate(&intent("p1", "liked", json!(true))).await?;
    let MutationReply::Authoritative(fields) = reply else {
        panic!("expected authoritative fields, got {reply:?}");
    };
    assert_eq!(fields.get("likes"), Some(&json!(12)));

    assert_eq!(
        service.mutate(&intent("p2", "removed", json!(true))).await?,
        MutationReply::Acknowledged
    );
    assert_eq!(
        service
            .mutate(&intent("p3", "status", json!("published")))
            .await?,
        MutationReply::Acknowledged
    );

    like.assert();
    remove.assert();
    patch.assert();
    Ok(())
}

#[tokio::test]
async fn read_only_routes_reject_mutations_and_jobs() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let service = HttpDataService::new(&config(&server), ServiceRoutes::new("api/products"))?;
    assert!(matches!(
        service.mutate(&intent("p1", "liked", json!(true))).await,
        Err(EngineError::Validation { .. })
    ));
    assert!(matches!(
        service.status().await,
        Err(EngineError::Validation { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn shutdown_cancels_mutations() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let service = HttpDataService::new(&config(&server), routes())?;
    service.shutdown();
    let err = service
        .mutate(&intent("p1", "liked", json!(true)))
        .await
        .expect_err("shut down");
    assert!(err.is_cancellation());
    Ok(())
}

#[tokio::test]
async fn jobs_post_targets_and_read_status() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let generate = server.mock(|when, then| {
        when.method(POST)
            .path("/api/jobs/drafts/generate")
            .json_body(json!({"ids": ["p1", "p2"]}));
        then.status(202);
    });
    let generate_all = server.mock(|when, then| {
        when.method(POST)
            .path("/api/jobs/drafts/generate")
            .json_body(json!({}));
        then.status(202);
    });
    let status = server.mock(|when, then| {
        when.method(GET).path("/api/jobs/drafts/status");
        then.status(200).json_body(json!({
            "status": "running",
            "message": "12 of 40 generated",
            "missingCount": 28,
            "totalCount": 40
        }));
    });

    let service = HttpDataService::new(&config(&server), routes())?;
    service
        .start(Some(&[RowId::new("p1"), RowId::new("p2")]))
        .await?;
    service.start(None).await?;
    let report = service.status().await?;

    generate.assert();
    generate_all.assert();
    status.assert();
    assert_eq!(report.status, JobState::Running);
    assert_eq!(report.missing_count, Some(28));
    assert_eq!(report.total_count, Some(40));
    Ok(())
}

#[tokio::test]
async fn list_view_mounts_against_the_service() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/products")
            .query_param("q", "lamp")
            .query_param("page", "2");
        then.status(200).json_body(json!({
            "items": [{"id": "p26"}, {"id": "p27"}],
            "total": 27,
            "page": 2,
            "pageSize": 25
        }));
    });

    let service = Arc::new(HttpDataService::new(&config(&server), routes())?);
    let location = MemoryLocation::new("/products", "?q=lamp&page=2");
    let view = ListView::builder("products", product_schema())
        .location(Arc::new(location.clone()))
        .list_source(service.clone())
        .mutations(service.clone())
        .jobs(service)
        .build()?;

    let mut status = view.subscribe();
    tokio::time::timeout(
        Duration::from_secs(10),
        status.wait_for(|status| status.applied_seq == 1),
    )
    .await??;

    mock.assert();
    let state = view.state();
    assert_eq!(state.items.len(), 2);
    assert_eq!(state.page, 2);
    assert_eq!(state.page_count(), 2);
    assert_eq!(location.len(), 1);
    Ok(())
}
