use std::sync::Arc;
use std::time::Duration;

use catalog_engine::codec;
use catalog_engine::{
    DebouncedValue, EngineError, FieldValue, JobPoller, JobState, JobStatus, Mutation,
    MutationOutcome, MutationReply, OptimisticActionManager, PaginatedFetchController,
    PollSettings, RowId, RowList, ViewContext,
};
use catalog_telemetry::Metrics;
use catalog_test_support::fixtures::{PAGE_SIZE, page_of, product_row, product_schema};
use catalog_test_support::{GatedListSource, ScriptedJobEndpoint, ScriptedMutationEndpoint};
use serde_json::{Map, Value, json};

#[test]
fn encoded_state_decodes_to_itself() -> anyhow::Result<()> {
    let schema = product_schema();
    let state = schema
        .defaults()
        .with_field(&schema, "q", FieldValue::from("desk lamp & shade"))?
        .with_field(&schema, "sort", FieldValue::from("price_desc"))?
        .with_field(
            &schema,
            "categories",
            FieldValue::List(vec!["home,garden".into(), "lighting".into()]),
        )?
        .with_field(&schema, "liked", FieldValue::Boolean(true))?
        .with_field(&schema, "page", FieldValue::Integer(4))?;

    let query = codec::encode(&schema, &state);
    assert_eq!(codec::decode(&schema, &query), state);
    assert_eq!(codec::decode(&schema, &format!("?{query}")), state);
    Ok(())
}

#[test]
fn defaults_encode_to_an_empty_query() {
    let schema = product_schema();
    assert_eq!(codec::encode(&schema, &schema.defaults()), "");
    assert_eq!(codec::decode(&schema, ""), schema.defaults());
}

#[tokio::test(start_paused = true)]
async fn late_answers_never_overwrite_newer_ones() -> anyhow::Result<()> {
    let schema = Arc::new(product_schema());
    let source = GatedListSource::new();
    let rows = RowList::new();
    let metrics = Metrics::new()?;
    let controller = PaginatedFetchController::new(
        Arc::clone(&schema),
        source.clone(),
        rows.clone(),
        ViewContext::new("products").with_metrics(metrics.clone()),
    );

    let first = schema.defaults().with_field(&schema, "q", FieldValue::from("a"))?;
    let second = schema.defaults().with_field(&schema, "q", FieldValue::from("b"))?;
    let a = controller.set_filter(first).expect("new filter issues");
    source.wait_for_requests(1).await;
    let b = controller.set_filter(second.clone()).expect("new filter issues");
    assert!(b > a);
    assert_eq!(controller.set_filter(second), None, "same filter is not re-issued");
    source.wait_for_requests(2).await;

    assert!(source.resolve(b, Ok(page_of(&["b1"], 1, 1, PAGE_SIZE))));
    controller.subscribe().wait_for(|status| status.applied_seq == b).await?;
    source.resolve(a, Ok(page_of(&["a1", "a2"], 2, 1, PAGE_SIZE)));
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    let status = controller.status();
    assert_eq!(status.applied_seq, b);
    assert_eq!(status.total, 1);
    assert_eq!(rows.visible_ids(), vec![RowId::new("b1")]);
    assert_eq!(metrics.snapshot().fetches_issued_total, 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_fetch_keeps_the_page_and_reports() -> anyhow::Result<()> {
    let schema = Arc::new(product_schema());
    let source = GatedListSource::new();
    let rows = RowList::new();
    let controller = PaginatedFetchController::new(
        Arc::clone(&schema),
        source.clone(),
        rows.clone(),
        ViewContext::new("products"),
    );
    let seq = controller.set_filter(schema.defaults()).expect("issues");
    source.wait_for_requests(1).await;
    assert!(source.resolve(seq, Ok(page_of(&["p1", "p2"], 2, 1, PAGE_SIZE))));
    controller.subscribe().wait_for(|status| status.applied_seq == seq).await?;

    let retry = controller.refresh().expect("refresh issues");
    source.wait_for_requests(2).await;
    let failure = EngineError::Server {
        status: 502,
        message: "upstream unavailable".into(),
    };
    assert!(source.resolve(retry, Err(failure.clone())));
    controller
        .subscribe()
        .wait_for(|status| status.error.is_some())
        .await?;

    let state = controller.view_state();
    assert_eq!(state.error, Some(failure));
    assert_eq!(state.items.len(), 2);
    assert!(!state.is_loading);
    Ok(())
}

fn manager(endpoint: Arc<ScriptedMutationEndpoint>) -> (OptimisticActionManager, RowList) {
    let rows = RowList::new();
    rows.replace(vec![product_row("p1"), product_row("p2")]);
    let manager = OptimisticActionManager::new(rows.clone(), endpoint, ViewContext::new("products"));
    (manager, rows)
}

#[tokio::test]
async fn failed_like_restores_the_exact_prior_row() -> anyhow::Result<()> {
    let endpoint = ScriptedMutationEndpoint::failing(EngineError::Server {
        status: 503,
        message: "try again later".into(),
    });
    let (manager, rows) = manager(endpoint.clone());
    let id = RowId::new("p1");
    let before = rows.get(&id).expect("loaded");
    rows.set_aggregate("liked", 7);

    let handle = manager.apply(
        Mutation::set(id.clone(), "liked", Value::Bool(true)).with_aggregate("liked", 1),
    )?;
    assert_eq!(rows.field(&id, "liked"), Some(Some(Value::Bool(true))));
    assert_eq!(rows.aggregate("liked"), 8);

    let outcome = handle.outcome().await?;
    assert!(matches!(outcome, MutationOutcome::RolledBack(EngineError::Server { status: 503, .. })));
    assert_eq!(rows.get(&id), Some(before));
    assert_eq!(rows.aggregate("liked"), 7);
    assert_eq!(manager.pending_count(), 0);
    assert_eq!(endpoint.calls().len(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_change_to_an_absent_field_removes_it_again() -> anyhow::Result<()> {
    let endpoint = ScriptedMutationEndpoint::failing(EngineError::network("mutate", "reset"));
    let (manager, rows) = manager(endpoint);
    let id = RowId::new("p2");
    let handle = manager.apply(Mutation::set(id.clone(), "badge", json!("new")))?;
    assert_eq!(rows.field(&id, "badge"), Some(Some(json!("new"))));

    handle.outcome().await?;
    assert_eq!(rows.field(&id, "badge"), Some(None));
    Ok(())
}

#[tokio::test]
async fn removal_hides_the_row_until_confirmed() -> anyhow::Result<()> {
    let endpoint = ScriptedMutationEndpoint::acknowledging();
    let (manager, rows) = manager(endpoint.clone());
    let handle = manager.remove(&RowId::new("p1"))?;
    assert_eq!(rows.visible_ids(), vec![RowId::new("p2")]);
    assert_eq!(handle.outcome().await?, MutationOutcome::Confirmed);
    assert_eq!(rows.visible_ids(), vec![RowId::new("p2")]);
    assert_eq!(endpoint.calls()[0].field, "removed");
    Ok(())
}

#[tokio::test]
async fn authoritative_reply_is_written_to_the_row() -> anyhow::Result<()> {
    let endpoint = ScriptedMutationEndpoint::acknowledging();
    let mut fields = Map::new();
    fields.insert("liked".into(), Value::Bool(true));
    fields.insert("title".into(), json!("Product p1 (liked)"));
    endpoint.push_reply(Ok(MutationReply::Authoritative(fields.clone())));
    let (manager, rows) = manager(endpoint);
    let id = RowId::new("p1");

    let outcome = manager.toggle_like(&id)?.outcome().await?;
    assert_eq!(outcome, MutationOutcome::Reconciled(fields));
    assert_eq!(rows.field(&id, "title"), Some(Some(json!("Product p1 (liked)"))));
    assert!(manager.toggle_like(&RowId::new("missing")).is_err());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn keystroke_bursts_publish_once() -> anyhow::Result<()> {
    let value = DebouncedValue::new(String::new(), Duration::from_millis(300));
    let mut published = value.subscribe();
    for text in ["s", "so", "sof", "sofa"] {
        value.set(text.to_string());
        tokio::time::advance(Duration::from_millis(120)).await;
    }
    assert_eq!(value.get(), "");
    published.changed().await?;
    assert_eq!(*published.borrow_and_update(), "sofa");

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!published.has_changed()?);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn polling_stops_at_the_attempt_ceiling() -> anyhow::Result<()> {
    let endpoint = ScriptedJobEndpoint::new(JobState::Running);
    let metrics = Metrics::new()?;
    let poller = JobPoller::new(
        endpoint.clone(),
        PollSettings {
            interval: Duration::from_secs(1),
            max_attempts: 4,
        },
        ViewContext::new("drafts").with_metrics(metrics.clone()),
    );
    assert!(poller.start(None));
    poller.subscribe().wait_for(JobStatus::is_terminal).await?;

    let status = poller.status();
    assert_eq!(status.state, JobState::Error);
    assert_eq!(status.attempts, 4);
    assert_eq!(status.error, Some(EngineError::Timeout { attempts: 4 }));
    assert_eq!(endpoint.polls(), 4);
    assert_eq!(metrics.job_finished_count("timeout"), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(endpoint.polls(), 4);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_start_ends_in_error_without_polling() -> anyhow::Result<()> {
    let endpoint = ScriptedJobEndpoint::new(JobState::Done);
    endpoint.fail_next_start(EngineError::Server {
        status: 409,
        message: "generation already queued".into(),
    });
    let poller = JobPoller::new(endpoint.clone(), PollSettings::default(), ViewContext::new("drafts"));
    assert!(poller.start(Some(vec![RowId::new("p1")])));
    poller.subscribe().wait_for(JobStatus::is_terminal).await?;

    let status = poller.status();
    assert_eq!(status.state, JobState::Error);
    assert_eq!(status.message.as_deref(), Some("generation already queued"));
    assert!(matches!(status.error, Some(EngineError::Server { status: 409, .. })));
    assert_eq!(endpoint.polls(), 0);
    assert_eq!(endpoint.starts(), vec![Some(vec![RowId::new("p1")])]);
    Ok(())
}
