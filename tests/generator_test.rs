mod common;

use common::{Op, ScriptedGateway, people};
use datasheet::chart::{ChartCatalog, ChartKind, ChartRequest};
use datasheet::error::ChartError;
use datasheet::generator::{ChartSlot, ChartState};
use datasheet::normalize::ChartModel;
use datasheet::session::Session;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

fn slot() -> (Arc<ScriptedGateway>, Arc<ChartSlot>) {
    let gateway = ScriptedGateway::new(people());
    let slot = Arc::new(ChartSlot::new(gateway.clone()));
    (gateway, slot)
}

fn bar() -> ChartRequest {
    ChartRequest::new(ChartKind::Bar).x("name").y("age")
}

#[tokio::test]
async fn generation_moves_from_idle_to_ready() {
    let (gateway, slot) = slot();
    gateway.set_chart_data(json!({"x": ["ann", "bob"], "y": {"age": [31, 45]}}));
    assert_eq!(slot.state(), ChartState::Idle);

    let model = slot.generate(Some(&Session::new("s1")), &bar()).await.unwrap();

    assert_eq!(slot.state(), ChartState::Ready(model.clone()));
    assert_eq!(slot.model(), Some(model));
    assert!(!slot.is_pending());
}

#[tokio::test]
async fn gateway_failure_lands_in_failed() {
    let (gateway, slot) = slot();
    gateway.fail_next(Op::ChartData);

    let err = slot.generate(Some(&Session::new("s1")), &bar()).await.unwrap_err();

    assert!(matches!(err, ChartError::Gateway(_)));
    match slot.state() {
        ChartState::Failed(message) => assert!(message.contains("500")),
        other => panic!("expected Failed, got {:?}", other),
    }
    assert_eq!(slot.model(), None);

    slot.reset();
    assert_eq!(slot.state(), ChartState::Idle);
}

#[tokio::test]
async fn preconditions_are_checked_before_any_request() {
    let (gateway, slot) = slot();
    let session = Session::new("s1");

    let cases = [
        ChartRequest::default(),
        ChartRequest::new(ChartKind::Bar).y("age"),
        ChartRequest::new(ChartKind::Pie).x("city").y("age").y("name"),
        ChartRequest::new(ChartKind::Histogram),
        ChartRequest::new(ChartKind::Heatmap).y("age"),
        ChartRequest::new(ChartKind::Histogram).y("age").bins(0),
    ];
    for request in &cases {
        let err = slot.generate(Some(&session), request).await.unwrap_err();
        assert!(matches!(err, ChartError::Precondition(_)), "{:?}", request);
    }

    assert!(matches!(slot.generate(None, &bar()).await, Err(ChartError::NoSession)));
    assert_eq!(gateway.count(Op::ChartData), 0);
    assert_eq!(slot.state(), ChartState::Idle);
}

#[tokio::test]
async fn a_second_generation_waits_for_the_first() {
    let (gateway, slot) = slot();
    gateway.set_chart_data(json!({"labels": ["oslo", "rome"], "values": [2, 1]}));
    let gate = gateway.hold(Op::ChartData);
    let request = ChartRequest::new(ChartKind::Pie).x("city").y("age");

    let running = {
        let slot = slot.clone();
        let request = request.clone();
        tokio::spawn(async move { slot.generate(Some(&Session::new("s1")), &request).await })
    };
    gate.reached.await.unwrap();
    assert!(slot.is_pending());

    let busy = slot.generate(Some(&Session::new("s1")), &request).await;
    assert!(matches!(busy, Err(ChartError::Busy)));

    slot.reset();
    assert!(slot.is_pending());

    gate.release.send(()).unwrap();
    let model = running.await.unwrap().unwrap();
    assert_eq!(model.kind(), ChartKind::Pie);
    assert_eq!(gateway.count(Op::ChartData), 1);
}

#[tokio::test]
async fn unusable_payload_is_ready_but_empty() {
    let (gateway, slot) = slot();
    gateway.set_chart_data(json!({"unexpected": true}));

    let model = slot
        .generate(Some(&Session::new("s1")), &ChartRequest::new(ChartKind::Scatter).x("age").y("age"))
        .await
        .unwrap();

    assert!(model.is_empty());
    assert!(matches!(slot.state(), ChartState::Ready(ChartModel::Series(_))));
}

#[tokio::test]
async fn catalog_supports_doughnut_through_pie() {
    let (gateway, slot) = slot();
    gateway.set_catalog(ChartCatalog {
        available_charts: vec!["bar".into(), "pie".into()],
        numeric_columns: vec!["age".into()],
        categorical_columns: vec!["name".into(), "city".into()],
    });

    let catalog = slot.available(Some(&Session::new("s1"))).await.unwrap();

    assert_eq!(catalog.kinds(), vec![ChartKind::Bar, ChartKind::Pie, ChartKind::Doughnut]);
    assert!(!catalog.supports(ChartKind::Heatmap));
    assert!(matches!(slot.available(None).await, Err(ChartError::NoSession)));
}
