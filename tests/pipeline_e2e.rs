// tests/pipeline_e2e.rs
//
// End to end through the action surface: detect -> list -> analyze ->
// review -> materialize, plus miss identification on resolved predictions.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Value};

use forecast_miss_analyzer::collaborators::memory::{
    InMemoryPredictions, InMemoryPrices, InMemoryTargets,
};
use forecast_miss_analyzer::model::{
    Direction, Prediction, PredictionStatus, PredictorContribution, Target,
};
use forecast_miss_analyzer::{ActionRequest, Collaborators, Envelope, NotifierMux, PipelineCore};

struct Fixture {
    core: PipelineCore,
}

impl Fixture {
    async fn call(&self, action: &str, params: Value) -> Envelope {
        self.core
            .dispatch(ActionRequest {
                action: action.into(),
                params,
                context: serde_json::from_value(json!({"orgSlug": "acme", "userId": "rev-1"}))
                    .unwrap(),
            })
            .await
    }

    async fn data(&self, action: &str, params: Value) -> Value {
        let env = self.call(action, params).await;
        assert!(env.success, "{action} failed: {:?}", env.error);
        env.data.unwrap_or(Value::Null)
    }
}

fn prediction(id: &str, direction: Direction, magnitude: f64, outcome: Option<f64>) -> Prediction {
    let now = Utc::now();
    Prediction {
        id: id.into(),
        target_id: "t-nvda".into(),
        universe_id: Some("u-semis".into()),
        direction,
        magnitude,
        confidence: 0.55,
        timeframe: "1d".into(),
        predicted_at: now - Duration::days(40),
        expires_at: now - Duration::days(39),
        status: PredictionStatus::Resolved,
        outcome_value: outcome,
        resolved_at: Some(now - Duration::days(39)),
        resolution_notes: None,
        predictors: vec![PredictorContribution {
            predictor_id: "pr-flow".into(),
            name: "options flow".into(),
            direction: Direction::Down,
            magnitude: Some(4.0),
            confidence: 0.6,
            weight: 0.2,
        }],
        models: vec![],
        signals: vec![],
    }
}

fn fixture() -> Fixture {
    let targets = Arc::new(InMemoryTargets::new(vec![Target {
        id: "t-nvda".into(),
        symbol: "NVDA".into(),
        name: Some("NVIDIA".into()),
        target_type: "equity".into(),
        domain: "equity".into(),
        universe_id: Some("u-semis".into()),
        is_active: true,
    }]));

    // +10% run, then a -10.9% run
    let prices = Arc::new(InMemoryPrices::new());
    let now = Utc::now();
    for (days_ago, v) in [(10, 100.0), (9, 103.0), (8, 110.0), (7, 104.0), (6, 98.0), (5, 99.0)] {
        prices.record("t-nvda", now - Duration::days(days_ago), v);
    }

    let predictions = Arc::new(InMemoryPredictions::new(vec![
        prediction("p-wrong", Direction::Up, 2.0, Some(-3.5)),
        prediction("p-right", Direction::Up, 2.0, Some(2.4)),
    ]));

    let collab = Collaborators {
        targets,
        history: prices.clone(),
        capture: prices,
        predictions,
        ..Collaborators::in_memory()
    };
    Fixture {
        core: PipelineCore::new(collab, Default::default(), NotifierMux::disabled()),
    }
}

#[tokio::test]
async fn detect_analyze_review_materialize() {
    let f = fixture();

    let detected = f.data("detect", json!({"targetId": "t-nvda"})).await;
    let detected = detected.as_array().unwrap();
    assert_eq!(detected.len(), 2);
    assert!(detected.iter().all(|m| m["analysis_status"] == "pending"));
    assert!(detected.iter().all(|m| m["miss_type"] == "missed_entirely"));

    // same windows again: no duplicates
    f.data("detect", json!({"targetId": "t-nvda"})).await;
    let listed = f.call("listMissedOpportunities", json!({"targetId": "t-nvda"})).await;
    assert_eq!(listed.metadata.unwrap().total_count, 2);
    let listed = listed.data.unwrap();
    let scores: Vec<f64> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["significance_score"].as_f64().unwrap())
        .collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]), "{scores:?}");

    let top = listed[0]["id"].as_str().unwrap().to_string();
    let analysis = f
        .data(
            "analyze",
            json!({
                "missedOpportunityId": top,
                "context": {
                    "events": [],
                    "signalsObserved": ["rsi"],
                    "availableSources": ["price_feed", "news"]
                }
            }),
        )
        .await;
    assert_eq!(analysis["sourceGaps"], json!(["earnings_transcript", "sec_filings"]));
    assert_eq!(analysis["toolSuggestions"].as_array().unwrap().len(), 2);
    let queued = analysis["queuedItemIds"].as_array().unwrap().clone();
    assert_eq!(queued.len(), 2);

    let again = f.call("analyze", json!({"missedOpportunityId": top})).await;
    assert_eq!(again.error_code(), Some("ALREADY_ANALYZED"));

    let mo = f.data("getMissedOpportunity", json!({"id": top})).await;
    assert_eq!(mo["analysis_status"], "completed");
    assert_eq!(mo["source_gaps"], analysis["sourceGaps"]);

    let pending = f.data("listLearnings", json!({"suggestedLearningType": "threshold"})).await;
    let item = &pending.as_array().unwrap()[0];
    assert_eq!(item["source_missed_opportunity_id"], top);
    let item_id = item["id"].as_str().unwrap().to_string();

    let not_yet = f.call("materializeLearning", json!({"id": item_id})).await;
    assert_eq!(not_yet.error_code(), Some("NOT_MATERIALIZABLE"));

    let reviewed = f.data("respondLearning", json!({"id": item_id, "decision": "approved"})).await;
    assert_eq!(reviewed["status"], "approved");
    assert_eq!(reviewed["reviewed_by_user_id"], "rev-1");

    let learning = f.data("materializeLearning", json!({"id": item_id})).await;
    assert_eq!(learning["scope_level"], "domain");
    assert_eq!(learning["is_active"], true);

    let stats = f.data("learningStats", Value::Null).await;
    assert_eq!(
        stats,
        json!({"pending": 1, "approved": 1, "rejected": 0, "modified": 0, "materialized": 1})
    );
}

#[tokio::test]
async fn identify_and_investigate_resolved_predictions() {
    let f = fixture();
    let day = (Utc::now() - Duration::days(39)).date_naive().to_string();

    let misses = f.data("identifyMisses", json!({"date": day, "universeId": "u-semis"})).await;
    let misses = misses.as_array().unwrap();
    assert_eq!(misses.len(), 1);
    assert_eq!(misses[0]["prediction"]["id"], "p-wrong");
    assert_eq!(misses[0]["missType"], "direction_wrong");
    assert_eq!(misses[0]["actualDirection"], "down");

    let inv = f.data("investigateMiss", json!({"predictionId": "p-wrong"})).await;
    assert_eq!(inv["investigationLevel"], "predictor");
    assert_eq!(inv["unusedPredictors"][0]["predictorId"], "pr-flow");

    let not_a_miss = f.call("investigateMiss", json!({"predictionId": "p-right"})).await;
    assert!(not_a_miss.success);
    assert_eq!(not_a_miss.data, Some(Value::Null));

    let empty = f.data("identifyMisses", json!({"date": "2001-01-01"})).await;
    assert_eq!(empty, json!([]));
}
