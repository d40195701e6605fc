use chrono::{Duration as ChronoDuration, Utc};
use recommendation_engine::config::{ServingConfig, TrainingJobConfig};
use recommendation_engine::jobs::{load_snapshot, EvaluationJob, TrainingJob};
use recommendation_engine::models::{EventType, RecommendationRequest};
use recommendation_engine::ports::{
    side_channel, spawn_side_channel_worker, FanoutMetricsSink, InMemoryAssignmentStore,
    InMemoryMetricsStore, MetricsSink, MetricsSnapshotSource, PrometheusMetricsSink,
};
use recommendation_engine::services::embeddings::HashingEmbeddingProvider;
use recommendation_engine::services::experiments::AssignmentKeying;
use recommendation_engine::services::serving::STRATEGY_TRENDING;
use recommendation_engine::services::training::TrainerConfig;
use recommendation_engine::{
    ExperimentRegistry, RecommendationService, SignificanceAnalyzer, SnapshotStore,
    VariantAssignor,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const EXPERIMENT: &str = "homepage_recommendations_v1";

async fn train(dir: &Path) -> std::path::PathBuf {
    let interactions = json!([
        {"subject_id": "u1", "item_id": "i1"},
        {"subject_id": "u1", "item_id": "i2"},
        {"subject_id": "u2", "item_id": "i2"},
        {"subject_id": "u2", "item_id": "i3"},
        {"subject_id": "u3", "item_id": "i2"}
    ]);
    let content = json!([
        {"id": "i1", "title": "Rust ownership", "description": "borrowing and lifetimes"},
        {"id": "i2", "title": "Async Rust", "description": "tokio runtime basics"},
        {"id": "i3", "title": "Sourdough", "description": "bread baking at home"},
        {"id": "i4", "title": "Tokio internals", "description": "the async runtime scheduler"}
    ]);
    std::fs::write(dir.join("interactions.json"), interactions.to_string()).unwrap();
    std::fs::write(dir.join("content.json"), content.to_string()).unwrap();

    let config = TrainingJobConfig {
        trainer: TrainerConfig {
            factors: 2,
            iterations: 4,
            ..TrainerConfig::default()
        },
        interactions_path: dir.join("interactions.json"),
        content_path: dir.join("content.json"),
        model_dir: dir.join("models"),
        embedding_batch_size: 2,
    };
    let model_dir = config.model_dir.clone();
    let provider = Arc::new(HashingEmbeddingProvider::new(32).unwrap());
    TrainingJob::new(config, provider).run().await.unwrap();
    model_dir
}

fn serving_config() -> ServingConfig {
    ServingConfig {
        experiment_name: EXPERIMENT.to_string(),
        latency_budget: Duration::from_secs(5),
        ..ServingConfig::default()
    }
}

#[tokio::test]
async fn test_train_serve_track_workflow() {
    let dir = TempDir::new().unwrap();
    let model_dir = train(dir.path()).await;
    let snapshot = load_snapshot(&model_dir).unwrap();
    let model_version = snapshot.version().to_string();

    let metrics = Arc::new(InMemoryMetricsStore::new());
    let assignments = Arc::new(InMemoryAssignmentStore::new(AssignmentKeying::PerExperiment));
    let sinks: Vec<Arc<dyn MetricsSink>> = vec![
        metrics.clone() as Arc<dyn MetricsSink>,
        Arc::new(PrometheusMetricsSink::new()),
    ];
    let (channel, receiver) = side_channel(1024);
    let worker = spawn_side_channel_worker(
        receiver,
        assignments.clone(),
        Arc::new(FanoutMetricsSink::new(sinks)),
    );

    let registry = Arc::new(ExperimentRegistry::builtin());
    let service = RecommendationService::new(
        VariantAssignor::new(registry, "control"),
        Arc::new(SnapshotStore::new(snapshot)),
        metrics.clone(),
        channel,
        serving_config(),
    );

    // Known subject goes through hybrid scoring
    let known = service
        .recommend(&RecommendationRequest {
            subject_id: "u1".to_string(),
            count: 2,
        })
        .await
        .unwrap();
    assert_eq!(known.recommendations.len(), 2);
    assert_eq!(known.model_version, model_version);
    assert!(known.strategy.starts_with("hybrid"));

    // Unknown subject without history gets trending
    let cold = service
        .recommend(&RecommendationRequest {
            subject_id: "newcomer".to_string(),
            count: 2,
        })
        .await
        .unwrap();
    assert_eq!(cold.strategy, STRATEGY_TRENDING);
    assert_eq!(cold.recommendations[0].item_id, "i2");

    assert!(service.track_event("u1", "i4", EventType::Click, None));

    // Closing the channel lets the worker drain and stop
    drop(service);
    worker.await.unwrap();

    let stored = assignments.get("u1", EXPERIMENT).unwrap();
    assert_eq!(stored.variant_id, known.variant_id);
    assert_eq!(assignments.len(), 2);
    assert_eq!(metrics.served_count().await, 2);
    assert_eq!(metrics.latency_count().await, 2);
    assert_eq!(metrics.event_count().await, 1);

    let now = Utc::now();
    let counts = metrics
        .snapshot(EXPERIMENT, now - ChronoDuration::days(1), now + ChronoDuration::minutes(1))
        .await
        .unwrap();
    let impressions: u64 = counts.variants.values().map(|c| c.impressions).sum();
    assert_eq!(impressions, 2);
    assert_eq!(counts.variants[&known.variant_id].clicks, 1);
}

#[tokio::test]
async fn test_experiment_evaluation_workflow() {
    let dir = TempDir::new().unwrap();
    let model_dir = train(dir.path()).await;

    let metrics = Arc::new(InMemoryMetricsStore::new());
    let assignments = Arc::new(InMemoryAssignmentStore::new(AssignmentKeying::PerExperiment));
    let (channel, receiver) = side_channel(4096);
    let worker = spawn_side_channel_worker(receiver, assignments.clone(), metrics.clone());

    let service = RecommendationService::new(
        VariantAssignor::new(Arc::new(ExperimentRegistry::builtin()), "control"),
        Arc::new(SnapshotStore::new(load_snapshot(&model_dir).unwrap())),
        metrics.clone(),
        channel,
        serving_config(),
    );

    // Every treatment subject clicks, no control subject does
    for i in 0..200 {
        let subject_id = format!("visitor_{}", i);
        let response = service
            .recommend(&RecommendationRequest {
                subject_id: subject_id.clone(),
                count: 3,
            })
            .await
            .unwrap();
        if response.variant_id == "treatment" {
            let item = &response.recommendations[0].item_id;
            service.track_event(&subject_id, item, EventType::Click, None);
        }
    }

    drop(service);
    worker.await.unwrap();

    let job = EvaluationJob::new(SignificanceAnalyzer::default(), 7).unwrap();
    let evaluation = job
        .run(metrics.as_ref(), EXPERIMENT, Utc::now() + ChronoDuration::seconds(1))
        .await
        .unwrap();

    let report = evaluation.primary.report().unwrap();
    assert_eq!(report.control_ctr, 0.0);
    assert_eq!(report.treatment_ctr, 1.0);
    assert!(report.lift.is_none());
    assert!(report.significant);
    assert_eq!(assignments.len(), 200);
}

#[tokio::test]
async fn test_publish_replaces_snapshot_for_new_requests() {
    let dir = TempDir::new().unwrap();
    let model_dir = train(dir.path()).await;

    let (channel, _receiver) = side_channel(64);
    let service = RecommendationService::new(
        VariantAssignor::new(Arc::new(ExperimentRegistry::builtin()), "control"),
        Arc::new(SnapshotStore::default()),
        Arc::new(InMemoryMetricsStore::new()),
        channel,
        serving_config(),
    );
    let request = RecommendationRequest {
        subject_id: "newcomer".to_string(),
        count: 2,
    };

    let before = service.recommend(&request).await.unwrap();
    assert!(before.recommendations.is_empty());

    service.publish(load_snapshot(&model_dir).unwrap());

    let after = service.recommend(&request).await.unwrap();
    assert_ne!(after.model_version, before.model_version);
    assert_eq!(after.recommendations.len(), 2);
}
