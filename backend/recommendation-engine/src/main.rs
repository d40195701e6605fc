use anyhow::{bail, Context};
use recommendation_engine::jobs::{evaluate_snapshot_file, load_snapshot, run_training_job};
use recommendation_engine::models::RecommendationRequest;
use recommendation_engine::services::serving::ServingRuntime;
use recommendation_engine::{Config, SignificanceAnalyzer};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load config")?;

    // Initialize tracing
    let json = config.service.log_json;
    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .with(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = args.first().map(String::as_str).unwrap_or("train");

    info!(service = %config.service.service_name, mode = mode, "Starting");

    match mode {
        "train" => {
            run_training_job(&config).await?;
        }
        "recommend" => {
            let Some(subject_id) = args.get(1) else {
                bail!("usage: recommendation-engine recommend <subject_id> [count]");
            };
            let count = match args.get(2) {
                Some(raw) => raw.parse().context("count must be a positive integer")?,
                None => 10,
            };
            let snapshot = load_snapshot(&config.training.model_dir)
                .context("Failed to load model snapshot")?;
            let runtime =
                ServingRuntime::from_config(&config.experiments, &config.serving, snapshot)?;
            let response = runtime
                .service
                .recommend(&RecommendationRequest {
                    subject_id: subject_id.clone(),
                    count,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            runtime.shutdown().await?;
        }
        "evaluate" => {
            let Some(path) = args.get(1) else {
                bail!("usage: recommendation-engine evaluate <snapshot.json>");
            };
            let analyzer = SignificanceAnalyzer::new(config.analysis.alpha)?;
            let evaluation = evaluate_snapshot_file(&PathBuf::from(path), &analyzer)
                .with_context(|| format!("Failed to evaluate {}", path))?;
            println!("{}", serde_json::to_string_pretty(&evaluation)?);
        }
        other => bail!("unknown mode {} (expected train, recommend or evaluate)", other),
    }

    Ok(())
}
