mod routes;

use anyhow::Context;
use clap::Parser;
use loan_core::{
    artifacts::ModelArtifacts,
    config::Config,
    history::{HistoryStore, HistoryWriter, JsonlHistoryStore, MemoryHistoryStore},
    pipeline::PredictionPipeline,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use routes::AppState;
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Loan repayment risk prediction server")]
struct Args {
    /// JSON config file; missing file means defaults
    #[arg(long, default_value = "loan-server.json")]
    config: PathBuf,

    #[arg(long, env = "LOAN_LISTEN")]
    listen: Option<String>,

    /// Directory with label_encoder / scaler / forest artifacts
    #[arg(long, env = "LOAN_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    #[arg(long, env = "LOAN_HISTORY_PATH")]
    history_path: Option<PathBuf>,

    /// Keep history in memory only (lost on restart)
    #[arg(long, default_value_t = false)]
    memory_history: bool,

    #[arg(long)]
    history_queue_cap: Option<usize>,
}

impl Args {
    fn resolve(&self) -> anyhow::Result<Config> {
        let mut cfg = Config::load(&self.config)?;
        if let Some(v) = &self.listen {
            cfg.listen = v.clone();
        }
        if let Some(v) = &self.model_dir {
            cfg.model_dir = v.clone();
        }
        if let Some(v) = &self.history_path {
            cfg.history_path = Some(v.clone());
        }
        if self.memory_history {
            cfg.history_path = None;
        }
        if let Some(v) = self.history_queue_cap {
            cfg.history_queue_cap = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // metrics
    let prom = PrometheusBuilder::new()
        .install_recorder()
        .context("install prometheus recorder")?;

    let cfg = Args::parse().resolve()?;
    tracing::info!(?cfg, "config resolved");

    let artifacts = ModelArtifacts::load_from_dir(&cfg.model_dir)
        .with_context(|| format!("load model artifacts: {}", cfg.model_dir.display()))?;

    let store: Arc<dyn HistoryStore> = match &cfg.history_path {
        Some(p) => Arc::new(JsonlHistoryStore::open(p)?),
        None => Arc::new(MemoryHistoryStore::new()),
    };
    let writer = HistoryWriter::spawn(Arc::clone(&store), cfg.history_queue_cap)?;

    let pipeline = Arc::new(PredictionPipeline::new(artifacts, Some(writer.sink())));
    let state = AppState {
        pipeline,
        history: store,
        prom,
    };
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.listen)
        .await
        .with_context(|| format!("bind {}", cfg.listen))?;
    tracing::info!("loan-server listening on http://{}", cfg.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    // router (and every HistorySink clone) is gone; flush what is queued
    tokio::task::spawn_blocking(move || writer.shutdown())
        .await
        .context("join history writer")?;
    tracing::info!("loan-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(err = %e, "ctrl_c handler failed, shutdown only by kill");
        std::future::pending::<()>().await;
    }
}
