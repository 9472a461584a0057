//! `voxreel-worker` -- runs one narrate-then-render job.
//!
//! Usage: `voxreel-worker <job.json>` (or set `JOB_FILE`). Prints the job
//! report as JSON on stdout and exits non-zero on failure.
//!
//! Engines are configured through environment variables, see
//! [`NarrationConfig::from_env`] and [`RenderConfig::from_env`].

use std::path::PathBuf;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voxreel_core::config::{NarrationConfig, RenderConfig};
use voxreel_core::narration::Narrator;
use voxreel_core::rendering::Renderer;
use voxreel_worker::job;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxreel_worker=info,voxreel_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let job_path: PathBuf = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("JOB_FILE").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            tracing::error!("usage: voxreel-worker <job.json> (or set JOB_FILE)");
            std::process::exit(2);
        });

    if let Err(e) = run(job_path).await {
        tracing::error!(error = ?e, "Job failed");
        std::process::exit(1);
    }
}

async fn run(job_path: PathBuf) -> anyhow::Result<()> {
    let narration_config = NarrationConfig::from_env()?;
    let render_config = RenderConfig::from_env()?;

    tracing::info!(
        job = %job_path.display(),
        tts_engine = ?narration_config.engine,
        renderer = %render_config.program,
        quality = ?render_config.quality,
        "Starting voxreel-worker",
    );

    let job = job::load_job(&job_path).await?;
    let narrator = Narrator::from_config(&narration_config);
    let renderer = Renderer::new(render_config);

    let report = job::run_job(&job, &narrator, &renderer).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
