//! Walks through admission, cancellation and recovery with an in-memory
//! store.
//!
//! Run with: `RUST_LOG=jobgate=debug cargo run --example slow_jobs`
//!
//! Set `JOBGATE_CONFIG` to a JSON config file to use your own job types.

use std::sync::Arc;
use std::time::Duration;

use jobgate::config::ServiceConfig;
use jobgate::job::JobStatus;
use jobgate::registry::JobTypeConfig;
use jobgate::runtime::{EngineBuilder, SimulatedWork};
use jobgate::store::JobQuery;
use jobgate_testkit::{in_progress_job, InMemoryJobStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init()?;
    Ok(())
}

fn load_config() -> anyhow::Result<ServiceConfig> {
    if std::env::var_os(jobgate::config::CONFIG_PATH_ENV).is_some() {
        return Ok(ServiceConfig::load()?);
    }
    Ok(ServiceConfig::default()
        .with_job_type(JobTypeConfig::new("slow", 1, Duration::from_millis(500)))
        .with_job_type(JobTypeConfig::new("email", 3, Duration::from_millis(200))))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let config = load_config()?;

    // A job left running by an instance that no longer exists.
    let store = Arc::new(InMemoryJobStore::new());
    let orphan = store.seed(in_progress_job("slow", "crashed-instance"));

    let engine = EngineBuilder::from_service_config(&config)?
        .with_store(Arc::clone(&store))
        .with_handler(Arc::new(SimulatedWork))
        .build()?;

    let report = engine.recover().await?;
    println!(
        "recovered {} orphaned job(s); {} pending left alone",
        report.recovered.len(),
        report.pending_untouched
    );
    println!("orphan is now {}", engine.get(orphan).await?.status);

    let first = engine.create("slow", Some("first".into())).await?;
    let second = engine.create("slow", Some("second".into())).await?;
    let third = engine.create("slow", Some("third".into())).await?;

    tokio::time::sleep(Duration::from_millis(50)).await;
    for job in [&first, &second, &third] {
        println!("{} -> {}", job.id, engine.get(job.id).await?.status);
    }
    println!(
        "slots: {}",
        serde_json::to_string(&engine.concurrency())?
    );

    let outcome = engine.cancel(third.id).await?;
    println!("cancel third: {outcome:?}");

    loop {
        let active = engine
            .list(&JobQuery::new().with_job_type("slow"))
            .await?
            .jobs
            .iter()
            .filter(|job| job.status.is_active())
            .count();
        if active == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let summary = engine.summary().await?;
    println!("summary: {}", serde_json::to_string_pretty(&summary)?);
    assert_eq!(summary.count(JobStatus::Completed), 2);

    engine.shutdown().await?;
    Ok(())
}
