use std::{io, path::PathBuf, sync::Arc};

use clap::Parser;
use coordinator::{
    RegistrationListener, SkipEvaluation, TcpDial, TrainPlan, TrainingController, WorkerRegistry,
    checkpoint,
    configs::{Adapter, ConfigFile},
};
use log::{info, warn};

/// Coordinates federated training rounds over the workers that register.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Port to accept worker registrations on.
    #[arg(long)]
    port: u16,

    /// Interface to accept worker registrations on.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// JSON file with the `training` and `schedule` sections.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Initial global parameters, as safetensors.
    #[arg(long)]
    model: PathBuf,

    /// Serialized train plan sent to every worker.
    #[arg(long)]
    plan: Option<PathBuf>,

    /// Where to persist the global model after every applied round.
    #[arg(long)]
    checkpoint: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let file = match &args.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };
    let (training, schedule) = Adapter::new().adapt_config(file)?;

    let model = checkpoint::load(&args.model)?;
    info!("loaded {} parameter tensor(s) from {}", model.len(), args.model.display());

    let body = match &args.plan {
        Some(path) => tokio::fs::read(path).await?,
        None => Vec::new(),
    };
    let plan = TrainPlan::new(training.plan_id.clone(), body);

    let registry = WorkerRegistry::new(schedule.clone(), Arc::new(TcpDial));
    let listener = RegistrationListener::bind(&args.host, args.port, registry.clone()).await?;
    let listening = tokio::spawn(listener.run());

    let mut controller =
        TrainingController::new(model, plan, training, schedule, registry.clone(), SkipEvaluation);
    if let Some(path) = args.checkpoint {
        controller = controller.with_checkpoint(path);
    }

    let interrupted = tokio::select! {
        _ = controller.run() => false,
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        warn!("interrupted before the last round finished");
    } else {
        controller
            .serve_until(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("failed to wait for ctrl-c: {e}");
                }
            })
            .await;
    }

    for session in registry.snapshot() {
        session.disconnect().await;
    }
    listening.abort();

    Ok(())
}
