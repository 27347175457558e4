use anyhow::{bail, Context as _, Result};
use clap::Parser;
use lumen::comp::{AccumFilm, Context, Group, Ptr};
use lumen::core::config::EngineConfig;
use lumen::core::logging;
use lumen::dist::{tcp, Coordinator};
use lumen::sched::{LogReporter, Progress, Scheduler, Workload};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Coordinator process: distributes a pixel x sample workload to workers
#[derive(Debug, Parser)]
#[command(name = "lumen-master", version)]
struct Args {
    /// YAML configuration file
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Number of workers to wait for
    #[arg(long, default_value_t = 1)]
    workers: usize,

    #[arg(long, default_value_t = 64)]
    width: u32,

    #[arg(long, default_value_t = 64)]
    height: u32,

    #[arg(long, default_value_t = 16)]
    samples: u64,

    /// Write the gathered tree to this checkpoint
    #[arg(long)]
    checkpoint: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path).context("loading configuration")?,
        None => EngineConfig::default(),
    };
    logging::init(&config.log)?;

    let mut ctx = Context::from_plugin_config(&config.plugins)?;
    let mut scene = Group::new();
    scene.insert("film", Ptr::from_box("film::accum", Box::new(AccumFilm::new(args.width, args.height))));
    ctx.register_root(Ptr::from_box("group", Box::new(scene)));

    let coordinator = Arc::new(Coordinator::new(config.dist.clone()));
    let listener = tcp::bind(&config.dist.bind_address).await?;
    tokio::spawn(tcp::serve(listener, coordinator.clone()));

    let deadline = tokio::time::Instant::now() + config.dist.worker_wait_timeout();
    while coordinator.live_count() < args.workers {
        if tokio::time::Instant::now() >= deadline {
            bail!("only {} of {} workers connected", coordinator.live_count(), args.workers);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    coordinator.allow_connections(false);
    coordinator.print_worker_info();

    coordinator.sync(&ctx).await?;
    let progress = Arc::new(Progress::with_reporter(Arc::new(LogReporter::new(
        config.scheduler.progress_interval(),
    ))));
    let pixels = args.width as u64 * args.height as u64;
    let scheduler = Scheduler::new(
        Workload::PixelSamples { pixels, samples: args.samples },
        coordinator.live_count(),
    )
    .with_progress(progress);
    let processed = scheduler.run_with(coordinator.as_ref()).await?;

    coordinator.notify_process_completed().await;
    let merged = coordinator.gather(&mut ctx, "$.film").await?;
    coordinator.print_worker_info();
    info!(processed = processed, merged = merged, "Render finished");

    if let Some(path) = &args.checkpoint {
        ctx.save_checkpoint(path)?;
    }
    coordinator.shutdown().await;
    Ok(())
}
