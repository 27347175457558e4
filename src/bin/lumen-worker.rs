use anyhow::{Context as _, Result};
use clap::Parser;
use lumen::comp::{AccumFilm, Context};
use lumen::core::config::EngineConfig;
use lumen::core::logging;
use lumen::dist::{tcp, Agent};
use tracing::info;

/// Worker process: connects to a coordinator and processes ranges
#[derive(Debug, Parser)]
#[command(name = "lumen-worker", version)]
struct Args {
    /// Coordinator address, derived from `dist.bind_address` if omitted
    #[arg(long)]
    address: Option<String>,

    /// Worker name, random if omitted
    #[arg(long)]
    name: Option<String>,

    /// YAML configuration file
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Locator of the film to accumulate into
    #[arg(long, default_value = "$.film")]
    film: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path).context("loading configuration")?,
        None => EngineConfig::default(),
    };
    logging::init(&config.log)?;

    let ctx = Context::from_plugin_config(&config.plugins)?;
    let name = args
        .name
        .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()));

    let address = args
        .address
        .clone()
        .unwrap_or_else(|| config.dist.connect_address());
    let link = tcp::connect(address.as_str(), &config.dist)
        .await
        .with_context(|| format!("connecting to {}", address))?;
    let mut agent = Agent::connect_with(link, name, ctx).await?;

    let film = args.film.clone();
    agent.register_process_fn(move |ctx, start, end| {
        // Stand-in for an integrator: one unit contribution per sample
        let buffer = ctx.resolve_as_mut::<AccumFilm>(&film)?.buffer_mut();
        let pixels = buffer.pixel_count() as u64;
        if pixels == 0 {
            return Ok(());
        }
        for index in start..end {
            buffer.splat((index % pixels) as usize, [1.0, 1.0, 1.0]);
        }
        Ok(())
    });
    agent.on_process_completed(|_| info!("Processing completed, waiting for gather"));

    agent.run().await?;
    info!(id = agent.id(), "Worker finished");
    Ok(())
}
