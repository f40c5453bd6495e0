use clap::Parser;
use tape_keeper::cli::{Cli, Commands};
use tape_keeper::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
            eprintln!("Using default configuration");
            toml::from_str(include_str!("../config.toml.example"))?
        }
    };

    // Initialize telemetry
    let _telemetry = tape_keeper::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Capture(args) => {
            tracing::info!("Starting capture process");
            args.execute(&config).await?;
        }
        Commands::Supervise(args) => {
            tracing::info!("Starting supervisor");
            args.execute(&config, &cli.config).await?;
        }
        Commands::Export(args) => {
            args.execute(&config).await?;
        }
        Commands::Status(args) => {
            args.execute(&config)?;
        }
        Commands::Config => {
            println!("Current configuration:");
            println!(
                "  Source: {} (timeout {}ms)",
                config.source.base_url, config.source.request_timeout_ms
            );
            println!(
                "  Capture: {} point={} poll={}ms batch={}",
                config.capture.symbol,
                config.capture.point,
                config.capture.tick_poll_ms,
                config.capture.tick_batch
            );
            println!(
                "  Timeframes: {}",
                config
                    .capture
                    .timeframes
                    .iter()
                    .map(|tf| tf.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            );
            println!(
                "  Depth: {} every {}s",
                if config.capture.depth_enabled { "on" } else { "off" },
                config.capture.depth_interval_secs
            );
            println!("  Data dir: {}", config.storage.data_dir.display());
            println!(
                "  Supervisor: stall={}s poll={}s restarts={}/{}s",
                config.supervisor.stall_secs,
                config.supervisor.poll_secs,
                config.supervisor.max_restarts,
                config.supervisor.restart_window_secs
            );
        }
    }

    Ok(())
}
