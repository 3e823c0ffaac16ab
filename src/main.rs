//! envlayers - Cached, rate-limited environmental layer data
//!
//! Main entry point for the envlayers CLI.

use anyhow::Context;
use clap::{Parser, Subcommand};
use envlayers::clock::SystemClock;
use envlayers::config::{validate_config_result, validate_local_config_result, LayersConfig};
use envlayers::gateway::{Envelope, LayerQuery, LayerResponse, LayerService, Stores};
use envlayers::layer::LayerType;
use envlayers::normalizer::Units;
use envlayers::server::LayerServer;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process;

/// envlayers - Weather, air pollution and crime layers behind a durable cache
#[derive(Parser, Debug)]
#[command(name = "envlayers")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/envlayers/config.yaml)
    #[arg(short, long, env = "ENVLAYERS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file
    Init,

    /// Run the HTTP query surface
    Serve {
        /// Address to bind (overrides server.bind)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Fetch one layer for a point and print the envelope as JSON
    Fetch {
        /// Layer type (weather, pollution, crime)
        layer: String,

        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Request the forecast instead of current conditions
        #[arg(long)]
        forecast: bool,

        /// Measurement units (metric, imperial, standard)
        #[arg(short, long)]
        units: Option<String>,
    },

    /// Show cache statistics and per-provider rate-limit usage
    Stats,

    /// Run cleanup sweeps and the cache size check once
    Cleanup,

    /// Remove every cache entry
    ClearCache,
}

impl Commands {
    /// Whether the command can reach an upstream provider and so needs its API keys
    fn calls_upstream(&self) -> bool {
        matches!(self, Commands::Serve { .. } | Commands::Fetch { .. })
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    if let Err(e) = envlayers::logging::init_with_default(default_filter) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.unwrap_or_else(LayersConfig::default_path);

    if let Commands::Init = cli.command {
        return handle_init_command(&config_path);
    }

    let config = LayersConfig::load(&config_path).with_context(|| {
        format!(
            "No usable configuration at {}. Run 'envlayers init' first to create one.",
            config_path.display()
        )
    })?;
    if cli.command.calls_upstream() {
        validate_config_result(&config)?;
    } else {
        validate_local_config_result(&config)?;
    }

    match cli.command {
        Commands::Init => unreachable!("init is handled before configuration is loaded"),

        Commands::Serve { bind } => {
            let service = LayerService::from_config(&config, SystemClock::shared())?;
            let addr = bind.unwrap_or_else(|| config.server.bind.clone());
            LayerServer::new(service)
                .run(&addr, config.server.maintenance_interval())
                .await?;
        }

        Commands::Fetch {
            layer,
            lat,
            lon,
            forecast,
            units,
        } => {
            let service = LayerService::from_config(&config, SystemClock::shared())?;
            let result = fetch_once(&service, &layer, lat, lon, forecast, units.as_deref()).await;
            let envelope = Envelope::from_result(result, service.now());
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            if !envelope.success {
                process::exit(2);
            }
        }

        Commands::Stats => {
            let stores = Stores::open(&config, SystemClock::shared())?;
            let stats = stores.cache.stats()?;

            println!("Cache ({})", config.storage.path.display());
            println!("  entries:  {}", stats.total_entries);
            println!("  expired:  {}", stats.expired_count);
            println!("  size:     {} / {} bytes", stats.total_size, stats.max_size);
            for (service, count) in &stats.per_service_counts {
                println!("  {:<10}{}", format!("{}:", service), count);
            }
            println!();
            println!("Rate limits (this minute / per minute, last 24h)");
            for layer in LayerType::ALL {
                let usage = stores.limiter.usage(layer.as_str());
                println!(
                    "  {:<10}{}/{}  ({} in 24h, resets in {}s)",
                    format!("{}:", layer),
                    usage.calls_this_minute,
                    usage.limit_per_minute,
                    usage.calls_last_24h,
                    usage.resets_in_secs
                );
            }
            println!();
            println!("Layer records: {}", stores.repository.count()?);
        }

        Commands::Cleanup => {
            let stores = Stores::open(&config, SystemClock::shared())?;
            let report = stores.maintain()?;
            println!("Expired cache entries removed: {}", report.expired_cache_entries);
            println!(
                "Size limit enforced:           {}",
                if report.size_limit_triggered { "yes" } else { "no" }
            );
            println!("Expired layer records removed: {}", report.expired_records);
        }

        Commands::ClearCache => {
            let stores = Stores::open(&config, SystemClock::shared())?;
            let removed = stores.cache.clear()?;
            println!("✓ Removed {} cache entries", removed);
        }
    }

    Ok(())
}

async fn fetch_once(
    service: &LayerService,
    layer: &str,
    lat: f64,
    lon: f64,
    forecast: bool,
    units: Option<&str>,
) -> envlayers::Result<LayerResponse> {
    let gateway = service.gateway(layer.parse::<LayerType>()?)?;
    let mut query = LayerQuery::new(lat, lon)?.with_radius(service.default_radius())?;
    if let Some(units) = units {
        query = query.with_units(units.parse::<Units>()?);
    }
    if forecast {
        gateway.get_forecast(&query).await
    } else {
        gateway.get_current(&query).await
    }
}

fn handle_init_command(config_file: &Path) -> anyhow::Result<()> {
    if config_file.exists() {
        println!("Configuration already exists at {}", config_file.display());
        return Ok(());
    }

    let config = LayersConfig::new();
    config
        .save(config_file)
        .with_context(|| format!("Failed to write {}", config_file.display()))?;

    println!("✓ Created configuration at {}", config_file.display());
    println!();
    println!("Next steps:");
    println!("  1. Set API keys for the keyed providers:");
    let vars: BTreeSet<&str> = config
        .providers
        .iter()
        .filter_map(|(_, provider)| provider.api_key_env_var())
        .collect();
    for var in vars {
        println!("     export {}=...", var);
    }
    println!();
    println!("  2. Try a lookup:");
    println!("     envlayers fetch weather --lat 44.43 --lon 26.10");
    println!();
    println!("  3. Start the server:");
    println!("     envlayers serve");

    Ok(())
}
