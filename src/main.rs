use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wotdisc_coap::UdpCoapTransport;
use wotdisc_core::config::{AppConfig, LogFormat, LoggingConfig};
use wotdisc_discovery::{DiscoveryEvent, DiscoveryService, TdFetcher};

/// wotdisc - Web of Things Thing Description discovery over CoAP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "WOTDISC_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover Thing Descriptions and print each as a JSON line
    Discover {
        /// Repeat discovery every N seconds until interrupted
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Fetch a single Thing Description from a coap:// URL
    Fetch {
        /// URL of the Thing Description
        url: String,
    },

    /// Print the effective configuration as YAML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let mut config = AppConfig::from_config_builder(args.config.as_ref())
        .context("Failed to load configuration")?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging);

    match args.command {
        Command::Discover { interval } => discover(&config, interval).await,
        Command::Fetch { url } => fetch(&config, &url).await,
        Command::Config => {
            let yaml = serde_yaml::to_string(&config).context("Failed to serialize configuration")?;
            print!("{}", yaml);
            Ok(())
        }
    }
}

/// Initializes tracing to stderr; `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.with_target(false).init(),
    }
}

async fn discover(config: &AppConfig, interval: Option<u64>) -> Result<()> {
    let transport = UdpCoapTransport::new(config.transport.clone());
    let service =
        DiscoveryService::new(config, transport).context("Failed to create discovery service")?;
    let events = service.event_receiver();

    match interval {
        None => {
            service.discover().await;
            while let Ok(event) = events.try_recv() {
                print_event(event);
            }
        }
        Some(seconds) => {
            let period = Duration::from_secs(seconds.max(1));
            info!(interval_secs = period.as_secs(), "Starting periodic discovery");

            let printer = tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    print_event(event);
                }
            });

            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let run = service.trigger();
                        info!(run_id = %run.id(), "Triggered discovery run");
                    }
                    result = signal::ctrl_c() => {
                        if let Err(e) = result {
                            warn!(error = %e, "Failed to listen for shutdown signal");
                        }
                        info!("Shutting down");
                        break;
                    }
                }
            }
            printer.abort();
        }
    }

    if let Some(store) = service.store() {
        println!("{}", store.to_json());
    }

    let metrics = service.metrics().snapshot();
    info!(
        requests = metrics.requests_sent,
        responses = metrics.responses_received,
        tds = metrics.tds_ingested,
        "Discovery finished"
    );

    Ok(())
}

fn print_event(event: DiscoveryEvent) {
    match event {
        DiscoveryEvent::ThingDescription(message) => println!("{}", message.to_json()),
        DiscoveryEvent::ParseError { origin, error } => {
            error!(source = ?origin.source, error = %error, "Invalid Thing Description");
        }
    }
}

async fn fetch(config: &AppConfig, url: &str) -> Result<()> {
    let transport = UdpCoapTransport::new(config.transport.clone());
    let fetcher = TdFetcher::new(config, transport);

    let td = fetcher
        .fetch(url)
        .await
        .with_context(|| format!("Failed to fetch Thing Description from {}", url))?;

    let json = serde_json::to_string_pretty(td.as_value())?;
    println!("{}", json);
    Ok(())
}
