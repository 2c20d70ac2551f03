use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowwatch::config::{FlowwatchConfig, LogFormat, LoggingConfig};
use flowwatch::source::SourceKind;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "flowwatch",
    about = "Streaming sensor anomaly detection with windowed summaries",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML config file (default: $FLOWWATCH_CONFIG, then
    /// /etc/flowwatch/flowwatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline: detector, window aggregator and query API
    Serve {
        /// Feed readings from the built-in synthetic sensor
        #[arg(long, conflicts_with = "input")]
        simulate: bool,

        /// Feed readings from a JSON-lines file ('-' for stdin)
        #[arg(long)]
        input: Option<String>,
    },

    /// Run the detectors over a recorded JSON-lines file and print anomalies
    Replay {
        /// JSON-lines file of sensor readings
        file: PathBuf,

        /// Print one JSON anomaly per line
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // logging settings live in the config, so fallback warnings raised while
    // resolving it go through a bootstrap subscriber
    let bootstrap = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_writer(std::io::stderr)
        .finish();
    let config = tracing::subscriber::with_default(bootstrap, || {
        FlowwatchConfig::load_or_default(cli.config.as_deref())
    })?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { simulate, input } => {
            let source = match (simulate, input) {
                (true, _) => SourceKind::Simulator,
                (false, Some(path)) => SourceKind::Lines(path),
                (false, None) => SourceKind::External,
            };
            tracing::info!(?source, "Starting flowwatch");
            flowwatch::serve(config, source).await?;
        }
        Commands::Replay { file, json } => {
            let handle = std::fs::File::open(&file)
                .with_context(|| format!("failed to open {}", file.display()))?;
            let events = flowwatch::replay(&config.detection, std::io::BufReader::new(handle))?;

            if json {
                for event in &events {
                    println!("{}", event.to_json()?);
                }
            } else if events.is_empty() {
                println!("No anomalies detected.");
            } else {
                println!("{:<25} | {:<8} | {:<12} | Message", "Timestamp", "Type", "Sensor");
                println!("{:-<25}-|-{:-<8}-|-{:-<12}-|-{:-<40}", "", "", "", "");
                for event in &events {
                    println!(
                        "{:<25} | {:<8} | {:<12} | {}",
                        event.timestamp.to_rfc3339(),
                        event.kind.to_string(),
                        event.sensor_id,
                        event.message
                    );
                }
                println!("\n{} anomalies", events.len());
            }
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
