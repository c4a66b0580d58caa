use clap::{Args, Parser};
use config::{CommonConfig, Config};
use metrics_exporter_statsd::StatsdBuilder;
use parentconfig::types::ServerRef;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;

const METRICS_PREFIX: &str = "trafficcfg";

#[derive(Parser)]
enum CliCommand {
    /// Serve parent.config over HTTP
    ParentConfig(ConfigArgs),
    /// Print the parent.config of one server and exit
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[arg(long)]
    config_file_path: PathBuf,
    /// Server id or host name
    #[arg(long)]
    server: String,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("config has no parent_config section")]
    MissingParentConfig,
    #[error(transparent)]
    ParentConfig(#[from] parentconfig::ParentConfigError),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
}

fn main() {
    let cli = CliCommand::parse();
    let config_file_path = match &cli {
        CliCommand::ParentConfig(args) => &args.config_file_path,
        CliCommand::Generate(args) => &args.config_file_path,
    };

    let config = match Config::from_file(config_file_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    let _sentry = init_logging(&config.common);

    if let Err(e) = run(cli, config) {
        tracing::error!(error = %e, "exiting");
        process::exit(1);
    }
}

fn run(cli: CliCommand, config: Config) -> Result<(), CliError> {
    init_metrics(&config.common)?;
    let parent_config = config.parent_config.ok_or(CliError::MissingParentConfig)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(parentconfig::ParentConfigError::from)?;

    match cli {
        CliCommand::ParentConfig(_) => {
            tracing::info!("starting parent config service");
            rt.block_on(parentconfig::run(parent_config))?;
        }
        CliCommand::Generate(args) => {
            let Ok(server) = args.server.parse::<ServerRef>();
            let generated_at = parentconfig::renderer::timestamp_now();
            let text = rt.block_on(parentconfig::generate_once(
                &parent_config,
                &server,
                &generated_at,
            ))?;
            print!("{text}");
        }
    }
    Ok(())
}

/// Installs the tracing subscriber, with a Sentry layer when a DSN is configured. The returned
/// guard flushes Sentry on drop.
fn init_logging(common: &CommonConfig) -> Option<sentry::ClientInitGuard> {
    let guard = common.logging.as_ref().map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    guard
}

fn init_metrics(common: &CommonConfig) -> Result<(), CliError> {
    let Some(metrics_config) = &common.metrics else {
        return Ok(());
    };

    let recorder = StatsdBuilder::from(metrics_config.statsd_host.as_str(), metrics_config.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    tracing::info!(
        host = %metrics_config.statsd_host,
        port = metrics_config.statsd_port,
        "statsd metrics enabled"
    );
    Ok(())
}
