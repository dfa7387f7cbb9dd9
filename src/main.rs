use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use slow_planet::config::Config;
use slow_planet::pipeline::{self, ItemSource};
use slow_planet::planet::PlanetClient;
use slow_planet::stages::search::{self, SearchPlan};
use slow_planet::task::{task_queue, Message};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Search the Planet catalog, activate the matching assets and download them once ready.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full search, activation and download pipeline
    Run {
        #[command(flatten)]
        config: ConfigArgs,
        /// Download the items of an earlier `search` run instead of searching again
        #[arg(long)]
        plan: Option<PathBuf>,
    },
    /// Only search, writing the items found to a JSON file
    Search {
        #[command(flatten)]
        config: ConfigArgs,
        #[arg(short, long, default_value = "search_plan.json")]
        output: PathBuf,
    },
    /// Write an example configuration file
    Init {
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
    #[arg(long, env = "PL_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogFormat {
    Pretty,
    Json,
}

impl ConfigArgs {
    fn load(self) -> Result<Config> {
        let config = Config::read(&self.config)
            .with_context(|| format!("Loading {}", self.config.display()))?;
        Ok(config.with_api_key(self.api_key))
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match execute(cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command completed without leaving anything behind.
async fn execute(command: Command) -> Result<bool> {
    match command {
        Command::Run { config, plan } => {
            let config = Arc::new(config.load()?);
            let source = match plan {
                Some(path) => ItemSource::Plan(SearchPlan::read(&path)?),
                None => ItemSource::Search,
            };
            let api = Arc::new(PlanetClient::from_config(&config)?);
            let report = pipeline::run_from(api, Arc::clone(&config), source).await?;
            tracing::info!(
                items = report.items_found,
                activations = report.activation_requests,
                downloaded = report.downloaded,
                bytes = report.bytes,
                skipped = report.skipped_existing,
                dropped = report.dropped,
                dead_letters = report.dead_letters.len(),
                "Run finished"
            );
            report.finish(config.dead_letter.as_deref())
        }
        Command::Search { config, output } => {
            let config = config.load()?;
            let api = PlanetClient::from_config(&config)?;
            let (items, mut items_rx) = task_queue("items");
            search::run(&api, &config, &items).await?;

            let found = items_rx
                .drain()
                .into_iter()
                .filter_map(|message| match message {
                    Message::Task(item) => Some(item),
                    Message::Done => None,
                })
                .collect::<Vec<_>>();
            tracing::info!(items = found.len(), output = %output.display(), "Writing search plan");
            SearchPlan::new(found).write(&output)?;
            Ok(true)
        }
        Command::Init { output } => {
            Config::template()?.write(&output)?;
            tracing::info!(output = %output.display(), "Configuration template written");
            Ok(true)
        }
    }
}
