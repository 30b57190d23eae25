use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use assemble::config::{CliOverrides, Config, Credentials};
use assemble::errors::AssembleError;
use assemble::lock::RunLock;
use assemble::logging;
use assemble::pipeline::Orchestrator;
use assemble::report::RunReport;
use assemble::runner::ClaudeStepRunner;
use assemble::ticket::TicketId;
use assemble::tracker::{LinearClient, LogSink, ProgressSink};
use assemble::ui::{PipelineUI, print_error_banner};

#[derive(Parser)]
#[command(name = "assemble")]
#[command(
    version,
    about = "Investigate, plan, implement and review a Linear ticket with Claude"
)]
pub struct Cli {
    /// Ticket identifier, e.g. ENG-123
    pub ticket: Option<String>,

    #[arg(short, long)]
    pub verbose: bool,

    #[arg(long)]
    pub project_dir: Option<PathBuf>,

    /// Cap on implement/review iterations. Overrides assemble.toml.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_iterations: Option<u32>,

    /// Log progress documents instead of posting them to the ticket
    #[arg(long)]
    pub no_post: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let code = match run(cli).await {
        Ok(report) => report.exit_code(),
        Err(e) => {
            print_error_banner(&format!("{:#}", e));
            if let AssembleError::Context(tracker) = &e
                && tracker.is_transient()
            {
                eprintln!("Linear may be temporarily unavailable; try again shortly.");
            }
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<RunReport, AssembleError> {
    let raw_ticket = cli.ticket.clone().unwrap_or_default();
    // Input errors are reported before anything touches the filesystem or network.
    TicketId::parse(&raw_ticket)?;

    let project_dir = match cli.project_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    if let Err(e) = dotenvy::from_path(project_dir.join(".env"))
        && !e.not_found()
    {
        tracing::warn!(error = %e, "ignoring unreadable .env file");
    }

    let overrides = CliOverrides {
        max_iterations: cli.max_iterations,
        no_post: cli.no_post,
        verbose: cli.verbose,
    };
    let config = Config::load(&project_dir, &overrides)
        .map_err(|e| AssembleError::Config(format!("{:#}", e)))?;
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }
    config
        .ensure_directories()
        .map_err(|e| AssembleError::Config(format!("{:#}", e)))?;

    let _lock = RunLock::acquire(&config.lock_file())?;
    let credentials = Credentials::resolve(&config.toml.linear)?;

    let linear = Arc::new(LinearClient::new(
        &credentials,
        &config.toml.linear.api_url,
        config.comment_max_chars,
    ));
    let sink: Arc<dyn ProgressSink> = if config.post_progress {
        linear.clone()
    } else {
        tracing::info!("posting disabled, progress documents will only be logged");
        Arc::new(LogSink)
    };

    let ui = Arc::new(PipelineUI::new(config.max_iterations, config.verbose));
    let runner = Arc::new(ClaudeStepRunner::new(&config).with_ui(ui.clone()));
    let orchestrator = Orchestrator::new(linear, runner, sink, config.pipeline_settings())
        .with_ui(ui.clone());

    match orchestrator.run(&raw_ticket).await {
        Ok(report) => {
            ui.finish(&report);
            Ok(report)
        }
        Err(e) => {
            ui.clear();
            Err(e)
        }
    }
}
