use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ci_lite::config::{
    parse_host_port, DispatcherConfig, ObserverConfig, RunnerConfig, DEFAULT_DISPATCHER_ADDR,
    DEFAULT_DISPATCHER_PORT,
};
use ci_lite::dispatcher::Dispatcher;
use ci_lite::observer::RepoObserver;
use ci_lite::shutdown::install_shutdown_handler;
use ci_lite::worker::{RunnerNode, ShellTestExecutor};

#[derive(Parser, Debug)]
#[command(name = "ci-lite")]
#[command(version)]
#[command(about = "A miniature CI system: dispatcher, test runners and repository observer")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the dispatcher
    Dispatcher(DispatcherArgs),

    /// Start a test runner and register it with the dispatcher
    Runner(RunnerArgs),

    /// Watch a repository and dispatch every new commit
    Observer(ObserverArgs),
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct DispatcherArgs {
    /// Dispatcher's host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Dispatcher's port
    #[arg(long, default_value_t = DEFAULT_DISPATCHER_PORT)]
    port: u16,

    /// Directory receiving one result file per commit
    #[arg(long, default_value = "test_results")]
    results_dir: PathBuf,

    /// Port for the status dashboard (optional)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Append logs to this file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct RunnerArgs {
    /// Runner's host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Runner's port; by default the first free port from 8900 upward
    #[arg(long)]
    port: Option<u16>,

    /// Dispatcher address (host:port)
    #[arg(long, default_value = DEFAULT_DISPATCHER_ADDR)]
    dispatcher_server: String,

    /// Shell command that runs the test suite inside the repository
    #[arg(long)]
    test_command: Option<String>,

    /// Append logs to this file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Path to the repository the tests run against
    repo: PathBuf,
}

#[derive(Parser, Debug)]
struct ObserverArgs {
    /// Dispatcher address (host:port)
    #[arg(long, default_value = DEFAULT_DISPATCHER_ADDR)]
    dispatcher_server: String,

    /// Seconds between two polls of the repository
    #[arg(long, default_value_t = 5)]
    interval_secs: u64,

    /// Append logs to this file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Path to the repository to observe
    repo: PathBuf,
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(log_file: Option<&PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

// =============================================================================
// Entry points
// =============================================================================

async fn run_dispatcher(args: DispatcherArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(args.log_file.as_ref())?;

    let mut config = DispatcherConfig::new(args.host, args.port).with_results_dir(args.results_dir);
    if let Some(port) = args.dashboard_port {
        config = config.with_dashboard_port(port);
    }

    tracing::info!(
        listen_addr = %config.listen_addr(),
        results_dir = %config.results_dir.display(),
        dashboard_port = ?config.dashboard_port,
        "Starting dispatcher"
    );

    let shutdown = install_shutdown_handler()?;
    Dispatcher::new(config).run(shutdown).await?;
    Ok(())
}

async fn run_runner(args: RunnerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(args.log_file.as_ref())?;

    parse_host_port(&args.dispatcher_server)?;
    let mut config = RunnerConfig::new(args.repo).with_dispatcher(args.dispatcher_server);
    config.host = args.host;
    config.port = args.port;
    if let Some(test_command) = args.test_command {
        config.test_command = test_command;
    }

    tracing::info!(
        host = %config.host,
        port = ?config.port,
        dispatcher = %config.dispatcher_addr,
        repo = %config.repo.display(),
        "Starting runner"
    );

    let executor = Arc::new(ShellTestExecutor::new(
        config.repo.clone(),
        config.test_command.clone(),
    ));
    let shutdown = install_shutdown_handler()?;
    RunnerNode::new(config, executor).run(shutdown).await?;
    Ok(())
}

async fn run_observer(args: ObserverArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(args.log_file.as_ref())?;

    parse_host_port(&args.dispatcher_server)?;
    let config = ObserverConfig {
        dispatcher_addr: args.dispatcher_server,
        repo: args.repo,
        poll_interval_ms: args.interval_secs * 1_000,
        ..ObserverConfig::default()
    };

    tracing::info!(
        dispatcher = %config.dispatcher_addr,
        repo = %config.repo.display(),
        "Starting repository observer"
    );

    let shutdown = install_shutdown_handler()?;
    RepoObserver::new(config).run(shutdown).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Dispatcher(args) => run_dispatcher(args).await,
        Commands::Runner(args) => run_runner(args).await,
        Commands::Observer(args) => run_observer(args).await,
    }
}
