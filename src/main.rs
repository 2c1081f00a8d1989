use clap::{Parser, Subcommand};
use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};
use tokio::runtime::Builder;
use tracing_subscriber::EnvFilter;
use workpool::{
    BoundedExecutor, Config, FileSource, HttpTransport, Orchestrator, RecordSource, RunReport, WorkUnit,
};

#[derive(Parser)]
#[command(name = "workpool", about = "Bounded concurrent read/fetch runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Concurrency ceiling (defaults to CPU count)
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Completion barrier timeout in seconds, 0 waits forever
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Re-read the same file from every unit and uppercase each line
    Read {
        path: PathBuf,
        #[arg(long, default_value_t = 10)]
        units: usize,
    },
    /// GET every URL through one shared client
    Fetch {
        #[arg(required = true)]
        urls: Vec<String>,
    },
}

fn load_config(cli: &Cli) -> Result<Config, workpool::errors::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };
    if let Some(n) = cli.concurrency {
        config.max_concurrency = n;
    }
    if let Some(secs) = cli.timeout_secs {
        config.barrier_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    config.validate()?;
    Ok(config)
}

fn print_failures(report: &RunReport) {
    for failure in &report.failures {
        eprintln!("failed: {failure}");
    }
    if let Some(forced) = &report.forced {
        eprintln!("error: {forced}");
    }
}

/// Ctrl-C; если обработчик не ставится, сигнал считается никогда не пришедшим
async fn interrupt() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::warn!("interrupt received, shutting down"),
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for interrupt");
            std::future::pending::<()>().await
        }
    }
}

async fn execute(cli: Cli, config: Config) -> ExitCode {
    let grace = config.shutdown_grace;
    let (orchestrator, units, label) = match cli.command {
        Command::Read { path, units } => {
            let source: Arc<dyn RecordSource> = Arc::new(FileSource::new(path));
            let units: Vec<WorkUnit> = (0..units).map(|i| WorkUnit::read(i, source.clone())).collect();
            let orchestrator = Orchestrator::with_pool(BoundedExecutor::with_config(config));
            (orchestrator, units, "Lines processed")
        }
        Command::Fetch { urls } => {
            let transport = match HttpTransport::shared(&config) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "failed to build http client");
                    eprintln!("error: failed to build http client: {e}");
                    return ExitCode::FAILURE;
                }
            };
            let units: Vec<WorkUnit> = urls.into_iter().map(WorkUnit::fetch).collect();
            let orchestrator = Orchestrator::with_pool(BoundedExecutor::with_config(config))
                .with_transport(transport);
            (orchestrator, units, "Responses stored")
        }
    };

    let code = match orchestrator.run_until(units, interrupt()).await {
        Ok(report) if report.interrupted => {
            eprintln!("error: interrupted, {} of {} units succeeded", report.succeeded, report.units);
            println!("{label}: {}", report.len());
            print_failures(&report);
            ExitCode::from(130)
        }
        Ok(report) => {
            println!("{label}: {}", report.len());
            print_failures(&report);
            if report.forced.is_some() { ExitCode::FAILURE } else { ExitCode::SUCCESS }
        }
        Err(incomplete) => {
            eprintln!("error: {}", incomplete.error);
            let report = incomplete.abort(grace).await;
            println!("{label}: {}", report.len());
            print_failures(&report);
            ExitCode::FAILURE
        }
    };

    if let Err(e) = orchestrator.shutdown().await {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }
    code
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    let rt = match Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    rt.block_on(execute(cli, config))
}
