use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use reelscope::broadcast::{self, JobProgressEvent};
use reelscope::config::{load_config, validate_config, Config};
use reelscope::logging::{self, LogFormat};
use reelscope::pipeline::{
    BroadcastProgress, Collaborators, FanoutProgress, LogProgress, Pipeline, PipelineConfig,
    ProgressReporter,
};
use reelscope::report::{self, ReportAggregator};
use reelscope::services::ai::build_provider;
use reelscope::services::{preflight, FfmpegTranscoder, YtDlpDownloader};
use reelscope::{resolve_api_key, urls, ArtifactStore, JobScheduler, ProviderGate, Shutdown};

const DEFAULT_OUTPUT: &str = "output";

#[derive(Parser)]
#[command(name = "reelscope", version, about)]
struct Cli {
    /// JSON config file. Without one, built-in defaults are used.
    #[arg(short, long, env = "REELSCOPE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log output format: human or json
    #[arg(long, default_value = "human", env = "REELSCOPE_LOG_FORMAT", global = true)]
    log_format: LogFormat,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, env = "REELSCOPE_LOG_DIR", global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every URL in the input list and write the report.
    Run(RunArgs),
    /// Rebuild the report from the job records in the output directory.
    Report(ReportArgs),
}

#[derive(Args)]
struct RunArgs {
    /// File with one URL per line
    #[arg(short, long)]
    input: Option<PathBuf>,

    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of worker threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Recompute artifacts even when they already exist
    #[arg(long)]
    force_refresh: bool,

    /// Print progress events to stdout as JSON lines
    #[arg(long)]
    events: bool,

    /// Skip the yt-dlp / ffmpeg availability check
    #[arg(long)]
    skip_preflight: bool,
}

#[derive(Args)]
struct ReportArgs {
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = logging::init(cli.log_format, "info", cli.log_dir.as_deref())?;

    match cli.command {
        Command::Run(args) => run(cli.config.as_deref(), args),
        Command::Report(args) => rebuild_report(cli.config.as_deref(), args),
    }
}

fn base_config(
    path: Option<&Path>,
    input: Option<&Path>,
    output: Option<&Path>,
) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?,
        None => Config::new("", DEFAULT_OUTPUT),
    };
    if let Some(input) = input {
        config.input_file = input.display().to_string();
    }
    if let Some(output) = output {
        config.output_directory = output.display().to_string();
    }
    Ok(config)
}

fn run(config_path: Option<&Path>, args: RunArgs) -> anyhow::Result<()> {
    let mut config = base_config(config_path, args.input.as_deref(), args.output.as_deref())?;
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }
    config.force_refresh |= args.force_refresh;
    if config.input_file.is_empty() {
        bail!("No input file: pass --input or set input_file in the config");
    }
    validate_config(&config)?;

    if !args.skip_preflight {
        preflight::check_tools(&config)?;
    }
    let api_key = resolve_api_key(&config.provider)?;
    let provider = build_provider(&config.provider, api_key)?;

    let input_urls = urls::read_url_list(Path::new(&config.input_file))?;
    let jobs = urls::build_jobs(&input_urls, &config.normalization);
    info!(
        "Loaded {} URLs ({} unique) from {}",
        input_urls.len(),
        jobs.len(),
        config.input_file
    );

    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            if shutdown.is_triggered() {
                warn!("Second interrupt, exiting immediately");
                std::process::exit(130);
            }
            warn!("Interrupt received, finishing in-flight stages...");
            shutdown.trigger();
        })?;
    }

    let (sender, receiver) = broadcast::channel(broadcast::job_progress::DEFAULT_CAPACITY);
    let mut reporters: Vec<Box<dyn ProgressReporter>> = vec![Box::new(LogProgress)];
    let printer = if args.events {
        reporters.push(Box::new(BroadcastProgress::new(Arc::clone(&sender))));
        Some(spawn_event_printer(receiver))
    } else {
        drop(receiver);
        None
    };
    drop(sender);

    let collaborators = Collaborators {
        downloader: Arc::new(YtDlpDownloader::from_config(&config.download)),
        transcoder: Arc::new(FfmpegTranscoder::from_config(&config.transcoder)),
        provider,
    };
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(PipelineConfig::from_config(&config)),
        collaborators,
        Arc::new(ProviderGate::from_config(&config.provider)),
        shutdown.clone(),
    ));
    info!(
        "Using {:?} model {} with at most {} concurrent calls",
        config.provider.kind,
        config.provider.model_name(),
        config.provider.max_concurrent
    );

    let scheduler = JobScheduler::new(
        config.worker_count,
        Arc::clone(&pipeline),
        Arc::new(FanoutProgress::new(reporters)),
        shutdown.clone(),
    );
    let jobs = scheduler.run_batch(jobs)?;
    // Closes the event channel so the printer thread ends.
    drop(scheduler);
    if let Some(printer) = printer {
        if printer.join().is_err() {
            warn!("Event printer thread panicked");
        }
    }

    let aggregator = ReportAggregator::new(report::writers_from_config(
        &config.report,
        Path::new(&config.output_directory),
    ));
    let report = aggregator.aggregate(&jobs);
    aggregator.publish(&report)?;

    let summary = report.summary();
    if shutdown.is_triggered() {
        warn!("Run interrupted: {}", summary);
    } else {
        info!("Run finished: {}", summary);
    }
    Ok(())
}

fn rebuild_report(config_path: Option<&Path>, args: ReportArgs) -> anyhow::Result<()> {
    let config = base_config(config_path, None, args.output.as_deref())?;
    let output = PathBuf::from(&config.output_directory);
    if !output.is_dir() {
        bail!("Output directory '{}' does not exist", output.display());
    }

    let aggregator = ReportAggregator::new(report::writers_from_config(&config.report, &output));
    let report = aggregator.aggregate_store(&ArtifactStore::new(&output))?;
    aggregator.publish(&report)?;
    info!("Report rebuilt: {}", report.summary());
    Ok(())
}

fn spawn_event_printer(
    mut receiver: tokio::sync::broadcast::Receiver<JobProgressEvent>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match receiver.blocking_recv() {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Cannot encode progress event: {}", e),
            },
            Err(RecvError::Lagged(skipped)) => warn!("Dropped {} progress events", skipped),
            Err(RecvError::Closed) => break,
        }
    })
}
