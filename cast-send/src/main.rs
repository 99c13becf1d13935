//! cast-send - Worker daemon that publishes due posts
//!
//! Claims due jobs from the queue and runs the publication handler on each,
//! up to the configured concurrency, until asked to stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use libcastline::platforms::mock::MockPublisher;
use libcastline::platforms::PublisherRegistry;
use libcastline::service::events::{Event, EventReceiver};
use libcastline::{CastlineService, Config, PlatformId, Result};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "cast-send")]
#[command(version)]
#[command(about = "Worker daemon that publishes due posts")]
#[command(long_about = "\
cast-send - Worker daemon that publishes due posts

DESCRIPTION:
    cast-send is a long-running worker. It claims jobs from the Castline
    queue as they fall due, publishes each post to its platforms
    concurrently, records the per-platform outcomes and hands failed
    attempts back to the queue for retry with backoff. Jobs that run out
    of attempts are kept as dead letters (see cast-queue dead).

USAGE:
    # Run in foreground (logs to stderr)
    cast-send

    # Print progress events as JSON lines on stdout
    cast-send --events

    # Publish everything that is due now, then exit
    cast-send --once

    # Exercise the pipeline without calling any platform
    cast-send --once --dry-run

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes in-flight jobs)

CONFIGURATION:
    Configuration file: ~/.config/castline/config.toml
    Database location: ~/.local/share/castline/castline.db

    [queue]
    concurrency = 5          # jobs in flight
    max_attempts = 3         # attempts before dead-lettering
    backoff_ms = 5000        # first retry delay, doubled each attempt
    poll_interval_ms = 1000  # idle poll interval
    adapter_timeout_secs = 30

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or database error
")]
struct Cli {
    /// Process due jobs once and exit
    #[arg(long)]
    once: bool,

    /// Maximum jobs in flight (overrides config)
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Idle poll interval in milliseconds (overrides config)
    #[arg(long, value_name = "MS")]
    poll_interval: Option<u64>,

    /// Print progress events to stdout as JSON lines
    #[arg(long)]
    events: bool,

    /// Publish through simulated adapters that always succeed
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    libcastline::logging::init_default(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let service = if cli.dry_run {
        warn!("Dry run: no platform will be contacted");
        CastlineService::with_publishers(config, dry_run_publishers()).await?
    } else {
        CastlineService::from_config(config).await?
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let concurrency = cli
        .concurrency
        .unwrap_or(service.config().queue.concurrency);
    let poll_interval = Duration::from_millis(
        cli.poll_interval
            .unwrap_or(service.config().queue.poll_interval_ms),
    );
    let worker = service.worker_with(concurrency, poll_interval);

    let printer = cli.events.then(|| spawn_event_printer(service.subscribe()));

    info!(
        concurrency,
        poll_interval_ms = poll_interval.as_millis() as u64,
        once = cli.once,
        "cast-send starting"
    );

    let result = if cli.once {
        worker.run_once().await
    } else {
        worker.run(shutdown).await
    };

    if let Some((stop, handle)) = printer {
        let _ = stop.send(());
        if let Err(e) = handle.await {
            warn!(error = %e, "Event printer stopped abnormally");
        }
    }
    service.close().await;

    let summary = result?;
    info!(
        published = summary.published,
        retrying = summary.retrying,
        dead_lettered = summary.dead_lettered,
        skipped = summary.skipped,
        errored = summary.errored,
        "cast-send stopped"
    );
    Ok(())
}

fn dry_run_publishers() -> PublisherRegistry {
    PlatformId::ALL
        .into_iter()
        .fold(PublisherRegistry::new(), |registry, platform| {
            registry.with(Arc::new(MockPublisher::success(platform)))
        })
}

/// Print events until stopped, then flush whatever is still buffered
fn spawn_event_printer(mut events: EventReceiver) -> (oneshot::Sender<()>, JoinHandle<()>) {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                received = events.recv() => match received {
                    Ok(event) => print_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event output fell behind");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = &mut stop_rx => {
                    while let Ok(event) = events.try_recv() {
                        print_event(&event);
                    }
                    break;
                }
            }
        }
    });

    (stop_tx, handle)
}

fn print_event(event: &Event) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!(error = %e, "Failed to serialize event"),
    }
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use libcastline::error::ConfigError;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| ConfigError::Invalid(format!("Signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, finishing in-flight jobs...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Arc<AtomicBool>) -> Result<()> {
    Ok(())
}
