use std::sync::Arc;

use almanac_core::{config::ensure_parent_dir, AlmanacConfig};
use almanac_scheduler::{
    CallbackRegistry, CrontabFile, JobRegistry, SchedulerEngine, SchedulerHandle, TimeSource,
    VirtualClock,
};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

/// Callback that writes its arguments to the log. Handy for trying out lines.
const LOG_CALLBACK: &str = "almanac.log";

#[derive(Parser)]
#[command(name = "almanac", version, about = "Minute-resolution scheduler for a virtual calendar")]
struct Cli {
    /// Config file (defaults to ~/.almanac/almanac.toml, or ALMANAC_CONFIG).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler against the virtual clock until Ctrl-C.
    Run {
        /// Stop after advancing the clock this many times.
        #[arg(long)]
        polls: Option<u64>,
    },
    /// Parse a crontab line and print the resolved job without saving it.
    Check { line: String },
    /// List the jobs in the crontab file.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Add a crontab line to the crontab file.
    Add { line: String },
    /// Remove a job from the crontab file by id.
    Remove { job_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "almanac=info,almanac_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // explicit flag > ALMANAC_CONFIG env > ~/.almanac/almanac.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("ALMANAC_CONFIG").ok());
    let config = AlmanacConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        AlmanacConfig::default()
    });
    config.validate()?;
    ensure_parent_dir(&config.scheduler.crontab_path)?;

    let mut engine = SchedulerEngine::new(&config.scheduler, callbacks())
        .with_store(CrontabFile::new(&config.scheduler.crontab_path));
    let report = engine.load()?;
    for (line_no, error) in &report.skipped {
        warn!(line_no, %error, "crontab line ignored");
    }

    match cli.command {
        Command::Run { polls } => {
            if config.scheduler.profiler_job {
                engine.register_profiler_job()?;
            }
            run(engine, &config, polls).await;
        }
        Command::Check { line } => {
            let mut scratch = JobRegistry::new();
            let id = scratch.add_line(engine.callbacks(), &line)?;
            if let Some(job) = scratch.get(&id) {
                println!("{}", serde_json::to_string_pretty(&job.summary())?);
                println!("minutes of day: {:?}", job.minutes_of_day());
            }
        }
        Command::List { json } => {
            let registry = engine.registry();
            if json {
                let listing = serde_json::json!({
                    "jobs": registry.summaries(),
                    "schedule": registry
                        .schedule_index()
                        .iter()
                        .map(|(minute, ids)| (minute.to_string(), ids))
                        .collect::<std::collections::BTreeMap<_, _>>(),
                });
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                for (id, line) in registry.lines() {
                    println!("{line} # {id}");
                }
                println!();
                for (minute, ids) in registry.schedule_index() {
                    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
                    println!("{:02}:{:02}  {}", minute / 60, minute % 60, ids.join(", "));
                }
            }
        }
        Command::Add { line } => {
            let id = engine.add_line(&line)?;
            if !config.scheduler.autosave {
                engine.save()?;
            }
            println!("{id}");
        }
        Command::Remove { job_id } => {
            engine.remove_job(&job_id)?;
            if !config.scheduler.autosave {
                engine.save()?;
            }
        }
    }
    Ok(())
}

fn callbacks() -> CallbackRegistry {
    let mut callbacks = CallbackRegistry::new();
    callbacks.register(LOG_CALLBACK, |args: &[String]| {
        info!(message = %args.join(" "), "almanac.log");
        Ok(())
    });
    callbacks
}

/// Drive `engine` with a virtual clock that advances once per poll interval.
async fn run(engine: SchedulerEngine, config: &AlmanacConfig, polls: Option<u64>) {
    let interval = engine.poll_interval();
    info!(
        jobs = engine.registry().len(),
        start_minute = config.clock.start_minute,
        minutes_per_poll = config.clock.minutes_per_poll,
        "starting almanac"
    );

    let handle = SchedulerHandle::new(engine);
    let clock = Arc::new(VirtualClock::new(config.clock.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let runner = {
        let handle = handle.clone();
        let clock: Arc<dyn TimeSource> = clock.clone();
        tokio::spawn(async move { handle.run(clock, shutdown_rx).await })
    };

    let ticker = {
        let clock = Arc::clone(&clock);
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut steps = 0u64;
            loop {
                tokio::time::sleep(interval).await;
                if polls.is_some_and(|limit| steps >= limit) {
                    // let the runner see the last step before stopping
                    let _ = shutdown_tx.send(true);
                    break;
                }
                clock.step();
                steps += 1;
            }
        })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            let _ = shutdown_tx.send(true);
        }
        _ = shutdown_wait(shutdown_tx.subscribe()) => {}
    }
    ticker.abort();
    if let Err(e) = runner.await {
        warn!(error = %e, "scheduler task ended abnormally");
    }

    if config.scheduler.profiling {
        handle.log_stats();
    }
    if let Err(e) = handle.save() {
        warn!(error = %e, "final save failed");
    }
}

async fn shutdown_wait(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
