// Job submission relies on Condor/Slurm command-line tools and POSIX signals.
#[cfg(not(unix))]
fn main() {
    eprintln!("flotilla-launch is only supported on Unix systems (Linux/macOS).");
    std::process::exit(1);
}

#[cfg(unix)]
mod unix_main {
    use anyhow::{Context, Result, anyhow};
    use clap::{Parser, builder::styling};
    use env_logger::Builder;
    use flotilla::config::{ConfigPaths, FlotillaConfig};
    use flotilla::events::SpoolBroker;
    use flotilla::launcher::{LaunchPlan, WorkflowHandle, WorkflowLauncher};
    use flotilla::monitor::StopUrgency;
    use flotilla::readiness::FileWaiter;
    use flotilla::scheduler::create_job_control;
    use log::{LevelFilter, error, info, warn};
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::fs::File;
    use std::path::PathBuf;
    use std::str::FromStr;
    use std::sync::{Arc, Mutex};
    use std::thread;

    const STYLES: styling::Styles = styling::Styles::styled()
        .header(styling::AnsiColor::Green.on_default().bold())
        .usage(styling::AnsiColor::Green.on_default().bold())
        .literal(styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(styling::AnsiColor::Cyan.on_default());

    const DEFAULT_SPOOL_DIR: &str = "flotilla-events";

    /// Exit status after an interrupt during launch (128 + SIGINT).
    const INTERRUPTED_EXIT_CODE: i32 = 130;

    /// What an incoming signal has to tear down.
    enum Stage {
        Launching,
        Running(WorkflowHandle),
        Finished,
    }

    fn lock_stage(stage: &Mutex<Stage>) -> std::sync::MutexGuard<'_, Stage> {
        stage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the thread that turns SIGTERM/SIGINT into a teardown of whatever
    /// `stage` currently holds.
    fn watch_signals(
        mut signals: Signals,
        stage: Arc<Mutex<Stage>>,
        launcher: Arc<WorkflowLauncher>,
    ) {
        thread::spawn(move || {
            for sig in signals.forever() {
                let current = lock_stage(&stage);
                match &*current {
                    Stage::Launching => {
                        let jobs = launcher.submitted_jobs();
                        warn!(
                            "Received signal {} during launch; killing {} submitted job(s)",
                            sig,
                            jobs.len()
                        );
                        launcher.reap(&jobs);
                        std::process::exit(INTERRUPTED_EXIT_CODE);
                    }
                    Stage::Running(handle) => {
                        info!("Received signal {}; stopping workflow", sig);
                        handle.stop(StopUrgency::Immediate);
                    }
                    Stage::Finished => {}
                }
            }
        });
    }

    #[derive(Parser, Debug)]
    #[command(name = "flotilla-launch")]
    #[command(about = "Launch a phased workflow and monitor it to completion", long_about = None)]
    #[command(styles = STYLES)]
    struct Args {
        /// Launch plan (TOML)
        #[arg()]
        plan: PathBuf,

        /// Configuration file. Replaces the system/user/local search.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Do not submit the bootstrap job; resources are already provisioned
        #[arg(long, default_value = "false")]
        skip_bootstrap: bool,

        /// Write log output to this file instead of stderr
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Log level (overrides the configuration)
        #[arg(long)]
        log_level: Option<String>,

        /// Spool directory used as the event broker
        #[arg(long)]
        spool_dir: Option<PathBuf>,

        /// Print the effective configuration as TOML and exit
        #[arg(long, default_value = "false")]
        show_config: bool,
    }

    fn load_config(args: &Args) -> Result<FlotillaConfig> {
        let mut config = match &args.config {
            Some(path) => FlotillaConfig::load_from_files(std::slice::from_ref(path))?,
            None => FlotillaConfig::load_with_paths(&ConfigPaths::new())?,
        };
        if let Some(level) = &args.log_level {
            config.log_level = level.clone();
        }
        if args.skip_bootstrap {
            config.launcher.skip_bootstrap = true;
        }
        config
            .validate()
            .map_err(|errors| anyhow!("invalid configuration:\n  {}", errors.join("\n  ")))?;
        Ok(config)
    }

    fn init_logging(args: &Args, config: &FlotillaConfig) -> Result<()> {
        let level = LevelFilter::from_str(&config.log_level).unwrap_or(LevelFilter::Info);
        let mut builder = Builder::from_default_env();
        builder.filter_level(level);
        if let Some(path) = &args.log_file {
            let log_file = File::create(path)
                .with_context(|| format!("cannot create log file {}", path.display()))?;
            builder.target(env_logger::Target::Pipe(Box::new(log_file)));
        }
        builder.init();
        Ok(())
    }

    fn run(args: Args) -> Result<i32> {
        let config = load_config(&args)?;
        if args.show_config {
            print!("{}", toml::to_string_pretty(&config)?);
            return Ok(0);
        }
        init_logging(&args, &config)?;

        let plan = LaunchPlan::from_file(&args.plan)?;
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        let spool_dir = args
            .spool_dir
            .clone()
            .or_else(|| config.monitor.event_broker.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SPOOL_DIR));

        info!("Starting flotilla-launch");
        info!("Hostname: {}", hostname);
        info!("Plan: {}", args.plan.display());
        info!("Run ID: {}", plan.run_id);
        info!("Scheduler: {}", config.scheduler.scheduler_type);
        info!("Event spool: {}", spool_dir.display());

        let job_control = create_job_control(&config.scheduler)?;
        let channel = Arc::new(
            SpoolBroker::new(&spool_dir)?.with_retention(config.monitor.event_retention()),
        );
        let readiness = Arc::new(
            FileWaiter::new(
                plan.artifacts.clone(),
                config.launcher.readiness_poll_interval(),
            )
            .with_timeout(config.launcher.readiness_timeout()),
        );
        let launcher = Arc::new(WorkflowLauncher::new(job_control, readiness, channel, config));

        // A scheduler about to evict us sends SIGTERM; an operator sends SIGINT.
        // Both can arrive while the launch is still waiting on the scheduler.
        let signals = Signals::new([SIGTERM, SIGINT]).context("cannot register signals")?;
        let stage = Arc::new(Mutex::new(Stage::Launching));
        watch_signals(signals, Arc::clone(&stage), Arc::clone(&launcher));

        let handle = match launcher.launch(&plan) {
            Ok(handle) => handle,
            Err(e) => {
                *lock_stage(&stage) = Stage::Finished;
                error!("{}", e);
                if !e.submitted.is_empty() {
                    warn!("Killing {} job(s) of the partial launch", e.submitted.len());
                    launcher.reap(&e.submitted);
                }
                return Ok(1);
            }
        };
        *lock_stage(&stage) = Stage::Running(handle.clone());

        handle.wait_for_completion(None);
        handle.monitor().join();
        info!("Workflow run_id={} finished", handle.run_id());
        Ok(0)
    }

    pub fn main() {
        let args = Args::parse();
        match run(args) {
            Ok(code) => std::process::exit(code),
            Err(e) => {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        }
    }
}

#[cfg(unix)]
fn main() {
    unix_main::main();
}
