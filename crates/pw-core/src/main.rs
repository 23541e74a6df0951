//! pcapwatch - streaming anomaly monitor for rotating packet captures
//!
//! Watches a capture file (or the newest match in a directory), scores each
//! unit through the scoring engine, and appends an alert line whenever a
//! score crosses the threshold. Runs until SIGINT/SIGTERM or the packet
//! limit; prints a JSON run summary on stdout.

use clap::{Args, Parser};
use pw_core::alert::JsonlAlertLog;
use pw_core::config::{validate, EngineKind, MonitorConfig};
use pw_core::driver::StreamDriver;
use pw_core::engine::{CommandEngineFactory, EngineFactory, ReplayEngineFactory};
use pw_core::exit_codes::ExitCode;
use pw_core::lifecycle::{LifecycleController, ShutdownFlag};
use pw_core::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use pw_core::source::SourceMode;
use pw_core::threshold::ThresholdPolicy;
use std::path::PathBuf;
use tracing::warn;

/// Streaming anomaly monitor for rotating packet captures
#[derive(Parser, Debug)]
#[command(name = "pcapwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file; flags override its values
    #[arg(long, short = 'c', env = "PCAPWATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    source: SourceArgs,

    #[command(flatten)]
    scoring: ScoringArgs,

    #[command(flatten)]
    threshold: ThresholdArgs,

    #[command(flatten)]
    engine: EngineArgs,

    /// Milliseconds between polls for a new or grown capture file
    #[arg(long, env = "PCAPWATCH_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    /// Polls without any capture source before giving up (0 = fail at once)
    #[arg(long, env = "PCAPWATCH_MAX_DISCOVERY_RETRIES")]
    max_discovery_retries: Option<u32>,

    /// Keep polling for the first capture source forever
    #[arg(long, conflicts_with = "max_discovery_retries")]
    wait_forever: bool,

    /// Directory for the trace log and alert log
    #[arg(long, env = "PCAPWATCH_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Stderr log format (human, jsonl)
    #[arg(long, env = "PCAPWATCH_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (-q warn, -qq error)
    #[arg(short, long, action = clap::ArgAction::Count)]
    quiet: u8,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Watch a single capture file
    #[arg(long, env = "PCAPWATCH_FILE", conflicts_with = "dir")]
    file: Option<PathBuf>,

    /// Watch the newest matching file in a directory
    #[arg(long, env = "PCAPWATCH_DIR")]
    dir: Option<PathBuf>,

    /// File name pattern for --dir (`*` and `?` wildcards)
    #[arg(long, env = "PCAPWATCH_PATTERN")]
    pattern: Option<String>,
}

#[derive(Args, Debug)]
struct ScoringArgs {
    /// Stop after this many scored units
    #[arg(long, env = "PCAPWATCH_PACKET_LIMIT")]
    packet_limit: Option<u64>,

    /// Maximum autoencoder ensemble size
    #[arg(long, env = "PCAPWATCH_MAX_AE")]
    max_ae: Option<u32>,

    /// Feature-mapping grace period in units
    #[arg(long, env = "PCAPWATCH_FM_GRACE")]
    fm_grace: Option<u64>,

    /// Anomaly-detector grace period in units
    #[arg(long, env = "PCAPWATCH_AD_GRACE")]
    ad_grace: Option<u64>,

    #[arg(long, env = "PCAPWATCH_LEARNING_RATE")]
    learning_rate: Option<f64>,

    #[arg(long, env = "PCAPWATCH_HIDDEN_RATIO")]
    hidden_ratio: Option<f64>,
}

#[derive(Args, Debug)]
struct ThresholdArgs {
    /// Use a fixed cutoff instead of the adaptive threshold
    #[arg(
        long,
        env = "PCAPWATCH_STATIC_THRESHOLD",
        num_args = 0..=1,
        default_missing_value = "0.1",
        conflicts_with = "std_multiplier"
    )]
    static_threshold: Option<f64>,

    /// Adaptive threshold: mean + multiplier * std
    #[arg(long, env = "PCAPWATCH_STD_MULTIPLIER")]
    std_multiplier: Option<f64>,

    /// Post-grace scores collected before the adaptive threshold applies
    #[arg(long, env = "PCAPWATCH_MIN_SAMPLES")]
    min_samples: Option<u64>,

    /// Only the most recent N post-grace scores feed the statistics
    #[arg(long, env = "PCAPWATCH_STATS_WINDOW")]
    stats_window: Option<u64>,
}

#[derive(Args, Debug)]
struct EngineArgs {
    /// Engine implementation (command, replay)
    #[arg(long, env = "PCAPWATCH_ENGINE", value_parser = parse_engine_kind)]
    engine: Option<EngineKind>,

    /// Engine program spawned per session
    #[arg(long, env = "PCAPWATCH_ENGINE_CMD")]
    engine_cmd: Option<String>,

    /// Extra argument for the engine program (repeatable)
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    engine_args: Vec<String>,

    /// Seconds to wait for any engine reply
    #[arg(long, env = "PCAPWATCH_ENGINE_TIMEOUT_SECS")]
    engine_timeout_secs: Option<u64>,
}

fn parse_engine_kind(s: &str) -> Result<EngineKind, String> {
    match s.to_lowercase().as_str() {
        "command" | "cmd" => Ok(EngineKind::Command),
        "replay" => Ok(EngineKind::Replay),
        _ => Err(format!("unknown engine: {} (expected command or replay)", s)),
    }
}

impl Cli {
    /// Layer flags and environment over the loaded configuration.
    fn apply(&self, config: &mut MonitorConfig) {
        if let Some(path) = &self.source.file {
            config.source = SourceMode::File { path: path.clone() };
        } else if let Some(dir) = &self.source.dir {
            let pattern = match (&self.source.pattern, &config.source) {
                (Some(p), _) => p.clone(),
                (None, SourceMode::Directory { pattern, .. }) => pattern.clone(),
                (None, SourceMode::File { .. }) => "*.pcap".to_string(),
            };
            config.source = SourceMode::Directory {
                dir: dir.clone(),
                pattern,
            };
        } else if let (Some(p), SourceMode::Directory { pattern, .. }) =
            (&self.source.pattern, &mut config.source)
        {
            *pattern = p.clone();
        }

        let scoring = &mut config.scoring;
        if self.scoring.packet_limit.is_some() {
            scoring.packet_limit = self.scoring.packet_limit;
        }
        if let Some(v) = self.scoring.max_ae {
            scoring.max_ae = v;
        }
        if let Some(v) = self.scoring.fm_grace {
            scoring.fm_grace = v;
        }
        if let Some(v) = self.scoring.ad_grace {
            scoring.ad_grace = v;
        }
        if let Some(v) = self.scoring.learning_rate {
            scoring.learning_rate = v;
        }
        if let Some(v) = self.scoring.hidden_ratio {
            scoring.hidden_ratio = v;
        }

        self.apply_threshold(&mut config.threshold);

        let engine = &mut config.engine;
        if let Some(kind) = self.engine.engine {
            engine.kind = kind;
        }
        if let Some(cmd) = &self.engine.engine_cmd {
            engine.command = cmd.clone();
        }
        if !self.engine.engine_args.is_empty() {
            engine.args = self.engine.engine_args.clone();
        }
        if let Some(secs) = self.engine.engine_timeout_secs {
            engine.timeout_secs = secs;
        }

        if let Some(ms) = self.poll_interval_ms {
            config.driver.poll_interval_ms = ms;
        }
        if self.wait_forever {
            config.driver.max_discovery_retries = None;
        } else if self.max_discovery_retries.is_some() {
            config.driver.max_discovery_retries = self.max_discovery_retries;
        }
        if let Some(dir) = &self.log_dir {
            config.output.log_dir = dir.clone();
        }
    }

    fn apply_threshold(&self, policy: &mut ThresholdPolicy) {
        let args = &self.threshold;
        if let Some(threshold) = args.static_threshold {
            *policy = ThresholdPolicy::Static { threshold };
            return;
        }
        let adaptive_flags = args.std_multiplier.is_some()
            || args.min_samples.is_some()
            || args.stats_window.is_some();
        if !adaptive_flags {
            return;
        }
        let (mut multiplier, mut min_samples, mut window) = match policy {
            ThresholdPolicy::Adaptive {
                multiplier,
                min_samples,
                window,
            } => (*multiplier, *min_samples, *window),
            ThresholdPolicy::Static { .. } => (
                ThresholdPolicy::DEFAULT_MULTIPLIER,
                ThresholdPolicy::DEFAULT_MIN_SAMPLES,
                None,
            ),
        };
        if let Some(m) = args.std_multiplier {
            multiplier = m;
        }
        if let Some(n) = args.min_samples {
            min_samples = n;
        }
        if args.stats_window.is_some() {
            window = args.stats_window;
        }
        *policy = ThresholdPolicy::Adaptive {
            multiplier,
            min_samples,
            window,
        };
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            let code = if e.use_stderr() {
                ExitCode::ArgsError
            } else {
                ExitCode::Clean
            };
            std::process::exit(code.as_i32());
        }
    };
    std::process::exit(run(cli).as_i32());
}

fn run(cli: Cli) -> ExitCode {
    let mut config = match &cli.config {
        Some(path) => match MonitorConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("pcapwatch: {}", e);
                return ExitCode::ConfigError;
            }
        },
        None => MonitorConfig::default(),
    };
    cli.apply(&mut config);
    if let Err(e) = validate(&config) {
        eprintln!("pcapwatch: {}", e);
        return ExitCode::ConfigError;
    }

    if cli.print_config {
        println!("{}", config.to_json_pretty());
        return ExitCode::Clean;
    }

    let log_config = LogConfig::from_env(
        LogLevel::from_verbosity(cli.verbose, cli.quiet),
        cli.log_format,
    );
    let trace_path = config.output.trace_path();
    if let Err(e) = init_logging(&log_config, trace_path.as_deref()) {
        eprintln!("pcapwatch: cannot open trace log: {}", e);
        return ExitCode::IoError;
    }

    let factory: Box<dyn EngineFactory> = match config.engine.kind {
        EngineKind::Command => Box::new(CommandEngineFactory::from_config(&config.engine)),
        EngineKind::Replay => Box::new(ReplayEngineFactory::new()),
    };
    let alert_log = match JsonlAlertLog::open(&config.output.alert_path()) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("pcapwatch: {}", e);
            return ExitCode::IoError;
        }
    };

    let controller = LifecycleController::new(ShutdownFlag::new());
    if let Err(e) = controller.install_signal_handlers() {
        warn!(error = %e, "could not install signal handlers");
    }
    let mut driver = match StreamDriver::new(
        &config,
        factory,
        Box::new(alert_log),
        controller.shutdown_flag(),
    ) {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("pcapwatch: {}", e);
            return ExitCode::for_error(&e);
        }
    };

    match controller.run(&mut driver) {
        Ok(summary) => {
            match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!(error = %e, "could not serialize run summary"),
            }
            ExitCode::Clean
        }
        Err(e) => {
            eprintln!("pcapwatch: {}", e);
            ExitCode::for_error(&e)
        }
    }
}
