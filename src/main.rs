#![allow(clippy::uninlined_format_args)]

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, info, warn};

use subflow::app_config::{Config, LogLevel, TranslationMode};
use subflow::app_controller::{Controller, RunOptions};
use subflow::dispatch::RateLimitLedger;
use subflow::translation::TranslationCache;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for LogLevel {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => LogLevel::Error,
            CliLogLevel::Warn => LogLevel::Warn,
            CliLogLevel::Info => LogLevel::Info,
            CliLogLevel::Debug => LogLevel::Debug,
            CliLogLevel::Trace => LogLevel::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Simple,
    Context,
}

impl From<CliMode> for TranslationMode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Simple => TranslationMode::Simple,
            CliMode::Context => TranslationMode::Context,
        }
    }
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Remove expired cache entries
    Sweep,
    /// Print entry count
    Stats,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Transcribe and/or translate a file or a folder
    Process(ProcessArgs),

    /// Print the persisted rate limit ledger
    RateLimits,

    /// Translation cache maintenance
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },

    /// Generate shell completions for subflow
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser, Debug)]
struct ProcessArgs {
    /// Subtitle or media file, or a folder
    #[arg(short, long, value_name = "PATH")]
    input: PathBuf,

    /// Output folder (default: next to each input)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Transcribe media files that have no subtitles yet
    #[arg(short, long)]
    generate: bool,

    /// Translate subtitles (default when --generate is not given)
    #[arg(short, long)]
    translate: bool,

    /// Target language code (e.g. 'vi', 'fr')
    #[arg(long)]
    target: Option<String>,

    /// Source language code
    #[arg(long)]
    source: Option<String>,

    /// Provider to try first
    #[arg(long)]
    service: Option<String>,

    /// Translation mode
    #[arg(long, value_enum)]
    mode: Option<CliMode>,
}

/// subflow - subtitle generation and translation with LLM providers
#[derive(Parser, Debug)]
#[command(name = "subflow")]
#[command(version)]
#[command(about = "Subtitle generation and translation with multi-provider LLM dispatch")]
#[command(long_about = "subflow translates SRT subtitles with a chain of LLM providers.

EXAMPLES:
    subflow process -i movie.srt --target fr        # Translate one file to French
    subflow process -i /videos -g -t                # Transcribe, then translate a folder
    subflow process -i /videos --service gemini     # Try Gemini first
    subflow rate-limits                             # Show the request ledger
    subflow cache sweep                             # Drop expired cache entries
    subflow completions bash > subflow.bash         # Generate bash completions

CONFIGURATION:
    Providers are enabled by <PROVIDER>_API_KEY variables (OLLAMA_HOST for
    Ollama), read from the environment or a .env file. A JSON file given
    with --config supplies the base configuration.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Set logging level
    #[arg(short, long, global = true, value_enum)]
    log_level: Option<CliLogLevel>,
}

// @struct: Custom logger implementation
struct CustomLogger;

impl CustomLogger {
    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(CustomLogger))?;
        log::set_max_level(level);
        Ok(())
    }

    fn colour(level: Level) -> &'static str {
        match level {
            Level::Error => "1;31",
            Level::Warn => "1;33",
            Level::Info => "1;32",
            Level::Debug => "1;36",
            Level::Trace => "1;35",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let now = chrono::Local::now().format("%H:%M:%S.%3f");
        let _ = writeln!(
            std::io::stderr(),
            "\x1B[{}m{} {:<5} {}\x1B[0m",
            Self::colour(record.level()),
            now,
            record.level(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn load_config(cli: &CommandLineOptions) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    log::set_max_level(config.log_level.to_level_filter());
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    CustomLogger::init(LevelFilter::Info)?;
    let cli = CommandLineOptions::parse();

    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(*shell, &mut cmd, "subflow", &mut std::io::stdout());
            Ok(())
        }
        Commands::RateLimits => {
            let config = load_config(&cli)?;
            let ledger = RateLimitLedger::from_config(&config);
            if let Some(path) = ledger.path() {
                info!("Ledger: {}", path.display());
            }
            println!("{}", ledger.snapshot_json());
            Ok(())
        }
        Commands::Cache { command } => {
            let config = load_config(&cli)?;
            let cache = TranslationCache::from_config(&config);
            match command {
                CacheCommand::Sweep => {
                    let removed = cache.sweep();
                    println!("Removed {} expired entries", removed);
                }
                CacheCommand::Stats => {
                    println!("{} entries in {}", cache.stats().entries, config.cache_dir().display());
                }
            }
            Ok(())
        }
        Commands::Process(args) => {
            let code = run_process(&cli, args).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
    }
}

async fn run_process(cli: &CommandLineOptions, args: &ProcessArgs) -> Result<i32> {
    let mut config = load_config(cli)?;
    if let Some(target) = &args.target {
        config.target_language = target.clone();
    }
    if let Some(source) = &args.source {
        config.source_language = Some(source.clone());
    }
    if let Some(mode) = args.mode {
        config.translation.mode = mode.into();
    }

    let translate = args.translate || !args.generate;
    config.validate(translate)?;

    if let Some(service) = &args.service {
        if config.provider(service).is_none() {
            return Err(anyhow!("Provider '{}' is not configured", service));
        }
    }

    let controller = Arc::new(Controller::with_config(config)?);
    let cancel = controller.cancel_flag().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight requests");
            cancel.cancel();
        }
    });

    let options = RunOptions {
        input: args.input.clone(),
        output_dir: args.output.clone(),
        generate: args.generate,
        translate,
        preferred_provider: args.service.clone(),
    };
    let report = controller.run(&options).await?;

    for summary in &report.files {
        if summary.skipped {
            continue;
        }
        info!(
            "{}: {} blocks, {} translated, {} cached, {} reused, {} failed",
            summary.output.display(),
            summary.total_blocks,
            summary.translated,
            summary.cache_hits,
            summary.reused,
            summary.failed
        );
    }
    for (input, message) in &report.errors {
        warn!("{}: {}", input.display(), message);
    }
    Ok(report.exit_code())
}
