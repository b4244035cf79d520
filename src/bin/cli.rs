use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use diabetes_analytics::config::{global_config, set_global_config};
use diabetes_analytics::cookbook::full_report;
use diabetes_analytics::export::response_json;
use diabetes_analytics::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "diabcli")]
#[command(version)]
#[command(about = "Diabetes population analytics - prevalence, rankings and store health from Redis", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Redis URL (overrides the config file)
    #[arg(long, env = "DIABSTATS_REDIS_URL", global = true)]
    redis_url: Option<String>,
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json, global = true)]
    format: OutputFormat,
    /// Write output to a file instead of stdout
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,
    /// Compact single-line JSON
    #[arg(long, global = true)]
    compact: bool,
    /// Log filter (e.g. debug, diabetes_analytics=trace); overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Do not draw progress bars during patient scans
    #[arg(long, global = true)]
    no_progress: bool,
    /// Run per-category work on the calling thread
    #[arg(long, global = true)]
    sequential: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the store is reachable
    Ping,
    /// Population totals and overall diabetes rate
    Overview(SummaryArgs),
    /// Diabetes rate per age group
    AgeGroups,
    /// Diabetes rate per BMI category
    BmiCategories,
    /// Diabetes rate per glucose level
    GlucoseLevels,
    /// Diabetes rate among patients who have been pregnant
    Pregnancy,
    /// Patients who have been pregnant, are obese and diabetic
    HighRisk,
    /// Ten patients with the highest glucose
    TopGlucose,
    /// Ten patients with the highest BMI
    TopBmi,
    /// Diabetes rate per glucose or BMI range
    Ranges(RangesArgs),
    /// Mean glucose and diabetes rate per age group
    AgeGlucose,
    /// Store memory, clients and keyspace statistics
    Telemetry(SummaryArgs),
    /// Every statistic in one JSON document
    Report,
    /// Write the effective configuration to a TOML file
    InitConfig(InitConfigArgs),
}

#[derive(Args)]
struct SummaryArgs {
    /// Print a human-readable summary instead of structured output
    #[arg(long)]
    summary: bool,
}

#[derive(Args)]
struct RangesArgs {
    /// Metric to break down; both when omitted
    #[arg(long, value_enum)]
    metric: Option<MetricOpt>,
}

#[derive(Args)]
struct InitConfigArgs {
    /// Destination (defaults to the user config directory)
    #[arg(long)]
    path: Option<PathBuf>,
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
    /// Start from a preset instead of the effective configuration
    #[arg(long, value_enum)]
    preset: Option<Preset>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Preset {
    /// Large scan batches, all cores, no progress bars
    Performance,
    /// Short timeouts, small batches, single thread
    Safe,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum MetricOpt {
    Glucose,
    Bmi,
}

impl From<MetricOpt> for ScoreMetric {
    fn from(opt: MetricOpt) -> Self {
        match opt {
            MetricOpt::Glucose => ScoreMetric::Glucose,
            MetricOpt::Bmi => ScoreMetric::Bmi,
        }
    }
}

/// One row of the combined range table
#[derive(Serialize)]
struct MetricRangeRow {
    metric: ScoreMetric,
    range: String,
    total: u64,
    diabetic: u64,
    non_diabetic: u64,
    rate: f64,
}

impl MetricRangeRow {
    fn rows(analysis: DetailedRangeAnalysis) -> Vec<Self> {
        let glucose = analysis
            .glucose_analysis
            .into_iter()
            .map(|r| (ScoreMetric::Glucose, r));
        let bmi = analysis.bmi_analysis.into_iter().map(|r| (ScoreMetric::Bmi, r));
        glucose
            .chain(bmi)
            .map(|(metric, r)| Self {
                metric,
                range: r.range,
                total: r.total,
                diabetic: r.diabetic,
                non_diabetic: r.non_diabetic,
                rate: r.rate,
            })
            .collect()
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.global) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e.user_message());
            return ExitCode::from(2);
        }
    };
    init_logging(cli.global.log_level.as_deref(), &config.log_level);
    init_thread_pool(&config);
    set_global_config(config);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &GlobalArgs) -> Result<AnalyticsConfig> {
    let mut config = AnalyticsConfig::load(args.config.as_deref())?;
    if let Some(url) = &args.redis_url {
        config.redis_url = url.clone();
    }
    if args.no_progress {
        config.enable_progress_bar = false;
    }
    if args.sequential {
        config.enable_parallel = false;
    }
    config.validate()?;
    Ok(config)
}

/// Logs go to stderr so stdout carries only results
fn init_logging(cli_level: Option<&str>, config_level: &str) {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config_level)),
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("warning: failed to install log subscriber: {}", e);
    }
}

fn init_thread_pool(config: &AnalyticsConfig) {
    #[cfg(feature = "parallel")]
    {
        if let Some(threads) = config.parallel_threads {
            if let Err(e) = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()
            {
                warn!(error = %e, "could not size the worker pool");
            }
        }
    }

    #[cfg(not(feature = "parallel"))]
    let _ = config;
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = global_config();
    let out = Output {
        format: cli.global.format,
        path: cli.global.output.clone(),
        pretty: !cli.global.compact,
    };

    if let Commands::InitConfig(args) = &cli.command {
        return cmd_init_config(args, &config);
    }

    let store = match RedisStore::connect_global() {
        Ok(store) => store,
        Err(e) => return out.failure(&e),
    };
    let analytics = DiabetesAnalytics::with_global_config(&store);
    let analytics = attach_progress(analytics, &config);

    match cli.command {
        Commands::Ping => {
            let status = analytics.ensure_connected().map(|_| PingStatus {
                status: "ok",
                redis_url: store.url().to_string(),
            });
            out.single(status)
        }
        Commands::Overview(args) => {
            if args.summary {
                return out.summary(analytics.overview(), PopulationOverview::print_summary);
            }
            out.single(analytics.overview())
        }
        Commands::AgeGroups => out.table(analytics.age_groups()),
        Commands::BmiCategories => out.table(analytics.bmi_categories()),
        Commands::GlucoseLevels => out.table(analytics.glucose_levels()),
        Commands::Pregnancy => out.single(analytics.pregnancy()),
        Commands::HighRisk => out.single(analytics.high_risk()),
        Commands::TopGlucose => out.table(analytics.top_glucose()),
        Commands::TopBmi => out.table(analytics.top_bmi()),
        Commands::Ranges(args) => match args.metric {
            Some(metric) => out.table(analytics.range_breakdown(metric.into())),
            None => match out.format {
                OutputFormat::Json => out.single(analytics.detailed_range_analysis()),
                OutputFormat::Csv => {
                    out.table(analytics.detailed_range_analysis().map(MetricRangeRow::rows))
                }
            },
        },
        Commands::AgeGlucose => out.table(analytics.age_glucose_correlation()),
        Commands::Telemetry(args) => {
            if args.summary {
                return out.summary(analytics.telemetry(), TelemetrySnapshot::print_summary);
            }
            out.single(analytics.telemetry())
        }
        Commands::Report => {
            if out.format != OutputFormat::Json {
                bail!("the report is only available as JSON");
            }
            let report = full_report(&analytics)?;
            out.write_json(&report)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::InitConfig(args) => cmd_init_config(&args, &config),
    }
}

#[derive(Serialize)]
struct PingStatus {
    status: &'static str,
    redis_url: String,
}

fn attach_progress<'a>(
    analytics: DiabetesAnalytics<'a, RedisStore>,
    config: &AnalyticsConfig,
) -> DiabetesAnalytics<'a, RedisStore> {
    #[cfg(feature = "progress")]
    {
        use indicatif::{ProgressBar, ProgressStyle};

        if config.enable_progress_bar {
            let pb = ProgressBar::new(0);
            match ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} patients ({eta})")
            {
                Ok(style) => pb.set_style(style.progress_chars("#>-")),
                Err(e) => debug!(error = %e, "invalid progress template"),
            }
            return analytics.with_scan_progress(move |p| {
                pb.set_length(p.total as u64);
                pb.set_position(p.scanned as u64);
                if p.scanned >= p.total {
                    pb.finish_and_clear();
                }
            });
        }
    }

    #[cfg(not(feature = "progress"))]
    let _ = config;

    analytics
}

fn cmd_init_config(args: &InitConfigArgs, config: &AnalyticsConfig) -> anyhow::Result<ExitCode> {
    let path = match &args.path {
        Some(path) => path.clone(),
        None => AnalyticsConfig::default_config_path()
            .context("no user config directory on this platform; pass --path")?,
    };
    if path.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let config = match args.preset {
        Some(preset) => {
            let base = match preset {
                Preset::Performance => AnalyticsConfig::performance(),
                Preset::Safe => AnalyticsConfig::safe(),
            };
            ConfigBuilder::from(base)
                .redis_url(config.redis_url.clone())
                .keys(config.keys.clone())
                .build()
        }
        None => config.clone(),
    };
    config
        .save(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote configuration to {}", path.display());
    Ok(ExitCode::SUCCESS)
}

/// Where and how results are rendered
struct Output {
    format: OutputFormat,
    path: Option<PathBuf>,
    pretty: bool,
}

impl Output {
    fn writer(&self) -> anyhow::Result<Box<dyn Write>> {
        Ok(match &self.path {
            Some(path) => Box::new(BufWriter::new(
                File::create(path).with_context(|| format!("creating {}", path.display()))?,
            )),
            None => Box::new(io::stdout().lock()),
        })
    }

    /// A single result record
    fn single<T: Serialize>(&self, result: Result<T>) -> anyhow::Result<ExitCode> {
        match self.format {
            OutputFormat::Json => self.json(&result),
            OutputFormat::Csv => self.csv(result.map(|record| vec![record])),
        }
    }

    /// A sequence of result rows
    fn table<T: Serialize>(&self, result: Result<Vec<T>>) -> anyhow::Result<ExitCode> {
        match self.format {
            OutputFormat::Json => self.json(&result),
            OutputFormat::Csv => self.csv(result),
        }
    }

    fn summary<T>(&self, result: Result<T>, print: fn(&T)) -> anyhow::Result<ExitCode> {
        match result {
            Ok(value) => {
                print(&value);
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => self.failure(&e),
        }
    }

    fn json<T: Serialize>(&self, result: &Result<T>) -> anyhow::Result<ExitCode> {
        self.write_json(&response_json(result)?)?;
        match result {
            Ok(_) => Ok(ExitCode::SUCCESS),
            Err(e) => {
                eprintln!("{}", e.user_message());
                Ok(exit_code(e))
            }
        }
    }

    fn csv<T: Serialize>(&self, result: Result<Vec<T>>) -> anyhow::Result<ExitCode> {
        match result {
            Ok(rows) => {
                let mut writer = self.writer()?;
                CsvExporter::new().export_rows(&rows, &mut *writer)?;
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => self.failure(&e),
        }
    }

    fn write_json(&self, value: &serde_json::Value) -> anyhow::Result<()> {
        let mut writer = self.writer()?;
        JsonExporter::new()
            .with_pretty_print(self.pretty)
            .export_value(value, &mut *writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Structured error payload on stdout (JSON only), suggestion on stderr
    fn failure(&self, error: &AnalyticsError) -> anyhow::Result<ExitCode> {
        if self.format == OutputFormat::Json {
            self.write_json(&serde_json::to_value(error.to_failure())?)?;
        }
        eprintln!("{}", error.user_message());
        Ok(exit_code(error))
    }
}

fn exit_code(error: &AnalyticsError) -> ExitCode {
    if error.is_connectivity() {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}
