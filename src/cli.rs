//! CLI definition and dispatch.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::file_output_adapter::{render_summary, FileOutputAdapter};
#[cfg(feature = "png")]
use crate::adapters::png_chart_adapter::PngChartAdapter;
use crate::adapters::svg_chart_adapter::SvgChartAdapter;
use crate::domain::backtest::{collect_candidates, run_backtest as run_engine, BacktestPorts};
use crate::domain::config::{BacktestConfig, ChartFormat, Timeframe};
use crate::domain::config_validation::{build_backtest_config, ConfigOverrides};
use crate::domain::error::ScreenerError;
use crate::domain::pattern::{PatternSpec, ENTRY_PATTERNS, EXIT_PATTERNS};
use crate::domain::query::build_query;
use crate::domain::screen::LlmScreen;
use crate::domain::stats::TotalStats;
use crate::ports::chart_port::ChartPort;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::output_port::OutputPort;
use crate::ports::query_port::QueryPort;

#[derive(Parser, Debug)]
#[command(name = "intrascreen", about = "Intraday pattern screening backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Override [backtest] ticker
        #[arg(long)]
        ticker: Option<String>,
        /// Override [backtest] start_date (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        from: Option<NaiveDate>,
        /// Override [backtest] end_date (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        to: Option<NaiveDate>,
        /// Keep per-call LLM responses in candidate reports
        #[arg(long)]
        debug: bool,
        /// Validate the config and print the pattern query without running
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a backtest configuration
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List the available entry and exit patterns
    ListPatterns,
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{raw}' (expected YYYY-MM-DD)"))
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            ticker,
            from,
            to,
            debug,
            dry_run,
        } => {
            let overrides = ConfigOverrides {
                ticker,
                start_date: from,
                end_date: to,
                debug,
            };
            if dry_run {
                run_dry_run(&config, &overrides)
            } else {
                run_backtest(&config, &overrides)
            }
        }
        Command::Validate { config } => run_validate(&config),
        Command::ListPatterns => run_list_patterns(),
    }
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = ScreenerError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

fn load_backtest_config(
    path: &PathBuf,
    overrides: &ConfigOverrides,
) -> Result<(FileConfigAdapter, BacktestConfig), ExitCode> {
    eprintln!("Loading config from {}", path.display());
    let adapter = load_config(path)?;
    let config = build_backtest_config(&adapter, overrides).map_err(|e| {
        eprintln!("error: {e}");
        ExitCode::from(&e)
    })?;
    Ok((adapter, config))
}

/// Data source and optional query engine selected by the config.
pub struct Sources {
    pub data: Arc<dyn DataPort>,
    pub query: Option<Arc<dyn QueryPort>>,
}

/// `[csv] dir` selects flat files with in-process pattern scanning;
/// otherwise `[sqlite] path` serves both bars and the pattern query.
pub fn open_sources(config: &dyn ConfigPort) -> Result<Sources, ScreenerError> {
    if config.get_string("csv", "dir").is_some() {
        return Ok(Sources {
            data: Arc::new(CsvAdapter::from_config(config)?),
            query: None,
        });
    }

    #[cfg(feature = "sqlite")]
    {
        use crate::adapters::sqlite_adapter::SqliteAdapter;

        let sqlite = Arc::new(SqliteAdapter::from_config(config)?);
        Ok(Sources {
            data: sqlite.clone(),
            query: Some(sqlite),
        })
    }

    #[cfg(not(feature = "sqlite"))]
    {
        Err(ScreenerError::ConfigMissing {
            section: "csv".into(),
            key: "dir".into(),
        })
    }
}

/// An LLM screen for enabled configs; `None` passes every candidate through.
pub fn build_screen(
    adapter: &dyn ConfigPort,
    config: &BacktestConfig,
) -> Result<Option<LlmScreen>, ScreenerError> {
    if !config.screen.enabled {
        return Ok(None);
    }

    #[cfg(feature = "openai")]
    {
        use crate::adapters::openai_llm_adapter::{LlmConfig, OpenAiLlmAdapter};

        let client = OpenAiLlmAdapter::new(LlmConfig::from_config(adapter)?)?;
        Ok(Some(LlmScreen::new(Arc::new(client), config.screen.clone())))
    }

    #[cfg(not(feature = "openai"))]
    {
        let _ = adapter;
        Err(ScreenerError::ConfigInvalid {
            section: "llm".into(),
            key: "enabled".into(),
            reason: "this build has no LLM client (enable the openai feature)".into(),
        })
    }
}

fn run_backtest(config_path: &PathBuf, overrides: &ConfigOverrides) -> ExitCode {
    let (adapter, config) = match load_backtest_config(config_path, overrides) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };

    let result = open_sources(&adapter).and_then(|sources| {
        let screen = build_screen(&adapter, &config)?;
        execute(&config, &sources, screen.as_ref())
    });

    match result {
        Ok(stats) => {
            println!("{}", render_summary(&config, &stats));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

/// Run the whole pipeline on a fresh runtime. Ctrl-C cancels the run.
pub fn execute(
    config: &BacktestConfig,
    sources: &Sources,
    screen: Option<&LlmScreen>,
) -> Result<TotalStats, ScreenerError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    let rows = collect_candidates(config, sources.query.as_deref(), sources.data.as_ref())?;

    let chart = chart_renderer(config.charts.format);
    let output = FileOutputAdapter::new(config.output.dir.clone());
    let ports = BacktestPorts {
        data: sources.data.as_ref(),
        chart: Some(chart.as_ref()),
        output: Some(&output as &dyn OutputPort),
        screen,
    };

    let stats = runtime.block_on(run_engine(config, rows, &ports, &cancel));
    runtime.shutdown_background();
    stats
}

/// Renderer for the configured chart format.
pub fn chart_renderer(format: ChartFormat) -> Box<dyn ChartPort> {
    match format {
        #[cfg(feature = "png")]
        ChartFormat::Png => Box::new(PngChartAdapter::new()),
        #[cfg(not(feature = "png"))]
        ChartFormat::Png => {
            warn!("png charts need the png feature, rendering svg instead");
            Box::new(SvgChartAdapter::new())
        }
        ChartFormat::Svg => Box::new(SvgChartAdapter::new()),
    }
}

pub fn run_dry_run(config_path: &PathBuf, overrides: &ConfigOverrides) -> ExitCode {
    let (_, config) = match load_backtest_config(config_path, overrides) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };
    eprintln!("Config validated successfully");
    print_config(&config);
    eprintln!("\nPattern query:");
    println!("{}", build_query(&config));
    ExitCode::SUCCESS
}

fn run_validate(config_path: &PathBuf) -> ExitCode {
    let (_, config) = match load_backtest_config(config_path, &ConfigOverrides::default()) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };
    print_config(&config);
    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}

fn print_config(config: &BacktestConfig) {
    eprintln!("\nTicker:     {}", config.ticker);
    eprintln!("Range:      {} to {}", config.start_date, config.end_date);
    eprintln!("Timeframe:  {}", config.timeframe);
    eprintln!("Direction:  {}", config.direction);
    eprintln!("Entry:      {}", config.entry.describe());
    eprintln!("Exit:       {}", config.exit.describe());
    if config.screen.enabled {
        eprintln!(
            "LLM screen: {} call(s), {} needed to agree, {:.0}s timeout",
            config.screen.num_calls,
            config.screen.agreement_threshold,
            config.screen.call_timeout.as_secs_f64()
        );
    } else {
        eprintln!("LLM screen: disabled (all matches pass through)");
    }
}

fn run_list_patterns() -> ExitCode {
    println!("Entry patterns ([entry] pattern = ...):");
    for name in ENTRY_PATTERNS {
        println!("  {name}");
    }
    println!("\nExit patterns ([exit] pattern = ...):");
    for name in EXIT_PATTERNS {
        println!("  {name}");
    }
    let timeframes: Vec<&str> = Timeframe::ALL.iter().map(|t| t.as_str()).collect();
    println!("\nTimeframes: {}", timeframes.join(", "));
    ExitCode::SUCCESS
}
