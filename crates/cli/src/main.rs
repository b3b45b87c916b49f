// GorodIndex CLI - small-city data pipeline
// fetch: inputs → reconcile → geocode → feature counts → one store commit

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use env_logger::Env;

use gorodindex_cli::exit_codes::{
    config_exit_code, load_exit_code, pipeline_exit_code, store_exit_code, EXIT_ERROR,
    EXIT_NOT_FOUND, EXIT_SUCCESS, EXIT_USAGE,
};
use gorodindex_cli::{load_and_reconcile, Pipeline, PipelineError, RunOptions};
use gorodindex_config::{ConfigError, Settings};
use gorodindex_io::{load_unemployment, LoadError, LocalityFilter, Store, StoreError};
use gorodindex_osm_client::{CancelToken, ThreadSleeper};
use gorodindex_recon::UnemploymentTable;

#[derive(Parser)]
#[command(name = "gorodindex")]
#[command(about = "Collect tax, population, unemployment and infrastructure data for small Russian cities")]
#[command(version)]
struct Cli {
    /// Settings file (default: <config dir>/gorodindex/settings.toml)
    #[arg(long, global = true, env = "GORODINDEX_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short = 'v', global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Warnings and errors only
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full batch and commit it to the store
    #[command(after_help = "\
Examples:
  gorodindex fetch
  gorodindex fetch --limit 5 --dry-run
  gorodindex fetch --deadline-secs 3600
  GORODINDEX_EMAIL=ops@example.org gorodindex fetch")]
    Fetch {
        /// Enrich but do not commit; print the batch as JSON
        #[arg(long)]
        dry_run: bool,

        /// Process only the first N reconciled cities
        #[arg(long, value_name = "N")]
        limit: Option<usize>,

        /// Abandon the run (without committing) after S seconds
        #[arg(long, value_name = "S")]
        deadline_secs: Option<u64>,
    },

    /// Load inputs and print the reconciled working set
    #[command(after_help = "\
Examples:
  gorodindex reconcile
  gorodindex reconcile --json | jq '.report'")]
    Reconcile {
        /// Print working set and report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Geocode, classify and match a single city
    #[command(after_help = "\
Examples:
  gorodindex locate Вязьма
  gorodindex locate Абаза --region Хакасия")]
    Locate {
        /// City name, without the г. prefix
        city: String,

        /// Region appended to the geocoding query
        #[arg(long)]
        region: Option<String>,
    },

    /// List stored localities, largest first
    #[command(after_help = "\
Examples:
  gorodindex list
  gorodindex list --region 'Смоленская область'
  gorodindex list --min 20000 --max 50000 --json")]
    List {
        /// Exact region label
        #[arg(long)]
        region: Option<String>,

        /// Minimum population (inclusive)
        #[arg(long, value_name = "N")]
        min: Option<u32>,

        /// Maximum population (inclusive)
        #[arg(long, value_name = "N")]
        max: Option<u32>,

        /// Include inactive localities
        #[arg(long)]
        all: bool,

        /// JSON output
        #[arg(long)]
        json: bool,
    },

    /// Print the effective settings as TOML
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let result = Settings::load(cli.config.as_deref())
        .map_err(CliError::config)
        .and_then(|settings| match cli.command {
            Commands::Fetch {
                dry_run,
                limit,
                deadline_secs,
            } => cmd_fetch(&settings, dry_run, limit, deadline_secs),
            Commands::Reconcile { json } => cmd_reconcile(&settings, json),
            Commands::Locate { city, region } => cmd_locate(&settings, &city, region.as_deref()),
            Commands::List {
                region,
                min,
                max,
                all,
                json,
            } => cmd_list(
                &settings,
                LocalityFilter {
                    region,
                    population_min: min,
                    population_max: max,
                    include_inactive: all,
                },
                json,
            ),
            Commands::Config => cmd_config(&settings),
        });

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    pub fn config(err: ConfigError) -> Self {
        let hint = match &err {
            ConfigError::Validation(_) => {
                Some("fix the settings file; `gorodindex config` shows effective values".to_string())
            }
            _ => None,
        };
        Self { code: config_exit_code(&err), message: err.to_string(), hint }
    }

    pub fn load(err: LoadError) -> Self {
        let hint = match &err {
            LoadError::MissingFile { .. } => {
                Some("set [inputs] data_dir or the file names in the settings file".to_string())
            }
            _ => None,
        };
        Self { code: load_exit_code(&err), message: err.to_string(), hint }
    }

    pub fn store(err: StoreError) -> Self {
        Self { code: store_exit_code(&err), message: err.to_string(), hint: None }
    }

    pub fn pipeline(err: PipelineError) -> Self {
        match err {
            PipelineError::Load(e) => Self::load(e),
            PipelineError::Config(e) => Self::config(e),
            PipelineError::Store(e) => Self::store(e),
            other => {
                let hint = match &other {
                    PipelineError::Cancelled => {
                        Some("raise --deadline-secs or use --limit".to_string())
                    }
                    _ => None,
                };
                Self { code: pipeline_exit_code(&other), message: other.to_string(), hint }
            }
        }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CliError::io(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

// ============================================================================
// fetch
// ============================================================================

fn cmd_fetch(
    settings: &Settings,
    dry_run: bool,
    limit: Option<usize>,
    deadline_secs: Option<u64>,
) -> Result<(), CliError> {
    let cancel = match deadline_secs {
        Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
        None => CancelToken::new(),
    };
    let opts = RunOptions { dry_run, limit, cancel };

    let pipeline =
        Pipeline::new(settings, Arc::new(ThreadSleeper::default())).map_err(CliError::pipeline)?;

    let (inputs, reconciliation) = load_and_reconcile(settings).map_err(CliError::pipeline)?;

    let mut store = if dry_run {
        None
    } else {
        Some(Store::open(&settings.store_path).map_err(CliError::store)?)
    };

    let (summary, batch) = pipeline
        .run_loaded(&inputs, reconciliation, store.as_mut(), &opts)
        .map_err(CliError::pipeline)?;

    if dry_run {
        print_json(&batch)?;
    } else {
        eprintln!(
            "{} of {} cities committed to {}",
            summary.committed,
            summary.candidates,
            settings.store_path.display()
        );
    }
    Ok(())
}

// ============================================================================
// reconcile
// ============================================================================

fn cmd_reconcile(settings: &Settings, json: bool) -> Result<(), CliError> {
    let (_, reconciliation) = load_and_reconcile(settings).map_err(CliError::pipeline)?;

    if json {
        return print_json(&reconciliation);
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for city in &reconciliation.cities {
        writeln!(
            out,
            "{}\t{}\t{}\t{}",
            city.oktmo, city.name, city.population, city.ndfl_total
        )
        .map_err(|e| CliError::io(e.to_string()))?;
    }
    let r = &reconciliation.report;
    eprintln!(
        "{} kept; {} unrecognised, {} invalid, {} out of range, {} duplicates, {} tax cities unmatched",
        r.kept,
        r.unrecognized_label,
        r.invalid_population,
        r.out_of_range,
        r.duplicates_collapsed,
        r.tax_without_population
    );
    Ok(())
}

// ============================================================================
// locate
// ============================================================================

fn cmd_locate(settings: &Settings, city: &str, region: Option<&str>) -> Result<(), CliError> {
    let path = settings.inputs.unemployment_path();
    let rates = if path.is_file() {
        load_unemployment(&path, settings.data_year)
            .map_err(CliError::load)?
            .0
    } else {
        log::warn!("{} not found; unemployment will not be matched", path.display());
        UnemploymentTable::new()
    };

    let pipeline =
        Pipeline::new(settings, Arc::new(ThreadSleeper::default())).map_err(CliError::pipeline)?;
    let located = pipeline
        .locate(city, region, &rates, &CancelToken::new())
        .map_err(|e| CliError {
            code: EXIT_NOT_FOUND,
            message: format!("cannot geocode '{}': {}", city, e),
            hint: None,
        })?;
    print_json(&located)
}

// ============================================================================
// list
// ============================================================================

fn cmd_list(settings: &Settings, filter: LocalityFilter, json: bool) -> Result<(), CliError> {
    if !settings.store_path.is_file() {
        return Err(CliError {
            code: EXIT_USAGE,
            message: format!("store not found: {}", settings.store_path.display()),
            hint: None,
        }
        .with_hint("run `gorodindex fetch` first"));
    }

    let store = Store::open(&settings.store_path).map_err(CliError::store)?;
    let rows = store.localities(&filter).map_err(CliError::store)?;

    if json {
        return print_json(&rows);
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for row in &rows {
        let per_capita = row
            .ndfl_per_capita()
            .map(|v| format!("{:.0}", v))
            .unwrap_or_else(|| "-".into());
        let unemployment = row
            .economics
            .as_ref()
            .and_then(|e| e.unemployment_rate)
            .map(|v| format!("{:.1}", v))
            .unwrap_or_else(|| "-".into());
        let infra = row
            .infrastructure
            .map(|i| format!("{}/{}/{}", i.schools, i.gas_stations, i.bus_stops))
            .unwrap_or_else(|| "-".into());
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            row.oktmo, row.city, row.region, row.population, per_capita, unemployment, infra
        )
        .map_err(|e| CliError::io(e.to_string()))?;
    }
    Ok(())
}

// ============================================================================
// config
// ============================================================================

fn cmd_config(settings: &Settings) -> Result<(), CliError> {
    let text = settings.to_toml().map_err(CliError::config)?;
    print!("{}", text);
    Ok(())
}
