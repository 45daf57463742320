use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use state_sqlite::{Db, DomainFilter};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;
mod lock;
mod report;
mod run;

use config::{RunOverrides, RunSettings};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json, Jsonl }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Filter { All, Active, Live, Inactive }

impl From<Filter> for DomainFilter {
    fn from(f: Filter) -> Self {
        match f {
            Filter::All => DomainFilter::All,
            Filter::Active => DomainFilter::Active,
            Filter::Live => DomainFilter::Live,
            Filter::Inactive => DomainFilter::Inactive,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "easm", version, about = "Incremental external attack surface inventory")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./easm.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// State database path (default: run.database from config, else ./easm.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Discover, reconcile against stored state and notify the delta
    Run {
        /// fast (passive only) or complete (passive, brute force, permutations)
        #[arg(long)]
        mode: Option<String>,
        /// Seed domain; repeatable. Replaces run.domains from the config.
        #[arg(long = "domain", value_name = "DOMAIN")]
        domains: Vec<String>,
        /// Incoming-webhook URL for delta messages
        #[arg(long)]
        webhook: Option<String>,
        /// Wordlist for complete-mode brute force
        #[arg(long)]
        wordlist: Option<PathBuf>,
        /// Resolver threads for dnsx
        #[arg(long)]
        threads: Option<usize>,
        /// Write responsive hosts as CSV here (previous report is rotated)
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
        /// Summary format: text or json
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// List stored domain records
    List {
        #[arg(long, value_enum, default_value_t = Filter::All)]
        filter: Filter,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Export stored domain records as CSV
    Export {
        /// Output file (overwrites). Stdout if omitted.
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = Filter::All)]
        filter: Filter,
    },
    /// Show recent runs from the ledger
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    dispatch(cli)
}

fn dispatch(cli: Cli) -> Result<()> {
    let cfg = config::load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Version => {
            println!("easm {} (core {})", env!("CARGO_PKG_VERSION"), easm_core::version());
        }
        Commands::Run { mode, domains, webhook, wordlist, threads, report, format } => {
            let over = RunOverrides { mode, domains, webhook, wordlist, threads, database: cli.db, report };
            let settings = RunSettings::resolve(cfg.as_ref(), &over)?;
            let _lock = lock::RunLock::acquire(&settings.database)?;
            let db = Db::open_or_create(&settings.database)
                .with_context(|| format!("opening state database {}", settings.database.display()))?;
            let stages = run::Stages::from_settings(&settings);
            let rt = tokio::runtime::Runtime::new()?;
            let outcome = rt.block_on(run::execute(settings.mode, &settings.seeds, &stages, &db));
            let closed = db.close();
            let summary = outcome?;
            closed.context("closing state database")?;
            if let Some(path) = &settings.report {
                if let Err(e) = report::write_live_report(path, &summary.live_hosts) {
                    tracing::warn!(error = %format!("{e:#}"), "live host report not written");
                }
            }
            print_summary(&summary, format)?;
        }
        Commands::List { filter, format } => {
            let db = open_existing(&config::database_path(cfg.as_ref(), cli.db.as_deref()))?;
            let records = db.list(filter.into())?;
            match format {
                OutputFormat::Text => {
                    for r in &records {
                        println!(
                            "{}\tactive={}\tlive={}\tfirst_seen={}\tlast_seen={}",
                            r.domain, r.active, r.live, r.first_seen, r.last_seen
                        );
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
                OutputFormat::Jsonl => {
                    for r in &records {
                        println!("{}", serde_json::to_string(r)?);
                    }
                }
            }
        }
        Commands::Export { out, filter } => {
            let db = open_existing(&config::database_path(cfg.as_ref(), cli.db.as_deref()))?;
            let n = match &out {
                Some(path) => {
                    let f = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
                    state_sqlite::export_domains_csv(&db, filter.into(), std::io::BufWriter::new(f))?
                }
                None => state_sqlite::export_domains_csv(&db, filter.into(), std::io::stdout().lock())?,
            };
            tracing::info!(rows = n, "export finished");
        }
        Commands::Runs { limit, format } => {
            let db = open_existing(&config::database_path(cfg.as_ref(), cli.db.as_deref()))?;
            let runs = db.recent_runs(limit)?;
            match format {
                OutputFormat::Text => {
                    for r in &runs {
                        let t = &r.totals;
                        println!(
                            "{} {} {:<8} seeds={} candidates={} +active={} +live={} -active={} -live={} errors={}{}",
                            r.run_id,
                            r.started_at,
                            r.mode,
                            r.seeds.join(","),
                            t.candidate_count,
                            t.new_active,
                            t.new_live,
                            t.deprecated_active,
                            t.deprecated_live,
                            t.error_count,
                            if r.finished_at.is_none() { " (unfinished)" } else { "" }
                        );
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&runs)?),
                OutputFormat::Jsonl => {
                    for r in &runs {
                        println!("{}", serde_json::to_string(r)?);
                    }
                }
            }
        }
    }
    Ok(())
}

/// Read-only commands never create a database.
fn open_existing(path: &Path) -> Result<Db> {
    if !path.exists() {
        bail!("no state database at {}; run `easm run` first", path.display());
    }
    Db::open_or_create(path).with_context(|| format!("opening state database {}", path.display()))
}

fn print_summary(report: &run::RunReport, format: OutputFormat) -> Result<()> {
    let stdout = std::io::stdout();
    let mut w = stdout.lock();
    match format {
        OutputFormat::Text => {
            writeln!(w, "run {} ({}): {} candidates", report.run_id, report.mode, report.candidate_count)?;
            let d = &report.delta;
            for (label, list) in [
                ("new active", &d.new_active),
                ("new live", &d.new_live),
                ("deprecated active", &d.deprecated_active),
                ("deprecated live", &d.deprecated_live),
            ] {
                writeln!(w, "  {label:<18} {}", list.len())?;
                for name in list {
                    writeln!(w, "    {name}")?;
                }
            }
            if !report.failures.is_empty() {
                writeln!(w, "  errors             {}", report.failures.len())?;
                for f in &report.failures {
                    writeln!(w, "    [{}] {}: {}", f.code, f.scope, f.message)?;
                }
            }
        }
        OutputFormat::Json | OutputFormat::Jsonl => writeln!(w, "{}", serde_json::to_string(report)?)?,
    }
    Ok(())
}
