//! CLI struct definitions and dispatch for the mirante binary.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::MiranteError;
use crate::core::store::Store;
use crate::core::time::command_envelope;
use crate::engine::Validity;
use crate::engine::compute;
use crate::engine::record;
use crate::engine::registry::Registry;
use crate::engine::schedule;
use crate::engine::source::{self, SourceKind};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "mirante",
    version = env!("CARGO_PKG_VERSION"),
    about = "Mirante is the daemonless indicator engine of the Brazilian Open Science observatory: it aggregates directory and article records into versioned, deterministic statistical indicators."
)]
pub struct Cli {
    /// Base directory holding the store (defaults to the working directory).
    #[clap(long, global = true)]
    pub dir: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize the store and database schema.
    Init,
    /// Bulk-load source records from a JSONL file.
    Load {
        /// Target collection: education, event, infrastructure, policy, article.
        #[clap(long)]
        kind: String,
        #[clap(long)]
        file: PathBuf,
    },
    /// Inspect the controlled vocabularies.
    Refs(RefsCli),
    /// Run one computation combination immediately.
    Compute(ComputeCli),
    /// Plan, list, and run the scheduled computation combinations.
    Schedule(ScheduleCli),
    /// Inspect and maintain indicator versions.
    Indicator(IndicatorCli),
    /// Re-check directory classifications and flag mismatches TO MODERATE.
    Moderate,
}

#[derive(clap::Args, Debug)]
pub struct RefsCli {
    #[clap(subcommand)]
    pub command: RefsCommand,
}

#[derive(Subcommand, Debug)]
pub enum RefsCommand {
    /// List one reference entity table.
    List {
        /// action, practice, institution, location, thematic-area
        #[clap(long)]
        entity: String,
    },
    /// Register an action (idempotent by name).
    AddAction {
        #[clap(long)]
        name: String,
        #[clap(long)]
        code: Option<String>,
    },
    /// Register a practice (idempotent by name).
    AddPractice {
        #[clap(long)]
        name: String,
        #[clap(long)]
        code: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
pub struct ComputeCli {
    #[clap(subcommand)]
    pub command: ComputeCommand,
}

#[derive(Subcommand, Debug)]
pub enum ComputeCommand {
    /// Directory action counts: base ranking, cross-tab, or per-context.
    DirectoryCounts {
        /// Secondary category id for a cross-tab (e.g. CA_PRACTICE).
        #[clap(long)]
        category: Option<String>,
        /// Context id for per-value slicing (e.g. INSTITUTION).
        #[clap(long)]
        context: Option<String>,
    },
    /// Distinct open-access journals per category value.
    JournalCounts {
        #[clap(long)]
        category: String,
        #[clap(long)]
        start_year: Option<i64>,
    },
    /// Year × category evolution of Brazilian open-access production.
    ProductionEvolution {
        #[clap(long)]
        category: String,
        #[clap(long)]
        context: Option<String>,
        #[clap(long)]
        start_year: i64,
        #[clap(long)]
        end_year: i64,
    },
}

#[derive(clap::Args, Debug)]
pub struct ScheduleCli {
    #[clap(subcommand)]
    pub command: ScheduleCommand,
}

#[derive(Subcommand, Debug)]
pub enum ScheduleCommand {
    /// Enumerate the combinations and upsert one task per combination.
    Plan {
        /// Observation window length in years for evolution tasks.
        #[clap(long, default_value_t = 5)]
        years: i64,
    },
    /// List the scheduled tasks.
    List {
        #[clap(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Execute every enabled task; failures are recorded and skipped.
    Run,
}

#[derive(clap::Args, Debug)]
pub struct IndicatorCli {
    #[clap(subcommand)]
    pub command: IndicatorCommand,
}

#[derive(Subcommand, Debug)]
pub enum IndicatorCommand {
    /// List indicator versions.
    List {
        #[clap(long)]
        code: Option<String>,
        /// CURRENT or OUTDATED.
        #[clap(long)]
        validity: Option<String>,
        #[clap(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Show one indicator version.
    Get {
        #[clap(long)]
        id: String,
    },
    /// Delete every indicator version, detaching links and datasets first.
    DeleteAll,
}

pub fn run(cli: Cli) -> Result<(), MiranteError> {
    let base = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir().map_err(MiranteError::IoError)?,
    };
    let store = Store::under(&base);

    match cli.command {
        Command::Init => {
            db::initialize_db(&store)?;
            println!(
                "{}",
                command_envelope(
                    "init",
                    "ok",
                    serde_json::json!({ "store": store.root.to_string_lossy() })
                )
            );
            Ok(())
        }
        Command::Load { kind, file } => load_records(&store, &kind, &file),
        Command::Refs(refs) => run_refs(&store, refs),
        Command::Compute(compute_cli) => run_compute(&store, compute_cli),
        Command::Schedule(schedule_cli) => run_schedule(&store, schedule_cli),
        Command::Indicator(indicator_cli) => run_indicator(&store, indicator_cli),
        Command::Moderate => {
            let broker = DbBroker::new(&store.root);
            let db_path = db::indicator_db_path(&store.root);
            let summary = broker.with_conn(&db_path, "mirante", None, "moderate.sweep", |conn| {
                source::moderation_sweep(conn)
            })?;
            println!(
                "{}",
                command_envelope(
                    "moderate",
                    "ok",
                    serde_json::json!({
                        "confirmed": summary.confirmed,
                        "flagged": summary.flagged,
                    })
                )
            );
            Ok(())
        }
    }
}

/// No schema validation happens here: a line that does not parse is
/// counted and skipped.
fn load_records(store: &Store, kind: &str, file: &PathBuf) -> Result<(), MiranteError> {
    let kind = SourceKind::parse(kind)
        .ok_or_else(|| MiranteError::ValidationError(format!("unknown collection {}", kind)))?;
    let reader = BufReader::new(File::open(file).map_err(MiranteError::IoError)?);

    let broker = DbBroker::new(&store.root);
    let db_path = db::indicator_db_path(&store.root);
    let (loaded, skipped) = broker.with_conn(&db_path, "mirante", None, "load.records", |conn| {
        let mut loaded = 0u64;
        let mut skipped = 0u64;
        for line in reader.lines() {
            let line = line.map_err(MiranteError::IoError)?;
            if line.trim().is_empty() {
                continue;
            }
            let inserted = if kind == SourceKind::Article {
                serde_json::from_str::<source::ArticleRecord>(&line)
                    .map_err(MiranteError::JsonError)
                    .and_then(|rec| source::insert_article(conn, &rec))
            } else {
                serde_json::from_str::<source::DirectoryRecord>(&line)
                    .map_err(MiranteError::JsonError)
                    .and_then(|rec| source::insert_directory(conn, kind, &rec))
            };
            match inserted {
                Ok(_) => loaded += 1,
                Err(_) => skipped += 1,
            }
        }
        Ok((loaded, skipped))
    })?;

    println!(
        "{}",
        command_envelope(
            "load",
            "ok",
            serde_json::json!({
                "kind": kind.as_str(),
                "loaded": loaded,
                "skipped": skipped,
            })
        )
    );
    Ok(())
}

fn run_refs(store: &Store, refs: RefsCli) -> Result<(), MiranteError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::indicator_db_path(&store.root);
    match refs.command {
        RefsCommand::List { entity } => {
            let (table, columns) = match entity.as_str() {
                "action" => ("action", "name, COALESCE(code, '')"),
                "practice" => ("practice", "name, COALESCE(code, '')"),
                "institution" => ("institution", "name, COALESCE(state, '')"),
                "location" => ("location", "COALESCE(city, ''), COALESCE(state, '')"),
                "thematic-area" => (
                    "thematic_area",
                    "COALESCE(level0, ''), COALESCE(level1, '')",
                ),
                other => {
                    return Err(MiranteError::ValidationError(format!(
                        "unknown entity {}",
                        other
                    )));
                }
            };
            let rows = broker.with_conn(&db_path, "mirante", None, "refs.list", |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {} FROM {} ORDER BY 1", columns, table))?;
                let rows: Vec<(String, String)> = stmt
                    .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
                    .collect::<Result<_, _>>()?;
                Ok(rows)
            })?;
            if rows.is_empty() {
                println!("No {} entries.", entity);
            } else {
                for (a, b) in rows {
                    if b.is_empty() {
                        println!("{}", a);
                    } else {
                        println!("{} ({})", a.bold(), b);
                    }
                }
            }
            Ok(())
        }
        RefsCommand::AddAction { name, code } => {
            let id = broker.with_conn(&db_path, "mirante", None, "refs.add_action", |conn| {
                source::action_get_or_create(conn, &name, code.as_deref())
            })?;
            println!(
                "{}",
                command_envelope("refs.add-action", "ok", serde_json::json!({ "id": id }))
            );
            Ok(())
        }
        RefsCommand::AddPractice { name, code } => {
            let id = broker.with_conn(&db_path, "mirante", None, "refs.add_practice", |conn| {
                source::practice_get_or_create(conn, &name, code.as_deref())
            })?;
            println!(
                "{}",
                command_envelope("refs.add-practice", "ok", serde_json::json!({ "id": id }))
            );
            Ok(())
        }
    }
}

fn run_compute(store: &Store, compute_cli: ComputeCli) -> Result<(), MiranteError> {
    let registry = Registry::load(&store.root)?;
    let (cmd, ids) = match compute_cli.command {
        ComputeCommand::DirectoryCounts { category, context } => (
            "compute.directory-counts",
            compute::directory_counts(store, &registry, category.as_deref(), context.as_deref())?,
        ),
        ComputeCommand::JournalCounts {
            category,
            start_year,
        } => (
            "compute.journal-counts",
            compute::journal_counts(store, &registry, &category, start_year)?,
        ),
        ComputeCommand::ProductionEvolution {
            category,
            context,
            start_year,
            end_year,
        } => (
            "compute.production-evolution",
            compute::production_evolution(
                store,
                &registry,
                &category,
                context.as_deref(),
                start_year,
                end_year,
            )?,
        ),
    };
    println!(
        "{}",
        command_envelope(cmd, "ok", serde_json::json!({ "indicators": ids }))
    );
    Ok(())
}

fn run_schedule(store: &Store, schedule_cli: ScheduleCli) -> Result<(), MiranteError> {
    match schedule_cli.command {
        ScheduleCommand::Plan { years } => {
            let registry = Registry::load(&store.root)?;
            let plans = schedule::plan_tasks(&registry, crate::core::time::current_year(), years);
            let planned = schedule::upsert_tasks(store, &plans)?;
            println!(
                "{}",
                command_envelope(
                    "schedule.plan",
                    "ok",
                    serde_json::json!({ "planned": planned })
                )
            );
            Ok(())
        }
        ScheduleCommand::List { format } => {
            let tasks = schedule::list_tasks(store)?;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&tasks)?);
                }
                OutputFormat::Text => {
                    if tasks.is_empty() {
                        println!("No scheduled tasks. Run `mirante schedule plan` first.");
                    }
                    for task in tasks {
                        let slot = format!("{:02}:{:02}", task.run_at_hour, task.run_at_minute);
                        let status = task.last_status.unwrap_or_else(|| "never run".to_string());
                        let status = if status.starts_with("error") {
                            status.red().to_string()
                        } else {
                            status.green().to_string()
                        };
                        println!(
                            "{} [{}] p{} {} ({})",
                            task.name.bold(),
                            slot,
                            task.priority,
                            task.operation,
                            status
                        );
                    }
                }
            }
            Ok(())
        }
        ScheduleCommand::Run => {
            let registry = Registry::load(&store.root)?;
            let summary = schedule::run_tasks(store, &registry)?;
            println!(
                "{}",
                command_envelope(
                    "schedule.run",
                    "ok",
                    serde_json::json!({
                        "executed": summary.executed,
                        "failed": summary.failed,
                        "indicators": summary.indicators,
                    })
                )
            );
            Ok(())
        }
    }
}

fn run_indicator(store: &Store, indicator_cli: IndicatorCli) -> Result<(), MiranteError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::indicator_db_path(&store.root);
    match indicator_cli.command {
        IndicatorCommand::List {
            code,
            validity,
            format,
        } => {
            if let Some(v) = &validity {
                if Validity::parse(v).is_none() {
                    return Err(MiranteError::ValidationError(format!(
                        "unknown validity {}",
                        v
                    )));
                }
            }
            let rows = broker.with_conn(&db_path, "mirante", None, "indicator.list", |conn| {
                record::list_indicators(conn, code.as_deref(), validity.as_deref())
            })?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
                OutputFormat::Text => {
                    if rows.is_empty() {
                        println!("No indicators found.");
                    }
                    for row in rows {
                        let validity = row.validity.unwrap_or_default();
                        let validity = if validity == Validity::Current.as_str() {
                            validity.green().to_string()
                        } else {
                            validity.dimmed().to_string()
                        };
                        println!(
                            "{} seq={} [{}] {} {} (total: {})",
                            row.code[..12].bold(),
                            row.seq,
                            row.record_status,
                            validity,
                            row.title,
                            row.total.unwrap_or(0)
                        );
                    }
                }
            }
            Ok(())
        }
        IndicatorCommand::Get { id } => {
            let version = broker
                .with_conn(&db_path, "mirante", None, "indicator.get", |conn| {
                    crate::engine::chain::get_version(conn, &id)
                })?
                .ok_or_else(|| MiranteError::NotFound(format!("indicator {}", id)))?;
            println!("{}", serde_json::to_string_pretty(&version)?);
            Ok(())
        }
        IndicatorCommand::DeleteAll => {
            let deleted =
                broker.with_conn(&db_path, "mirante", None, "indicator.delete_all", |conn| {
                    record::delete_all(store, conn)
                })?;
            println!(
                "{}",
                command_envelope(
                    "indicator.delete-all",
                    "ok",
                    serde_json::json!({ "deleted": deleted })
                )
            );
            Ok(())
        }
    }
}
