//! Scheduling glue: enumerate the category × context × time-range
//! combinations and keep one task row per combination.
//!
//! Tasks carry only primitive, serializable parameters. Re-planning is
//! idempotent: an existing task is updated in place, keyed by name. The
//! minute offsets that spread write load are derived from the task-name
//! hash, so they are pseudo-random but stable across plans.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::MiranteError;
use crate::core::store::Store;
use crate::engine::compute;
use crate::engine::registry::Registry;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const OP_DIRECTORY_COUNTS: &str = "directory_counts";
pub const OP_JOURNAL_COUNTS: &str = "journal_counts";
pub const OP_PRODUCTION_EVOLUTION: &str = "production_evolution";

// Directory tasks run within 10 minutes, article tasks within 30.
const DIRECTORY_OFFSET_RANGE: u64 = 10;
const PRODUCTION_OFFSET_RANGE: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub name: String,
    pub operation: String,
    pub params: serde_json::Value,
    pub priority: i64,
    pub offset_minutes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledTask {
    pub name: String,
    pub operation: String,
    pub params: serde_json::Value,
    pub run_at_hour: i64,
    pub run_at_minute: i64,
    pub priority: i64,
    pub enabled: bool,
    pub last_run: Option<String>,
    pub last_status: Option<String>,
}

/// Offset in [1, range] derived from the task name.
fn offset_minutes(name: &str, range: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let mut value: u64 = 0;
    for byte in &digest[..8] {
        value = (value << 8) | *byte as u64;
    }
    value % range + 1
}

/// Enumerate every computation combination for one scheduling run.
///
/// `current_year` is read from the clock at the CLI boundary; it enters
/// the task parameters, never the indicator code derivation directly.
pub fn plan_tasks(registry: &Registry, current_year: i64, years_number: i64) -> Vec<TaskPlan> {
    let mut plans = Vec::new();
    let mut push = |name: String, operation: &str, params: serde_json::Value, priority: i64, range: u64| {
        plans.push(TaskPlan {
            offset_minutes: offset_minutes(&name, range),
            name,
            operation: operation.to_string(),
            params,
            priority,
        });
    };

    // Directory counts without context: the base ranking plus one
    // cross-tab per secondary category.
    push(
        "directory-counts".to_string(),
        OP_DIRECTORY_COUNTS,
        serde_json::json!({ "category": null, "context": null }),
        1,
        DIRECTORY_OFFSET_RANGE,
    );
    for category in ["CA_PRACTICE", "THEMATIC_AREA"] {
        if registry.category(category).is_none() {
            continue;
        }
        push(
            format!("directory-counts-{}", category.to_lowercase()),
            OP_DIRECTORY_COUNTS,
            serde_json::json!({ "category": category, "context": null }),
            1,
            DIRECTORY_OFFSET_RANGE,
        );
    }

    // Directory counts sliced by context.
    for context in ["THEMATIC_AREA", "LOCATION", "INSTITUTION"] {
        if registry.context(context).is_none() {
            continue;
        }
        push(
            format!("directory-counts-by-{}", context.to_lowercase()),
            OP_DIRECTORY_COUNTS,
            serde_json::json!({ "category": null, "context": context }),
            2,
            DIRECTORY_OFFSET_RANGE,
        );
    }

    let start_year = current_year - years_number;
    for category in ["OPEN_ACCESS_STATUS", "USE_LICENSE"] {
        if registry.category(category).is_none() {
            continue;
        }
        push(
            format!("journal-counts-{}", category.to_lowercase()),
            OP_JOURNAL_COUNTS,
            serde_json::json!({ "category": category, "start_year": current_year }),
            3,
            PRODUCTION_OFFSET_RANGE,
        );
        for context in [None, Some("AFFILIATION_UF"), Some("AFFILIATION")] {
            if let Some(ctx) = context {
                if registry.category(ctx).is_none() {
                    continue;
                }
            }
            let suffix = context
                .map(|c| format!("-by-{}", c.to_lowercase()))
                .unwrap_or_default();
            push(
                format!("production-evolution-{}{}", category.to_lowercase(), suffix),
                OP_PRODUCTION_EVOLUTION,
                serde_json::json!({
                    "category": category,
                    "context": context,
                    "start_year": start_year,
                    "end_year": current_year,
                }),
                4,
                PRODUCTION_OFFSET_RANGE,
            );
        }
    }
    plans
}

/// Upsert the planned tasks, keyed by name. Existing rows keep their
/// creation time and run history; operation, params, priority and run
/// slot are updated in place.
pub fn upsert_tasks(store: &Store, plans: &[TaskPlan]) -> Result<usize, MiranteError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::indicator_db_path(&store.root);
    let now_minutes = crate::core::time::now_epoch_minutes();
    broker.with_conn(&db_path, "mirante", None, "schedule.plan", |conn| {
        for plan in plans {
            let slot = now_minutes + plan.offset_minutes;
            let run_at_hour = (slot / 60) % 24;
            let run_at_minute = slot % 60;
            let now = crate::core::time::now_epoch_z();
            conn.execute(
                "INSERT INTO scheduled_task(name, operation, params, run_at_hour, run_at_minute,
                    priority, enabled, created_at, updated_at)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)
                 ON CONFLICT(name) DO UPDATE SET
                    operation = excluded.operation,
                    params = excluded.params,
                    run_at_hour = excluded.run_at_hour,
                    run_at_minute = excluded.run_at_minute,
                    priority = excluded.priority,
                    updated_at = excluded.updated_at",
                params![
                    plan.name,
                    plan.operation,
                    plan.params.to_string(),
                    run_at_hour as i64,
                    run_at_minute as i64,
                    plan.priority,
                    now
                ],
            )?;
        }
        Ok(plans.len())
    })
}

pub fn list_tasks(store: &Store) -> Result<Vec<ScheduledTask>, MiranteError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::indicator_db_path(&store.root);
    broker.with_conn(&db_path, "mirante", None, "schedule.list", |conn| {
        let mut stmt = conn.prepare(
            "SELECT name, operation, params, run_at_hour, run_at_minute, priority, enabled,
                    last_run, last_status
             FROM scheduled_task
             ORDER BY priority, run_at_hour, run_at_minute, name",
        )?;
        let rows = stmt.query_map([], |row| {
            let params_text: String = row.get(2)?;
            Ok(ScheduledTask {
                name: row.get(0)?,
                operation: row.get(1)?,
                params: serde_json::from_str(&params_text)
                    .unwrap_or(serde_json::Value::Null),
                run_at_hour: row.get(3)?,
                run_at_minute: row.get(4)?,
                priority: row.get(5)?,
                enabled: row.get::<_, i64>(6)? != 0,
                last_run: row.get(7)?,
                last_status: row.get(8)?,
            })
        })?;
        let collected: Result<Vec<_>, _> = rows.collect();
        Ok(collected?)
    })
}

#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub executed: u64,
    pub failed: u64,
    pub indicators: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DirectoryCountsParams {
    category: Option<String>,
    context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JournalCountsParams {
    category: String,
    start_year: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ProductionEvolutionParams {
    category: String,
    context: Option<String>,
    start_year: i64,
    end_year: i64,
}

fn execute_task(
    store: &Store,
    registry: &Registry,
    operation: &str,
    params: &serde_json::Value,
) -> Result<Vec<String>, MiranteError> {
    match operation {
        OP_DIRECTORY_COUNTS => {
            let p: DirectoryCountsParams = serde_json::from_value(params.clone())?;
            compute::directory_counts(store, registry, p.category.as_deref(), p.context.as_deref())
        }
        OP_JOURNAL_COUNTS => {
            let p: JournalCountsParams = serde_json::from_value(params.clone())?;
            compute::journal_counts(store, registry, &p.category, p.start_year)
        }
        OP_PRODUCTION_EVOLUTION => {
            let p: ProductionEvolutionParams = serde_json::from_value(params.clone())?;
            compute::production_evolution(
                store,
                registry,
                &p.category,
                p.context.as_deref(),
                p.start_year,
                p.end_year,
            )
        }
        other => Err(MiranteError::ValidationError(format!(
            "unknown operation {}",
            other
        ))),
    }
}

fn record_task_result(
    conn: &Connection,
    name: &str,
    status: &str,
) -> Result<(), MiranteError> {
    conn.execute(
        "UPDATE scheduled_task SET last_run = ?1, last_status = ?2, updated_at = ?1
         WHERE name = ?3",
        params![crate::core::time::now_epoch_z(), status, name],
    )?;
    Ok(())
}

/// Execute every enabled task sequentially, ordered by priority and run
/// slot. One task failure is recorded and skipped; it never aborts the
/// rest of the batch, and there is no automatic retry.
pub fn run_tasks(store: &Store, registry: &Registry) -> Result<RunSummary, MiranteError> {
    let tasks = list_tasks(store)?;
    let broker = DbBroker::new(&store.root);
    let db_path = db::indicator_db_path(&store.root);

    let mut summary = RunSummary::default();
    for task in tasks.into_iter().filter(|t| t.enabled) {
        match execute_task(store, registry, &task.operation, &task.params) {
            Ok(ids) => {
                summary.executed += 1;
                summary.indicators.extend(ids);
                broker.with_conn(&db_path, "mirante", None, "schedule.task_ok", |conn| {
                    record_task_result(conn, &task.name, "success")
                })?;
            }
            Err(e) => {
                summary.failed += 1;
                broker.with_conn(&db_path, "mirante", None, "schedule.task_failed", |conn| {
                    record_task_result(conn, &task.name, &format!("error: {}", e))
                })?;
            }
        }
    }
    Ok(summary)
}
