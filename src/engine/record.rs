//! Indicator record assembly and finalization.
//!
//! Builds the title and the computed payload from aggregation rows,
//! attaches the raw dataset export, and drives the chain finalization.
//! The payload is sparse: only nonzero cells are emitted; densifying is
//! the renderer's job.

use crate::core::error::MiranteError;
use crate::core::store::Store;
use crate::engine::Measurement;
use crate::engine::aggregator::AggregationRow;
use crate::engine::chain::{self, IndicatorVersion};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatItem {
    pub name: String,
    pub count: i64,
}

/// The computed payload contract consumed by the rendering collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Computed {
    Matrix {
        items: Vec<serde_json::Value>,
        cat1_name: String,
        cat2_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cat1_values: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cat2_values: Option<Vec<String>>,
    },
    Flat {
        items: Vec<FlatItem>,
    },
}

impl Computed {
    pub fn len(&self) -> usize {
        match self {
            Computed::Flat { items } => items.len(),
            Computed::Matrix { items, .. } => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Flat ranking items: join each grouping attribute's value with a pipe
/// separator, skipping absent components. Groups whose joined name comes
/// out empty are dropped, as are zero counts.
pub fn ranking_items(rows: &[AggregationRow]) -> Vec<FlatItem> {
    rows.iter()
        .filter(|row| row.count > 0)
        .filter_map(|row| {
            let name = join_key(&row.group_key);
            if name.is_empty() {
                return None;
            }
            Some(FlatItem {
                name,
                count: row.count,
            })
        })
        .collect()
}

pub fn join_key(key: &[Option<String>]) -> String {
    key.iter()
        .filter_map(|part| part.as_deref())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// One sparse cell of a two-dimensional payload. The category names are
/// the cell's keys, so the renderer can pivot without extra metadata.
pub fn matrix_item(
    cat1_name: &str,
    cat1_value: &str,
    cat2_name: &str,
    cat2_value: &str,
    count: i64,
) -> serde_json::Value {
    let mut cell = serde_json::Map::new();
    cell.insert(cat1_name.to_string(), cat1_value.into());
    cell.insert(cat2_name.to_string(), cat2_value.into());
    cell.insert("count".to_string(), count.into());
    serde_json::Value::Object(cell)
}

const OBJECT_PHRASES: &[(&str, &str)] = &[
    ("action", "ações em Ciência Aberta"),
    ("journal", "periódicos em acesso aberto"),
    ("journal-article", "artigos em acesso aberto"),
];

fn object_phrase(object_name: &str) -> &str {
    OBJECT_PHRASES
        .iter()
        .find(|(name, _)| *name == object_name)
        .map(|(_, phrase)| *phrase)
        .unwrap_or(object_name)
}

/// Deterministic title template: evolution prefix when both years are
/// present, frequency prefix otherwise; fixed object phrase; optional
/// category fragment; optional year range; trailing context label
/// defaulting to "Brasil".
pub fn generate_title(
    measurement: Measurement,
    object_name: &str,
    start_year: Option<i64>,
    end_year: Option<i64>,
    category_title: &str,
    context_label: Option<&str>,
) -> String {
    let both_years = start_year.is_some() && end_year.is_some();
    let prefix = match measurement {
        _ if both_years => "Evolução do número de",
        Measurement::Frequency => "Número de",
        _ => "Número de",
    };
    let mut title = format!("{} {}", prefix, object_phrase(object_name));
    if !category_title.is_empty() {
        title.push_str(&format!(" por {}", category_title));
    }
    if let (Some(start), Some(end)) = (start_year, end_year) {
        title.push_str(&format!(" {}-{}", start, end));
    }
    let context = context_label.filter(|c| !c.is_empty()).unwrap_or("Brasil");
    title.push_str(&format!(" - {}", context));
    title
}

/// Attach the computed payload and the raw dataset to a WIP indicator,
/// tag it with keywords, and publish it — flipping the superseded
/// version's validity as part of the chain finalization. Calling this
/// twice for one indicator is an error.
pub fn save_indicator(
    store: &Store,
    conn: &Connection,
    id: &str,
    computed: &Computed,
    dataset_rows: &[serde_json::Value],
    keywords: &[String],
) -> Result<IndicatorVersion, MiranteError> {
    let dataset_path = store.dataset_path(id);
    if let Some(parent) = dataset_path.parent() {
        fs::create_dir_all(parent).map_err(MiranteError::IoError)?;
    }
    let mut file = fs::File::create(&dataset_path).map_err(MiranteError::IoError)?;
    for row in dataset_rows {
        writeln!(file, "{}", serde_json::to_string(row)?).map_err(MiranteError::IoError)?;
    }

    conn.execute(
        "UPDATE indicator SET computed = ?1, total = ?2, raw_data_path = ?3, updated_at = ?4
         WHERE id = ?5",
        params![
            serde_json::to_string(computed)?,
            computed.len() as i64,
            dataset_path.to_string_lossy().to_string(),
            crate::core::time::now_epoch_z(),
            id
        ],
    )?;
    for keyword in keywords {
        if keyword.is_empty() {
            continue;
        }
        conn.execute(
            "INSERT OR IGNORE INTO indicator_keywords(indicator_id, keyword) VALUES(?1, ?2)",
            params![id, keyword],
        )?;
    }

    chain::finalize_version(conn, id)?;
    chain::get_version(conn, id)?.ok_or_else(|| MiranteError::NotFound(format!("indicator {}", id)))
}

// Cross-reference links for faceted lookup. Derived from context
// parameters after creation; not ownership.

pub fn link_institution(
    conn: &Connection,
    indicator_id: &str,
    institution_id: i64,
) -> Result<(), MiranteError> {
    conn.execute(
        "INSERT OR IGNORE INTO indicator_institutions(indicator_id, institution_id) VALUES(?1, ?2)",
        params![indicator_id, institution_id],
    )?;
    Ok(())
}

pub fn link_location(
    conn: &Connection,
    indicator_id: &str,
    location_id: i64,
) -> Result<(), MiranteError> {
    conn.execute(
        "INSERT OR IGNORE INTO indicator_locations(indicator_id, location_id) VALUES(?1, ?2)",
        params![indicator_id, location_id],
    )?;
    Ok(())
}

pub fn link_thematic_area(
    conn: &Connection,
    indicator_id: &str,
    thematic_id: i64,
) -> Result<(), MiranteError> {
    conn.execute(
        "INSERT OR IGNORE INTO indicator_thematic_areas(indicator_id, thematic_id) VALUES(?1, ?2)",
        params![indicator_id, thematic_id],
    )?;
    Ok(())
}

/// Summary row for list surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorSummary {
    pub id: String,
    pub code: String,
    pub seq: i64,
    pub title: String,
    pub record_status: String,
    pub validity: Option<String>,
    pub total: Option<i64>,
}

pub fn list_indicators(
    conn: &Connection,
    code: Option<&str>,
    validity: Option<&str>,
) -> Result<Vec<IndicatorSummary>, MiranteError> {
    let mut sql = "SELECT id, code, seq, title, record_status, validity, total
         FROM indicator WHERE 1=1"
        .to_string();
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    if let Some(c) = code {
        sql.push_str(" AND code = ?");
        params_vec.push(Box::new(c.to_string()));
    }
    if let Some(v) = validity {
        sql.push_str(" AND validity = ?");
        params_vec.push(Box::new(v.to_string()));
    }
    sql.push_str(" ORDER BY code, seq");

    let mut stmt = conn.prepare(&sql)?;
    let params_as_dyn: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(&params_as_dyn[..], |row| {
        Ok(IndicatorSummary {
            id: row.get(0)?,
            code: row.get(1)?,
            seq: row.get(2)?,
            title: row.get(3)?,
            record_status: row.get(4)?,
            validity: row.get(5)?,
            total: row.get(6)?,
        })
    })?;
    let collected: Result<Vec<_>, _> = rows.collect();
    Ok(collected?)
}

/// Bulk-delete maintenance: detach every cross-reference and keyword
/// first so no orphaned join rows survive, remove the dataset exports,
/// then delete the indicator rows.
pub fn delete_all(store: &Store, conn: &Connection) -> Result<usize, MiranteError> {
    let ids: Vec<String> = conn
        .prepare("SELECT id FROM indicator")?
        .query_map([], |r| r.get(0))?
        .collect::<Result<_, _>>()?;

    for id in &ids {
        conn.execute(
            "DELETE FROM indicator_institutions WHERE indicator_id = ?1",
            params![id],
        )?;
        conn.execute(
            "DELETE FROM indicator_locations WHERE indicator_id = ?1",
            params![id],
        )?;
        conn.execute(
            "DELETE FROM indicator_thematic_areas WHERE indicator_id = ?1",
            params![id],
        )?;
        conn.execute(
            "DELETE FROM indicator_keywords WHERE indicator_id = ?1",
            params![id],
        )?;
        let dataset_path = store.dataset_path(id);
        if dataset_path.exists() {
            fs::remove_file(&dataset_path).map_err(MiranteError::IoError)?;
        }
    }
    // Chain links reference sibling rows; clear them before deleting.
    conn.execute("UPDATE indicator SET previous_id = NULL, posterior_id = NULL", [])?;
    conn.execute("DELETE FROM indicator", [])?;
    Ok(ids.len())
}
