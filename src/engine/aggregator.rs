//! Grouped counting over the source collections.
//!
//! The aggregator lowers a (collection, filter, dimensions) request to a
//! single GROUP BY query. Rows come back ordered ascending by count so
//! the long tail is visible first, and zero-count groups are filtered
//! before they reach any caller.

use crate::core::error::MiranteError;
use crate::engine::registry::{ContextDefinition, Dimension};
use crate::engine::source::SourceKind;
use rusqlite::types::ToSql;
use rusqlite::Connection;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationRow {
    pub group_key: Vec<Option<String>>,
    pub count: i64,
}

#[derive(Debug, Clone)]
pub enum FilterOp {
    Eq(String),
    AnyOf(Vec<String>),
    IsNull,
}

/// Equality/membership constraints on grouping dimensions, combined with
/// AND. Dimensions used here must be supported by the queried collection,
/// same as grouping dimensions.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub clauses: Vec<(Dimension, FilterOp)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, dim: Dimension, value: impl Into<String>) -> Self {
        self.clauses.push((dim, FilterOp::Eq(value.into())));
        self
    }

    pub fn any_of(mut self, dim: Dimension, values: Vec<String>) -> Self {
        self.clauses.push((dim, FilterOp::AnyOf(values)));
        self
    }

    pub fn is_null(mut self, dim: Dimension) -> Self {
        self.clauses.push((dim, FilterOp::IsNull));
        self
    }

    /// Constrain to one observed value: equality for Some, IS NULL for
    /// None. This is how context tuples become re-query filters.
    pub fn value(self, dim: Dimension, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.eq(dim, v),
            None => self.is_null(dim),
        }
    }
}

fn unsupported(kind: SourceKind, dim: Dimension) -> MiranteError {
    MiranteError::InvalidGroupingField {
        collection: kind.as_str().to_string(),
        field: dim.label().to_string(),
    }
}

struct QueryParts {
    exprs: Vec<&'static str>,
    joins: Vec<&'static str>,
    where_sql: String,
    params: Vec<Box<dyn ToSql>>,
}

fn query_parts(
    kind: SourceKind,
    filter: &Filter,
    dims: &[Dimension],
) -> Result<QueryParts, MiranteError> {
    let mut exprs = Vec::with_capacity(dims.len());
    let mut joins: Vec<&'static str> = Vec::new();
    let mut push_join = |join: Option<&'static str>, joins: &mut Vec<&'static str>| {
        if let Some(j) = join {
            if !joins.contains(&j) {
                joins.push(j);
            }
        }
    };

    for dim in dims {
        let acc = kind.accessor(*dim).ok_or_else(|| unsupported(kind, *dim))?;
        exprs.push(acc.expr);
        push_join(acc.join, &mut joins);
    }

    let mut clauses = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();
    for (dim, op) in &filter.clauses {
        let acc = kind.accessor(*dim).ok_or_else(|| unsupported(kind, *dim))?;
        push_join(acc.join, &mut joins);
        match op {
            FilterOp::Eq(v) => {
                clauses.push(format!("{} = ?", acc.expr));
                params.push(Box::new(v.clone()));
            }
            FilterOp::AnyOf(values) => {
                let marks = vec!["?"; values.len()].join(", ");
                clauses.push(format!("{} IN ({})", acc.expr, marks));
                for v in values {
                    params.push(Box::new(v.clone()));
                }
            }
            FilterOp::IsNull => clauses.push(format!("{} IS NULL", acc.expr)),
        }
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    Ok(QueryParts {
        exprs,
        joins,
        where_sql,
        params,
    })
}

fn key_part(row: &rusqlite::Row, idx: usize) -> Result<Option<String>, rusqlite::Error> {
    use rusqlite::types::ValueRef;
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(_) => None,
    })
}

fn aggregate_inner(
    conn: &Connection,
    kind: SourceKind,
    filter: &Filter,
    dims: &[Dimension],
    count_expr: &str,
) -> Result<Vec<AggregationRow>, MiranteError> {
    if dims.is_empty() {
        return Err(MiranteError::ValidationError(
            "grouping attributes must be a non-empty list".to_string(),
        ));
    }
    let parts = query_parts(kind, filter, dims)?;
    let select = parts.exprs.join(", ");
    let joins = if parts.joins.is_empty() {
        String::new()
    } else {
        format!(" {}", parts.joins.join(" "))
    };
    let sql = format!(
        "SELECT {select}, {count_expr} AS count FROM {table} d{joins}{where_sql}
         GROUP BY {select} HAVING count > 0 ORDER BY count ASC",
        select = select,
        count_expr = count_expr,
        table = kind.table(),
        joins = joins,
        where_sql = parts.where_sql,
    );

    let mut stmt = conn.prepare(&sql)?;
    let params_as_dyn: Vec<&dyn ToSql> = parts.params.iter().map(|p| p.as_ref()).collect();
    let n_dims = dims.len();
    let rows = stmt.query_map(&params_as_dyn[..], |row| {
        let mut group_key = Vec::with_capacity(n_dims);
        for i in 0..n_dims {
            group_key.push(key_part(row, i)?);
        }
        let count: i64 = row.get(n_dims)?;
        Ok(AggregationRow { group_key, count })
    })?;
    let collected: Result<Vec<_>, _> = rows.collect();
    Ok(collected?)
}

/// Grouped count of records, `COUNT(*)` per distinct grouping tuple.
pub fn aggregate(
    conn: &Connection,
    kind: SourceKind,
    filter: &Filter,
    dims: &[Dimension],
) -> Result<Vec<AggregationRow>, MiranteError> {
    aggregate_inner(conn, kind, filter, dims, "COUNT(*)")
}

/// Grouped count of distinct values of `distinct` per grouping tuple
/// (e.g. distinct journals per open-access status).
pub fn aggregate_distinct(
    conn: &Connection,
    kind: SourceKind,
    filter: &Filter,
    dims: &[Dimension],
    distinct: Dimension,
) -> Result<Vec<AggregationRow>, MiranteError> {
    let acc = kind
        .accessor(distinct)
        .ok_or_else(|| unsupported(kind, distinct))?;
    aggregate_inner(
        conn,
        kind,
        filter,
        dims,
        &format!("COUNT(DISTINCT {})", acc.expr),
    )
}

/// Aggregate a context over one collection, trying each alternative
/// attribute set in order and concatenating the results of every option
/// the collection supports. Duplicate tuples across options are not
/// deduplicated here. Fails only when no option fits the collection.
pub fn aggregate_context(
    conn: &Connection,
    kind: SourceKind,
    filter: &Filter,
    context: &ContextDefinition,
) -> Result<Vec<(Vec<Dimension>, Vec<AggregationRow>)>, MiranteError> {
    let mut results = Vec::new();
    for option in &context.options {
        if !option.iter().all(|d| kind.supports(*d)) {
            continue;
        }
        let rows = aggregate(conn, kind, filter, option)?;
        results.push((option.clone(), rows));
    }
    if results.is_empty() {
        let first = context
            .options
            .first()
            .and_then(|o| o.first())
            .copied()
            .unwrap_or(Dimension::InstitutionName);
        return Err(unsupported(kind, first));
    }
    Ok(results)
}

/// For one context value, which collections saw it and under which
/// filter values.
pub type ContextEntry = Vec<(SourceKind, Vec<(Dimension, Option<String>)>)>;
pub type ContextMap = FxHashMap<Vec<Option<String>>, ContextEntry>;

/// Cross-collection context discovery: iterate the directory variants,
/// collect the distinct grouping tuples each one observes for `context`,
/// and map every tuple to the (collection, filter-values) pairs that can
/// re-query it. This unifies heterogeneously-named fields (institutions
/// vs organizations) under one semantic context.
pub fn directories_contexts(
    conn: &Connection,
    context: &ContextDefinition,
) -> Result<ContextMap, MiranteError> {
    let mut map: ContextMap = FxHashMap::default();
    for kind in &context.targets {
        if !kind.is_directory() {
            continue;
        }
        let per_option = match aggregate_context(conn, *kind, &Filter::new(), context) {
            Ok(results) => results,
            // A collection with no matching attribute set is skipped,
            // not fatal.
            Err(MiranteError::InvalidGroupingField { .. }) => continue,
            Err(e) => return Err(e),
        };
        for (dims, rows) in per_option {
            for row in rows {
                if row.group_key.iter().all(|part| part.is_none()) {
                    continue;
                }
                let filters: Vec<(Dimension, Option<String>)> = dims
                    .iter()
                    .copied()
                    .zip(row.group_key.iter().cloned())
                    .collect();
                map.entry(row.group_key).or_default().push((*kind, filters));
            }
        }
    }
    Ok(map)
}

/// Full filtered rows of one collection, for the raw dataset export.
/// DISTINCT keeps link-table joins from duplicating records.
pub fn fetch_dataset_rows(
    conn: &Connection,
    kind: SourceKind,
    filter: &Filter,
) -> Result<Vec<serde_json::Value>, MiranteError> {
    let parts = query_parts(kind, filter, &[])?;
    let joins = if parts.joins.is_empty() {
        String::new()
    } else {
        format!(" {}", parts.joins.join(" "))
    };
    let sql = format!(
        "SELECT DISTINCT d.* FROM {} d{}{}",
        kind.table(),
        joins,
        parts.where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let params_as_dyn: Vec<&dyn ToSql> = parts.params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(&params_as_dyn[..], |row| {
        use rusqlite::types::ValueRef;
        let mut obj = serde_json::Map::new();
        for (i, name) in column_names.iter().enumerate() {
            let value = match row.get_ref(i)? {
                ValueRef::Null => serde_json::Value::Null,
                ValueRef::Integer(v) => serde_json::Value::from(v),
                ValueRef::Real(v) => serde_json::Value::from(v),
                ValueRef::Text(t) => {
                    serde_json::Value::String(String::from_utf8_lossy(t).to_string())
                }
                ValueRef::Blob(_) => serde_json::Value::Null,
            };
            obj.insert(name.clone(), value);
        }
        Ok(serde_json::Value::Object(obj))
    })?;
    let collected: Result<Vec<_>, _> = rows.collect();
    Ok(collected?)
}
