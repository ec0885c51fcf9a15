//! Per-combination computation pipeline.
//!
//! One call here is one unit of scheduled work: aggregate the source
//! collections for a category/context combination, derive the identity
//! code, open the next version in the chain, and finalize the record
//! with its payload and raw dataset. Reference entities are resolved
//! (get-or-create) before the chain manager runs, so record creation
//! never has to default a missing reference silently.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::MiranteError;
use crate::core::store::Store;
use crate::engine::aggregator::{self, AggregationRow, Filter};
use crate::engine::chain::{self, NewRecord};
use crate::engine::code::{CodeParams, build_code};
use crate::engine::record::{self, Computed};
use crate::engine::registry::{ContextKind, Dimension, Registry};
use crate::engine::source::{self, SourceKind};
use crate::engine::{Measurement, OA_STATUS_ITEMS, Scope};
use rusqlite::Connection;
use rustc_hash::FxHashMap;

const PRODUCTION_ACTION: &str = "produção científica";
const PRODUCTION_PRACTICE: &str = "literatura em acesso aberto";
const PRODUCTION_CLASSIFICATION: &str = "literatura científica";

/// Union of grouped counts across several collections: the same grouping
/// tuple observed by more than one collection has its counts summed.
fn union_counts(
    conn: &Connection,
    queries: &[(SourceKind, Filter)],
    dims: &[Dimension],
) -> Result<Vec<AggregationRow>, MiranteError> {
    let mut merged: FxHashMap<Vec<Option<String>>, i64> = FxHashMap::default();
    let mut order: Vec<Vec<Option<String>>> = Vec::new();
    for (kind, filter) in queries {
        for row in aggregator::aggregate(conn, *kind, filter, dims)? {
            if !merged.contains_key(&row.group_key) {
                order.push(row.group_key.clone());
            }
            *merged.entry(row.group_key).or_insert(0) += row.count;
        }
    }
    let mut rows: Vec<AggregationRow> = order
        .into_iter()
        .map(|group_key| {
            let count = merged[&group_key];
            AggregationRow { group_key, count }
        })
        .collect();
    rows.sort_by(|a, b| a.count.cmp(&b.count));
    Ok(rows)
}

fn directory_dataset(
    conn: &Connection,
    queries: &[(SourceKind, Filter)],
) -> Result<Vec<serde_json::Value>, MiranteError> {
    let mut rows = Vec::new();
    for (kind, filter) in queries {
        rows.extend(aggregator::fetch_dataset_rows(conn, *kind, filter)?);
    }
    Ok(rows)
}

fn all_directories(filter: Filter) -> Vec<(SourceKind, Filter)> {
    SourceKind::DIRECTORIES
        .iter()
        .map(|kind| (*kind, filter.clone()))
        .collect()
}

/// Directory action counts.
///
/// - no category, no context: the base flat action ranking;
/// - `category` set: a cross-tab of that category against the action
///   dimensions;
/// - `context` set: one flat ranking per observed context value, with
///   cross-references derived from the context tuple.
pub fn directory_counts(
    store: &Store,
    registry: &Registry,
    category: Option<&str>,
    context: Option<&str>,
) -> Result<Vec<String>, MiranteError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::indicator_db_path(&store.root);
    broker.with_conn(&db_path, "mirante", None, "compute.directory_counts", |conn| {
        match (category, context) {
            (None, None) => directory_counts_flat(store, conn, registry),
            (Some(cat), None) => directory_counts_matrix(store, conn, registry, cat),
            (None, Some(ctx)) => directory_counts_by_context(store, conn, registry, ctx),
            (Some(_), Some(_)) => Err(MiranteError::ValidationError(
                "directory counts take a category or a context, not both".to_string(),
            )),
        }
    })
}

fn directory_counts_flat(
    store: &Store,
    conn: &Connection,
    registry: &Registry,
) -> Result<Vec<String>, MiranteError> {
    let action_cat = registry.require_category("CA_ACTION")?;
    let queries = all_directories(Filter::new());
    let rows = union_counts(conn, &queries, &action_cat.dimensions)?;

    let code = build_code(&CodeParams {
        measurement: Some(Measurement::Frequency),
        object_name: "action",
        category1: Some(&action_cat.id),
        ..Default::default()
    });
    let title = record::generate_title(Measurement::Frequency, "action", None, None, "", None);
    let version = chain::create_record(
        conn,
        &NewRecord {
            code: &code,
            title: &title,
            scope: Some(Scope::General.as_str()),
            measurement: Some(Measurement::Frequency.as_str()),
            object_name: Some("action"),
            category: Some(&action_cat.id),
            ..Default::default()
        },
    )?;

    let computed = Computed::Flat {
        items: record::ranking_items(&rows),
    };
    let dataset = directory_dataset(conn, &queries)?;
    record::save_indicator(store, conn, &version.id, &computed, &dataset, &[])?;
    Ok(vec![version.id])
}

fn directory_counts_matrix(
    store: &Store,
    conn: &Connection,
    registry: &Registry,
    category: &str,
) -> Result<Vec<String>, MiranteError> {
    let cat1 = registry.require_category(category)?;
    let cat2 = registry.require_category("CA_ACTION")?;
    let mut dims = cat1.dimensions.clone();
    dims.extend(cat2.dimensions.iter().copied());

    let queries = all_directories(Filter::new());
    let rows = union_counts(conn, &queries, &dims)?;

    let split = cat1.dimensions.len();
    let items: Vec<serde_json::Value> = rows
        .iter()
        .filter_map(|row| {
            let cat1_value = record::join_key(&row.group_key[..split]);
            let cat2_value = record::join_key(&row.group_key[split..]);
            if cat1_value.is_empty() || cat2_value.is_empty() {
                return None;
            }
            Some(record::matrix_item(
                &cat1.name,
                &cat1_value,
                &cat2.name,
                &cat2_value,
                row.count,
            ))
        })
        .collect();

    // The secondary category is what distinguishes this configuration
    // from the base action ranking, so it is the one entering the code.
    let code = build_code(&CodeParams {
        measurement: Some(Measurement::Frequency),
        object_name: "action",
        category1: Some(&cat2.id),
        category2: Some(&cat1.id),
        ..Default::default()
    });
    let title =
        record::generate_title(Measurement::Frequency, "action", None, None, &cat1.title, None);
    let version = chain::create_record(
        conn,
        &NewRecord {
            code: &code,
            title: &title,
            scope: Some(Scope::General.as_str()),
            measurement: Some(Measurement::Frequency.as_str()),
            object_name: Some("action"),
            category: Some(&cat1.id),
            ..Default::default()
        },
    )?;

    let computed = Computed::Matrix {
        items,
        cat1_name: cat1.name.clone(),
        cat2_name: cat2.name.clone(),
        cat1_values: None,
        cat2_values: None,
    };
    let dataset = directory_dataset(conn, &queries)?;
    record::save_indicator(store, conn, &version.id, &computed, &dataset, &[])?;
    Ok(vec![version.id])
}

fn directory_counts_by_context(
    store: &Store,
    conn: &Connection,
    registry: &Registry,
    context: &str,
) -> Result<Vec<String>, MiranteError> {
    let ctx = registry.require_context(context)?;
    let action_cat = registry.require_category("CA_ACTION")?;
    let map = aggregator::directories_contexts(conn, ctx)?;

    // Hash-map iteration order is arbitrary; process values sorted so
    // re-runs touch chains in a stable order.
    let mut entries: Vec<_> = map.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut created = Vec::new();
    for (tuple, sources) in entries {
        let context_values: Vec<String> = tuple.iter().flatten().cloned().collect();
        if context_values.is_empty() {
            continue;
        }
        let context_label = context_values.join(" | ");

        let queries: Vec<(SourceKind, Filter)> = sources
            .iter()
            .map(|(kind, filters)| {
                let filter = filters.iter().fold(Filter::new(), |f, (dim, value)| {
                    f.value(*dim, value.as_deref())
                });
                (*kind, filter)
            })
            .collect();
        let rows = union_counts(conn, &queries, &action_cat.dimensions)?;

        let code = build_code(&CodeParams {
            measurement: Some(Measurement::Frequency),
            object_name: "action",
            category1: Some(&action_cat.id),
            context: &context_values,
            ..Default::default()
        });
        let scope = match ctx.kind {
            ContextKind::Institutional => Scope::Institutional,
            ContextKind::Geographic => Scope::Geographic,
            ContextKind::Thematic => Scope::Thematic,
        };
        let title = record::generate_title(
            Measurement::Frequency,
            "action",
            None,
            None,
            "",
            Some(&context_label),
        );
        let version = chain::create_record(
            conn,
            &NewRecord {
                code: &code,
                title: &title,
                scope: Some(scope.as_str()),
                measurement: Some(Measurement::Frequency.as_str()),
                object_name: Some("action"),
                category: Some(&action_cat.id),
                context: Some(&context_label),
                ..Default::default()
            },
        )?;

        link_context_refs(conn, &version.id, ctx.kind, &sources)?;

        let computed = Computed::Flat {
            items: record::ranking_items(&rows),
        };
        let dataset = directory_dataset(conn, &queries)?;
        record::save_indicator(store, conn, &version.id, &computed, &dataset, &context_values)?;
        created.push(version.id);
    }
    Ok(created)
}

/// Derive the faceted cross-references from the context tuple.
fn link_context_refs(
    conn: &Connection,
    indicator_id: &str,
    kind: ContextKind,
    sources: &[(SourceKind, Vec<(Dimension, Option<String>)>)],
) -> Result<(), MiranteError> {
    let Some((_, filters)) = sources.first() else {
        return Ok(());
    };
    let value_of = |wanted: &[Dimension]| -> Option<String> {
        filters
            .iter()
            .find(|(dim, _)| wanted.contains(dim))
            .and_then(|(_, value)| value.clone())
    };
    match kind {
        ContextKind::Institutional => {
            if let Some(name) =
                value_of(&[Dimension::InstitutionName, Dimension::OrganizationName])
            {
                let institution_id = source::institution_get_or_create(
                    conn,
                    &source::InstitutionInput {
                        name,
                        city: value_of(&[
                            Dimension::InstitutionCity,
                            Dimension::OrganizationCity,
                        ]),
                        state: value_of(&[
                            Dimension::InstitutionState,
                            Dimension::OrganizationState,
                        ]),
                        ..Default::default()
                    },
                )?;
                record::link_institution(conn, indicator_id, institution_id)?;
            }
        }
        ContextKind::Geographic => {
            let location_id = source::location_get_or_create(
                conn,
                &source::LocationInput {
                    city: value_of(&[Dimension::LocationCity]),
                    state: value_of(&[Dimension::LocationState]),
                    ..Default::default()
                },
            )?;
            record::link_location(conn, indicator_id, location_id)?;
        }
        ContextKind::Thematic => {
            let thematic_id = source::thematic_get_or_create(
                conn,
                &source::ThematicInput {
                    level0: value_of(&[Dimension::ThematicLevel0]),
                    level1: value_of(&[Dimension::ThematicLevel1]),
                    level2: value_of(&[Dimension::ThematicLevel2]),
                },
            )?;
            record::link_thematic_area(conn, indicator_id, thematic_id)?;
        }
    }
    Ok(())
}

/// Number of distinct open-access journals per category value.
pub fn journal_counts(
    store: &Store,
    registry: &Registry,
    category: &str,
    start_year: Option<i64>,
) -> Result<Vec<String>, MiranteError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::indicator_db_path(&store.root);
    broker.with_conn(&db_path, "mirante", None, "compute.journal_counts", |conn| {
        let cat = registry.require_category(category)?;
        let filter = Filter::new().any_of(
            Dimension::OpenAccessStatus,
            OA_STATUS_ITEMS.iter().map(|s| s.to_string()).collect(),
        );
        let rows = aggregator::aggregate_distinct(
            conn,
            SourceKind::Article,
            &filter,
            &cat.dimensions,
            Dimension::Journal,
        )?;

        let action_id = source::action_get_or_create(conn, PRODUCTION_ACTION, None)?;
        let practice_id = source::practice_get_or_create(conn, PRODUCTION_PRACTICE, None)?;

        let code = build_code(&CodeParams {
            action: Some(PRODUCTION_ACTION),
            classification: Some(PRODUCTION_CLASSIFICATION),
            practice: Some(PRODUCTION_PRACTICE),
            measurement: Some(Measurement::Frequency),
            object_name: "journal",
            start_year,
            category1: Some(&cat.id),
            ..Default::default()
        });
        let title = record::generate_title(
            Measurement::Frequency,
            "journal",
            None,
            None,
            &cat.title,
            None,
        );
        let version = chain::create_record(
            conn,
            &NewRecord {
                code: &code,
                title: &title,
                action_id: Some(action_id),
                classification: Some(PRODUCTION_CLASSIFICATION),
                practice_id: Some(practice_id),
                scope: Some(Scope::General.as_str()),
                measurement: Some(Measurement::Frequency.as_str()),
                object_name: Some("journal"),
                category: Some(&cat.id),
                start_date_year: start_year,
                ..Default::default()
            },
        )?;

        let computed = Computed::Flat {
            items: record::ranking_items(&rows),
        };
        let dataset = aggregator::fetch_dataset_rows(conn, SourceKind::Article, &filter)?;
        record::save_indicator(store, conn, &version.id, &computed, &dataset, &[])?;
        Ok(vec![version.id])
    })
}

/// Evolution of the Brazilian open-access article production across an
/// observation window, cross-tabbed year × category. With a context, one
/// indicator is produced per observed context value (e.g. per affiliated
/// institution).
pub fn production_evolution(
    store: &Store,
    registry: &Registry,
    category: &str,
    context: Option<&str>,
    start_year: i64,
    end_year: i64,
) -> Result<Vec<String>, MiranteError> {
    if start_year > end_year {
        return Err(MiranteError::ValidationError(format!(
            "invalid observation window {}-{}",
            start_year, end_year
        )));
    }
    let broker = DbBroker::new(&store.root);
    let db_path = db::indicator_db_path(&store.root);
    broker.with_conn(
        &db_path,
        "mirante",
        None,
        "compute.production_evolution",
        |conn| {
            let cat = registry.require_category(category)?;
            let years: Vec<String> = (start_year..=end_year).map(|y| y.to_string()).collect();
            let base_filter = Filter::new()
                .eq(Dimension::AffiliationCountry, "BR")
                .any_of(
                    Dimension::OpenAccessStatus,
                    OA_STATUS_ITEMS.iter().map(|s| s.to_string()).collect(),
                )
                .any_of(Dimension::Year, years.clone());

            let action_id = source::action_get_or_create(conn, PRODUCTION_ACTION, None)?;
            let practice_id = source::practice_get_or_create(conn, PRODUCTION_PRACTICE, None)?;

            let groups: Vec<(Vec<String>, Filter, Option<(Dimension, String)>)> = match context {
                None => vec![(Vec::new(), base_filter.clone(), None)],
                Some(context_id) => {
                    let ctx_cat = registry.require_category(context_id)?;
                    let observed = aggregator::aggregate(
                        conn,
                        SourceKind::Article,
                        &base_filter,
                        &ctx_cat.dimensions,
                    )?;
                    let mut groups = Vec::new();
                    for row in observed {
                        let values: Vec<String> =
                            row.group_key.iter().flatten().cloned().collect();
                        if values.is_empty() {
                            continue;
                        }
                        let filter = ctx_cat
                            .dimensions
                            .iter()
                            .zip(row.group_key.iter())
                            .fold(base_filter.clone(), |f, (dim, value)| {
                                f.value(*dim, value.as_deref())
                            });
                        let link = ctx_cat
                            .dimensions
                            .first()
                            .zip(row.group_key.first().cloned().flatten())
                            .map(|(dim, value)| (*dim, value));
                        groups.push((values, filter, link));
                    }
                    groups
                }
            };

            let mut created = Vec::new();
            for (context_values, filter, link) in groups {
                let rows = {
                    let mut dims = vec![Dimension::Year];
                    dims.extend(cat.dimensions.iter().copied());
                    aggregator::aggregate(conn, SourceKind::Article, &filter, &dims)?
                };
                let items: Vec<serde_json::Value> = rows
                    .iter()
                    .filter_map(|row| {
                        let year = row.group_key.first().cloned().flatten()?;
                        let value = record::join_key(&row.group_key[1..]);
                        if value.is_empty() {
                            return None;
                        }
                        Some(record::matrix_item(
                            "year", &year, &cat.name, &value, row.count,
                        ))
                    })
                    .collect();

                let context_label = if context_values.is_empty() {
                    None
                } else {
                    Some(context_values.join(" | "))
                };
                let code = build_code(&CodeParams {
                    action: Some(PRODUCTION_ACTION),
                    classification: Some(PRODUCTION_CLASSIFICATION),
                    practice: Some(PRODUCTION_PRACTICE),
                    measurement: Some(Measurement::Evolution),
                    object_name: "journal-article",
                    start_year: Some(start_year),
                    end_year: Some(end_year),
                    category1: Some(&cat.id),
                    context: &context_values,
                    ..Default::default()
                });
                let title = record::generate_title(
                    Measurement::Evolution,
                    "journal-article",
                    Some(start_year),
                    Some(end_year),
                    &cat.title,
                    context_label.as_deref(),
                );
                let version = chain::create_record(
                    conn,
                    &NewRecord {
                        code: &code,
                        title: &title,
                        action_id: Some(action_id),
                        classification: Some(PRODUCTION_CLASSIFICATION),
                        practice_id: Some(practice_id),
                        scope: Some(Scope::Chronological.as_str()),
                        measurement: Some(Measurement::Evolution.as_str()),
                        object_name: Some("journal-article"),
                        category: Some(&cat.id),
                        context: context_label.as_deref(),
                        start_date_year: Some(start_year),
                        end_date_year: Some(end_year),
                        ..Default::default()
                    },
                )?;

                match link {
                    Some((Dimension::AffiliationInstitution, name)) => {
                        let institution_id = source::institution_get_or_create(
                            conn,
                            &source::InstitutionInput {
                                name,
                                state: context_values.get(1).cloned(),
                                ..Default::default()
                            },
                        )?;
                        record::link_institution(conn, &version.id, institution_id)?;
                    }
                    Some((Dimension::AffiliationState, state)) => {
                        let location_id = source::location_get_or_create(
                            conn,
                            &source::LocationInput {
                                state: Some(state),
                                ..Default::default()
                            },
                        )?;
                        record::link_location(conn, &version.id, location_id)?;
                    }
                    _ => {}
                }

                let computed = Computed::Matrix {
                    items,
                    cat1_name: "year".to_string(),
                    cat2_name: cat.name.clone(),
                    cat1_values: Some(years.clone()),
                    cat2_values: None,
                };
                let dataset =
                    aggregator::fetch_dataset_rows(conn, SourceKind::Article, &filter)?;
                record::save_indicator(
                    store,
                    conn,
                    &version.id,
                    &computed,
                    &dataset,
                    &context_values,
                )?;
                created.push(version.id);
            }
            Ok(created)
        },
    )
}
