//! Version chain management for indicator records.
//!
//! Versions sharing one code form an append-only doubly-linked chain
//! ordered by `seq`. A new version starts as WIP; finalization publishes
//! it, marks it CURRENT and flips its predecessor to OUTDATED. At most
//! one WIP and at most one CURRENT version exist per code.

use crate::core::error::MiranteError;
use crate::engine::{RecordStatus, Validity};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use ulid::Ulid;

#[derive(Debug, Clone, Serialize)]
pub struct IndicatorVersion {
    pub id: String,
    pub code: String,
    pub seq: i64,
    pub title: String,
    pub description: Option<String>,
    pub action_id: Option<i64>,
    pub classification: Option<String>,
    pub practice_id: Option<i64>,
    pub scope: Option<String>,
    pub measurement: Option<String>,
    pub object_name: Option<String>,
    pub category: Option<String>,
    pub context: Option<String>,
    pub start_date_year: Option<i64>,
    pub end_date_year: Option<i64>,
    pub computed: Option<String>,
    pub total: Option<i64>,
    pub raw_data_path: Option<String>,
    pub record_status: String,
    pub validity: Option<String>,
    pub previous_id: Option<String>,
    pub posterior_id: Option<String>,
    pub source: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

const COLUMNS: &str = "id, code, seq, title, description, action_id, classification, practice_id,
    scope, measurement, object_name, category, context, start_date_year, end_date_year,
    computed, total, raw_data_path, record_status, validity, previous_id, posterior_id,
    source, created_at, updated_at";

fn from_row(row: &rusqlite::Row) -> Result<IndicatorVersion, rusqlite::Error> {
    Ok(IndicatorVersion {
        id: row.get(0)?,
        code: row.get(1)?,
        seq: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        action_id: row.get(5)?,
        classification: row.get(6)?,
        practice_id: row.get(7)?,
        scope: row.get(8)?,
        measurement: row.get(9)?,
        object_name: row.get(10)?,
        category: row.get(11)?,
        context: row.get(12)?,
        start_date_year: row.get(13)?,
        end_date_year: row.get(14)?,
        computed: row.get(15)?,
        total: row.get(16)?,
        raw_data_path: row.get(17)?,
        record_status: row.get(18)?,
        validity: row.get(19)?,
        previous_id: row.get(20)?,
        posterior_id: row.get(21)?,
        source: row.get(22)?,
        created_at: row.get(23)?,
        updated_at: row.get(24)?,
    })
}

/// Latest version for a code, by `seq`. Soft not-found.
pub fn get_latest_version(
    conn: &Connection,
    code: &str,
) -> Result<Option<IndicatorVersion>, MiranteError> {
    let found = conn
        .query_row(
            &format!(
                "SELECT {} FROM indicator WHERE code = ?1 ORDER BY seq DESC LIMIT 1",
                COLUMNS
            ),
            params![code],
            from_row,
        )
        .optional()?;
    Ok(found)
}

pub fn get_version(
    conn: &Connection,
    id: &str,
) -> Result<Option<IndicatorVersion>, MiranteError> {
    let found = conn
        .query_row(
            &format!("SELECT {} FROM indicator WHERE id = ?1", COLUMNS),
            params![id],
            from_row,
        )
        .optional()?;
    Ok(found)
}

/// Parameters for a new indicator version.
#[derive(Debug, Clone, Default)]
pub struct NewRecord<'a> {
    pub code: &'a str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub action_id: Option<i64>,
    pub classification: Option<&'a str>,
    pub practice_id: Option<i64>,
    pub scope: Option<&'a str>,
    pub measurement: Option<&'a str>,
    pub object_name: Option<&'a str>,
    pub category: Option<&'a str>,
    pub context: Option<&'a str>,
    pub start_date_year: Option<i64>,
    pub end_date_year: Option<i64>,
    pub source: Option<&'a str>,
}

/// Create the next version in the chain for `new.code`.
///
/// Rejects with `CreateIndicatorRecordError` when the latest version is
/// still WIP: two computations must not run in flight for one code. The
/// partial unique index on (code) WHERE record_status='WIP' backs this
/// check at the storage layer, so a lost race surfaces as the same error
/// instead of a duplicate row.
pub fn create_record(
    conn: &Connection,
    new: &NewRecord,
) -> Result<IndicatorVersion, MiranteError> {
    let latest = get_latest_version(conn, new.code)?;

    let (seq, previous_id, inherited) = match &latest {
        Some(latest) if latest.record_status == RecordStatus::Wip.as_str() => {
            return Err(MiranteError::CreateIndicatorRecordError(
                new.code.to_string(),
            ));
        }
        Some(latest) => (
            latest.seq + 1,
            Some(latest.id.clone()),
            Some((
                latest.action_id,
                latest.classification.clone(),
                latest.practice_id,
            )),
        ),
        None => (1, None, None),
    };

    // The action/practice association is inherited from the superseded
    // version when one exists, else taken from the caller's resolution.
    let (action_id, classification, practice_id) = match inherited {
        Some((a, c, p)) if a.is_some() || c.is_some() || p.is_some() => {
            (a, c, p)
        }
        _ => (
            new.action_id,
            new.classification.map(|s| s.to_string()),
            new.practice_id,
        ),
    };

    let id = Ulid::new().to_string();
    let now = crate::core::time::now_epoch_z();
    let inserted = conn.execute(
        "INSERT INTO indicator(id, code, seq, title, description, action_id, classification,
            practice_id, scope, measurement, object_name, category, context,
            start_date_year, end_date_year, record_status, validity, previous_id,
            source, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
            NULL, ?17, ?18, ?19, ?20)",
        params![
            id,
            new.code,
            seq,
            new.title,
            new.description,
            action_id,
            classification,
            practice_id,
            new.scope,
            new.measurement,
            new.object_name,
            new.category,
            new.context,
            new.start_date_year,
            new.end_date_year,
            RecordStatus::Wip.as_str(),
            previous_id,
            new.source,
            now,
            now
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(MiranteError::CreateIndicatorRecordError(
                new.code.to_string(),
            ));
        }
        Err(e) => return Err(e.into()),
    }

    get_version(conn, &id)?.ok_or_else(|| MiranteError::NotFound(format!("indicator {}", id)))
}

/// Publish a WIP version: set it PUBLISHED/CURRENT and, when a previous
/// version exists, point its posterior at this record and flip it to
/// OUTDATED. One transaction, and the only place an existing record is
/// mutated after creation.
pub fn finalize_version(conn: &Connection, id: &str) -> Result<(), MiranteError> {
    let version = get_version(conn, id)?
        .ok_or_else(|| MiranteError::NotFound(format!("indicator {}", id)))?;
    if version.record_status != RecordStatus::Wip.as_str() {
        return Err(MiranteError::ValidationError(format!(
            "indicator {} is not WIP (status: {})",
            id, version.record_status
        )));
    }

    let now = crate::core::time::now_epoch_z();
    conn.execute("BEGIN IMMEDIATE", [])?;
    let result = (|| -> Result<(), MiranteError> {
        conn.execute(
            "UPDATE indicator SET record_status = ?1, validity = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                RecordStatus::Published.as_str(),
                Validity::Current.as_str(),
                now,
                id
            ],
        )?;
        if let Some(previous_id) = &version.previous_id {
            conn.execute(
                "UPDATE indicator SET posterior_id = ?1, validity = ?2, updated_at = ?3 WHERE id = ?4",
                params![id, Validity::Outdated.as_str(), now, previous_id],
            )?;
        }
        Ok(())
    })();
    match result {
        Ok(()) => {
            conn.execute("COMMIT", [])?;
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute("ROLLBACK", []);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schemas;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        for stmt in schemas::ALL_SCHEMAS {
            conn.execute(stmt, []).unwrap();
        }
        conn
    }

    fn new_record(code: &str) -> NewRecord {
        NewRecord {
            code,
            title: "Número de ações em Ciência Aberta - Brasil",
            measurement: Some("FREQUENCY"),
            object_name: Some("action"),
            category: Some("CA_ACTION"),
            ..Default::default()
        }
    }

    #[test]
    fn test_first_version_starts_chain() {
        let conn = test_conn();
        let v1 = create_record(&conn, &new_record("c0ffee")).unwrap();
        assert_eq!(v1.seq, 1);
        assert_eq!(v1.previous_id, None);
        assert_eq!(v1.record_status, "WIP");
        assert_eq!(v1.validity, None);
    }

    #[test]
    fn test_wip_blocks_second_create() {
        let conn = test_conn();
        create_record(&conn, &new_record("c0ffee")).unwrap();
        let err = create_record(&conn, &new_record("c0ffee")).unwrap_err();
        assert!(matches!(err, MiranteError::CreateIndicatorRecordError(_)));
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM indicator WHERE code = 'c0ffee'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_finalize_then_new_version_links_chain() {
        let conn = test_conn();
        let v1 = create_record(&conn, &new_record("c0ffee")).unwrap();
        finalize_version(&conn, &v1.id).unwrap();

        let v2 = create_record(&conn, &new_record("c0ffee")).unwrap();
        assert_eq!(v2.seq, 2);
        assert_eq!(v2.previous_id, Some(v1.id.clone()));
        finalize_version(&conn, &v2.id).unwrap();

        let v1 = get_version(&conn, &v1.id).unwrap().unwrap();
        assert_eq!(v1.validity, Some("OUTDATED".to_string()));
        assert_eq!(v1.posterior_id, Some(v2.id.clone()));
        let v2 = get_version(&conn, &v2.id).unwrap().unwrap();
        assert_eq!(v2.validity, Some("CURRENT".to_string()));
        assert_eq!(v2.record_status, "PUBLISHED");
    }

    #[test]
    fn test_at_most_one_current_per_code() {
        let conn = test_conn();
        for _ in 0..3 {
            let v = create_record(&conn, &new_record("c0ffee")).unwrap();
            finalize_version(&conn, &v.id).unwrap();
        }
        let current: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM indicator WHERE code = 'c0ffee' AND validity = 'CURRENT'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(current, 1);
        let seqs: Vec<i64> = conn
            .prepare("SELECT seq FROM indicator WHERE code = 'c0ffee' ORDER BY seq")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_finalize_rejects_non_wip() {
        let conn = test_conn();
        let v1 = create_record(&conn, &new_record("c0ffee")).unwrap();
        finalize_version(&conn, &v1.id).unwrap();
        assert!(finalize_version(&conn, &v1.id).is_err());
    }

    #[test]
    fn test_action_practice_inherited_from_previous() {
        let conn = test_conn();
        let action_id =
            crate::engine::source::action_get_or_create(&conn, "produção científica", None)
                .unwrap();
        let v1 = create_record(
            &conn,
            &NewRecord {
                action_id: Some(action_id),
                classification: Some("literatura científica"),
                ..new_record("c0ffee")
            },
        )
        .unwrap();
        finalize_version(&conn, &v1.id).unwrap();

        // The successor carries no resolution of its own and inherits.
        let v2 = create_record(&conn, &new_record("c0ffee")).unwrap();
        assert_eq!(v2.action_id, Some(action_id));
        assert_eq!(v2.classification, Some("literatura científica".to_string()));
    }
}
