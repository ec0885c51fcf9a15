//! Source record collections and reference entities.
//!
//! The four Open Science directories (education, event, infrastructure,
//! policy) and the scholarly article corpus are the collections the
//! aggregator reads. Each collection exposes the grouping dimensions it
//! supports as typed SQL accessors; the aggregator depends only on that
//! surface. Reference entities (action, practice, institution, location,
//! thematic area) are resolved through explicit get-or-create upserts.

use crate::core::error::MiranteError;
use crate::engine::registry::Dimension;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// One of the five source collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Education,
    Event,
    Infrastructure,
    Policy,
    Article,
}

/// A grouping dimension lowered to SQL: the select expression plus the
/// join clause it needs, if any. The main table is always aliased `d`.
#[derive(Debug, Clone, Copy)]
pub struct Accessor {
    pub expr: &'static str,
    pub join: Option<&'static str>,
}

const EDUCATION_INSTITUTION_JOIN: &str = "LEFT JOIN education_institutions li ON li.record_id = d.id LEFT JOIN institution inst ON inst.id = li.institution_id";
const INFRASTRUCTURE_INSTITUTION_JOIN: &str = "LEFT JOIN infrastructure_institutions li ON li.record_id = d.id LEFT JOIN institution inst ON inst.id = li.institution_id";
const EVENT_ORGANIZATION_JOIN: &str = "LEFT JOIN event_organizations li ON li.record_id = d.id LEFT JOIN institution inst ON inst.id = li.institution_id";
const POLICY_ORGANIZATION_JOIN: &str = "LEFT JOIN policy_organizations li ON li.record_id = d.id LEFT JOIN institution inst ON inst.id = li.institution_id";

const EDUCATION_LOCATION_JOIN: &str = "LEFT JOIN education_locations ll ON ll.record_id = d.id LEFT JOIN location loc ON loc.id = ll.location_id";
const EVENT_LOCATION_JOIN: &str = "LEFT JOIN event_locations ll ON ll.record_id = d.id LEFT JOIN location loc ON loc.id = ll.location_id";
const INFRASTRUCTURE_LOCATION_JOIN: &str = "LEFT JOIN infrastructure_locations ll ON ll.record_id = d.id LEFT JOIN location loc ON loc.id = ll.location_id";
const POLICY_LOCATION_JOIN: &str = "LEFT JOIN policy_locations ll ON ll.record_id = d.id LEFT JOIN location loc ON loc.id = ll.location_id";

const EDUCATION_THEMATIC_JOIN: &str = "LEFT JOIN education_thematic_areas lt ON lt.record_id = d.id LEFT JOIN thematic_area th ON th.id = lt.thematic_id";
const EVENT_THEMATIC_JOIN: &str = "LEFT JOIN event_thematic_areas lt ON lt.record_id = d.id LEFT JOIN thematic_area th ON th.id = lt.thematic_id";
const INFRASTRUCTURE_THEMATIC_JOIN: &str = "LEFT JOIN infrastructure_thematic_areas lt ON lt.record_id = d.id LEFT JOIN thematic_area th ON th.id = lt.thematic_id";
const POLICY_THEMATIC_JOIN: &str = "LEFT JOIN policy_thematic_areas lt ON lt.record_id = d.id LEFT JOIN thematic_area th ON th.id = lt.thematic_id";

impl SourceKind {
    pub const DIRECTORIES: [SourceKind; 4] = [
        SourceKind::Education,
        SourceKind::Event,
        SourceKind::Infrastructure,
        SourceKind::Policy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Education => "education",
            SourceKind::Event => "event",
            SourceKind::Infrastructure => "infrastructure",
            SourceKind::Policy => "policy",
            SourceKind::Article => "article",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "education" => Some(SourceKind::Education),
            "event" => Some(SourceKind::Event),
            "infrastructure" => Some(SourceKind::Infrastructure),
            "policy" => Some(SourceKind::Policy),
            "article" => Some(SourceKind::Article),
            _ => None,
        }
    }

    pub fn table(&self) -> &'static str {
        self.as_str()
    }

    pub fn is_directory(&self) -> bool {
        !matches!(self, SourceKind::Article)
    }

    fn institution_join(&self) -> Option<&'static str> {
        match self {
            SourceKind::Education => Some(EDUCATION_INSTITUTION_JOIN),
            SourceKind::Infrastructure => Some(INFRASTRUCTURE_INSTITUTION_JOIN),
            _ => None,
        }
    }

    fn organization_join(&self) -> Option<&'static str> {
        match self {
            SourceKind::Event => Some(EVENT_ORGANIZATION_JOIN),
            SourceKind::Policy => Some(POLICY_ORGANIZATION_JOIN),
            _ => None,
        }
    }

    fn location_join(&self) -> Option<&'static str> {
        match self {
            SourceKind::Education => Some(EDUCATION_LOCATION_JOIN),
            SourceKind::Event => Some(EVENT_LOCATION_JOIN),
            SourceKind::Infrastructure => Some(INFRASTRUCTURE_LOCATION_JOIN),
            SourceKind::Policy => Some(POLICY_LOCATION_JOIN),
            SourceKind::Article => None,
        }
    }

    fn thematic_join(&self) -> Option<&'static str> {
        match self {
            SourceKind::Education => Some(EDUCATION_THEMATIC_JOIN),
            SourceKind::Event => Some(EVENT_THEMATIC_JOIN),
            SourceKind::Infrastructure => Some(INFRASTRUCTURE_THEMATIC_JOIN),
            SourceKind::Policy => Some(POLICY_THEMATIC_JOIN),
            SourceKind::Article => None,
        }
    }

    /// Resolve a dimension to its SQL accessor on this collection.
    /// `None` means the collection does not carry that dimension.
    pub fn accessor(&self, dim: Dimension) -> Option<Accessor> {
        let direct = |expr| Some(Accessor { expr, join: None });
        let joined = |expr, join: Option<&'static str>| {
            join.map(|j| Accessor {
                expr,
                join: Some(j),
            })
        };
        match dim {
            Dimension::Action if self.is_directory() => direct("d.action"),
            Dimension::Classification if self.is_directory() => direct("d.classification"),
            Dimension::Practice if self.is_directory() => direct("d.practice"),
            Dimension::ThematicLevel0 => joined("th.level0", self.thematic_join()),
            Dimension::ThematicLevel1 => joined("th.level1", self.thematic_join()),
            Dimension::ThematicLevel2 => joined("th.level2", self.thematic_join()),
            Dimension::InstitutionName => joined("inst.name", self.institution_join()),
            Dimension::InstitutionCity => joined("inst.city", self.institution_join()),
            Dimension::InstitutionState => joined("inst.state", self.institution_join()),
            Dimension::OrganizationName => joined("inst.name", self.organization_join()),
            Dimension::OrganizationCity => joined("inst.city", self.organization_join()),
            Dimension::OrganizationState => joined("inst.state", self.organization_join()),
            Dimension::LocationCity => joined("loc.city", self.location_join()),
            Dimension::LocationState => joined("loc.state", self.location_join()),
            Dimension::Year if *self == SourceKind::Article => direct("d.year"),
            Dimension::OpenAccessStatus if *self == SourceKind::Article => {
                direct("d.open_access_status")
            }
            Dimension::UseLicense if *self == SourceKind::Article => direct("d.use_license"),
            Dimension::Journal if *self == SourceKind::Article => direct("d.journal"),
            Dimension::AffiliationInstitution if *self == SourceKind::Article => {
                direct("d.affiliation_institution")
            }
            Dimension::AffiliationState if *self == SourceKind::Article => {
                direct("d.affiliation_state")
            }
            Dimension::AffiliationCountry if *self == SourceKind::Article => {
                direct("d.affiliation_country")
            }
            _ => None,
        }
    }

    pub fn supports(&self, dim: Dimension) -> bool {
        self.accessor(dim).is_some()
    }
}

// --- Reference entity inputs ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstitutionInput {
    pub name: String,
    #[serde(default)]
    pub acronym: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationInput {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThematicInput {
    #[serde(default)]
    pub level0: Option<String>,
    #[serde(default)]
    pub level1: Option<String>,
    #[serde(default)]
    pub level2: Option<String>,
}

// --- Get-or-create upserts ---
//
// Lookups are explicit Option-returning queries composed with an explicit
// insert-if-absent step; a failure at either step is a reference
// resolution error for the current computation.

fn resolution_err(entity: &str, e: rusqlite::Error) -> MiranteError {
    MiranteError::ReferenceEntityResolutionError(format!("{}: {}", entity, e))
}

pub fn action_get_or_create(
    conn: &Connection,
    name: &str,
    code: Option<&str>,
) -> Result<i64, MiranteError> {
    let found: Option<i64> = conn
        .query_row("SELECT id FROM action WHERE name = ?1", params![name], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| resolution_err("action", e))?;
    if let Some(id) = found {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO action(name, code, created_at) VALUES(?1, ?2, ?3)",
        params![name, code, crate::core::time::now_epoch_z()],
    )
    .map_err(|e| resolution_err("action", e))?;
    Ok(conn.last_insert_rowid())
}

pub fn practice_get_or_create(
    conn: &Connection,
    name: &str,
    code: Option<&str>,
) -> Result<i64, MiranteError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM practice WHERE name = ?1",
            params![name],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| resolution_err("practice", e))?;
    if let Some(id) = found {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO practice(name, code, created_at) VALUES(?1, ?2, ?3)",
        params![name, code, crate::core::time::now_epoch_z()],
    )
    .map_err(|e| resolution_err("practice", e))?;
    Ok(conn.last_insert_rowid())
}

pub fn institution_get_or_create(
    conn: &Connection,
    input: &InstitutionInput,
) -> Result<i64, MiranteError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM institution
             WHERE name = ?1 AND city IS ?2 AND state IS ?3 AND country IS ?4",
            params![input.name, input.city, input.state, input.country],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| resolution_err("institution", e))?;
    if let Some(id) = found {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO institution(name, acronym, city, state, country) VALUES(?1, ?2, ?3, ?4, ?5)",
        params![
            input.name,
            input.acronym,
            input.city,
            input.state,
            input.country
        ],
    )
    .map_err(|e| resolution_err("institution", e))?;
    Ok(conn.last_insert_rowid())
}

pub fn location_get_or_create(
    conn: &Connection,
    input: &LocationInput,
) -> Result<i64, MiranteError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM location WHERE city IS ?1 AND state IS ?2 AND country IS ?3",
            params![input.city, input.state, input.country],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| resolution_err("location", e))?;
    if let Some(id) = found {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO location(city, state, country) VALUES(?1, ?2, ?3)",
        params![input.city, input.state, input.country],
    )
    .map_err(|e| resolution_err("location", e))?;
    Ok(conn.last_insert_rowid())
}

pub fn thematic_get_or_create(
    conn: &Connection,
    input: &ThematicInput,
) -> Result<i64, MiranteError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM thematic_area WHERE level0 IS ?1 AND level1 IS ?2 AND level2 IS ?3",
            params![input.level0, input.level1, input.level2],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| resolution_err("thematic_area", e))?;
    if let Some(id) = found {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO thematic_area(level0, level1, level2) VALUES(?1, ?2, ?3)",
        params![input.level0, input.level1, input.level2],
    )
    .map_err(|e| resolution_err("thematic_area", e))?;
    Ok(conn.last_insert_rowid())
}

// --- Record insertion ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryRecord {
    pub title: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub classification: Option<String>,
    #[serde(default)]
    pub practice: Option<String>,
    #[serde(default)]
    pub start_year: Option<i64>,
    #[serde(default)]
    pub end_year: Option<i64>,
    #[serde(default)]
    pub institutions: Vec<InstitutionInput>,
    #[serde(default)]
    pub locations: Vec<LocationInput>,
    #[serde(default)]
    pub thematic_areas: Vec<ThematicInput>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub record_status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleRecord {
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub journal: Option<String>,
    #[serde(default)]
    pub year: Option<i64>,
    #[serde(default)]
    pub open_access_status: Option<String>,
    #[serde(default)]
    pub use_license: Option<String>,
    #[serde(default)]
    pub affiliation_institution: Option<String>,
    #[serde(default)]
    pub affiliation_city: Option<String>,
    #[serde(default)]
    pub affiliation_state: Option<String>,
    #[serde(default)]
    pub affiliation_country: Option<String>,
    #[serde(default)]
    pub record_status: Option<String>,
}

/// Insert one directory record, resolving its reference entities through
/// the get-or-create upserts and linking its sets.
pub fn insert_directory(
    conn: &Connection,
    kind: SourceKind,
    rec: &DirectoryRecord,
) -> Result<String, MiranteError> {
    if !kind.is_directory() {
        return Err(MiranteError::ValidationError(format!(
            "{} is not a directory collection",
            kind.as_str()
        )));
    }
    // Keep the controlled vocabularies in sync with the denormalized
    // display names stored on the row.
    if let Some(action) = &rec.action {
        action_get_or_create(conn, action, None)?;
    }
    if let Some(practice) = &rec.practice {
        practice_get_or_create(conn, practice, None)?;
    }

    let id = Ulid::new().to_string();
    let status = rec.record_status.as_deref().unwrap_or("PUBLISHED");
    conn.execute(
        &format!(
            "INSERT INTO {}(id, title, link, description, action, classification, practice,
                            start_year, end_year, record_status, source, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            kind.table()
        ),
        params![
            id,
            rec.title,
            rec.link,
            rec.description,
            rec.action,
            rec.classification,
            rec.practice,
            rec.start_year,
            rec.end_year,
            status,
            rec.source,
            crate::core::time::now_epoch_z()
        ],
    )?;

    let link_table = match kind {
        SourceKind::Education => "education_institutions",
        SourceKind::Infrastructure => "infrastructure_institutions",
        SourceKind::Event => "event_organizations",
        SourceKind::Policy => "policy_organizations",
        SourceKind::Article => unreachable!(),
    };
    for inst in &rec.institutions {
        let inst_id = institution_get_or_create(conn, inst)?;
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {}(record_id, institution_id) VALUES(?1, ?2)",
                link_table
            ),
            params![id, inst_id],
        )?;
    }
    for location in &rec.locations {
        let loc_id = location_get_or_create(conn, location)?;
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {}_locations(record_id, location_id) VALUES(?1, ?2)",
                kind.table()
            ),
            params![id, loc_id],
        )?;
    }
    for thematic in &rec.thematic_areas {
        let th_id = thematic_get_or_create(conn, thematic)?;
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {}_thematic_areas(record_id, thematic_id) VALUES(?1, ?2)",
                kind.table()
            ),
            params![id, th_id],
        )?;
    }
    Ok(id)
}

pub fn insert_article(conn: &Connection, rec: &ArticleRecord) -> Result<String, MiranteError> {
    let id = Ulid::new().to_string();
    let status = rec.record_status.as_deref().unwrap_or("PUBLISHED");
    conn.execute(
        "INSERT INTO article(id, doi, title, journal, year, open_access_status, use_license,
                             affiliation_institution, affiliation_city, affiliation_state,
                             affiliation_country, record_status, created_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            id,
            rec.doi,
            rec.title,
            rec.journal,
            rec.year,
            rec.open_access_status,
            rec.use_license,
            rec.affiliation_institution,
            rec.affiliation_city,
            rec.affiliation_state,
            rec.affiliation_country,
            status,
            crate::core::time::now_epoch_z()
        ],
    )?;
    Ok(id)
}

pub fn count_records(conn: &Connection, kind: SourceKind) -> Result<i64, MiranteError> {
    let n = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", kind.table()),
        [],
        |r| r.get(0),
    )?;
    Ok(n)
}

// --- Moderation sweep ---

#[derive(Debug, Default, Serialize)]
pub struct ModerationSummary {
    pub confirmed: u64,
    pub flagged: u64,
}

/// Re-check every directory record's classification against mentions of
/// other known classifications in its title or description. A record
/// mentioning classifications it is not filed under goes to TO MODERATE;
/// the rest are confirmed PUBLISHED.
pub fn moderation_sweep(conn: &Connection) -> Result<ModerationSummary, MiranteError> {
    let mut summary = ModerationSummary::default();
    for kind in SourceKind::DIRECTORIES {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, title, COALESCE(description, ''), COALESCE(classification, '') FROM {}",
            kind.table()
        ))?;
        let rows: Vec<(String, String, String, String)> = stmt
            .query_map([], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
            })?
            .collect::<Result<_, _>>()?;

        for (id, title, description, classification) in rows {
            let haystack = format!("{} {}", title, description).to_lowercase();
            let mentioned: Vec<&str> = crate::engine::code::CLASSIFICATION_SLUGS
                .iter()
                .map(|(name, _)| *name)
                .filter(|name| haystack.contains(name))
                .collect();
            let status = if !mentioned.is_empty() && !mentioned.contains(&classification.as_str())
            {
                summary.flagged += 1;
                "TO MODERATE"
            } else {
                summary.confirmed += 1;
                "PUBLISHED"
            };
            conn.execute(
                &format!("UPDATE {} SET record_status = ?1 WHERE id = ?2", kind.table()),
                params![status, id],
            )?;
        }
    }
    Ok(summary)
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

    #[test]
    fn test_accessor_support_matrix() {
        assert!(SourceKind::Education.supports(Dimension::InstitutionName));
        assert!(!SourceKind::Education.supports(Dimension::OrganizationName));
        assert!(SourceKind::Event.supports(Dimension::OrganizationName));
        assert!(!SourceKind::Event.supports(Dimension::InstitutionName));
        assert!(SourceKind::Article.supports(Dimension::OpenAccessStatus));
        assert!(!SourceKind::Article.supports(Dimension::Action));
        assert!(!SourceKind::Policy.supports(Dimension::UseLicense));
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let conn = test_conn();
        let a = action_get_or_create(&conn, "educação / capacitação", None).unwrap();
        let b = action_get_or_create(&conn, "educação / capacitação", None).unwrap();
        assert_eq!(a, b);

        let inst = InstitutionInput {
            name: "USP".into(),
            city: Some("São Paulo".into()),
            state: Some("SP".into()),
            ..Default::default()
        };
        let x = institution_get_or_create(&conn, &inst).unwrap();
        let y = institution_get_or_create(&conn, &inst).unwrap();
        assert_eq!(x, y);
    }

    #[test]
    fn test_thematic_get_or_create_null_levels() {
        let conn = test_conn();
        let input = ThematicInput {
            level0: Some("Ciências Exatas".into()),
            level1: None,
            level2: None,
        };
        let a = thematic_get_or_create(&conn, &input).unwrap();
        let b = thematic_get_or_create(&conn, &input).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_insert_directory_links_sets() {
        let conn = test_conn();
        let rec = DirectoryRecord {
            title: "Curso de ciência aberta".into(),
            action: Some("educação / capacitação".into()),
            classification: Some("curso livre".into()),
            practice: Some("educação aberta".into()),
            institutions: vec![InstitutionInput {
                name: "UFRGS".into(),
                state: Some("RS".into()),
                ..Default::default()
            }],
            thematic_areas: vec![ThematicInput {
                level0: Some("Multidisciplinar".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let id = insert_directory(&conn, SourceKind::Education, &rec).unwrap();
        let linked: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM education_institutions WHERE record_id = ?1",
                params![id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(linked, 1);
        assert_eq!(count_records(&conn, SourceKind::Education).unwrap(), 1);
    }

    #[test]
    fn test_insert_directory_rejects_article_kind() {
        let conn = test_conn();
        let rec = DirectoryRecord {
            title: "x".into(),
            ..Default::default()
        };
        assert!(insert_directory(&conn, SourceKind::Article, &rec).is_err());
    }

    #[test]
    fn test_moderation_sweep_flags_mismatches() {
        let conn = test_conn();
        insert_directory(
            &conn,
            SourceKind::Event,
            &DirectoryRecord {
                title: "Workshop de dados abertos".into(),
                classification: Some("encontro".into()),
                ..Default::default()
            },
        )
        .unwrap();
        insert_directory(
            &conn,
            SourceKind::Event,
            &DirectoryRecord {
                title: "Encontro nacional".into(),
                classification: Some("encontro".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let summary = moderation_sweep(&conn).unwrap();
        assert_eq!(summary.flagged, 1);
        assert_eq!(summary.confirmed, 1);
        let flagged: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM event WHERE record_status = 'TO MODERATE'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(flagged, 1);
    }
}
