//! Centralized database schema definitions for the Mirante store.
//!
//! Mirante keeps all state in one SQLite database (`mirante.db`):
//! 1. Reference entities: controlled vocabularies (action, practice,
//!    institution, location, thematic_area).
//! 2. Source collections: the four Open Science directories plus the
//!    scholarly article corpus, with their link tables.
//! 3. Indicator versions: the code-identified version chains, their
//!    cross-reference links and keyword tags.
//! 4. Scheduled tasks: the computation combinations enqueued by the
//!    scheduling glue.

pub const INDICATOR_DB_NAME: &str = "mirante.db";

// --- 1. Reference entities ---

pub const REF_SCHEMA_ACTION: &str = "
    CREATE TABLE IF NOT EXISTS action (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        code TEXT,
        created_at TEXT NOT NULL
    )
";

pub const REF_SCHEMA_PRACTICE: &str = "
    CREATE TABLE IF NOT EXISTS practice (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        code TEXT,
        created_at TEXT NOT NULL
    )
";

pub const REF_SCHEMA_INSTITUTION: &str = "
    CREATE TABLE IF NOT EXISTS institution (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        acronym TEXT,
        city TEXT,
        state TEXT,
        country TEXT,
        UNIQUE(name, city, state, country)
    )
";

pub const REF_SCHEMA_LOCATION: &str = "
    CREATE TABLE IF NOT EXISTS location (
        id INTEGER PRIMARY KEY,
        city TEXT,
        state TEXT,
        country TEXT,
        UNIQUE(city, state, country)
    )
";

pub const REF_SCHEMA_THEMATIC_AREA: &str = "
    CREATE TABLE IF NOT EXISTS thematic_area (
        id INTEGER PRIMARY KEY,
        level0 TEXT,
        level1 TEXT,
        level2 TEXT,
        UNIQUE(level0, level1, level2)
    )
";

// --- 2. Source collections ---
//
// The four directory tables share one shape; education and infrastructure
// link institutions through `*_institutions` while event and policy use
// `*_organizations`. The aggregator's alternative attribute sets exist to
// unify that split.

macro_rules! directory_schema {
    () => {
        "(
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        link TEXT,
        description TEXT,
        action TEXT,
        classification TEXT,
        practice TEXT,
        start_year INTEGER,
        end_year INTEGER,
        record_status TEXT,
        source TEXT,
        created_at TEXT NOT NULL
    )"
    };
}

pub const SOURCE_SCHEMA_EDUCATION: &str =
    concat!("CREATE TABLE IF NOT EXISTS education ", directory_schema!());
pub const SOURCE_SCHEMA_EVENT: &str =
    concat!("CREATE TABLE IF NOT EXISTS event ", directory_schema!());
pub const SOURCE_SCHEMA_INFRASTRUCTURE: &str = concat!(
    "CREATE TABLE IF NOT EXISTS infrastructure ",
    directory_schema!()
);
pub const SOURCE_SCHEMA_POLICY: &str =
    concat!("CREATE TABLE IF NOT EXISTS policy ", directory_schema!());

macro_rules! link_schema {
    ($table:expr, $parent:expr, $ref_table:expr, $ref_col:expr) => {
        concat!(
            "CREATE TABLE IF NOT EXISTS ",
            $table,
            " (
        record_id TEXT NOT NULL REFERENCES ",
            $parent,
            "(id) ON DELETE CASCADE,
        ",
            $ref_col,
            " INTEGER NOT NULL REFERENCES ",
            $ref_table,
            "(id),
        UNIQUE(record_id, ",
            $ref_col,
            ")
    )"
        )
    };
}

pub const SOURCE_SCHEMA_EDUCATION_INSTITUTIONS: &str = link_schema!(
    "education_institutions",
    "education",
    "institution",
    "institution_id"
);
pub const SOURCE_SCHEMA_EDUCATION_LOCATIONS: &str =
    link_schema!("education_locations", "education", "location", "location_id");
pub const SOURCE_SCHEMA_EDUCATION_THEMATIC: &str = link_schema!(
    "education_thematic_areas",
    "education",
    "thematic_area",
    "thematic_id"
);

pub const SOURCE_SCHEMA_EVENT_ORGANIZATIONS: &str = link_schema!(
    "event_organizations",
    "event",
    "institution",
    "institution_id"
);
pub const SOURCE_SCHEMA_EVENT_LOCATIONS: &str =
    link_schema!("event_locations", "event", "location", "location_id");
pub const SOURCE_SCHEMA_EVENT_THEMATIC: &str = link_schema!(
    "event_thematic_areas",
    "event",
    "thematic_area",
    "thematic_id"
);

pub const SOURCE_SCHEMA_INFRASTRUCTURE_INSTITUTIONS: &str = link_schema!(
    "infrastructure_institutions",
    "infrastructure",
    "institution",
    "institution_id"
);
pub const SOURCE_SCHEMA_INFRASTRUCTURE_LOCATIONS: &str = link_schema!(
    "infrastructure_locations",
    "infrastructure",
    "location",
    "location_id"
);
pub const SOURCE_SCHEMA_INFRASTRUCTURE_THEMATIC: &str = link_schema!(
    "infrastructure_thematic_areas",
    "infrastructure",
    "thematic_area",
    "thematic_id"
);

pub const SOURCE_SCHEMA_POLICY_ORGANIZATIONS: &str = link_schema!(
    "policy_organizations",
    "policy",
    "institution",
    "institution_id"
);
pub const SOURCE_SCHEMA_POLICY_LOCATIONS: &str =
    link_schema!("policy_locations", "policy", "location", "location_id");
pub const SOURCE_SCHEMA_POLICY_THEMATIC: &str = link_schema!(
    "policy_thematic_areas",
    "policy",
    "thematic_area",
    "thematic_id"
);

pub const SOURCE_SCHEMA_ARTICLE: &str = "
    CREATE TABLE IF NOT EXISTS article (
        id TEXT PRIMARY KEY,
        doi TEXT,
        title TEXT,
        journal TEXT,
        year INTEGER,
        open_access_status TEXT,
        use_license TEXT,
        affiliation_institution TEXT,
        affiliation_city TEXT,
        affiliation_state TEXT,
        affiliation_country TEXT,
        record_status TEXT,
        created_at TEXT NOT NULL
    )
";

pub const SOURCE_SCHEMA_ARTICLE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_article_year_oa ON article(year, open_access_status)";

// --- 3. Indicator versions ---

pub const INDICATOR_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS indicator (
        id TEXT PRIMARY KEY,
        code TEXT NOT NULL,
        seq INTEGER NOT NULL,
        title TEXT NOT NULL,
        description TEXT,
        action_id INTEGER REFERENCES action(id),
        classification TEXT,
        practice_id INTEGER REFERENCES practice(id),
        scope TEXT,
        measurement TEXT,
        object_name TEXT,
        category TEXT,
        context TEXT,
        start_date_year INTEGER,
        end_date_year INTEGER,
        computed TEXT,
        total INTEGER,
        raw_data_path TEXT,
        record_status TEXT NOT NULL,
        validity TEXT,
        previous_id TEXT REFERENCES indicator(id),
        posterior_id TEXT REFERENCES indicator(id),
        source TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

// One in-flight computation per code: the storage-level guard behind
// the version chain manager's check.
pub const INDICATOR_DB_SCHEMA_WIP_GUARD: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_indicator_wip
     ON indicator(code) WHERE record_status = 'WIP'";

pub const INDICATOR_DB_SCHEMA_CODE_SEQ: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_indicator_code_seq ON indicator(code, seq)";

pub const INDICATOR_DB_SCHEMA_VALIDITY: &str =
    "CREATE INDEX IF NOT EXISTS idx_indicator_validity ON indicator(validity, record_status)";

pub const INDICATOR_DB_SCHEMA_INSTITUTIONS: &str = "
    CREATE TABLE IF NOT EXISTS indicator_institutions (
        indicator_id TEXT NOT NULL REFERENCES indicator(id) ON DELETE CASCADE,
        institution_id INTEGER NOT NULL REFERENCES institution(id),
        UNIQUE(indicator_id, institution_id)
    )
";

pub const INDICATOR_DB_SCHEMA_LOCATIONS: &str = "
    CREATE TABLE IF NOT EXISTS indicator_locations (
        indicator_id TEXT NOT NULL REFERENCES indicator(id) ON DELETE CASCADE,
        location_id INTEGER NOT NULL REFERENCES location(id),
        UNIQUE(indicator_id, location_id)
    )
";

pub const INDICATOR_DB_SCHEMA_THEMATIC: &str = "
    CREATE TABLE IF NOT EXISTS indicator_thematic_areas (
        indicator_id TEXT NOT NULL REFERENCES indicator(id) ON DELETE CASCADE,
        thematic_id INTEGER NOT NULL REFERENCES thematic_area(id),
        UNIQUE(indicator_id, thematic_id)
    )
";

pub const INDICATOR_DB_SCHEMA_KEYWORDS: &str = "
    CREATE TABLE IF NOT EXISTS indicator_keywords (
        indicator_id TEXT NOT NULL REFERENCES indicator(id) ON DELETE CASCADE,
        keyword TEXT NOT NULL,
        UNIQUE(indicator_id, keyword)
    )
";

// --- 4. Scheduled tasks ---

pub const SCHEDULE_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS scheduled_task (
        name TEXT PRIMARY KEY,
        operation TEXT NOT NULL,
        params TEXT NOT NULL,
        run_at_hour INTEGER NOT NULL,
        run_at_minute INTEGER NOT NULL,
        priority INTEGER NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        last_run TEXT,
        last_status TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

/// Every statement applied by `db::initialize_db`, in dependency order.
pub const ALL_SCHEMAS: &[&str] = &[
    REF_SCHEMA_ACTION,
    REF_SCHEMA_PRACTICE,
    REF_SCHEMA_INSTITUTION,
    REF_SCHEMA_LOCATION,
    REF_SCHEMA_THEMATIC_AREA,
    SOURCE_SCHEMA_EDUCATION,
    SOURCE_SCHEMA_EVENT,
    SOURCE_SCHEMA_INFRASTRUCTURE,
    SOURCE_SCHEMA_POLICY,
    SOURCE_SCHEMA_EDUCATION_INSTITUTIONS,
    SOURCE_SCHEMA_EDUCATION_LOCATIONS,
    SOURCE_SCHEMA_EDUCATION_THEMATIC,
    SOURCE_SCHEMA_EVENT_ORGANIZATIONS,
    SOURCE_SCHEMA_EVENT_LOCATIONS,
    SOURCE_SCHEMA_EVENT_THEMATIC,
    SOURCE_SCHEMA_INFRASTRUCTURE_INSTITUTIONS,
    SOURCE_SCHEMA_INFRASTRUCTURE_LOCATIONS,
    SOURCE_SCHEMA_INFRASTRUCTURE_THEMATIC,
    SOURCE_SCHEMA_POLICY_ORGANIZATIONS,
    SOURCE_SCHEMA_POLICY_LOCATIONS,
    SOURCE_SCHEMA_POLICY_THEMATIC,
    SOURCE_SCHEMA_ARTICLE,
    SOURCE_SCHEMA_ARTICLE_INDEX,
    INDICATOR_DB_SCHEMA,
    INDICATOR_DB_SCHEMA_WIP_GUARD,
    INDICATOR_DB_SCHEMA_CODE_SEQ,
    INDICATOR_DB_SCHEMA_VALIDITY,
    INDICATOR_DB_SCHEMA_INSTITUTIONS,
    INDICATOR_DB_SCHEMA_LOCATIONS,
    INDICATOR_DB_SCHEMA_THEMATIC,
    INDICATOR_DB_SCHEMA_KEYWORDS,
    SCHEDULE_DB_SCHEMA,
];
