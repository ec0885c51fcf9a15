//! Category/context registry: the immutable configuration describing
//! which grouping dimensions each indicator family uses.
//!
//! The registry is parsed once at startup from the embedded
//! `registry.toml` (or a store-local override) and validated against the
//! per-collection dimension support matrix, so an invalid grouping field
//! is a load-time configuration error rather than a query-time surprise.

use crate::core::assets;
use crate::core::error::MiranteError;
use crate::engine::source::SourceKind;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Closed set of grouping dimensions. Each source collection maps the
/// dimensions it supports onto SQL accessors (`SourceKind::accessor`);
/// there are no free-form field paths anywhere in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dimension {
    Action,
    Classification,
    Practice,
    ThematicLevel0,
    ThematicLevel1,
    ThematicLevel2,
    InstitutionName,
    InstitutionCity,
    InstitutionState,
    OrganizationName,
    OrganizationCity,
    OrganizationState,
    LocationCity,
    LocationState,
    Year,
    OpenAccessStatus,
    UseLicense,
    Journal,
    AffiliationInstitution,
    AffiliationState,
    AffiliationCountry,
}

impl Dimension {
    /// Stable label used in error messages and task params.
    pub fn label(&self) -> &'static str {
        match self {
            Dimension::Action => "action",
            Dimension::Classification => "classification",
            Dimension::Practice => "practice",
            Dimension::ThematicLevel0 => "thematic-level0",
            Dimension::ThematicLevel1 => "thematic-level1",
            Dimension::ThematicLevel2 => "thematic-level2",
            Dimension::InstitutionName => "institution-name",
            Dimension::InstitutionCity => "institution-city",
            Dimension::InstitutionState => "institution-state",
            Dimension::OrganizationName => "organization-name",
            Dimension::OrganizationCity => "organization-city",
            Dimension::OrganizationState => "organization-state",
            Dimension::LocationCity => "location-city",
            Dimension::LocationState => "location-state",
            Dimension::Year => "year",
            Dimension::OpenAccessStatus => "open-access-status",
            Dimension::UseLicense => "use-license",
            Dimension::Journal => "journal",
            Dimension::AffiliationInstitution => "affiliation-institution",
            Dimension::AffiliationState => "affiliation-state",
            Dimension::AffiliationCountry => "affiliation-country",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    Institutional,
    Geographic,
    Thematic,
}

/// A primary grouping dimension for an indicator (e.g. action, practice).
#[derive(Debug, Clone)]
pub struct CategoryDefinition {
    pub id: String,
    /// Title fragment rendered as " por {title}"; empty for the base family.
    pub title: String,
    /// Display name used as the payload's category key.
    pub name: String,
    pub dimensions: Vec<Dimension>,
    pub targets: Vec<SourceKind>,
}

/// A secondary slicing dimension (institution, state, thematic area).
///
/// `options` are alternative attribute sets: the same semantic concept is
/// named differently across source variants, so each option is tried in
/// order against each target collection.
#[derive(Debug, Clone)]
pub struct ContextDefinition {
    pub id: String,
    pub kind: ContextKind,
    pub targets: Vec<SourceKind>,
    pub options: Vec<Vec<Dimension>>,
}

#[derive(Debug, Deserialize)]
struct RawCategory {
    id: String,
    #[serde(default)]
    title: String,
    name: String,
    dimensions: Vec<Dimension>,
    targets: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawContext {
    id: String,
    kind: ContextKind,
    targets: Vec<String>,
    options: Vec<Vec<Dimension>>,
}

#[derive(Debug, Deserialize)]
struct RawRegistry {
    #[serde(default)]
    category: Vec<RawCategory>,
    #[serde(default)]
    context: Vec<RawContext>,
}

/// The loaded, validated registry. Injected into the aggregation and
/// record-building layers; never consulted as ambient global state.
#[derive(Debug, Clone)]
pub struct Registry {
    categories: FxHashMap<String, CategoryDefinition>,
    category_order: Vec<String>,
    contexts: FxHashMap<String, ContextDefinition>,
    context_order: Vec<String>,
}

impl Registry {
    /// Load the registry for a store: `registry.toml` in the store root
    /// when present, the embedded default otherwise.
    pub fn load(store_root: &Path) -> Result<Self, MiranteError> {
        Self::from_toml(&assets::registry_toml(store_root))
    }

    pub fn from_toml(text: &str) -> Result<Self, MiranteError> {
        let raw: RawRegistry =
            toml::from_str(text).map_err(|e| MiranteError::ConfigError(e.to_string()))?;

        let mut categories = FxHashMap::default();
        let mut category_order = Vec::new();
        for cat in raw.category {
            let targets = parse_targets(&cat.id, &cat.targets)?;
            for dim in &cat.dimensions {
                for target in &targets {
                    if !target.supports(*dim) {
                        return Err(MiranteError::ConfigError(format!(
                            "category {}: dimension {} is not supported by collection {}",
                            cat.id,
                            dim.label(),
                            target.as_str()
                        )));
                    }
                }
            }
            if cat.dimensions.is_empty() {
                return Err(MiranteError::ConfigError(format!(
                    "category {} has no dimensions",
                    cat.id
                )));
            }
            let def = CategoryDefinition {
                id: cat.id.clone(),
                title: cat.title,
                name: cat.name,
                dimensions: cat.dimensions,
                targets,
            };
            if categories.insert(cat.id.clone(), def).is_some() {
                return Err(MiranteError::ConfigError(format!(
                    "duplicate category id {}",
                    cat.id
                )));
            }
            category_order.push(cat.id);
        }

        let mut contexts = FxHashMap::default();
        let mut context_order = Vec::new();
        for ctx in raw.context {
            let targets = parse_targets(&ctx.id, &ctx.targets)?;
            if ctx.options.is_empty() || ctx.options.iter().any(|o| o.is_empty()) {
                return Err(MiranteError::ConfigError(format!(
                    "context {} has an empty attribute set",
                    ctx.id
                )));
            }
            // Every target must be reachable through at least one option;
            // every option must serve at least one target.
            for target in &targets {
                if !ctx
                    .options
                    .iter()
                    .any(|opt| opt.iter().all(|d| target.supports(*d)))
                {
                    return Err(MiranteError::ConfigError(format!(
                        "context {}: no attribute set is supported by collection {}",
                        ctx.id,
                        target.as_str()
                    )));
                }
            }
            for opt in &ctx.options {
                if !targets
                    .iter()
                    .any(|t| opt.iter().all(|d| t.supports(*d)))
                {
                    return Err(MiranteError::ConfigError(format!(
                        "context {}: attribute set [{}] matches no target collection",
                        ctx.id,
                        opt.iter().map(|d| d.label()).collect::<Vec<_>>().join(", ")
                    )));
                }
            }
            let def = ContextDefinition {
                id: ctx.id.clone(),
                kind: ctx.kind,
                targets,
                options: ctx.options,
            };
            if contexts.insert(ctx.id.clone(), def).is_some() {
                return Err(MiranteError::ConfigError(format!(
                    "duplicate context id {}",
                    ctx.id
                )));
            }
            context_order.push(ctx.id);
        }

        Ok(Registry {
            categories,
            category_order,
            contexts,
            context_order,
        })
    }

    pub fn category(&self, id: &str) -> Option<&CategoryDefinition> {
        self.categories.get(id)
    }

    pub fn context(&self, id: &str) -> Option<&ContextDefinition> {
        self.contexts.get(id)
    }

    pub fn require_category(&self, id: &str) -> Result<&CategoryDefinition, MiranteError> {
        self.category(id)
            .ok_or_else(|| MiranteError::NotFound(format!("category {}", id)))
    }

    pub fn require_context(&self, id: &str) -> Result<&ContextDefinition, MiranteError> {
        self.context(id)
            .ok_or_else(|| MiranteError::NotFound(format!("context {}", id)))
    }

    pub fn categories(&self) -> impl Iterator<Item = &CategoryDefinition> {
        self.category_order
            .iter()
            .filter_map(|id| self.categories.get(id))
    }

    pub fn contexts(&self) -> impl Iterator<Item = &ContextDefinition> {
        self.context_order
            .iter()
            .filter_map(|id| self.contexts.get(id))
    }
}

fn parse_targets(owner: &str, targets: &[String]) -> Result<Vec<SourceKind>, MiranteError> {
    if targets.is_empty() {
        return Err(MiranteError::ConfigError(format!(
            "{} names no target collections",
            owner
        )));
    }
    targets
        .iter()
        .map(|t| {
            SourceKind::parse(t).ok_or_else(|| {
                MiranteError::ConfigError(format!("{}: unknown collection {}", owner, t))
            })
        })
        .collect()
}
