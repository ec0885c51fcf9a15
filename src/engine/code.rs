//! Deterministic indicator identity codes.
//!
//! The code is a pure function of the indicator's semantic parameters:
//! identical parameters always hash to the same 64-hex-char identity, so
//! a re-run finds "the same indicator" and supersedes it instead of
//! duplicating it. No clock or randomness may enter the hashed string.

use crate::engine::Measurement;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

/// Canonical short forms for the directory classification vocabulary.
/// An unmapped classification contributes an empty segment.
pub const CLASSIFICATION_SLUGS: &[(&str, &str)] = &[
    ("curso livre", "CURSO-LIVRE"),
    ("disciplina de graduação", "DISC-GRADUACAO"),
    ("disciplina de lato sensu", "DISC-LATO-SENSU"),
    ("disciplina de stricto sensu", "DISC-STRICTO-SENSU"),
    ("encontro", "ENCONTRO"),
    ("conferência", "CONFERENCIA"),
    ("congresso", "CONGRESSO"),
    ("workshop", "WORKSHOP"),
    ("seminário", "SEMINARIO"),
    ("outros", "OUTROS"),
    ("portal", "PORTAL"),
    ("plataforma", "PLATAFORMA"),
    ("servidor", "SERVIDOR"),
    ("repositório", "REPOSITORIO"),
    ("serviço", "SERVICO"),
    ("promoção", "PROMOCAO"),
    ("posicionamento", "POSICIONAMENTO"),
    ("mandato", "MANDATO"),
    ("geral", "GERAL"),
    ("outras", "OUTRAS"),
    ("literatura científica", "LIT-CIENTIFICA"),
];

pub fn classification_slug(classification: &str) -> &'static str {
    CLASSIFICATION_SLUGS
        .iter()
        .find(|(name, _)| *name == classification)
        .map(|(_, slug)| *slug)
        .unwrap_or("")
}

/// The semantic parameters that identify an indicator across versions.
#[derive(Debug, Clone, Default)]
pub struct CodeParams<'a> {
    /// Action code when available, display name otherwise.
    pub action: Option<&'a str>,
    pub classification: Option<&'a str>,
    /// Practice code when available, display name otherwise.
    pub practice: Option<&'a str>,
    pub measurement: Option<Measurement>,
    pub object_name: &'a str,
    pub start_year: Option<i64>,
    pub end_year: Option<i64>,
    pub category1: Option<&'a str>,
    pub category2: Option<&'a str>,
    pub context: &'a [String],
}

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));
static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Z0-9]+").expect("slug pattern"));

/// Derive the fixed-length identity code for one indicator configuration.
///
/// Segments are joined in fixed order, case-folded, whitespace-normalized
/// and slugified before hashing; the SHA-256 hex digest keeps the identity
/// bounded and collision-resistant regardless of how long the raw
/// concatenation grows.
pub fn build_code(p: &CodeParams) -> String {
    let year = |y: Option<i64>| y.map(|v| v.to_string()).unwrap_or_default();
    let mut segments: Vec<String> = vec![
        p.action.unwrap_or_default().to_string(),
        p.classification.map(classification_slug).unwrap_or("").to_string(),
        p.practice.unwrap_or_default().to_string(),
        p.measurement.map(|m| m.as_str()).unwrap_or("").to_string(),
        p.object_name.to_string(),
        p.category2.or(p.category1).unwrap_or_default().to_string(),
        year(p.start_year),
        year(p.end_year),
    ];
    segments.extend(p.context.iter().cloned());

    let joined = segments.join("|").to_uppercase();
    let squeezed = WHITESPACE.replace_all(&joined, " ");
    let slug = NON_ALNUM.replace_all(&squeezed, "-");
    let slug = slug.trim_matches('-');

    let mut hasher = Sha256::new();
    hasher.update(slug.as_bytes());
    format!("{:x}", hasher.finalize())
}
