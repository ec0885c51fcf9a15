//! Mirante: the indicator engine of the Brazilian Open Science observatory.
//!
//! Mirante aggregates Open Science action records (education, event,
//! infrastructure, policy directories) and a scholarly article corpus
//! into versioned statistical indicators: rankings, cross-tabs, and
//! evolutions over configurable category and context dimensions.
//!
//! # Core Principles
//!
//! - **Deterministic identity**: every indicator configuration hashes to
//!   a stable 64-hex code, so a re-run supersedes its prior result
//!   instead of duplicating it.
//! - **Versioned, never rewritten**: versions sharing a code form an
//!   append-only previous/posterior chain; publishing a new version
//!   flips its predecessor to OUTDATED. At most one version per code is
//!   CURRENT, and at most one is in flight (WIP) at any time.
//! - **Sparse payloads**: computed payloads carry only nonzero cells;
//!   densifying is the renderer's job.
//! - **Local-first**: all state is one SQLite store plus flat dataset
//!   exports, every mutation audited through the connection broker.
//!
//! # Architecture
//!
//! The engine pipeline for one scheduled combination:
//!
//! ```text
//! schedule ─▶ aggregator ─▶ code ─▶ chain ─▶ record
//!    │            │                            │
//!    │       source collections           dataset export
//!    └── registry (categories × contexts × ranges)
//! ```
//!
//! # Examples
//!
//! ```bash
//! # Initialize a store
//! mirante init
//!
//! # Load directory and article records
//! mirante load --kind education --file education.jsonl
//! mirante load --kind article --file articles.jsonl
//!
//! # Plan and run the computation combinations
//! mirante schedule plan
//! mirante schedule run
//!
//! # Inspect the results
//! mirante indicator list --validity CURRENT
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: store handle, SQLite broker, schema DDL, errors, envelopes
//! - [`engine`]: registry, aggregator, code builder, version chain,
//!   record builder, computation driver, scheduling glue

pub mod cli;
pub mod core;
pub mod engine;
