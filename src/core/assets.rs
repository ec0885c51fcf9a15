//! Embedded configuration assets.
//!
//! The default category/context registry is baked into the binary so a
//! store works without any external files. A `registry.toml` placed in
//! the store root overrides the embedded default.

use std::fs;
use std::path::Path;

pub const EMBEDDED_REGISTRY: &str = include_str!("../../config/registry.toml");

/// Registry TOML for a store: the on-disk override when present,
/// otherwise the embedded default.
pub fn registry_toml(store_root: &Path) -> String {
    let override_path = store_root.join("registry.toml");
    if override_path.exists() {
        if let Ok(content) = fs::read_to_string(&override_path) {
            return content;
        }
    }
    EMBEDDED_REGISTRY.to_string()
}
