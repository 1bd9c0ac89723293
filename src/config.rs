//! Runtime configuration types.

use serde::Deserialize;
use std::path::Path;

/// Runtime configuration for an interpreter state.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Whether the garbage collector runs at all (default: true)
    pub gc_enabled: bool,
    /// Allocations between collections before the first sweep
    pub gc_threshold: usize,
    /// Print GC statistics after a CLI run
    pub gc_stats: bool,
    /// Directories consulted by `require`/`load`, in order
    pub search_paths: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gc_enabled: true,
            gc_threshold: 1024,
            gc_stats: false,
            search_paths: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        toml::from_str(&text).map_err(|e| format!("invalid config {}: {}", path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert!(config.gc_enabled);
        assert_eq!(config.gc_threshold, 1024);
        assert!(config.search_paths.is_empty());
    }

    #[test]
    fn test_toml_parse() {
        let config: RuntimeConfig = toml::from_str(
            r#"
            gc_enabled = false
            gc_threshold = 64
            search_paths = ["/lib", "/vendor"]
            "#,
        )
        .unwrap();
        assert!(!config.gc_enabled);
        assert_eq!(config.gc_threshold, 64);
        assert_eq!(config.search_paths, vec!["/lib", "/vendor"]);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: RuntimeConfig = toml::from_str("gc_stats = true").unwrap();
        assert!(config.gc_stats);
        assert_eq!(config.gc_threshold, 1024);
    }
}
