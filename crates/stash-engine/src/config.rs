use serde::{Deserialize, Serialize};

/// 100 MiB, the quota a new account gets unless told otherwise.
pub const DEFAULT_STORAGE_LIMIT: u64 = 100 * 1024 * 1024;

/// Configuration for the storage engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Storage limit for accounts provisioned without an explicit one.
    pub default_storage_limit: u64,
    /// Minimum age of an unreferenced blob before the orphan sweep may
    /// delete it. Protects uploads whose metadata has not committed yet.
    pub orphan_grace_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_storage_limit: DEFAULT_STORAGE_LIMIT,
            orphan_grace_secs: 60 * 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = EngineConfig::default();
        assert_eq!(c.default_storage_limit, 104_857_600);
        assert_eq!(c.orphan_grace_secs, 3600);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c: EngineConfig = toml::from_str("orphan_grace_secs = 5").unwrap();
        assert_eq!(c.orphan_grace_secs, 5);
        assert_eq!(c.default_storage_limit, DEFAULT_STORAGE_LIMIT);
    }
}
