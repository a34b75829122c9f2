use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::OdmError;

/// Default number of documents a cursor requests per page.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Runtime configuration for cursors and logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OdmConfig {
    pub batch_size: usize,
    /// Upper bound on a single page, whatever the cursor asks for.
    pub max_limit: usize,
    pub log: LogConfig,
}

impl Default for OdmConfig {
    fn default() -> Self {
        Self { batch_size: DEFAULT_BATCH_SIZE, max_limit: 10_000, log: LogConfig::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub dir: Option<PathBuf>,
    /// error|warn|info|debug|trace
    pub level: String,
    pub retention: usize,
    pub dev6: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { dir: None, level: "info".into(), retention: 7, dev6: false }
    }
}

impl OdmConfig {
    /// # Errors
    /// Returns `Config` if the TOML is malformed or values are out of range.
    pub fn from_toml_str(s: &str) -> Result<Self, OdmError> {
        let cfg: Self = toml::from_str(s).map_err(|e| OdmError::Config(e.to_string()))?;
        cfg.validate()
    }

    /// # Errors
    /// Returns `Io` if the file cannot be read, `Config` if it does not parse.
    pub fn from_path(path: &Path) -> Result<Self, OdmError> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    /// Apply overrides from the environment:
    /// - NEXUSODM_BATCH_SIZE
    /// - NEXUSODM_MAX_LIMIT
    /// - NEXUSODM_LOG_DIR
    /// - NEXUSODM_LOG_LEVEL
    /// - NEXUSODM_LOG_RETENTION
    /// - NEXUSODM_DEV6
    ///
    /// # Errors
    /// Returns `Config` when a numeric variable does not parse or is out of range.
    pub fn with_env_overrides(self) -> Result<Self, OdmError> {
        self.with_overrides(|k| std::env::var(k).ok())
    }

    pub(crate) fn with_overrides(
        mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, OdmError> {
        let parse = |k: &str, v: String| {
            v.trim().parse::<usize>().map_err(|e| OdmError::Config(format!("{k}={v}: {e}")))
        };
        if let Some(v) = var("NEXUSODM_BATCH_SIZE") {
            self.batch_size = parse("NEXUSODM_BATCH_SIZE", v)?;
        }
        if let Some(v) = var("NEXUSODM_MAX_LIMIT") {
            self.max_limit = parse("NEXUSODM_MAX_LIMIT", v)?;
        }
        if let Some(v) = var("NEXUSODM_LOG_DIR") {
            self.log.dir = Some(PathBuf::from(v));
        }
        if let Some(v) = var("NEXUSODM_LOG_LEVEL") {
            self.log.level = v.to_ascii_lowercase();
        }
        if let Some(v) = var("NEXUSODM_LOG_RETENTION") {
            self.log.retention = parse("NEXUSODM_LOG_RETENTION", v)?;
        }
        if let Some(v) = var("NEXUSODM_DEV6") {
            self.log.dev6 = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        self.validate()
    }

    fn validate(self) -> Result<Self, OdmError> {
        if self.batch_size == 0 {
            return Err(OdmError::Config("batch_size must be positive".into()));
        }
        if self.max_limit == 0 {
            return Err(OdmError::Config("max_limit must be positive".into()));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn toml_overrides_defaults_partially() {
        let cfg = OdmConfig::from_toml_str("batch_size = 10\n[log]\nlevel = \"debug\"\n").unwrap();
        assert_eq!(cfg.batch_size, 10);
        assert_eq!(cfg.max_limit, 10_000);
        assert_eq!(cfg.log.level, "debug");
        assert_eq!(cfg.log.retention, 7);
    }

    #[test]
    fn zero_batch_is_rejected() {
        assert!(matches!(OdmConfig::from_toml_str("batch_size = 0"), Err(OdmError::Config(_))));
        assert!(OdmConfig::from_toml_str("batch_size = \"x\"").is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> =
            [("NEXUSODM_BATCH_SIZE", "7"), ("NEXUSODM_DEV6", "Yes"), ("NEXUSODM_LOG_LEVEL", "WARN")].into();
        let cfg = OdmConfig::default().with_overrides(|k| vars.get(k).map(|v| (*v).to_owned())).unwrap();
        assert_eq!(cfg.batch_size, 7);
        assert!(cfg.log.dev6);
        assert_eq!(cfg.log.level, "warn");
        let bad = OdmConfig::default().with_overrides(|k| (k == "NEXUSODM_MAX_LIMIT").then(|| "lots".to_owned()));
        assert!(matches!(bad, Err(OdmError::Config(_))));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nexusodm.toml");
        std::fs::write(&path, "max_limit = 50\n").unwrap();
        assert_eq!(OdmConfig::from_path(&path).unwrap().max_limit, 50);
        assert!(matches!(OdmConfig::from_path(&dir.path().join("missing.toml")), Err(OdmError::Io(_))));
    }
}
