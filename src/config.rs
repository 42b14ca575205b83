//! Layered settings loaded from TOML files under `config/`.
//!
//! `Settings::new(None)` reads `config/default.toml`; passing a name reads
//! `config/<name>.toml` instead, so a rig can keep one file per setup.

use std::path::PathBuf;

use config::{Config, File};
use serde::Deserialize;

use crate::engine::TimingPolicy;
use crate::error::ScanError;

/// Top-level application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Tracing filter directive, e.g. `"info"` or `"labscan=debug"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Where runs are written and optionally mirrored.
    pub storage: StorageSettings,
    /// Dwell and settle times applied by the scan loop.
    #[serde(default)]
    pub timing: TimingPolicy,
}

/// Filesystem locations for acquired data.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// Local base directory; dated run directories are created beneath it.
    pub data_dir: PathBuf,
    /// Optional network share to mirror finished runs to.
    #[serde(default)]
    pub remote_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load settings from `config/<name>.toml` (default name: `default`).
    pub fn new(name: Option<&str>) -> Result<Self, ScanError> {
        let path = format!("config/{}", name.unwrap_or("default"));
        let cfg = Config::builder()
            .add_source(File::with_name(&path))
            .build()?;
        cfg.try_deserialize().map_err(ScanError::Config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;
    use std::time::Duration;

    fn from_str(toml: &str) -> Result<Settings, config::ConfigError> {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    #[test]
    fn full_settings_deserialize() {
        let s = from_str(
            r#"
            log_level = "labscan=debug"

            [storage]
            data_dir = "/data/local"
            remote_dir = "/mnt/share"

            [timing]
            const_settle_time = "2s"
            settle_before_measure = "100ms"
            "#,
        )
        .unwrap();
        assert_eq!(s.log_level, "labscan=debug");
        assert_eq!(s.storage.data_dir, PathBuf::from("/data/local"));
        assert_eq!(s.storage.remote_dir, Some(PathBuf::from("/mnt/share")));
        assert_eq!(s.timing.const_settle_time, Duration::from_secs(2));
        assert_eq!(s.timing.settle_before_measure, Duration::from_millis(100));
    }

    #[test]
    fn minimal_settings_use_defaults() {
        let s = from_str("[storage]\ndata_dir = \"/tmp/runs\"\n").unwrap();
        assert_eq!(s.log_level, "info");
        assert!(s.storage.remote_dir.is_none());
        assert_eq!(s.timing.settle_after_measure, Duration::from_millis(50));
    }
}
