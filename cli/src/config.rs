use anyhow::{Context, Result};
use directories::ProjectDirs;
use parabak_core::verify::VerifyMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_DUPLICATE_THRESHOLD: u64 = 1024 * 1024;

/// Settings read from `config.toml`. Every key is optional; command-line
/// flags and environment variables take precedence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub repository: Option<PathBuf>,
    pub checklist: Option<PathBuf>,
    pub duplicate_threshold: Option<u64>,
    pub progress_interval_ms: Option<u64>,
    pub verify_mode: Option<VerifyMode>,
}

impl Config {
    /// Loads `explicit` if given, else the per-user config file. A missing
    /// default file yields the defaults; a missing explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => {
                    debug!("No config file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// `<config_dir>/parabak/config.toml` for the current user.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "parabak").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn progress_interval(&self) -> Duration {
        self.progress_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(parabak_core::progress::DEFAULT_INTERVAL)
    }

    pub fn duplicate_threshold(&self) -> u64 {
        self.duplicate_threshold.unwrap_or(DEFAULT_DUPLICATE_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
repository = "/mnt/backup"
checklist = "/home/me/checklist.txt"
duplicate_threshold = 4096
progress_interval_ms = 250
verify_mode = "thorough"
"#,
        )
        .unwrap();

        assert_eq!(config.repository, Some(PathBuf::from("/mnt/backup")));
        assert_eq!(config.duplicate_threshold(), 4096);
        assert_eq!(config.progress_interval(), Duration::from_millis(250));
        assert_eq!(config.verify_mode, Some(VerifyMode::Thorough));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.duplicate_threshold(), DEFAULT_DUPLICATE_THRESHOLD);
        assert_eq!(config.progress_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_verify_mode_accepts_the_cli_spellings() {
        for (text, mode) in [
            ("fast", VerifyMode::Fast),
            ("slow", VerifyMode::Thorough),
            ("thorough", VerifyMode::Thorough),
        ] {
            let config = Config::parse(&format!("verify_mode = \"{}\"", text)).unwrap();
            assert_eq!(config.verify_mode, Some(mode));
            assert_eq!(text.parse::<VerifyMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(Config::parse("password = \"hunter2\"").is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("nope.toml"))).is_err());

        let path = dir.path().join("config.toml");
        std::fs::write(&path, "repository = \"/r\"\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.repository, Some(PathBuf::from("/r")));
    }
}
