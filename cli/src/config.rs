use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_RATE_LIMIT: u32 = 120;
const DEFAULT_RATE_WINDOW_SECS: u64 = 60;

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    /// Explicit `TALLY_LOG` filter, if any.
    pub log_level: Option<String>,
    pub rate_limit: RateLimitSettings,
}

/// Requests allowed per caller within one fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_RATE_LIMIT,
            window: Duration::from_secs(DEFAULT_RATE_WINDOW_SECS),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an environment lookup, so tests can supply their own.
    fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = match env("TALLY_DATA_DIR").filter(|v| !v.trim().is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => ProjectDirs::from("", "", "tally")
                .context("Could not determine home directory")?
                .data_dir()
                .to_path_buf(),
        };
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join("tally.db");
        let log_level = env("TALLY_LOG").filter(|v| !v.trim().is_empty());

        let mut rate_limit = RateLimitSettings::default();
        if let Some(raw) = env("TALLY_RATE_LIMIT") {
            rate_limit.max_requests = parse_positive("TALLY_RATE_LIMIT", &raw)?;
        }
        if let Some(raw) = env("TALLY_RATE_WINDOW_SECS") {
            rate_limit.window = Duration::from_secs(parse_positive("TALLY_RATE_WINDOW_SECS", &raw)?);
        }

        Ok(Config {
            db_path,
            data_dir,
            log_level,
            rate_limit,
        })
    }

    /// The configured log filter, or `default` when none was set.
    pub fn log_level_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.log_level.as_deref().unwrap_or(default)
    }

    /// Load the API key from disk, or generate a new one.
    ///
    /// Returns `(key, newly_created)` where `newly_created` is true when a
    /// fresh key was just generated (first run).
    pub fn load_or_create_api_key(&self) -> Result<(String, bool)> {
        load_or_create_key_at(&self.data_dir.join("api_key"))
    }
}

fn parse_positive<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match raw.trim().parse::<T>() {
        Ok(v) if v > T::default() => Ok(v),
        _ => bail!("{name} must be a positive integer, got '{raw}'"),
    }
}

fn load_or_create_key_at(path: &Path) -> Result<(String, bool)> {
    use rand::Rng;
    use std::fmt::Write;

    if path.exists() {
        let key = std::fs::read_to_string(path).context("Failed to read API key file")?;
        let key = key.trim().to_string();
        if !key.is_empty() {
            return Ok((key, false));
        }
    }

    let bytes: [u8; 32] = rand::rng().random();
    let key = bytes
        .iter()
        .fold(String::with_capacity(64), |mut acc: String, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        });
    std::fs::write(path, &key).context("Failed to write API key file")?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .context("Failed to set API key file permissions")?;
    }
    tracing::info!(path = %path.display(), "Generated new API key");
    Ok((key, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_data_dir_override() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        let config =
            Config::from_lookup(lookup(&[("TALLY_DATA_DIR", nested.to_str().unwrap())])).unwrap();
        assert!(nested.is_dir());
        assert_eq!(config.db_path, nested.join("tally.db"));
        assert_eq!(config.log_level, None);
        assert_eq!(config.log_level_or("warn"), "warn");
        assert_eq!(config.rate_limit, RateLimitSettings::default());
    }

    #[test]
    fn test_log_and_rate_limit_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_lookup(lookup(&[
            ("TALLY_DATA_DIR", dir.path().to_str().unwrap()),
            ("TALLY_LOG", "debug"),
            ("TALLY_RATE_LIMIT", "5"),
            ("TALLY_RATE_WINDOW_SECS", " 10 "),
        ]))
        .unwrap();
        assert_eq!(config.log_level_or("warn"), "debug");
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.rate_limit.window, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_rate_limit_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        for bad in ["0", "-1", "lots"] {
            let err = Config::from_lookup(lookup(&[
                ("TALLY_DATA_DIR", path),
                ("TALLY_RATE_LIMIT", bad),
            ]))
            .err()
            .unwrap();
            assert!(err.to_string().contains("TALLY_RATE_LIMIT"));
        }
    }

    #[test]
    fn test_api_key_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_key");

        let (key, created) = load_or_create_key_at(&path).unwrap();
        assert!(created);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));

        let (again, created) = load_or_create_key_at(&path).unwrap();
        assert!(!created);
        assert_eq!(again, key);
    }

    #[test]
    fn test_blank_api_key_file_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_key");
        std::fs::write(&path, "  \n").unwrap();

        let (key, created) = load_or_create_key_at(&path).unwrap();
        assert!(created);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), key);
    }
}
