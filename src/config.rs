use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = ".beatport-sync.config.yml";
pub const DEFAULT_BASE_URL: &str = "https://api.beatport.com/v4";
pub const DEFAULT_RATE_LIMIT_MS: u64 = 1000;

const TEMPLATE: &str = "\
# beatport-sync configuration
beatport:
  # Copy these from the token request on https://api.beatport.com/v4/docs/
  client_id: \"\"
  access_token: \"\"
  refresh_token: \"\"
  # API root including /v4. A bare host gets /v4 appended on load.
  base_url: https://api.beatport.com/v4
database:
  # `default` uses the Mixxx library location for this OS
  path: default
options:
  verbose: false
  # Minimum delay between Beatport requests
  rate_limit_ms: 1000
";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot determine home directory for the config file")]
    NoHomeDir,
    #[error("config file not found at {}. Run `beatport-sync init` first.", .0.display())]
    Missing(PathBuf),
    #[error("config file {} could not be read or written: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config file {} is not valid YAML: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub beatport: BeatportConfig,
    pub database: DatabaseConfig,
    pub options: Options,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatportConfig {
    pub client_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub base_url: String,
}

impl Default for BeatportConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            access_token: String::new(),
            refresh_token: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to `mixxxdb.sqlite`, or `default`.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub verbose: bool,
    pub rate_limit_ms: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            verbose: false,
            rate_limit_ms: DEFAULT_RATE_LIMIT_MS,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    fn parse(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut config: Self = serde_yaml::from_str(raw)?;
        config.beatport.base_url = api_base_url(&config.beatport.base_url);
        Ok(config)
    }

    /// Write the whole config back. Goes through a sibling temp file so a
    /// crash never leaves a half-written token pair behind.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let yaml = serde_yaml::to_string(self).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension("yml.tmp");
        fs::write(&tmp, yaml).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        debug!("saved config to {}", path.display());
        Ok(())
    }

    pub fn has_credentials(&self) -> bool {
        !self.beatport.access_token.trim().is_empty()
    }
}

/// Request paths are relative to the v4 API root, so a bare host such as
/// `https://api.beatport.com` gets `/v4` appended. Anything with a path is kept.
fn api_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    match reqwest::Url::parse(trimmed) {
        Ok(url) if url.path() == "/" || url.path().is_empty() => format!("{trimmed}/v4"),
        _ => trimmed.to_string(),
    }
}

/// `BEATPORT_SYNC_CONFIG` if set, otherwise `~/.beatport-sync.config.yml`.
pub fn default_path() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = std::env::var("BEATPORT_SYNC_CONFIG") {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(CONFIG_FILE_NAME))
}

/// Create the config file from the built-in template. Returns `false` when
/// a file already exists; it is never overwritten.
pub fn write_template(path: &Path) -> Result<bool, ConfigError> {
    if path.exists() {
        return Ok(false);
    }
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    fs::write(path, TEMPLATE).map_err(io_err)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_to_defaults() {
        let config = Config::parse(TEMPLATE).unwrap();
        assert_eq!(config, Config::default());
        assert!(!config.has_credentials());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config = Config::parse(
            "beatport:\n  access_token: abc\noptions:\n  verbose: true\n",
        )
        .unwrap();
        assert_eq!(config.beatport.access_token, "abc");
        assert_eq!(config.beatport.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.database.path, "default");
        assert!(config.options.verbose);
        assert_eq!(config.options.rate_limit_ms, DEFAULT_RATE_LIMIT_MS);
        assert!(config.has_credentials());
    }

    #[test]
    fn bare_host_base_url_gets_api_version() {
        for raw in ["https://api.beatport.com", "https://api.beatport.com/"] {
            let config = Config::parse(&format!("beatport:\n  base_url: {raw}\n")).unwrap();
            assert_eq!(config.beatport.base_url, DEFAULT_BASE_URL);
        }
        let config = Config::parse("beatport:\n  base_url: http://127.0.0.1:8080/v4/\n").unwrap();
        assert_eq!(config.beatport.base_url, "http://127.0.0.1:8080/v4");
    }

    #[tokio::test]
    async fn legacy_host_only_config_reaches_v4_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let server = crate::test_http::serve(vec![crate::test_http::StubResponse::json(
            200,
            r#"{"results":[]}"#,
        )])
        .await;
        let host = server.base_url.trim_end_matches("/v4").to_string();
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            format!("beatport:\n  access_token: abc\n  base_url: {host}\n"),
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        let url = crate::beatport::endpoint(&config.beatport.base_url, "catalog/tracks/");
        let resp = reqwest::get(&url).await.unwrap();
        assert!(resp.status().is_success());
        assert_eq!(server.requests()[0].path(), "/v4/catalog/tracks/");
    }

    #[test]
    fn empty_file_is_default_config() {
        assert_eq!(Config::parse("  \n").unwrap(), Config::default());
    }

    #[test]
    fn load_missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("missing.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn load_invalid_yaml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yml");
        std::fs::write(&path, "beatport: [unterminated").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn save_then_load_keeps_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let mut config = Config::default();
        config.beatport.client_id = "client".to_string();
        config.beatport.access_token = "access".to_string();
        config.beatport.refresh_token = "refresh".to_string();
        config.database.path = "/music/mixxxdb.sqlite".to_string();

        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
        assert!(!path.with_extension("yml.tmp").exists());
    }

    #[test]
    fn write_template_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yml");
        assert!(write_template(&path).unwrap());

        std::fs::write(&path, "options:\n  verbose: true\n").unwrap();
        assert!(!write_template(&path).unwrap());
        assert!(Config::load(&path).unwrap().options.verbose);
    }
}
