use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::paths;

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("missing required mount parameter: {0}")]
    Missing(&'static str),
    #[error("invalid mount definition: {0}")]
    Json(#[from] serde_json::Error),
}

/// Mount parameters as supplied by the caller, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageParams {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Accepts a boolean or a flag string such as `"true"` or `"yes"`.
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub secure: bool,
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub trusted_certificates: Option<PathBuf>,
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl StorageParams {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: Some(host.into()),
            user: Some(user.into()),
            password: Some(password.into()),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ParamsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_env() -> Self {
        let home = dirs::home_dir();
        let path_var = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(|value| match &home {
                    Some(home) => expand_with_home(&value, home),
                    None => PathBuf::from(value),
                })
        };
        Self {
            host: std::env::var("DAV_HOST").ok(),
            user: std::env::var("DAV_USER").ok(),
            password: std::env::var("DAV_PASSWORD").ok(),
            secure: read_bool_env("DAV_SECURE", false),
            root: std::env::var("DAV_ROOT").ok(),
            trusted_certificates: path_var("DAV_CA_FILE"),
            scratch_dir: path_var("DAV_SCRATCH_DIR"),
            timeout_secs: std::env::var("DAV_TIMEOUT_SECS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|value| *value > 0),
        }
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub(crate) fn validate(self) -> Result<MountSettings, ParamsError> {
        let host = self.host.ok_or(ParamsError::Missing("host"))?;
        let user = self.user.ok_or(ParamsError::Missing("user"))?;
        let password = self.password.ok_or(ParamsError::Missing("password"))?;
        let host = host
            .strip_prefix("https://")
            .or_else(|| host.strip_prefix("http://"))
            .unwrap_or(&host)
            .to_string();

        Ok(MountSettings {
            host,
            user,
            password,
            secure: self.secure,
            root: paths::normalize_root(self.root.as_deref().unwrap_or("/")),
            trusted_certificates: self.trusted_certificates.filter(|_| self.secure),
            scratch_dir: self.scratch_dir.unwrap_or_else(std::env::temp_dir),
            timeout: self.timeout_secs.map(Duration::from_secs),
        })
    }
}

/// Validated, immutable mount definition.
#[derive(Debug, Clone)]
pub(crate) struct MountSettings {
    pub host: String,
    pub user: String,
    pub password: String,
    pub secure: bool,
    pub root: String,
    pub trusted_certificates: Option<PathBuf>,
    pub scratch_dir: PathBuf,
    pub timeout: Option<Duration>,
}

impl MountSettings {
    pub fn base_uri(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}{}", self.host, self.root)
    }

    pub fn id(&self) -> String {
        format!(
            "webdav::{}@{}/{}",
            self.user,
            self.host,
            self.root.trim_start_matches('/')
        )
    }
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Text(value) => parse_flag(&value),
    })
}

/// `1`, `true`, `yes` and `on` in any case; everything else is false.
fn parse_flag(value: &str) -> bool {
    ["1", "true", "yes", "on"]
        .iter()
        .any(|accepted| value.trim().eq_ignore_ascii_case(accepted))
}

/// Resolves a leading `~` segment against `home`; other paths are taken verbatim.
fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    match value.strip_prefix('~') {
        Some("") => home.to_path_buf(),
        Some(rest) if rest.starts_with('/') => home.join(rest.trim_start_matches('/')),
        _ => PathBuf::from(value),
    }
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name).map_or(default, |value| parse_flag(&value))
}
