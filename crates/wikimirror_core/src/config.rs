use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::api::BotCredentials;
use crate::mediawiki::MediaWikiClientConfig;

pub const DEFAULT_USER_AGENT: &str = "wikimirror/0.1";
pub const DEFAULT_CONFIG_PATH: &str = ".wikimirror/config.toml";
pub const DEFAULT_SUMMARY: &str = "Mirrored from source wiki";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RATE_LIMIT_READ_MS: u64 = 200;
pub const DEFAULT_RATE_LIMIT_WRITE_MS: u64 = 0;

/// Environment variables that override the config file.
pub const ENV_KEYS: &[&str] = &[
    "MIRROR_SOURCE_API_URL",
    "MIRROR_TARGET_API_URL",
    "MIRROR_USER_AGENT",
    "MIRROR_HTTP_TIMEOUT_MS",
    "MIRROR_RATE_LIMIT_READ",
    "MIRROR_RATE_LIMIT_WRITE",
    "MIRROR_BOT_USER",
    "MIRROR_BOT_PASS",
];

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MirrorConfig {
    #[serde(default)]
    pub source: SiteSection,
    #[serde(default)]
    pub target: SiteSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub run: RunSection,
    #[serde(skip)]
    pub env: EnvOverrides,
}

/// Snapshot of the `MIRROR_*` variables. Blank values count as unset.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    values: BTreeMap<String, String>,
}

impl EnvOverrides {
    pub fn from_process() -> Self {
        ENV_KEYS
            .iter()
            .filter_map(|key| env::var(key).ok().map(|value| (key.to_string(), value)))
            .collect()
    }

    fn get(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|value| value.parse::<u64>().ok())
    }
}

impl FromIterator<(String, String)> for EnvOverrides {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl fmt::Debug for EnvOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SiteSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HttpSection {
    pub timeout_ms: Option<u64>,
    pub rate_limit_read_ms: Option<u64>,
    pub rate_limit_write_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RunSection {
    pub export_dir: Option<PathBuf>,
    pub summary: Option<String>,
}

impl MirrorConfig {
    pub fn with_env(mut self, env: EnvOverrides) -> Self {
        self.env = env;
        self
    }

    /// Resolve the source API URL: env MIRROR_SOURCE_API_URL > config > None.
    pub fn source_api_url(&self) -> Option<String> {
        self.env
            .get("MIRROR_SOURCE_API_URL")
            .or_else(|| self.source.api_url.clone())
    }

    /// Resolve the target API URL: env MIRROR_TARGET_API_URL > config > None.
    pub fn target_api_url(&self) -> Option<String> {
        self.env
            .get("MIRROR_TARGET_API_URL")
            .or_else(|| self.target.api_url.clone())
    }

    /// Resolve user agent: env MIRROR_USER_AGENT > site config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self, site: &SiteSection) -> String {
        self.env
            .get("MIRROR_USER_AGENT")
            .or_else(|| site.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn summary(&self) -> String {
        self.run
            .summary
            .clone()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SUMMARY.to_string())
    }

    pub fn client_config(&self, api_url: &str, site: &SiteSection) -> MediaWikiClientConfig {
        MediaWikiClientConfig {
            api_url: api_url.to_string(),
            user_agent: self.user_agent(site),
            timeout_ms: self
                .env
                .get_u64("MIRROR_HTTP_TIMEOUT_MS")
                .or(self.http.timeout_ms)
                .unwrap_or(DEFAULT_TIMEOUT_MS),
            rate_limit_read_ms: self
                .env
                .get_u64("MIRROR_RATE_LIMIT_READ")
                .or(self.http.rate_limit_read_ms)
                .unwrap_or(DEFAULT_RATE_LIMIT_READ_MS),
            rate_limit_write_ms: self
                .env
                .get_u64("MIRROR_RATE_LIMIT_WRITE")
                .or(self.http.rate_limit_write_ms)
                .unwrap_or(DEFAULT_RATE_LIMIT_WRITE_MS),
        }
    }

    /// Bot login for the destination wiki. The user name may come from the
    /// config file; the password is only read from MIRROR_BOT_PASS.
    pub fn bot_credentials(&self) -> Result<BotCredentials> {
        let username = self
            .env
            .get("MIRROR_BOT_USER")
            .or_else(|| self.target.username.clone())
            .filter(|value| !value.trim().is_empty());
        let Some(username) = username else {
            bail!("MIRROR_BOT_USER (or [target] username) is required for local writes");
        };
        let Some(password) = self.env.get("MIRROR_BOT_PASS") else {
            bail!("MIRROR_BOT_PASS is required for local writes");
        };
        Ok(BotCredentials {
            username: username.trim().to_string(),
            password,
        })
    }
}

/// Load and parse a MirrorConfig from a TOML file. Returns default if file doesn't exist.
/// Environment overrides are attached separately with [`MirrorConfig::with_env`].
pub fn load_config(config_path: &Path) -> Result<MirrorConfig> {
    if !config_path.exists() {
        return Ok(MirrorConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MirrorConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}
