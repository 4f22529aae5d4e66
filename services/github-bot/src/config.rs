//! Bot configuration
//!
//! Values come from a YAML file (explicit path, or `~/.github-app-bot.yaml`
//! when present) and are then overridden by CLI flags and `PUREBOT_*`
//! environment variables. Unknown keys in the file are an error.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Config file looked up in `$HOME` when no path is given
pub const DEFAULT_CONFIG_FILE: &str = ".github-app-bot.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct BotConfig {
    pub github_app: GitHubAppConfig,
    pub demo: DemoConfig,
}

/// GitHub App credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct GitHubAppConfig {
    pub app_id: u64,
    pub installation_id: u64,
    pub private_key_file: Option<PathBuf>,
    /// Base for GitHub App endpoints (token exchange)
    pub app_base_url: String,
    /// Base for REST calls
    pub api_base_url: String,
}

impl Default for GitHubAppConfig {
    fn default() -> Self {
        Self {
            app_id: 0,
            installation_id: 0,
            private_key_file: None,
            app_base_url: crate::exchange::DEFAULT_BASE_URL.to_string(),
            api_base_url: crate::api::DEFAULT_API_BASE_URL.to_string(),
        }
    }
}

/// What the `run` command creates and pushes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct DemoConfig {
    pub org: String,
    pub repository: String,
    pub workdir: PathBuf,
    pub file_name: String,
    pub file_contents: String,
    pub commit_message: String,
    pub author_name: String,
    pub author_email: String,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            org: "purehub".to_string(),
            repository: "foo".to_string(),
            workdir: PathBuf::from("/tmp/git"),
            file_name: "testing".to_string(),
            file_contents: "this is a test".to_string(),
            commit_message: "New file testing".to_string(),
            author_name: "github-app-bot".to_string(),
            author_email: "github-app-bot@users.noreply.github.com".to_string(),
        }
    }
}

/// Values given on the command line or in the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub app_id: Option<u64>,
    pub installation_id: Option<u64>,
    pub private_key_file: Option<PathBuf>,
    pub org: Option<String>,
    pub repository: Option<String>,
    pub workdir: Option<PathBuf>,
}

impl BotConfig {
    /// Read a YAML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {:?}", path))
    }

    /// Load from `explicit`, else the default file in `home`, else defaults
    pub fn load(explicit: Option<&Path>, home: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            info!(file = %path.display(), "Using config file");
            return Self::from_file(path);
        }

        if let Some(path) = home.map(|h| h.join(DEFAULT_CONFIG_FILE)) {
            if path.is_file() {
                info!(file = %path.display(), "Using config file");
                return Self::from_file(&path);
            }
        }

        debug!("No config file found");
        Ok(Self::default())
    }

    /// Let flags and environment win over file values
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(app_id) = overrides.app_id {
            self.github_app.app_id = app_id;
        }
        if let Some(installation_id) = overrides.installation_id {
            self.github_app.installation_id = installation_id;
        }
        if let Some(path) = overrides.private_key_file {
            self.github_app.private_key_file = Some(path);
        }
        if let Some(org) = overrides.org {
            self.demo.org = org;
        }
        if let Some(repository) = overrides.repository {
            self.demo.repository = repository;
        }
        if let Some(workdir) = overrides.workdir {
            self.demo.workdir = workdir;
        }
    }

    /// Fail early on values that would only break later
    pub fn validate(&self) -> Result<()> {
        if self.github_app.app_id == 0 {
            bail!("GitHub app id is required (--github-app-id or PUREBOT_GITHUB_APP_ID)");
        }
        if self.github_app.installation_id == 0 {
            bail!(
                "GitHub app installation id is required \
                 (--github-app-installation-id or PUREBOT_GITHUB_APP_INSTALLATION_ID)"
            );
        }
        if self.github_app.private_key_file.is_none() {
            bail!(
                "GitHub app private key file is required \
                 (--github-app-private-key or PUREBOT_GITHUB_APP_PRIVATE_KEY)"
            );
        }
        if self.demo.org.is_empty() || self.demo.repository.is_empty() {
            bail!("demo org and repository must not be empty");
        }
        Ok(())
    }
}
