//! Configuration handling for Scribe
//!
//! Configuration is stored in `.scribe/config.toml` (project) and
//! `~/.config/scribe/config.toml` (global).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::autosave::AutosaveConfig;
use crate::domain::{Author, Visibility};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("No author email configured. Set SCRIBE_EMAIL or [author] email in config.toml")]
    MissingEmail,
}

/// Who is writing
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AuthorConfig {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Defaults for `scribe publish`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PublishConfig {
    /// Visibility when `--visibility` is not given
    pub default_visibility: Visibility,

    /// Attribution used when a banner is given without `--source`
    pub default_image_source: Option<String>,
}

/// Project-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProjectConfig {
    /// Autosave timing and cache keys
    pub autosave: AutosaveConfig,

    /// Project author, overridden by environment variables
    pub author: AuthorConfig,

    /// Publishing defaults
    pub publish: PublishConfig,
}

/// Global user configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GlobalConfig {
    /// Default output format (text or json)
    pub default_format: OutputFormat,

    /// Editor command for `scribe edit`
    pub editor: Option<String>,

    /// Author used when the project sets none
    pub author: AuthorConfig,
}

/// Output format for commands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Combined configuration (global + project)
#[derive(Debug, Clone)]
pub struct Config {
    pub project: ProjectConfig,
    pub global: GlobalConfig,
    pub project_root: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from default locations
    pub fn load() -> Result<Self> {
        let global = Self::load_global()?;
        let (project, project_root) = Self::load_project()?;

        Ok(Self {
            project,
            global,
            project_root,
        })
    }

    /// Loads configuration for a specific project
    pub fn for_project(project_root: &Path) -> Result<Self> {
        let global = Self::load_global()?;
        let project = Self::load_project_config(project_root)?;

        Ok(Self {
            project,
            global,
            project_root: Some(project_root.to_path_buf()),
        })
    }

    /// Returns the global config directory
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "scribe", "scribe-cli").map(|dirs| dirs.config_dir().to_path_buf())
    }

    fn load_global() -> Result<GlobalConfig> {
        let config_dir = match Self::global_config_dir() {
            Some(dir) => dir,
            None => return Ok(GlobalConfig::default()),
        };

        let config_path = config_dir.join("config.toml");
        if !config_path.exists() {
            return Ok(GlobalConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read global config: {}", config_path.display()))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .context("Failed to parse global config")
    }

    fn load_project() -> Result<(ProjectConfig, Option<PathBuf>)> {
        match Self::find_project_root() {
            Some(root) => {
                let config = Self::load_project_config(&root)?;
                Ok((config, Some(root)))
            }
            None => Ok((ProjectConfig::default(), None)),
        }
    }

    fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
        let config_path = project_root.join(".scribe").join("config.toml");

        if !config_path.exists() {
            return Ok(ProjectConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read project config: {}", config_path.display()))?;

        let config: ProjectConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .context("Failed to parse project config")?;

        config
            .validate()
            .with_context(|| format!("Invalid project config: {}", config_path.display()))?;
        Ok(config)
    }

    /// Finds the project root by looking for a `.scribe/` directory
    pub fn find_project_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        Self::find_project_root_from(current)
    }

    /// Walks up from `start` looking for a `.scribe/` directory
    pub fn find_project_root_from(start: PathBuf) -> Option<PathBuf> {
        let mut current = start;

        loop {
            if current.join(".scribe").is_dir() {
                return Some(current);
            }

            if !current.pop() {
                return None;
            }
        }
    }

    /// Returns true if we're in a scribe project
    pub fn is_in_project(&self) -> bool {
        self.project_root.is_some()
    }

    /// Returns the project root, or an error if not in a project
    pub fn require_project_root(&self) -> Result<&Path> {
        self.project_root
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Not in a scribe project. Run 'scribe init' first."))
    }

    /// Resolves the session author from the environment and both config
    /// layers
    pub fn author(&self) -> Result<Author, ConfigError> {
        resolve_author(
            std::env::var("SCRIBE_AUTHOR").ok(),
            std::env::var("SCRIBE_EMAIL").ok(),
            &self.project.author,
            &self.global.author,
        )
    }

    /// Editor command: global config, then `$VISUAL`, then `$EDITOR`
    pub fn editor(&self) -> Option<String> {
        self.global
            .editor
            .clone()
            .or_else(|| std::env::var("VISUAL").ok())
            .or_else(|| std::env::var("EDITOR").ok())
            .filter(|e| !e.trim().is_empty())
    }

    /// Saves the project configuration
    pub fn save_project(&self) -> Result<()> {
        let root = self.require_project_root()?;
        let config_path = root.join(".scribe").join("config.toml");

        let content =
            toml::to_string_pretty(&self.project).context("Failed to serialize project config")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write project config: {}", config_path.display()))
    }
}

impl ProjectConfig {
    /// Rejects settings the autosave loop cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.autosave.heading_length == 0 {
            return Err(ConfigError::Invalid(
                "autosave.heading_length must be at least 1".to_string(),
            ));
        }
        if self.autosave.debounce_ms == 0 {
            return Err(ConfigError::Invalid(
                "autosave.debounce_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Environment first, then project, then global. The name falls back to
/// `$USER`; the email has no fallback.
pub fn resolve_author(
    env_name: Option<String>,
    env_email: Option<String>,
    project: &AuthorConfig,
    global: &AuthorConfig,
) -> Result<Author, ConfigError> {
    fn non_empty(value: Option<String>) -> Option<String> {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    let email = non_empty(env_email)
        .or_else(|| non_empty(project.email.clone()))
        .or_else(|| non_empty(global.email.clone()))
        .ok_or(ConfigError::MissingEmail)?;

    let name = non_empty(env_name)
        .or_else(|| non_empty(project.name.clone()))
        .or_else(|| non_empty(global.name.clone()))
        .or_else(|| non_empty(std::env::var("USER").ok()))
        .unwrap_or_else(|| "anonymous".to_string());

    Ok(Author::new(name, email))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn author_config(name: Option<&str>, email: Option<&str>) -> AuthorConfig {
        AuthorConfig {
            name: name.map(String::from),
            email: email.map(String::from),
        }
    }

    #[test]
    fn default_config() {
        let config = Config {
            project: ProjectConfig::default(),
            global: GlobalConfig::default(),
            project_root: None,
        };

        assert_eq!(config.project.autosave.debounce_ms, 5000);
        assert_eq!(config.project.autosave.heading_length, 50);
        assert_eq!(config.project.publish.default_visibility, Visibility::Public);
        assert_eq!(config.global.default_format, OutputFormat::Text);
    }

    #[test]
    fn parse_project_config() {
        let toml = r#"
[autosave]
debounce_ms = 1500
cache_key_prefix = "scribe."

[author]
name = "Ada"
email = "ada@example.com"

[publish]
default_visibility = "unlisted"
"#;

        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.autosave.debounce_ms, 1500);
        assert_eq!(config.autosave.heading_length, 50);
        assert_eq!(config.autosave.cache_key_prefix, "scribe.");
        assert_eq!(config.author.email.as_deref(), Some("ada@example.com"));
        assert_eq!(config.publish.default_visibility, Visibility::Unlisted);
    }

    #[test]
    fn parse_global_config() {
        let toml = r#"
default_format = "json"
editor = "vim"

[author]
email = "me@example.com"
"#;

        let config: GlobalConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.default_format, OutputFormat::Json);
        assert_eq!(config.editor, Some("vim".to_string()));
        assert_eq!(config.author.email.as_deref(), Some("me@example.com"));
    }

    #[test]
    fn zero_heading_length_is_invalid() {
        let config: ProjectConfig = toml::from_str("[autosave]\nheading_length = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn author_env_wins_over_config() {
        let author = resolve_author(
            Some("Env".into()),
            Some("env@example.com".into()),
            &author_config(Some("Project"), Some("project@example.com")),
            &author_config(Some("Global"), Some("global@example.com")),
        )
        .unwrap();

        assert_eq!(author, Author::new("Env", "env@example.com"));
    }

    #[test]
    fn author_project_wins_over_global() {
        let author = resolve_author(
            None,
            None,
            &author_config(Some("Project"), Some("project@example.com")),
            &author_config(Some("Global"), Some("global@example.com")),
        )
        .unwrap();

        assert_eq!(author.email, "project@example.com");
        assert_eq!(author.name, "Project");
    }

    #[test]
    fn author_email_is_required() {
        let result = resolve_author(
            Some("Ada".into()),
            Some("   ".into()),
            &AuthorConfig::default(),
            &AuthorConfig::default(),
        );

        assert!(matches!(result, Err(ConfigError::MissingEmail)));
    }

    #[test]
    fn find_project_root_walks_up() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".scribe")).unwrap();
        let sub_dir = dir.path().join("sub").join("dir");
        fs::create_dir_all(&sub_dir).unwrap();

        let root = Config::find_project_root_from(sub_dir);
        assert_eq!(root.as_deref(), Some(dir.path()));
    }

    #[test]
    fn config_not_in_project() {
        let config = Config {
            project: ProjectConfig::default(),
            global: GlobalConfig::default(),
            project_root: None,
        };

        assert!(!config.is_in_project());
        assert!(config.require_project_root().is_err());
    }
}
