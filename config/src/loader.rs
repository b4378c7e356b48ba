//! Configuration loading: YAML file, environment overrides, validation.
//!
//! The file is optional (defaults apply when it is absent); a file that
//! exists but does not parse is a fatal error. Environment variables
//! override file values for credentials and endpoints so secrets can stay
//! out of the config file.

use crate::config::Config;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Load configuration from `path`, apply environment overrides, validate.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let mut cfg = if path.exists() {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?
    } else {
        warn!(path = %path.display(), "Config file not found, using defaults");
        Config::default()
    };

    apply_env_overrides(&mut cfg);
    drop_incomplete_mappings(&mut cfg);
    validate(&cfg)?;

    Ok(cfg)
}

fn apply_env_overrides(cfg: &mut Config) {
    override_string("OPENWEBUI_BASE_URL", &mut cfg.openwebui.base_url);
    override_string("OPENWEBUI_API_KEY", &mut cfg.openwebui.api_key);
    override_string("GITHUB_TOKEN", &mut cfg.github.token);
    override_string("CONFLUENCE_API_KEY", &mut cfg.confluence.api_key);
    override_string("JIRA_API_TOKEN", &mut cfg.jira.api_token);
    override_string("SLACK_TOKEN", &mut cfg.slack.token);

    if let Ok(value) = env::var("STORAGE_PATH") {
        if !value.is_empty() {
            cfg.storage.path = PathBuf::from(value);
        }
    }
}

fn override_string(key: &str, target: &mut String) {
    if let Ok(value) = env::var(key) {
        if !value.is_empty() {
            debug!(key, "Applying environment override");
            *target = value;
        }
    }
}

/// Mapping entries with an empty selector or empty knowledge id are dropped
/// with a warning; an enabled adapter whose table empties out is caught by
/// validation below.
fn drop_incomplete_mappings(cfg: &mut Config) {
    retain_logged(&mut cfg.github.mappings, "github", |m| {
        !m.repository.is_empty() && !m.knowledge_id.is_empty()
    });
    retain_logged(&mut cfg.confluence.space_mappings, "confluence", |m| {
        !m.space_key.is_empty() && !m.knowledge_id.is_empty()
    });
    retain_logged(&mut cfg.confluence.parent_page_mappings, "confluence", |m| {
        !m.parent_page_id.is_empty() && !m.knowledge_id.is_empty()
    });
    retain_logged(&mut cfg.jira.mappings, "jira", |m| {
        !m.project_key.is_empty() && !m.knowledge_id.is_empty()
    });
    retain_logged(&mut cfg.local_folders.mappings, "local", |m| {
        !m.folder_path.as_os_str().is_empty() && !m.knowledge_id.is_empty()
    });
    retain_logged(&mut cfg.slack.channel_mappings, "slack", |m| {
        !m.channel_id.is_empty() && !m.knowledge_id.is_empty()
    });
    retain_logged(&mut cfg.slack.regex_patterns, "slack", |p| {
        !p.pattern.is_empty() && !p.knowledge_id.is_empty()
    });
}

fn retain_logged<T, F: Fn(&T) -> bool>(mappings: &mut Vec<T>, adapter: &str, keep: F) {
    let before = mappings.len();
    mappings.retain(&keep);
    let dropped = before - mappings.len();
    if dropped > 0 {
        warn!(adapter, dropped, "Dropped incomplete mapping entries");
    }
}

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    match cfg.log_level.as_str() {
        "debug" | "info" | "warn" | "error" => {}
        other => {
            return Err(ConfigError::Invalid {
                message: format!("unknown log_level '{other}'"),
            })
        }
    }

    if cfg.schedule.interval_minutes == 0 {
        return Err(ConfigError::Invalid {
            message: "schedule.interval_minutes must be greater than zero".to_string(),
        });
    }
    if cfg.schedule.cycle_timeout_minutes == 0 {
        return Err(ConfigError::Invalid {
            message: "schedule.cycle_timeout_minutes must be greater than zero".to_string(),
        });
    }
    if cfg.openwebui.base_url.is_empty() {
        return Err(ConfigError::Invalid {
            message: "openwebui.base_url must be set".to_string(),
        });
    }

    if cfg.github.enabled {
        if cfg.github.token.is_empty() {
            return Err(ConfigError::Invalid {
                message: "github adapter is enabled but no token is configured".to_string(),
            });
        }
        if cfg.github.mappings.is_empty() {
            return Err(ConfigError::Invalid {
                message: "github adapter is enabled but has no repository mappings".to_string(),
            });
        }
    }

    if cfg.confluence.enabled {
        if cfg.confluence.base_url.is_empty() || cfg.confluence.api_key.is_empty() {
            return Err(ConfigError::Invalid {
                message: "confluence adapter is enabled but base_url or api_key is missing"
                    .to_string(),
            });
        }
        if cfg.confluence.space_mappings.is_empty()
            && cfg.confluence.parent_page_mappings.is_empty()
        {
            return Err(ConfigError::Invalid {
                message: "confluence adapter is enabled but has no mappings".to_string(),
            });
        }
    }

    if cfg.jira.enabled {
        if cfg.jira.base_url.is_empty() || cfg.jira.api_token.is_empty() {
            return Err(ConfigError::Invalid {
                message: "jira adapter is enabled but base_url or api_token is missing"
                    .to_string(),
            });
        }
        if cfg.jira.mappings.is_empty() {
            return Err(ConfigError::Invalid {
                message: "jira adapter is enabled but has no project mappings".to_string(),
            });
        }
    }

    if cfg.local_folders.enabled && cfg.local_folders.mappings.is_empty() {
        return Err(ConfigError::Invalid {
            message: "local_folders adapter is enabled but has no folder mappings".to_string(),
        });
    }

    if cfg.slack.enabled {
        if cfg.slack.token.is_empty() {
            return Err(ConfigError::Invalid {
                message: "slack adapter is enabled but no token is configured".to_string(),
            });
        }
        if cfg.slack.channel_mappings.is_empty() && cfg.slack.regex_patterns.is_empty() {
            return Err(ConfigError::Invalid {
                message: "slack adapter is enabled but has no channel mappings or patterns"
                    .to_string(),
            });
        }
    }

    Ok(())
}
