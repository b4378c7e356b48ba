//! # Configuration
//!
//! Typed configuration for the content synchronizer.
//!
//! Settings are read from a YAML file; credentials and a handful of
//! endpoint values can be overridden through environment variables
//! (12-factor style). Validation runs at load time so misconfiguration
//! is fatal at startup rather than surfacing mid-cycle.

pub mod config;
pub mod loader;

pub use config::{
    ChannelMapping, ChannelPattern, Config, ConfluenceConfig, FolderMapping, GithubConfig,
    JiraConfig, LocalFolderConfig, OpenWebUiConfig, ProjectMapping, RepositoryMapping,
    RetryConfig, ScheduleConfig, SlackConfig, SpaceMapping, StorageConfig, SubtreeMapping,
};
pub use loader::{load, ConfigError};
