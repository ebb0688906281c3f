//! Harvest configuration
//!
//! Settings come from `HARVEST_*` environment variables (a `.env` file is
//! loaded first by the binary) and may then be overridden by command line
//! flags. Unset or blank variables keep their defaults; malformed ones are
//! rejected rather than silently replaced.

use crate::fetcher::{FetcherConfig, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SEARCH_URL, DEFAULT_USER_AGENT};
use crate::models::QuerySpec;
use crate::pipeline::PipelineConfig;
use crate::retry::RetryConfig;
use harvest_common::{HarvestError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Projects harvested when none are configured
pub const DEFAULT_PROJECTS: &[&str] = &["HADOOP", "SPARK", "KAFKA"];

/// Complete configuration of a harvest run
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub search_url: String,
    /// Project keys, one query each
    pub projects: Vec<String>,
    pub output_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub page_size: u32,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub page_delay: Duration,
    pub concurrency: usize,
    /// Shared request budget; 0 disables rate limiting
    pub requests_per_minute: u32,
    pub max_records_per_query: Option<u64>,
    pub show_progress: bool,
    pub retry: RetryConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            search_url: DEFAULT_SEARCH_URL.to_string(),
            projects: DEFAULT_PROJECTS.iter().map(|p| p.to_string()).collect(),
            output_dir: PathBuf::from("data"),
            checkpoint_dir: PathBuf::from("data/checkpoints"),
            page_size: 50,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            page_delay: Duration::from_secs(1),
            concurrency: 1,
            requests_per_minute: 60,
            max_records_per_query: None,
            show_progress: true,
            retry: RetryConfig::default(),
        }
    }
}

impl HarvestConfig {
    /// Load configuration from environment variables and validate it
    pub fn from_env() -> Result<Self> {
        let config = Self::default().merge_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay the `HARVEST_*` variables that are set on top of `self`
    pub fn merge_env(mut self) -> Result<Self> {
        if let Some(url) = env_var("HARVEST_SEARCH_URL") {
            self.search_url = url;
        }
        if let Some(projects) = env_var("HARVEST_PROJECTS") {
            self.projects = parse_projects(&projects);
        }
        if let Some(dir) = env_var("HARVEST_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_var("HARVEST_CHECKPOINT_DIR") {
            self.checkpoint_dir = PathBuf::from(dir);
        }
        if let Some(agent) = env_var("HARVEST_USER_AGENT") {
            self.user_agent = agent;
        }

        set_parsed(&mut self.page_size, "HARVEST_PAGE_SIZE")?;
        set_parsed(&mut self.concurrency, "HARVEST_CONCURRENCY")?;
        set_parsed(&mut self.requests_per_minute, "HARVEST_REQUESTS_PER_MINUTE")?;
        set_secs(&mut self.request_timeout, "HARVEST_REQUEST_TIMEOUT_SECS")?;
        set_millis(&mut self.page_delay, "HARVEST_PAGE_DELAY_MS")?;

        if let Some(limit) = parse_env::<u64>("HARVEST_MAX_RECORDS_PER_QUERY")? {
            // 0 means no limit
            self.max_records_per_query = (limit > 0).then_some(limit);
        }
        if let Some(value) = env_var("HARVEST_SHOW_PROGRESS") {
            self.show_progress = parse_flag("HARVEST_SHOW_PROGRESS", &value)?;
        }

        let retry = &mut self.retry;
        set_parsed(&mut retry.max_attempts, "HARVEST_RETRY_MAX_ATTEMPTS")?;
        set_millis(&mut retry.base_delay, "HARVEST_RETRY_BASE_DELAY_MS")?;
        set_parsed(&mut retry.multiplier, "HARVEST_RETRY_MULTIPLIER")?;
        set_millis(&mut retry.max_delay, "HARVEST_RETRY_MAX_DELAY_MS")?;
        set_parsed(&mut retry.jitter, "HARVEST_RETRY_JITTER")?;
        set_millis(&mut retry.rate_limit_fallback, "HARVEST_RETRY_RATE_LIMIT_FALLBACK_MS")?;
        set_secs(&mut retry.max_retry_after, "HARVEST_RETRY_MAX_RETRY_AFTER_SECS")?;

        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.projects.is_empty() {
            return Err(HarvestError::config("at least one project is required"));
        }
        if self.page_size == 0 {
            return Err(HarvestError::config("HARVEST_PAGE_SIZE must be greater than 0"));
        }
        if self.concurrency == 0 {
            return Err(HarvestError::config("HARVEST_CONCURRENCY must be greater than 0"));
        }
        if self.request_timeout.is_zero() {
            return Err(HarvestError::config(
                "HARVEST_REQUEST_TIMEOUT_SECS must be greater than 0",
            ));
        }
        if !self.search_url.starts_with("http://") && !self.search_url.starts_with("https://") {
            return Err(HarvestError::invalid_setting("HARVEST_SEARCH_URL", &self.search_url));
        }
        self.retry.validate()
    }

    /// One query per configured project
    pub fn queries(&self) -> Vec<QuerySpec> {
        self.projects.iter().map(|p| QuerySpec::project(p)).collect()
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            search_url: self.search_url.clone(),
            user_agent: self.user_agent.clone(),
            request_timeout: self.request_timeout,
            ..FetcherConfig::default()
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            page_size: self.page_size,
            concurrency: self.concurrency,
            page_delay: self.page_delay,
            max_records_per_query: self.max_records_per_query,
            show_progress: self.show_progress,
        }
    }
}

/// Split a comma separated project list, dropping blanks and duplicates
pub fn parse_projects(list: &str) -> Vec<String> {
    let mut projects: Vec<String> = Vec::new();
    for key in list.split(',').map(|p| p.trim().to_uppercase()) {
        if !key.is_empty() && !projects.contains(&key) {
            projects.push(key);
        }
    }
    projects
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env_var(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| HarvestError::invalid_setting(key, raw)),
    }
}

fn set_parsed<T: FromStr>(field: &mut T, key: &str) -> Result<()> {
    if let Some(value) = parse_env(key)? {
        *field = value;
    }
    Ok(())
}

fn set_secs(field: &mut Duration, key: &str) -> Result<()> {
    if let Some(secs) = parse_env::<u64>(key)? {
        *field = Duration::from_secs(secs);
    }
    Ok(())
}

fn set_millis(field: &mut Duration, key: &str) -> Result<()> {
    if let Some(ms) = parse_env::<u64>(key)? {
        *field = Duration::from_millis(ms);
    }
    Ok(())
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(HarvestError::invalid_setting(key, value)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "HARVEST_SEARCH_URL",
        "HARVEST_PROJECTS",
        "HARVEST_PAGE_SIZE",
        "HARVEST_PAGE_DELAY_MS",
        "HARVEST_MAX_RECORDS_PER_QUERY",
        "HARVEST_SHOW_PROGRESS",
        "HARVEST_RETRY_MAX_ATTEMPTS",
        "HARVEST_RETRY_BASE_DELAY_MS",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults() {
        let config = HarvestConfig::default();
        assert_eq!(config.projects, vec!["HADOOP", "SPARK", "KAFKA"]);
        assert_eq!(config.page_size, 50);
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.page_delay, Duration::from_secs(1));
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_projects() {
        assert_eq!(parse_projects(" spark, KAFKA,,spark "), vec!["SPARK", "KAFKA"]);
        assert!(parse_projects(" , ").is_empty());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("HARVEST_PROJECTS", "hive,flink");
        std::env::set_var("HARVEST_PAGE_SIZE", "100");
        std::env::set_var("HARVEST_PAGE_DELAY_MS", "0");
        std::env::set_var("HARVEST_MAX_RECORDS_PER_QUERY", "500");
        std::env::set_var("HARVEST_SHOW_PROGRESS", "off");
        std::env::set_var("HARVEST_RETRY_BASE_DELAY_MS", "250");

        let config = HarvestConfig::from_env().unwrap();
        assert_eq!(config.projects, vec!["HIVE", "FLINK"]);
        assert_eq!(config.page_size, 100);
        assert_eq!(config.page_delay, Duration::ZERO);
        assert_eq!(config.max_records_per_query, Some(500));
        assert!(!config.show_progress);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));

        let queries = config.queries();
        assert_eq!(queries[1].id, "FLINK");
        assert_eq!(config.pipeline_config().page_size, 100);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_malformed_values() {
        clear_env();
        std::env::set_var("HARVEST_PAGE_SIZE", "fifty");
        let err = HarvestConfig::from_env().unwrap_err();
        assert!(matches!(err, HarvestError::InvalidSetting { .. }));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_validates() {
        clear_env();
        std::env::set_var("HARVEST_RETRY_MAX_ATTEMPTS", "0");
        assert!(HarvestConfig::from_env().is_err());

        clear_env();
        std::env::set_var("HARVEST_SEARCH_URL", "ftp://example.org/search");
        assert!(HarvestConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_zero_record_limit_means_unlimited() {
        clear_env();
        std::env::set_var("HARVEST_MAX_RECORDS_PER_QUERY", "0");
        assert_eq!(HarvestConfig::from_env().unwrap().max_records_per_query, None);
        clear_env();
    }
}
