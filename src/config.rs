//! # Feature: Configuration System
//!
//! Bot configuration from a YAML file with environment variable interpolation,
//! or from plain environment variables when no file is present.
//!
//! - **Version**: 3.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 3.0.0: Stat limits, embed colour and prompt timeouts; prod/dev run environments
//! - 2.0.0: YAML configuration with `${VAR}` interpolation
//! - 1.0.0: Initial environment variable configuration

use crate::metrics::{COUNTER_SLOTS, DEFAULT_MAX_METRICS};
use anyhow::{Context, Result};
use log::info;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

static ENV_VAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("Invalid regex")
});

/// Selects which token, database and embed colour the bot runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunEnvironment {
    Prod,
    Dev,
}

impl RunEnvironment {
    pub fn from_env() -> Self {
        match env::var("LEADERBOARDS_BOT_RUN_ENVIRONMENT") {
            Ok(v) if v.eq_ignore_ascii_case("dev") => RunEnvironment::Dev,
            _ => RunEnvironment::Prod,
        }
    }

    fn token_var(self) -> &'static str {
        match self {
            RunEnvironment::Prod => "PROD_LEADERBOARDS_BOT_TOKEN",
            RunEnvironment::Dev => "DEV_LEADERBOARDS_BOT_TOKEN",
        }
    }

    pub fn default_database_path(self) -> &'static str {
        match self {
            RunEnvironment::Prod => "db/leaderboards.db",
            RunEnvironment::Dev => "db/dev_leaderboards.db",
        }
    }

    pub fn default_bot_color(self) -> u32 {
        match self {
            RunEnvironment::Prod => 0xF04747,
            RunEnvironment::Dev => 0x2EB684,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_environment")]
    pub environment: RunEnvironment,

    /// Discord bot token (required)
    pub discord_token: String,

    /// Falls back to the run environment's default
    #[serde(default)]
    pub database_path: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Embed colour, falls back to the run environment's default
    #[serde(default)]
    pub bot_color: Option<u32>,

    #[serde(default = "default_max_metrics")]
    pub max_metrics_per_guild: usize,

    /// Seconds to wait for a free-text reply
    #[serde(default = "default_prompt_timeout")]
    pub prompt_timeout_secs: u64,

    /// Seconds to wait for a menu selection
    #[serde(default = "default_selection_timeout")]
    pub selection_timeout_secs: u64,

    /// Dev guild for instant command registration
    #[serde(default)]
    pub discord_guild_id: Option<String>,
}

fn default_environment() -> RunEnvironment {
    RunEnvironment::Prod
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_metrics() -> usize {
    DEFAULT_MAX_METRICS
}

fn default_prompt_timeout() -> u64 {
    30
}

fn default_selection_timeout() -> u64 {
    60
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let environment = RunEnvironment::from_env();
        let token_var = environment.token_var();

        Ok(Config {
            environment,
            discord_token: env::var(token_var)
                .map_err(|_| anyhow::anyhow!("{token_var} environment variable not set"))?,
            database_path: env::var("DATABASE_PATH").ok(),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| default_log_level()),
            bot_color: env::var("BOT_COLOR").ok().and_then(|v| parse_color(&v)),
            max_metrics_per_guild: parse_var("MAX_STATS_PER_GUILD", default_max_metrics())?,
            prompt_timeout_secs: parse_var("PROMPT_TIMEOUT_SECS", default_prompt_timeout())?,
            selection_timeout_secs: parse_var("SELECTION_TIMEOUT_SECS", default_selection_timeout())?,
            discord_guild_id: env::var("DISCORD_GUILD_ID").ok(),
        })
    }

    /// Load configuration from a YAML file with environment variable interpolation
    ///
    /// Supports `${VAR_NAME}` and `${VAR_NAME:-default}`.
    /// Example: `discord_token: "${PROD_LEADERBOARDS_BOT_TOKEN}"`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let interpolated = interpolate_env_vars(&content)?;

        let config: Config = serde_yaml::from_str(&interpolated)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Auto-detect and load configuration
    ///
    /// Priority order:
    /// 1. If CONFIG_FILE env var is set, load from that file
    /// 2. If config.yaml exists in current directory, load from it
    /// 3. Fall back to environment variables
    pub fn auto_load() -> Result<Self> {
        if let Ok(config_path) = env::var("CONFIG_FILE") {
            info!("Loading config from CONFIG_FILE: {}", config_path);
            return Self::from_file(&config_path);
        }

        let default_config_path = "config.yaml";
        if Path::new(default_config_path).exists() {
            info!("Loading config from {}", default_config_path);
            return Self::from_file(default_config_path);
        }

        info!("No config file found, using environment variables");
        let config = Self::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.discord_token.is_empty() {
            anyhow::bail!("discord_token is required");
        }

        if !(1..=COUNTER_SLOTS).contains(&self.max_metrics_per_guild) {
            anyhow::bail!(
                "max_metrics_per_guild must be between 1 and {COUNTER_SLOTS}, got {}",
                self.max_metrics_per_guild
            );
        }

        if self.prompt_timeout_secs == 0 || self.selection_timeout_secs == 0 {
            anyhow::bail!("Prompt and selection timeouts must be at least one second");
        }

        if let Some(ref guild_id) = self.discord_guild_id {
            if guild_id.parse::<u64>().is_err() {
                anyhow::bail!("discord_guild_id '{guild_id}' is not a valid id");
            }
        }

        Ok(())
    }

    pub fn database_path(&self) -> &str {
        self.database_path
            .as_deref()
            .unwrap_or_else(|| self.environment.default_database_path())
    }

    pub fn bot_color(&self) -> u32 {
        self.bot_color
            .unwrap_or_else(|| self.environment.default_bot_color())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{name} has invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

/// Accepts `F04747`, `#F04747`, `0xF04747` or a decimal value
fn parse_color(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let hex = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .or_else(|| raw.strip_prefix('#'));

    match hex {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw
            .parse::<u32>()
            .ok()
            .or_else(|| u32::from_str_radix(raw, 16).ok()),
    }
}

// ============================================================================
// Environment Variable Interpolation
// ============================================================================

/// Expand `${NAME}` and `${NAME:-fallback}` references in a config file.
///
/// Every unset reference without a fallback is reported at once.
fn interpolate_env_vars(content: &str) -> Result<String> {
    let mut unset = Vec::new();

    let expanded = ENV_VAR.replace_all(content, |caps: &Captures| {
        match (env::var(&caps[1]), caps.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(fallback)) => fallback.as_str().to_string(),
            (Err(_), None) => {
                unset.push(caps[1].to_string());
                String::new()
            }
        }
    });

    if !unset.is_empty() {
        anyhow::bail!("Config file references unset variables: {}", unset.join(", "));
    }
    Ok(expanded.into_owned())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn config() -> Config {
        Config {
            environment: RunEnvironment::Prod,
            discord_token: "token".to_string(),
            database_path: None,
            log_level: "info".to_string(),
            bot_color: None,
            max_metrics_per_guild: 3,
            prompt_timeout_secs: 30,
            selection_timeout_secs: 60,
            discord_guild_id: None,
        }
    }

    #[test]
    fn test_config_from_env_missing_token() {
        env::remove_var("LEADERBOARDS_BOT_RUN_ENVIRONMENT");
        env::remove_var("PROD_LEADERBOARDS_BOT_TOKEN");

        let result = Config::from_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("PROD_LEADERBOARDS_BOT_TOKEN"));
    }

    #[test]
    fn test_run_environment_defaults() {
        let mut config = config();
        assert_eq!(config.database_path(), "db/leaderboards.db");
        assert_eq!(config.bot_color(), 0xF04747);

        config.environment = RunEnvironment::Dev;
        assert_eq!(config.database_path(), "db/dev_leaderboards.db");
        assert_eq!(config.bot_color(), 0x2EB684);

        config.database_path = Some("custom.db".to_string());
        config.bot_color = Some(0x123456);
        assert_eq!(config.database_path(), "custom.db");
        assert_eq!(config.bot_color(), 0x123456);
    }

    #[test]
    fn test_validate_limits() {
        assert!(config().validate().is_ok());

        let mut too_many = config();
        too_many.max_metrics_per_guild = COUNTER_SLOTS + 1;
        assert!(too_many.validate().is_err());

        let mut none = config();
        none.max_metrics_per_guild = 0;
        assert!(none.validate().is_err());

        let mut no_wait = config();
        no_wait.prompt_timeout_secs = 0;
        assert!(no_wait.validate().is_err());

        let mut no_token = config();
        no_token.discord_token.clear();
        assert!(no_token.validate().unwrap_err().to_string().contains("discord_token"));

        let mut bad_guild = config();
        bad_guild.discord_guild_id = Some("guild_123".to_string());
        assert!(bad_guild.validate().is_err());
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("0xF04747"), Some(0xF04747));
        assert_eq!(parse_color("#2EB684"), Some(0x2EB684));
        assert_eq!(parse_color("F04747"), Some(0xF04747));
        assert_eq!(parse_color("255"), Some(255));
        assert_eq!(parse_color("not a colour"), None);
    }

    #[test]
    fn test_interpolation_expands_set_and_fallback_vars() {
        env::set_var("LB_TEST_DB_DIR", "/var/lib/leaderboards");
        env::remove_var("LB_TEST_LEVEL_UNSET");

        let expanded =
            interpolate_env_vars("database_path: ${LB_TEST_DB_DIR}/stats.db\nlog_level: ${LB_TEST_LEVEL_UNSET:-warn}")
                .unwrap();
        assert_eq!(expanded, "database_path: /var/lib/leaderboards/stats.db\nlog_level: warn");

        env::remove_var("LB_TEST_DB_DIR");
    }

    #[test]
    fn test_interpolation_reports_every_unset_var() {
        env::remove_var("LB_TEST_UNSET_A");
        env::remove_var("LB_TEST_UNSET_B");

        let err = interpolate_env_vars("a: ${LB_TEST_UNSET_A}\nb: ${LB_TEST_UNSET_B}\nc: ${LB_TEST_UNSET_C:-}")
            .unwrap_err()
            .to_string();
        assert!(err.contains("LB_TEST_UNSET_A, LB_TEST_UNSET_B"));
        assert!(!err.contains("LB_TEST_UNSET_C"));
    }

    #[test]
    fn test_interpolation_leaves_plain_text_alone() {
        let text = "bot_color: \"#F04747\"\nnote: $HOME is not expanded";
        assert_eq!(interpolate_env_vars(text).unwrap(), text);
    }

    #[test]
    fn test_config_from_yaml() {
        env::set_var("TEST_LEADERBOARDS_TOKEN", "test_token_123");

        let yaml = r#"
environment: dev
discord_token: "${TEST_LEADERBOARDS_TOKEN}"
log_level: "debug"
max_metrics_per_guild: 5
prompt_timeout_secs: ${TEST_PROMPT_TIMEOUT_UNSET:-45}
"#;

        let interpolated = interpolate_env_vars(yaml).unwrap();
        let config: Config = serde_yaml::from_str(&interpolated).unwrap();

        assert_eq!(config.environment, RunEnvironment::Dev);
        assert_eq!(config.discord_token, "test_token_123");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.max_metrics_per_guild, 5);
        assert_eq!(config.prompt_timeout_secs, 45);
        assert_eq!(config.selection_timeout_secs, 60);
        assert_eq!(config.database_path(), "db/dev_leaderboards.db");
        assert!(config.validate().is_ok());

        env::remove_var("TEST_LEADERBOARDS_TOKEN");
    }
}
