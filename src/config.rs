use crate::domain::{Money, RewardTable};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub rewards: RewardTable,
    pub click_min_dwell_ms: i64,
    pub click_expiry_ms: i64,
    /// Base URL of the user service; orphan detection is off when unset.
    pub user_directory_url: Option<String>,
    pub scheduler_interval: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let rewards = RewardTable {
            signup: parse_reward(&env_map, "REWARD_SIGNUP", "25")?,
            listing: parse_reward(&env_map, "REWARD_LISTING", "25")?,
            click: parse_reward(&env_map, "REWARD_CLICK", "15")?,
        };

        let click_min_dwell_ms = parse_non_negative(&env_map, "CLICK_MIN_DWELL_MS", 10_000)?;
        let click_expiry_ms = parse_non_negative(&env_map, "CLICK_EXPIRY_MS", 1_800_000)?;
        if click_expiry_ms < click_min_dwell_ms {
            return Err(ConfigError::InvalidValue(
                "CLICK_EXPIRY_MS".to_string(),
                "must not be shorter than CLICK_MIN_DWELL_MS".to_string(),
            ));
        }

        let user_directory_url = env_map
            .get("USER_DIRECTORY_URL")
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty());

        let scheduler_interval = parse_interval(&env_map, "SCHEDULER_INTERVAL_SECS", 300)?;
        let sweep_interval = parse_interval(&env_map, "SWEEP_INTERVAL_SECS", 3600)?;

        Ok(Config {
            port,
            database_path,
            rewards,
            click_min_dwell_ms,
            click_expiry_ms,
            user_directory_url,
            scheduler_interval,
            sweep_interval,
        })
    }
}

fn parse_reward(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<Money, ConfigError> {
    let raw = env_map.get(key).map(|s| s.as_str()).unwrap_or(default);
    Money::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

fn parse_non_negative(
    env_map: &HashMap<String, String>,
    key: &str,
    default: i64,
) -> Result<i64, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|v| *v >= 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(key.to_string(), "must be a non-negative integer".to_string())
            }),
    }
}

fn parse_interval(
    env_map: &HashMap<String, String>,
    key: &str,
    default_secs: u64,
) -> Result<Duration, ConfigError> {
    let secs = match env_map.get(key) {
        None => default_secs,
        Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), "must be a whole number of seconds".to_string())
        })?,
    };
    if secs == 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}
