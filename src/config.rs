use std::collections::HashMap;
use thiserror::Error;

/// One configured scoring period. The implicit `global` period (all time) is
/// always applied in addition to these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodConfig {
    pub id: String,
    pub duration_ms: i64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    /// Page size for the entry matcher's inflow streams.
    pub entries_fetch_limit: i64,
    /// Page size for trade pagination in the score backfill path.
    pub trade_fetch_limit: i64,
    /// Number of recent trades used for the scoring baseline statistics.
    pub num_recent_trades: i64,
    /// Fallback quote asset for pricing non-root assets.
    pub preferred_quote_asset: String,
    pub periods: Vec<PeriodConfig>,
    pub lock_ttl_ms: u64,
    pub lock_max_attempts: u32,
    pub lock_retry_wait_ms: u64,
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
        let port = parse_with_default(&env_map, "PORT", 8080u16)?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let entries_fetch_limit = parse_with_default(&env_map, "ENTRIES_FETCH_LIMIT", 100i64)?;
        let trade_fetch_limit = parse_with_default(&env_map, "TRADE_FETCH_LIMIT", 100i64)?;
        let num_recent_trades = parse_with_default(&env_map, "SCORE_RECENT_TRADES_NUM", 100i64)?;

        let preferred_quote_asset = env_map
            .get("PREFERRED_QUOTE_ASSET")
            .cloned()
            .unwrap_or_else(|| "BTC".to_string());

        let periods = parse_periods(
            env_map
                .get("SCORE_PERIODS")
                .map(|s| s.as_str())
                .unwrap_or("day:86400000,week:604800000"),
        )?;

        let lock_ttl_ms = parse_with_default(&env_map, "SCORE_LOCK_TTL_MS", 10_000u64)?;
        let lock_max_attempts = parse_with_default(&env_map, "SCORE_LOCK_MAX_ATTEMPTS", 10u32)?;
        let lock_retry_wait_ms = parse_with_default(&env_map, "SCORE_LOCK_RETRY_WAIT_MS", 100u64)?;

        Ok(Config {
            port,
            database_path,
            entries_fetch_limit,
            trade_fetch_limit,
            num_recent_trades,
            preferred_quote_asset,
            periods,
            lock_ttl_ms,
            lock_max_attempts,
            lock_retry_wait_ms,
        })
    }
}

fn parse_with_default<T: std::str::FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(
                key.to_string(),
                format!("could not parse {:?}", raw),
            )
        }),
    }
}

/// Parse `id:duration_ms` pairs, e.g. `day:86400000,week:604800000`.
fn parse_periods(raw: &str) -> Result<Vec<PeriodConfig>, ConfigError> {
    let mut periods = Vec::new();

    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (id, duration) = part.split_once(':').ok_or_else(|| {
            ConfigError::InvalidValue(
                "SCORE_PERIODS".to_string(),
                format!("expected id:duration_ms, got {:?}", part),
            )
        })?;

        if id.is_empty() || id == "global" {
            return Err(ConfigError::InvalidValue(
                "SCORE_PERIODS".to_string(),
                format!("invalid period id {:?}", id),
            ));
        }

        let duration_ms = duration.parse::<i64>().map_err(|_| {
            ConfigError::InvalidValue(
                "SCORE_PERIODS".to_string(),
                format!("invalid duration {:?}", duration),
            )
        })?;

        if duration_ms <= 0 {
            return Err(ConfigError::InvalidValue(
                "SCORE_PERIODS".to_string(),
                "duration must be positive".to_string(),
            ));
        }

        periods.push(PeriodConfig {
            id: id.to_string(),
            duration_ms,
        });
    }

    Ok(periods)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map
    }

    #[test]
    fn test_missing_database_path() {
        let result = Config::from_env_map(HashMap::new());
        match result {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.entries_fetch_limit, 100);
        assert_eq!(config.trade_fetch_limit, 100);
        assert_eq!(config.num_recent_trades, 100);
        assert_eq!(config.preferred_quote_asset, "BTC");
        assert_eq!(config.lock_ttl_ms, 10_000);
        assert_eq!(config.lock_max_attempts, 10);
        assert_eq!(config.lock_retry_wait_ms, 100);
        assert_eq!(
            config.periods,
            vec![
                PeriodConfig {
                    id: "day".to_string(),
                    duration_ms: 86_400_000
                },
                PeriodConfig {
                    id: "week".to_string(),
                    duration_ms: 604_800_000
                },
            ]
        );
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_custom_periods() {
        let mut env_map = setup_required_env();
        env_map.insert("SCORE_PERIODS".to_string(), "month:2592000000".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.periods.len(), 1);
        assert_eq!(config.periods[0].id, "month");
        assert_eq!(config.periods[0].duration_ms, 2_592_000_000);
    }

    #[test]
    fn test_global_period_id_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("SCORE_PERIODS".to_string(), "global:1000".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "SCORE_PERIODS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_malformed_periods_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("SCORE_PERIODS".to_string(), "day".to_string());
        assert!(Config::from_env_map(env_map).is_err());
    }
}
