// src/config.rs
use log::LevelFilter;
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// bcrypt only accepts costs in this range.
const BCRYPT_COSTS: RangeInclusive<u32> = 4..=31;

/// Token lifetimes from one second up to ten years.
const TOKEN_TTLS: RangeInclusive<u64> = 1..=315_360_000;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Scylla,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scylla" => Ok(StorageBackend::Scylla),
            "memory" => Ok(StorageBackend::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub storage: StorageBackend,
    pub scylla_node: String,
    pub scylla_keyspace: String,
    pub store_timeout: Duration,
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
    pub alpha_vantage_url: String,
    pub alpha_vantage_key: String,
    pub upstream_timeout: Duration,
    pub bcrypt_cost: u32,
    pub log_level: LevelFilter,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));
        let value = |key: &'static str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        fn parse<T: FromStr>(key: &'static str, raw: String) -> Result<T, ConfigError> {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value: raw })
        }

        fn bounded<T>(key: &'static str, raw: String, range: RangeInclusive<T>) -> Result<T, ConfigError>
        where
            T: FromStr + PartialOrd,
        {
            match raw.trim().parse() {
                Ok(v) if range.contains(&v) => Ok(v),
                _ => Err(ConfigError::Invalid { key, value: raw }),
            }
        }

        let addr: IpAddr = parse("BIND_ADDR", value("BIND_ADDR", "127.0.0.1"))?;
        let port: u16 = parse("PORT", value("PORT", "5000"))?;

        Ok(Config {
            bind: SocketAddr::new(addr, port),
            storage: parse("STORAGE_BACKEND", value("STORAGE_BACKEND", "scylla"))?,
            scylla_node: value("SCYLLA_NODE", "127.0.0.1:9042"),
            scylla_keyspace: value("SCYLLA_KEYSPACE", "trading_panel"),
            store_timeout: Duration::from_secs(parse(
                "STORE_TIMEOUT_SECS",
                value("STORE_TIMEOUT_SECS", "5"),
            )?),
            jwt_secret: required("JWT_SECRET")?,
            token_ttl_secs: bounded(
                "TOKEN_TTL_SECS",
                value("TOKEN_TTL_SECS", "360000"),
                TOKEN_TTLS,
            )?,
            alpha_vantage_url: value("ALPHA_VANTAGE_URL", "https://www.alphavantage.co"),
            alpha_vantage_key: required("ALPHA_VANTAGE_API_KEY")?,
            upstream_timeout: Duration::from_secs(parse(
                "UPSTREAM_TIMEOUT_SECS",
                value("UPSTREAM_TIMEOUT_SECS", "10"),
            )?),
            bcrypt_cost: bounded("BCRYPT_COST", value("BCRYPT_COST", "10"), BCRYPT_COSTS)?,
            log_level: parse("LOG_LEVEL", value("LOG_LEVEL", "info"))?,
        })
    }
}
