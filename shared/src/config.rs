use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::Error;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendKind {
    #[default]
    Local,
    Remote,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "memory" => Ok(BackendKind::Local),
            "remote" | "redis" => Ok(BackendKind::Remote),
            other => Err(Error::Config(format!("unknown backend `{other}`"))),
        }
    }
}

/// Which serialization format the remote backend writes with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConverterKind {
    #[default]
    Json,
    Binary,
}

impl FromStr for ConverterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ConverterKind::Json),
            "binary" | "bincode" => Ok(ConverterKind::Binary),
            other => Err(Error::Config(format!("unknown converter `{other}`"))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub backend: BackendKind,
    pub uri: String,                   // remote only
    pub default_ttl: Option<Duration>, // None = never expire (local), store default (remote)
    pub converter: ConverterKind,
    pub max_idle: usize,
    pub idle_timeout: Duration, // zero = idle connections never go stale
    pub connect_timeout: Duration,
    pub max_entries: Option<u64>, // local only
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            uri: Self::DEFAULT_URI.to_string(),
            default_ttl: None,
            converter: ConverterKind::Json,
            max_idle: Self::DEFAULT_MAX_IDLE,
            idle_timeout: Self::DEFAULT_IDLE_TIMEOUT,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            max_entries: None,
        }
    }
}

impl CacheConfig {
    const DEFAULT_URI: &str = "redis://127.0.0.1:6379";
    const DEFAULT_MAX_IDLE: usize = 5;
    const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(240);
    const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source. Malformed values are
    /// reported and replaced by their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let backend = parse_or(&lookup, "LARDER_BACKEND", defaults.backend, str::parse);
        let converter = parse_or(&lookup, "LARDER_CONVERTER", defaults.converter, str::parse);
        let max_idle = parse_or(&lookup, "LARDER_MAX_IDLE", defaults.max_idle, |v| {
            v.trim().parse::<usize>().map_err(|e| e.to_string())
        });
        let idle_timeout = parse_or(
            &lookup,
            "LARDER_IDLE_TIMEOUT",
            defaults.idle_timeout,
            parse_duration,
        );
        let connect_timeout = parse_or(
            &lookup,
            "LARDER_CONNECT_TIMEOUT",
            defaults.connect_timeout,
            parse_duration,
        );
        let default_ttl = parse_or(&lookup, "LARDER_DEFAULT_TTL", None, |v| {
            parse_duration(v).map(|d| Some(d).filter(|d| !d.is_zero()))
        });
        let max_entries = parse_or(&lookup, "LARDER_MAX_ENTRIES", None, |v| {
            v.trim().parse::<u64>().map(Some).map_err(|e| e.to_string())
        });

        Self {
            backend,
            uri: lookup("LARDER_URI").unwrap_or(defaults.uri),
            default_ttl,
            converter,
            max_idle,
            idle_timeout,
            connect_timeout,
            max_entries,
        }
    }
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if value == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(value).map_err(|e| e.to_string())
}

fn parse_or<T, E, F>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T, parse: F) -> T
where
    E: std::fmt::Display,
    F: Fn(&str) -> Result<T, E>,
{
    match lookup(name) {
        None => default,
        Some(raw) => match parse(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(variable = name, value = %raw, error = %err, "ignoring malformed setting");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = CacheConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config.backend, BackendKind::Local);
        assert_eq!(config.uri, "redis://127.0.0.1:6379");
        assert_eq!(config.default_ttl, None);
        assert_eq!(config.converter, ConverterKind::Json);
        assert_eq!(config.max_idle, 5);
        assert_eq!(config.idle_timeout, Duration::from_secs(240));
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.max_entries, None);
    }

    #[test]
    fn test_reads_every_setting() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("LARDER_BACKEND", "remote"),
            ("LARDER_URI", "redis://:secret@cache:6380/2"),
            ("LARDER_DEFAULT_TTL", "30s"),
            ("LARDER_CONVERTER", "binary"),
            ("LARDER_MAX_IDLE", "12"),
            ("LARDER_IDLE_TIMEOUT", "5m"),
            ("LARDER_CONNECT_TIMEOUT", "250ms"),
            ("LARDER_MAX_ENTRIES", "1000"),
        ]));
        assert_eq!(config.backend, BackendKind::Remote);
        assert_eq!(config.uri, "redis://:secret@cache:6380/2");
        assert_eq!(config.default_ttl, Some(Duration::from_secs(30)));
        assert_eq!(config.converter, ConverterKind::Binary);
        assert_eq!(config.max_idle, 12);
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.max_entries, Some(1000));
    }

    #[test]
    fn test_zero_ttl_means_unset() {
        let config = CacheConfig::from_lookup(lookup_from(&[("LARDER_DEFAULT_TTL", "0")]));
        assert_eq!(config.default_ttl, None);
    }

    #[test]
    fn test_malformed_values_fall_back_to_defaults() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("LARDER_BACKEND", "memcached"),
            ("LARDER_MAX_IDLE", "lots"),
            ("LARDER_DEFAULT_TTL", "forever"),
        ]));
        assert_eq!(config.backend, BackendKind::Local);
        assert_eq!(config.max_idle, 5);
        assert_eq!(config.default_ttl, None);
    }

    #[test]
    fn test_converter_kind_aliases() {
        assert_eq!("JSON".parse::<ConverterKind>().unwrap(), ConverterKind::Json);
        assert_eq!("bincode".parse::<ConverterKind>().unwrap(), ConverterKind::Binary);
        assert!(matches!("gob".parse::<ConverterKind>(), Err(Error::Config(_))));
    }
}
