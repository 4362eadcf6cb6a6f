//! Start-up configuration read from the environment.

use std::{env, str::FromStr};

use log::LevelFilter;
use mm::page_cache::{CacheStrategy, PageCacheConfig};
use systype::{SysError, SysResult};

/// Write policy of the page cache: `direct`, `write-through` or
/// `write-back`.
pub const ENV_CACHE_STRATEGY: &str = "FS_CACHE_STRATEGY";
/// `0` serves files without the page cache.
pub const ENV_USE_PAGE_CACHE: &str = "FS_USE_PAGE_CACHE";
/// Log level, overriding the one chosen at build time.
pub const ENV_LOG: &str = "LOG";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub cache: Option<PageCacheConfig>,
    pub log_level: Option<LevelFilter>,
}

impl ServerConfig {
    pub fn from_env() -> SysResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SysResult<Self> {
        let use_cache = lookup(ENV_USE_PAGE_CACHE).is_none_or(|v| v.trim() != "0");
        let cache = if use_cache {
            let mut config = PageCacheConfig::default();
            if let Some(name) = lookup(ENV_CACHE_STRATEGY) {
                config.strategy = CacheStrategy::from_str(name.trim()).map_err(|_| {
                    log::error!("[ServerConfig] unknown {} {:?}", ENV_CACHE_STRATEGY, name);
                    SysError::EINVAL
                })?;
            }
            Some(config)
        } else {
            None
        };
        let log_level = lookup(ENV_LOG).map(|name| logger::parse_level(name.trim()));
        Ok(Self { cache, log_level })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn defaults_to_write_back_cache() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.cache.unwrap().strategy, CacheStrategy::WriteBack);
        assert_eq!(config.log_level, None);
    }

    #[test]
    fn reads_strategy_and_switches() {
        let config = ServerConfig::from_lookup(lookup(&[
            (ENV_CACHE_STRATEGY, "write-through"),
            (ENV_LOG, "debug"),
        ]))
        .unwrap();
        assert_eq!(config.cache.unwrap().strategy, CacheStrategy::WriteThrough);
        assert_eq!(config.log_level, Some(LevelFilter::Debug));

        let config = ServerConfig::from_lookup(lookup(&[(ENV_USE_PAGE_CACHE, "0")])).unwrap();
        assert!(config.cache.is_none());

        let err = ServerConfig::from_lookup(lookup(&[(ENV_CACHE_STRATEGY, "lazy")]));
        assert_eq!(err.err(), Some(SysError::EINVAL));
    }
}
