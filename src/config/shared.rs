//! Live configuration shared between the crawl loop and the control plane
//!
//! The control plane mutates options while the loop runs; the loop takes
//! a snapshot at the top of each iteration, so every mutation is visible
//! by the next queue item at the latest.

use crate::config::parser::{coerce_bool, parse_header_line};
use crate::config::types::AgentConfig;
use crate::ConfigError;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// How the agent has been asked to wind down
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StopSignal {
    /// Finish the current download, then exit
    Stop,
    /// Discard and re-enqueue the current download, then exit
    HardStop,
    /// Discard the current download, then exit
    Abort,
}

struct Inner {
    config: AgentConfig,
    stop: Option<StopSignal>,
}

/// Synchronized handle to the agent's runtime configuration
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Inner>>,
}

impl SharedConfig {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner { config, stop: None })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the current configuration
    pub fn snapshot(&self) -> AgentConfig {
        self.read().config.clone()
    }

    /// Applies a single `key=value` mutation from the control plane
    ///
    /// Boolean-ish values use the wire literals (`"True"`, `"False"`,
    /// `"None"`). `user_agent` also rewrites the `User-Agent` header;
    /// `headers` and `parser_dir` replace the existing value wholesale.
    pub fn set_option(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut guard = self.write();
        let config = &mut guard.config;
        match key {
            "force" => config.force = coerce_bool(value),
            "overwrite" => config.overwrite = coerce_bool(value),
            "random_wait" => config.random_wait = coerce_bool(value),
            "include_headers" => config.include_headers = coerce_bool(value),
            "use_queue" => config.use_queue = coerce_bool(value),
            "no_cache" => config.no_cache = coerce_bool(value),
            "queue_links" => config.queue_links = coerce_bool(value),
            "search_src" => config.search_src = coerce_bool(value),
            "force_directories" => config.force_directories = coerce_bool(value),
            "save_html" => config.save_html = coerce_bool(value),
            "use_parsers" => config.use_parsers = coerce_bool(value),
            "verify" => config.verify = coerce_bool(value),
            "span_hosts" => config.span_hosts = coerce_bool(value),
            "wait" => config.wait = parse_num(key, value)?,
            "domain_wait" => config.domain_wait = parse_num(key, value)?,
            "level" => config.level = parse_num(key, value)?,
            "refresh_interval" => {
                config.refresh_interval = match value {
                    "None" | "" => None,
                    v => Some(parse_num(key, v)?),
                }
            }
            "data" => {
                config.data = match value {
                    "None" | "" => None,
                    v => Some(v.to_string()),
                }
            }
            "queue_re" => {
                config.queue_re = match value {
                    "None" | "" => None,
                    v => Some(v.to_string()),
                }
            }
            "save_path" => {
                config.save_path = match value {
                    "None" | "" => None,
                    v => Some(v.into()),
                }
            }
            "user_agent" => {
                config
                    .headers
                    .insert("User-Agent".to_string(), value.to_string());
                config.user_agent = Some(value.to_string());
            }
            "headers" => {
                let mut headers = BTreeMap::new();
                for line in value.split(',').filter(|l| !l.trim().is_empty()) {
                    let (name, val) = parse_header_line(line)?;
                    headers.insert(name, val);
                }
                config.headers = headers;
            }
            "parser_dir" => {
                config.parser_dir = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            other => {
                return Err(ConfigError::Validation(format!(
                    "unknown option: {other}"
                )))
            }
        }
        Ok(())
    }

    /// Raises a stop signal; a stronger signal replaces a weaker one
    pub fn request_stop(&self, signal: StopSignal) {
        let mut guard = self.write();
        guard.stop = Some(match guard.stop {
            Some(existing) => existing.max(signal),
            None => signal,
        });
    }

    /// The pending stop signal, if any
    pub fn stop_signal(&self) -> Option<StopSignal> {
        self.read().stop
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Validation(format!("{key}: not a number: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_coercion_over_the_wire() {
        let shared = SharedConfig::new(AgentConfig::default());

        shared.set_option("force", "True").unwrap();
        assert!(shared.snapshot().force);

        shared.set_option("force", "False").unwrap();
        assert!(!shared.snapshot().force);

        shared.set_option("force", "True").unwrap();
        shared.set_option("force", "None").unwrap();
        assert!(!shared.snapshot().force);
    }

    #[test]
    fn test_user_agent_rewrites_header() {
        let shared = SharedConfig::new(AgentConfig::default());
        shared.set_option("user_agent", "archive-bot/3").unwrap();

        let snapshot = shared.snapshot();
        assert_eq!(snapshot.user_agent.as_deref(), Some("archive-bot/3"));
        assert_eq!(
            snapshot.headers.get("User-Agent").map(String::as_str),
            Some("archive-bot/3")
        );
    }

    #[test]
    fn test_headers_replace_rather_than_merge() {
        let mut config = AgentConfig::default();
        config
            .headers
            .insert("X-Old".to_string(), "1".to_string());
        let shared = SharedConfig::new(config);

        shared
            .set_option("headers", "Accept: text/html, X-New: 2")
            .unwrap();

        let snapshot = shared.snapshot();
        assert!(snapshot.headers.get("X-Old").is_none());
        assert_eq!(snapshot.headers.get("Accept").map(String::as_str), Some("text/html"));
        assert_eq!(snapshot.headers.get("X-New").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_unknown_option_is_rejected() {
        let shared = SharedConfig::new(AgentConfig::default());
        assert!(shared.set_option("no_such_option", "True").is_err());
    }

    #[test]
    fn test_numeric_options() {
        let shared = SharedConfig::new(AgentConfig::default());
        shared.set_option("wait", "5").unwrap();
        shared.set_option("level", "2").unwrap();
        shared.set_option("refresh_interval", "3600").unwrap();

        let snapshot = shared.snapshot();
        assert_eq!(snapshot.wait, 5);
        assert_eq!(snapshot.level, 2);
        assert_eq!(snapshot.refresh_interval, Some(3600));

        shared.set_option("refresh_interval", "None").unwrap();
        assert_eq!(shared.snapshot().refresh_interval, None);

        assert!(shared.set_option("wait", "soon").is_err());
    }

    #[test]
    fn test_stop_signals_escalate_but_never_downgrade() {
        let shared = SharedConfig::new(AgentConfig::default());
        assert_eq!(shared.stop_signal(), None);

        shared.request_stop(StopSignal::Stop);
        assert_eq!(shared.stop_signal(), Some(StopSignal::Stop));

        shared.request_stop(StopSignal::Abort);
        assert_eq!(shared.stop_signal(), Some(StopSignal::Abort));

        shared.request_stop(StopSignal::Stop);
        assert_eq!(shared.stop_signal(), Some(StopSignal::Abort));
    }
}
