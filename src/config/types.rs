use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Main configuration structure for a trawler agent
///
/// Every field has a serde default so a config file only needs to name
/// what it changes. The same struct is what `show_opts` serializes, so
/// it carries no handles, only plain data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Identity of this agent; scopes the run directory and lock files
    pub id: String,

    /// Location for the pid file, stop file, and metadata file
    ///
    /// Defaults to `/var/run/trawler/<id>` when unset.
    pub run_dir: Option<PathBuf>,

    /// Path to the shared SQLite database
    pub db_path: PathBuf,

    /// Host address of the control plane API
    pub api_addr: String,

    /// Host port of the control plane API
    pub api_port: u16,

    /// Re-fetch URLs that have already been downloaded
    pub force: bool,

    /// Overwrite the stored content for a re-fetched URL
    pub overwrite: bool,

    /// Fixed wait between requests, in seconds
    pub wait: u64,

    /// Per-domain cooldown between requests, in seconds
    pub domain_wait: i64,

    /// Wait a random 1..wait seconds before fetching a first-seen URL
    pub random_wait: bool,

    /// Process a single URL and exit
    pub single: bool,

    /// Log response headers for each request
    pub include_headers: bool,

    /// Extra request headers
    pub headers: BTreeMap<String, String>,

    /// Body to POST with the request; presence switches the method
    pub data: Option<String>,

    /// Drain the shared download queue (on by default)
    pub use_queue: bool,

    /// Skip persisting fetched content to the store
    pub no_cache: bool,

    /// Enqueue the absolute URLs discovered on each page
    pub queue_links: bool,

    /// Enqueue only discovered URLs matching this pattern
    pub queue_re: Option<String>,

    /// Also follow `src=` attributes when extracting links
    pub search_src: bool,

    /// Mirror the URL's path as a directory structure when saving
    pub force_directories: bool,

    /// Download root for saved files; unset means no file saving
    pub save_path: Option<PathBuf>,

    /// Save HTML bodies to disk as well as binary files
    pub save_html: bool,

    /// Hand fetched content to the plugin pipeline (on by default)
    pub use_parsers: bool,

    /// User agent to report to servers; mirrored into `headers`
    pub user_agent: Option<String>,

    /// Re-crawl interval in seconds for newly queued URLs
    pub refresh_interval: Option<i64>,

    /// Verify TLS certificates (on by default)
    pub verify: bool,

    /// Maximum recursion depth when following links
    pub level: u32,

    /// Follow links onto other hosts during recursion
    pub span_hosts: bool,

    /// Run as a background service
    pub daemon: bool,

    /// Names of plugin sets to enable
    pub parser_dir: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: "unknown".to_string(),
            run_dir: None,
            db_path: PathBuf::from("/var/lib/trawler/trawler.db"),
            api_addr: "127.0.0.1".to_string(),
            api_port: 42424,
            force: false,
            overwrite: false,
            wait: 0,
            domain_wait: 0,
            random_wait: false,
            single: false,
            include_headers: false,
            headers: BTreeMap::new(),
            data: None,
            use_queue: true,
            no_cache: false,
            queue_links: false,
            queue_re: None,
            search_src: false,
            force_directories: false,
            save_path: None,
            save_html: true,
            use_parsers: true,
            user_agent: None,
            refresh_interval: None,
            verify: true,
            level: 0,
            span_hosts: false,
            daemon: false,
            parser_dir: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// HTTP method implied by the presence of a request body
    pub fn method(&self) -> &'static str {
        if self.data.is_some() {
            "POST"
        } else {
            "GET"
        }
    }

    /// Effective run directory, defaulting under /var/run
    pub fn run_dir(&self) -> PathBuf {
        match &self.run_dir {
            Some(dir) => dir.clone(),
            None => PathBuf::from("/var/run/trawler").join(&self.id),
        }
    }

    pub fn pid_file(&self) -> PathBuf {
        self.run_dir().join("pid")
    }

    pub fn stop_file(&self) -> PathBuf {
        self.run_dir().join("stop")
    }

    pub fn meta_file(&self) -> PathBuf {
        self.run_dir().join("meta")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.id, "unknown");
        assert_eq!(config.api_addr, "127.0.0.1");
        assert_eq!(config.api_port, 42424);
        assert_eq!(config.db_path, PathBuf::from("/var/lib/trawler/trawler.db"));
        assert!(config.use_queue);
        assert!(config.save_html);
        assert!(config.verify);
        assert_eq!(config.method(), "GET");
    }

    #[test]
    fn test_run_files_scope_to_id() {
        let config = AgentConfig {
            id: "agent-7".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.pid_file(),
            PathBuf::from("/var/run/trawler/agent-7/pid")
        );
        assert_eq!(
            config.stop_file(),
            PathBuf::from("/var/run/trawler/agent-7/stop")
        );
    }

    #[test]
    fn test_data_switches_method_to_post() {
        let config = AgentConfig {
            data: Some("a=1".to_string()),
            ..Default::default()
        };
        assert_eq!(config.method(), "POST");
    }
}
