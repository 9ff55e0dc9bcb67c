//! Plugin pipeline: pre-flight interceptors, content routers, filters,
//! searchers, and organizers
//!
//! Plugins register themselves at compile time through [`inventory`];
//! [`Registry::load`] instantiates the ones the configuration enables.
//! Every plugin receives the same injection bundle at call time: a
//! configuration snapshot, the shared store, and the transient context.

use crate::config::AgentConfig;
use crate::context::Context;
use crate::store::Store;
use crate::{Result, TrawlerError};
use uuid::Uuid;

/// What a plugin does for the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginRole {
    /// Runs before the fetch; may handle the URL itself
    PreFlight,
    /// Claims fetched content by URL and processes it
    Router,
    /// Files saved artifacts into their final layout
    Organizer,
    /// Turns a query into a list of URLs
    Search,
    /// Rewrites content before routing
    Filter,
}

/// Result of a pre-flight interceptor
#[derive(Debug, Clone)]
pub enum PreFlightOutcome {
    /// The plugin fetched and stored the URL itself; skip the rest of
    /// the pipeline for this item
    Handled(Uuid),
    /// Proceed, possibly with a rewritten URL or pre-supplied content
    Continue {
        url: String,
        content: Option<String>,
    },
}

/// Everything a plugin gets to work with
pub struct PluginCtx<'a> {
    pub config: &'a AgentConfig,
    pub store: &'a mut Store,
    pub context: &'a Context,
}

/// A pipeline plugin
///
/// Implement the methods matching the declared role; the rest keep
/// their pass-through defaults.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn role(&self) -> PluginRole;

    /// Pre-flight hook (role [`PluginRole::PreFlight`])
    fn pre_flight(&self, url: &str, _ctx: &mut PluginCtx<'_>) -> Result<PreFlightOutcome> {
        Ok(PreFlightOutcome::Continue {
            url: url.to_string(),
            content: None,
        })
    }

    /// Whether this router claims the URL (role [`PluginRole::Router`])
    fn handles(&self, _url: &str) -> bool {
        false
    }

    /// Processes claimed content (role [`PluginRole::Router`])
    fn handle(
        &self,
        _url_uuid: Uuid,
        _url: &str,
        _content: Option<&str>,
        _ctx: &mut PluginCtx<'_>,
    ) -> Result<()> {
        Ok(())
    }

    /// Content rewrite hook (role [`PluginRole::Filter`])
    fn filter(&self, _url: &str, content: String, _ctx: &mut PluginCtx<'_>) -> Result<String> {
        Ok(content)
    }

    /// Query-to-URLs hook (role [`PluginRole::Search`])
    fn search(&self, _query: &str, _limit: usize, _ctx: &mut PluginCtx<'_>) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Artifact layout hook (role [`PluginRole::Organizer`])
    fn organize(&self, _urls: &[String], _ctx: &mut PluginCtx<'_>) -> Result<()> {
        Ok(())
    }
}

/// Compile-time plugin registration record
pub struct Registration {
    pub name: &'static str,
    pub role: PluginRole,
    pub build: fn() -> Box<dyn Plugin>,
}

inventory::collect!(Registration);

/// The set of plugins enabled for this agent
pub struct Registry {
    plugins: Vec<Box<dyn Plugin>>,
}

impl Registry {
    /// Instantiates every registered plugin the configuration enables
    ///
    /// An empty `parser_dir` enables everything; otherwise only plugins
    /// whose name is listed are loaded.
    pub fn load(config: &AgentConfig) -> Self {
        let mut plugins = Vec::new();
        for registration in inventory::iter::<Registration> {
            if !config.parser_dir.is_empty()
                && !config.parser_dir.iter().any(|n| n == registration.name)
            {
                continue;
            }
            tracing::debug!(
                "loading plugin {} ({:?})",
                registration.name,
                registration.role
            );
            plugins.push((registration.build)());
        }
        Self { plugins }
    }

    #[cfg(test)]
    fn from_plugins(plugins: Vec<Box<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    fn with_role(&self, role: PluginRole) -> impl Iterator<Item = &Box<dyn Plugin>> {
        self.plugins.iter().filter(move |p| p.role() == role)
    }

    /// Runs pre-flight interceptors in registration order
    ///
    /// The first [`PreFlightOutcome::Handled`] short-circuits: later
    /// interceptors do not run and the caller skips fetch and routing.
    /// `Continue` outcomes chain, so one interceptor may rewrite the URL
    /// for the next.
    pub fn run_pre_flight(&self, url: &str, ctx: &mut PluginCtx<'_>) -> Result<PreFlightOutcome> {
        let mut current_url = url.to_string();
        let mut supplied_content = None;
        for plugin in self.with_role(PluginRole::PreFlight) {
            match plugin.pre_flight(&current_url, ctx)? {
                PreFlightOutcome::Handled(uuid) => {
                    tracing::info!("{} handled {} in pre-flight", plugin.name(), current_url);
                    return Ok(PreFlightOutcome::Handled(uuid));
                }
                PreFlightOutcome::Continue { url, content } => {
                    current_url = url;
                    if content.is_some() {
                        supplied_content = content;
                    }
                }
            }
        }
        Ok(PreFlightOutcome::Continue {
            url: current_url,
            content: supplied_content,
        })
    }

    /// Runs content filters in registration order
    pub fn apply_filters(
        &self,
        url: &str,
        mut content: String,
        ctx: &mut PluginCtx<'_>,
    ) -> Result<String> {
        for plugin in self.with_role(PluginRole::Filter) {
            content = plugin.filter(url, content, ctx)?;
        }
        Ok(content)
    }

    /// Hands content to the first router that claims the URL
    ///
    /// Returns whether any router matched. No match is not an error;
    /// the caller has already stored the content.
    pub fn route_content(
        &self,
        url_uuid: Uuid,
        url: &str,
        content: Option<&str>,
        ctx: &mut PluginCtx<'_>,
    ) -> Result<bool> {
        for plugin in self.with_role(PluginRole::Router) {
            if plugin.handles(url) {
                tracing::debug!("routing {} to {}", url, plugin.name());
                plugin.handle(url_uuid, url, content, ctx)?;
                return Ok(true);
            }
        }
        tracing::warn!("no handler claimed {}", url);
        Ok(false)
    }

    /// Runs the named search engine
    pub fn run_search(
        &self,
        engine: &str,
        query: &str,
        limit: usize,
        ctx: &mut PluginCtx<'_>,
    ) -> Result<Vec<String>> {
        for plugin in self.with_role(PluginRole::Search) {
            if plugin.name() == engine {
                let mut urls = plugin.search(query, limit, ctx)?;
                urls.truncate(limit);
                return Ok(urls);
            }
        }
        Err(TrawlerError::Plugin(format!(
            "no search engine named {engine}"
        )))
    }

    /// Hands a batch of URLs to the named organizer
    pub fn run_organizer(
        &self,
        engine: &str,
        urls: &[String],
        ctx: &mut PluginCtx<'_>,
    ) -> Result<()> {
        for plugin in self.with_role(PluginRole::Organizer) {
            if plugin.name() == engine {
                return plugin.organize(urls, ctx);
            }
        }
        Err(TrawlerError::Plugin(format!(
            "no organizer named {engine}"
        )))
    }
}
