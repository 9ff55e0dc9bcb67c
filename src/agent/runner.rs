//! The crawl loop
//!
//! One iteration: take the next URL (local list first, then a queue
//! lease), run pre-flight interceptors, apply throttles, fetch, expand
//! the frontier, and route the content. Stop handling happens at the
//! top of each iteration and again after a fetch, since a signal can
//! arrive mid-download.

use crate::agent::fetch::{get_url, store_supplied, FetchOutcome};
use crate::config::{SharedConfig, StopSignal};
use crate::context::Context;
use crate::frontier::{extract_links, LinkPolicy};
use crate::plugins::{PluginCtx, PreFlightOutcome, Registry};
use crate::runfiles;
use crate::store::Store;
use crate::Result;
use reqwest::Client;
use std::time::Duration;
use uuid::Uuid;

const IDLE_POLL: Duration = Duration::from_millis(100);
const THROTTLE_POLL: Duration = Duration::from_secs(1);

/// A crawling agent bound to one store and one HTTP client
pub struct Agent {
    client: Client,
    store: Store,
    context: Context,
    shared: SharedConfig,
    registry: Registry,
}

impl Agent {
    pub fn new(
        client: Client,
        store: Store,
        context: Context,
        shared: SharedConfig,
        registry: Registry,
    ) -> Self {
        Self {
            client,
            store,
            context,
            shared,
            registry,
        }
    }

    /// Runs the crawl until the URL supply ends or a stop arrives
    ///
    /// `urls` seeds the local list; once it drains, the shared queue is
    /// leased from (when `use_queue`). In daemon mode an empty queue
    /// means idle-poll rather than exit.
    pub async fn run(&mut self, mut urls: Vec<String>) -> Result<()> {
        let mut depth: u32 = 0;

        loop {
            let config = self.shared.snapshot();

            if let Some(signal) = runfiles::consume_stop_file(&config)? {
                tracing::warn!("stop file found, exiting");
                self.shared.request_stop(signal);
            }
            if self.shared.stop_signal().is_some() {
                break;
            }

            let mut lease_uuid = None;
            let url = match next_nonempty(&mut urls) {
                Some(url) => url,
                None if config.use_queue => match self.store.lease_next(&config.id).await? {
                    Some(lease) => {
                        lease_uuid = Some(lease.queue_uuid);
                        lease.url
                    }
                    None if config.daemon => {
                        tokio::time::sleep(IDLE_POLL).await;
                        continue;
                    }
                    None => break,
                },
                None if config.daemon => {
                    tokio::time::sleep(IDLE_POLL).await;
                    continue;
                }
                None => break,
            };

            self.context.begin_url(&url);
            let disposition = self.process_url(&url, depth, &mut urls).await;
            depth += 1;
            self.context.finish_url();

            match disposition {
                Ok(()) => {}
                Err(e) => {
                    // A bad URL or failed fetch skips the item, not the run
                    tracing::error!("error processing {}: {}", url, e);
                }
            }

            match self.shared.stop_signal() {
                Some(StopSignal::HardStop) => {
                    // The interrupted fetch was discarded; put it back
                    tracing::warn!("hard stop: re-queueing {}", url);
                    self.store.enqueue_urls(&[url], true, lease_uuid, None)?;
                    break;
                }
                Some(_) => break,
                None => {}
            }

            if config.wait > 0 && !config.random_wait {
                tokio::time::sleep(Duration::from_secs(config.wait)).await;
            }

            if config.single {
                break;
            }
        }
        Ok(())
    }

    async fn process_url(&mut self, url: &str, depth: u32, urls: &mut Vec<String>) -> Result<()> {
        let config = self.shared.snapshot();

        // Pre-flight interceptors may handle the URL outright
        let mut plugin_ctx = PluginCtx {
            config: &config,
            store: &mut self.store,
            context: &self.context,
        };
        let (url, supplied) = match self.registry.run_pre_flight(url, &mut plugin_ctx)? {
            PreFlightOutcome::Handled(_) => return Ok(()),
            PreFlightOutcome::Continue { url, content } => (url, content),
        };

        // Shared cooldowns; a throttled URL goes to the back of the line
        if !self.store.check_domain_wait(&url)? {
            tracing::debug!("{} is on domain cooldown", url);
            urls.push(url);
            tokio::time::sleep(THROTTLE_POLL).await;
            return Ok(());
        }
        self.store.check_pattern_wait(&url)?;

        let outcome = match supplied {
            Some(content) => FetchOutcome {
                url_uuid: store_supplied(&mut self.store, &config, &url, &content)?,
                content: Some(content),
            },
            None => {
                get_url(
                    &self.client,
                    &mut self.store,
                    &self.context,
                    &self.shared,
                    &url,
                    None,
                )
                .await?
            }
        };

        if config.domain_wait > 0 {
            self.store.set_domain_wait(&url, config.domain_wait)?;
        }
        // Pattern cooldowns run again after the fetch so the next fetch
        // of a matching host is spaced out
        self.store.check_pattern_wait(&url)?;

        // Interrupted fetches carry no content; the caller decides what
        // happens to the queue item
        if self.shared.stop_signal().is_some() {
            return Ok(());
        }

        let Some(content) = outcome.content else {
            return Ok(());
        };

        let policy = LinkPolicy {
            level: config.level,
            span_hosts: config.span_hosts,
            search_src: config.search_src,
        };
        let links = extract_links(&url, &content, depth, &policy);

        if config.queue_links && !links.is_empty() {
            let queued = self
                .store
                .enqueue_urls(&links, false, None, config.refresh_interval)?;
            tracing::info!("queued links from {}, {} items now queued", url, queued);
        }
        if let Some(pattern) = &config.queue_re {
            self.store.queue_matching(&links, pattern, false)?;
        }

        if config.use_parsers {
            let url_uuid = outcome.url_uuid.unwrap_or(Uuid::nil());
            let mut plugin_ctx = PluginCtx {
                config: &config,
                store: &mut self.store,
                context: &self.context,
            };
            let content = self
                .registry
                .apply_filters(&url, content, &mut plugin_ctx)?;
            self.registry
                .route_content(url_uuid, &url, Some(&content), &mut plugin_ctx)?;
        }

        Ok(())
    }
}

fn next_nonempty(urls: &mut Vec<String>) -> Option<String> {
    while !urls.is_empty() {
        let url = urls.remove(0);
        if !url.trim().is_empty() {
            return Some(url);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_nonempty_skips_blanks() {
        let mut urls = vec![
            "".to_string(),
            "  ".to_string(),
            "http://example.com/".to_string(),
        ];
        assert_eq!(
            next_nonempty(&mut urls).as_deref(),
            Some("http://example.com/")
        );
        assert!(urls.is_empty());
        assert_eq!(next_nonempty(&mut urls), None);
    }
}
