//! Domain and pattern cooldowns
//!
//! Both checks run against the shared store so that cooldowns apply
//! across every agent, not just the one that set them. Pattern checks
//! run before a fetch (so agents don't collide on a throttled host) and
//! again after it (so subsequent fetches of that host are spaced out);
//! the domain cooldown is checked before and set after.

use crate::store::{now_ts, ts_after_secs, Store};
use crate::TrawlerError;
use regex::Regex;
use rusqlite::params;
use url::Url;

impl Store {
    /// Returns false if the URL's host has an active cooldown
    ///
    /// Expired cooldown rows are purged before the check.
    pub fn check_domain_wait(&mut self, url: &str) -> Result<bool, TrawlerError> {
        self.conn().execute(
            "DELETE FROM domain_wait WHERE wait_until < ?1",
            params![now_ts()],
        )?;

        let Some(domain) = host_of(url) else {
            return Ok(true);
        };

        let active: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM domain_wait WHERE domain = ?1",
            params![domain],
            |row| row.get(0),
        )?;
        Ok(active == 0)
    }

    /// Starts a cooldown for the URL's host
    ///
    /// A wait of zero means "no throttle"; an existing cooldown for the
    /// host is left untouched.
    pub fn set_domain_wait(&mut self, url: &str, wait_seconds: i64) -> Result<(), TrawlerError> {
        if wait_seconds <= 0 {
            return Ok(());
        }
        let Some(domain) = host_of(url) else {
            return Ok(());
        };

        self.conn().execute(
            "INSERT OR IGNORE INTO domain_wait (domain, wait_until) VALUES (?1, ?2)",
            params![domain, ts_after_secs(wait_seconds)],
        )?;
        Ok(())
    }

    /// Applies pattern cooldowns to the queue
    ///
    /// The URL is checked against each pattern_wait rule; the first match
    /// wins, so operators should keep patterns specific (normally a
    /// pattern is just a domain name). On a match, every queue item whose
    /// URL matches the same pattern gets `paused_until = now + wait`.
    pub fn check_pattern_wait(&mut self, url: &str) -> Result<(), TrawlerError> {
        let rules: Vec<(String, i64)> = {
            let mut stmt = self
                .conn()
                .prepare("SELECT pattern, wait FROM pattern_wait ORDER BY rowid")?;
            let rules = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rules
        };

        let mut matched: Option<(Regex, i64)> = None;
        for (pattern, wait) in rules {
            let expr = match Regex::new(&pattern) {
                Ok(expr) => expr,
                Err(e) => {
                    // Operator data; skip the rule rather than fail the fetch
                    tracing::warn!("ignoring invalid pattern_wait rule {}: {}", pattern, e);
                    continue;
                }
            };
            if expr.is_match(url) {
                matched = Some((expr, wait));
                break;
            }
        }

        let Some((expr, wait)) = matched else {
            return Ok(());
        };
        if wait <= 0 {
            return Ok(());
        }

        let queued: Vec<(String, String)> = {
            let mut stmt = self.conn().prepare("SELECT uuid, url FROM dl_queue")?;
            let queued = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            queued
        };

        let paused_until = ts_after_secs(wait);
        let tx = self.conn_mut().transaction()?;
        for (uuid, item_url) in queued {
            if expr.is_match(&item_url) {
                tx.execute(
                    "UPDATE dl_queue SET paused_until = ?1 WHERE uuid = ?2",
                    params![paused_until, uuid],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Adds a pattern cooldown rule (operator tooling)
    pub fn add_pattern_wait(&mut self, pattern: &str, wait_seconds: i64) -> Result<(), TrawlerError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO pattern_wait (pattern, wait) VALUES (?1, ?2)",
            params![pattern, wait_seconds],
        )?;
        Ok(())
    }
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}
