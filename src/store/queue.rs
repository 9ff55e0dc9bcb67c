//! The distributed work queue
//!
//! Queue items are leased to exactly one agent at a time via a row-level
//! `locked_by` claim made inside an immediate transaction. Enqueueing is
//! idempotent: URLs that are already queued, or already downloaded (unless
//! forced), are silently skipped.

use crate::store::{now_ts, ts_after_secs, Lease, PauseSummary, QueueListing, Store};
use crate::TrawlerError;
use regex::Regex;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use std::time::Duration;
use uuid::Uuid;

/// Delay between claiming an item and consuming it, to reduce
/// thundering-herd contention between agents racing the same claim.
const SETTLE_DELAY: Duration = Duration::from_millis(200);

impl Store {
    /// Adds URLs to the download queue
    ///
    /// URLs that already have a url record are skipped unless `force` is
    /// set; URLs already queued are ignored. When `requeue_uuid` is given
    /// (re-queueing an interrupted download), the original queue identity
    /// is reused and the already-downloaded check is bypassed. A
    /// `refresh_interval` makes the new items recurring.
    ///
    /// Returns the total number of items now queued.
    pub fn enqueue_urls(
        &mut self,
        links: &[String],
        force: bool,
        requeue_uuid: Option<Uuid>,
        refresh_interval: Option<i64>,
    ) -> Result<usize, TrawlerError> {
        for url in links {
            let url = url.trim();
            if url.is_empty() {
                continue;
            }

            if !force && requeue_uuid.is_none() {
                let known: Option<String> = self
                    .conn()
                    .query_row(
                        "SELECT uuid FROM urls WHERE url = ?1",
                        params![url],
                        |row| row.get(0),
                    )
                    .optional()?;
                if known.is_some() {
                    tracing::info!("{} has already been downloaded; use --force if necessary", url);
                    continue;
                }
            }

            let uuid = requeue_uuid.unwrap_or_else(Uuid::new_v4);

            // A URL that is already queued is not an error
            self.conn().execute(
                "INSERT OR IGNORE INTO dl_queue (uuid, url, added_at, refresh_interval)
                 VALUES (?1, ?2, ?3, ?4)",
                params![uuid.to_string(), url, now_ts(), refresh_interval],
            )?;
        }

        let queued: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM dl_queue", [], |row| row.get(0))?;
        Ok(queued as usize)
    }

    /// Leases the next eligible queue item for this agent
    ///
    /// Clears expired `paused_until` values, then claims the single oldest
    /// item that is not paused and not locked, marking it `locked_by` this
    /// agent inside an immediate transaction. After a short settling delay
    /// the claimed row is consumed: deleted for one-shot URLs, or rewritten
    /// with a future `paused_until` when a refresh interval is set
    /// (recurring crawl).
    ///
    /// Returns `None` when no item is eligible; contention is not an error.
    pub async fn lease_next(&mut self, agent_id: &str) -> Result<Option<Lease>, TrawlerError> {
        let claimed: Option<String> = {
            let tx = self
                .conn_mut()
                .transaction_with_behavior(TransactionBehavior::Immediate)?;

            // Unpause items past their cooldown
            tx.execute(
                "UPDATE dl_queue
                 SET paused_until = NULL
                 WHERE paused_until IS NOT NULL AND paused_until <= ?1",
                params![now_ts()],
            )?;

            // Claim the oldest eligible item for this agent
            let claimed = tx
                .query_row(
                    "UPDATE dl_queue
                     SET locked_by = ?1
                     WHERE uuid = (
                         SELECT uuid
                         FROM dl_queue
                         WHERE paused = 0
                         AND paused_until IS NULL
                         AND locked_by IS NULL
                         ORDER BY dl_order, added_at
                         LIMIT 1
                     )
                     RETURNING uuid",
                    params![agent_id],
                    |row| row.get(0),
                )
                .optional()?;

            tx.commit()?;
            claimed
        };

        let Some(uuid_str) = claimed else {
            return Ok(None);
        };
        let queue_uuid = Uuid::parse_str(&uuid_str)
            .map_err(|e| TrawlerError::Storage(format!("bad queue uuid {}: {}", uuid_str, e)))?;

        // Helps out with the lock; must not park the runtime's worker
        tokio::time::sleep(SETTLE_DELAY).await;

        let tx = self.conn_mut().transaction()?;
        let (url, refresh_interval): (String, Option<i64>) = tx.query_row(
            "SELECT url, refresh_interval FROM dl_queue WHERE uuid = ?1",
            params![uuid_str],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        if let Some(interval) = refresh_interval {
            // Recurring URL: release the lock and pause until the next cycle
            tx.execute(
                "UPDATE dl_queue SET locked_by = NULL, paused_until = ?1 WHERE uuid = ?2",
                params![ts_after_secs(interval), uuid_str],
            )?;
        } else {
            tx.execute("DELETE FROM dl_queue WHERE uuid = ?1", params![uuid_str])?;
        }
        tx.commit()?;

        Ok(Some(Lease {
            queue_uuid,
            url,
            refresh_interval,
        }))
    }

    /// Lists all queued URLs, decorating paused items
    pub fn list_queue(&self) -> Result<QueueListing, TrawlerError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT url, paused FROM dl_queue ORDER BY dl_order, added_at")?;

        let urls = stmt
            .query_map([], |row| {
                let url: String = row.get(0)?;
                let paused: bool = row.get(1)?;
                Ok(if paused {
                    format!("{} (paused)", url)
                } else {
                    url
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let number_queued = urls.len();
        Ok(QueueListing { urls, number_queued })
    }

    /// Pauses the given URLs in the queue
    pub fn pause_urls(&mut self, urls: &[String]) -> Result<PauseSummary, TrawlerError> {
        self.set_paused(urls, true)
    }

    /// Unpauses the given URLs in the queue
    pub fn unpause_urls(&mut self, urls: &[String]) -> Result<PauseSummary, TrawlerError> {
        self.set_paused(urls, false)
    }

    fn set_paused(&mut self, urls: &[String], paused: bool) -> Result<PauseSummary, TrawlerError> {
        let tx = self.conn_mut().transaction()?;
        for url in urls {
            tx.execute(
                "UPDATE dl_queue SET paused = ?1 WHERE url = ?2",
                params![paused, url],
            )?;
        }
        tx.commit()?;

        Ok(PauseSummary {
            urls: urls.to_vec(),
            count: urls.len(),
        })
    }

    /// Enqueues only the candidates matching the given pattern
    pub fn queue_matching(
        &mut self,
        candidates: &[String],
        pattern: &str,
        force: bool,
    ) -> Result<usize, TrawlerError> {
        let expr = Regex::new(pattern).map_err(|source| TrawlerError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;

        let links: Vec<String> = candidates
            .iter()
            .filter(|url| expr.is_match(url))
            .cloned()
            .collect();
        self.enqueue_urls(&links, force, None, None)
    }

    /// Returns cached URLs matching any of the given patterns, for
    /// reprocessing
    pub fn reprocess_urls(&self, patterns: &[String]) -> Result<Vec<String>, TrawlerError> {
        let mut exprs = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            exprs.push(Regex::new(pattern).map_err(|source| TrawlerError::Pattern {
                pattern: pattern.clone(),
                source,
            })?);
        }

        let mut stmt = self.conn().prepare("SELECT url FROM urls")?;
        let all = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(all
            .into_iter()
            .filter(|url| exprs.iter().any(|expr| expr.is_match(url)))
            .collect())
    }
}
