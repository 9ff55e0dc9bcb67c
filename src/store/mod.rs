//! Durable store shared across agent processes
//!
//! The store is the only resource shared between agents: the work queue,
//! the content registry, and the throttle tables all live here. Each
//! component (crawl loop, control plane) opens its own connection, the
//! way each would hold its own database client.

pub mod content;
pub mod queue;
pub mod schema;
pub mod throttle;

use crate::TrawlerError;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

/// Handle to the shared SQLite store
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (or creates) the store at the given path
    pub fn open(path: &Path) -> Result<Self, TrawlerError> {
        let conn = Connection::open(path)?;

        // WAL keeps concurrent agents from serializing on reads
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        schema::initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory store (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, TrawlerError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

/// Current time as a fixed-width RFC 3339 timestamp
///
/// All timestamps in the store use this format so that SQL string
/// comparison orders them correctly.
pub fn now_ts() -> String {
    format_ts(Utc::now())
}

/// Formats a timestamp in the store's canonical representation
pub fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time plus a number of whole seconds, store-formatted
pub fn ts_after_secs(seconds: i64) -> String {
    format_ts(Utc::now() + Duration::seconds(seconds))
}

/// A known URL and when it was last retrieved
#[derive(Debug, Clone)]
pub struct UrlRecord {
    pub uuid: Uuid,
    pub url: String,
    pub last_retrieved: Option<String>,
}

/// One stored payload version belonging to a url record
#[derive(Debug, Clone)]
pub struct ContentVersion {
    pub id: i64,
    pub url_uuid: Uuid,
    pub data: Option<String>,
    pub cache_path: Option<String>,
    pub retrieved_at: String,
}

/// A queue item leased to this agent
#[derive(Debug, Clone)]
pub struct Lease {
    pub queue_uuid: Uuid,
    pub url: String,
    pub refresh_interval: Option<i64>,
}

/// Queue listing returned by `list_queue` and the control plane
#[derive(Debug, Clone, Serialize)]
pub struct QueueListing {
    pub urls: Vec<String>,
    pub number_queued: usize,
}

/// Summary returned by bulk pause/unpause operations
#[derive(Debug, Clone, Serialize)]
pub struct PauseSummary {
    pub urls: Vec<String>,
    pub count: usize,
}

/// An in-flight download, visible through the control plane
#[derive(Debug, Clone, Serialize)]
pub struct ActiveDownload {
    pub url_uuid: Uuid,
    pub url: String,
    pub started_by: String,
    pub started_at: String,
}
