//! Content registry: url records, payload versions, referer edges
//!
//! A url record is created the first time a URL is fetched (not when it
//! is merely queued); it is the dedup anchor for "already downloaded"
//! checks. Content versions belong to exactly one url record; the oldest
//! version is the one returned by default fetch policy.

use crate::store::{now_ts, ActiveDownload, ContentVersion, Store, UrlRecord};
use crate::TrawlerError;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

impl Store {
    /// Looks up the record for a URL, if it has ever been fetched
    pub fn url_record(&self, url: &str) -> Result<Option<UrlRecord>, TrawlerError> {
        let record = self
            .conn()
            .query_row(
                "SELECT uuid, url, last_retrieved FROM urls WHERE url = ?1",
                params![url],
                |row| {
                    let uuid: String = row.get(0)?;
                    Ok((uuid, row.get::<_, String>(1)?, row.get(2)?))
                },
            )
            .optional()?;

        match record {
            None => Ok(None),
            Some((uuid, url, last_retrieved)) => Ok(Some(UrlRecord {
                uuid: parse_uuid(&uuid)?,
                url,
                last_retrieved,
            })),
        }
    }

    /// Creates a url record, returning the existing identity if the URL
    /// is already known
    pub fn create_url_record(&mut self, url: &str) -> Result<Uuid, TrawlerError> {
        if let Some(record) = self.url_record(url)? {
            return Ok(record.uuid);
        }

        let uuid = Uuid::new_v4();
        // A concurrent agent may have raced us to the insert
        self.conn().execute(
            "INSERT OR IGNORE INTO urls (uuid, url) VALUES (?1, ?2)",
            params![uuid.to_string(), url],
        )?;

        match self.url_record(url)? {
            Some(record) => Ok(record.uuid),
            None => Err(TrawlerError::Storage(format!(
                "url record vanished after insert: {}",
                url
            ))),
        }
    }

    /// Gets or creates the record for a URL; the boolean is true when the
    /// URL was already known (the "not first time seen" signal)
    pub fn get_or_create_url_record(&mut self, url: &str) -> Result<(Uuid, bool), TrawlerError> {
        if let Some(record) = self.url_record(url)? {
            tracing::warn!("{} exists, ID is {}", url, record.uuid);
            return Ok((record.uuid, true));
        }

        let uuid = self.create_url_record(url)?;
        tracing::info!("{} has not been retrieved before, new ID is {}", url, uuid);
        Ok((uuid, false))
    }

    /// Marks a URL as retrieved now
    pub fn touch_url_retrieved(&mut self, url_uuid: Uuid) -> Result<(), TrawlerError> {
        self.conn().execute(
            "UPDATE urls SET last_retrieved = ?1 WHERE uuid = ?2",
            params![now_ts(), url_uuid.to_string()],
        )?;
        Ok(())
    }

    /// Records a discovery edge; duplicate edges are silently ignored
    pub fn insert_referer(&mut self, url_uuid: Uuid, referer_uuid: Uuid) -> Result<(), TrawlerError> {
        self.conn().execute(
            "INSERT OR IGNORE INTO referers (url_uuid, referer_uuid) VALUES (?1, ?2)",
            params![url_uuid.to_string(), referer_uuid.to_string()],
        )?;
        Ok(())
    }

    /// Pages that referred to the given URL
    pub fn referers(&self, url_uuid: Uuid) -> Result<Vec<Uuid>, TrawlerError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT referer_uuid FROM referers WHERE url_uuid = ?1")?;
        let rows = stmt
            .query_map(params![url_uuid.to_string()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter().map(|s| parse_uuid(s)).collect()
    }

    /// The content version consulted by default fetch policy (the oldest)
    pub fn current_content(&self, url_uuid: Uuid) -> Result<Option<ContentVersion>, TrawlerError> {
        self.content_version(url_uuid, "ASC")
    }

    /// The most recently retrieved content version
    pub fn latest_content(&self, url_uuid: Uuid) -> Result<Option<ContentVersion>, TrawlerError> {
        self.content_version(url_uuid, "DESC")
    }

    fn content_version(
        &self,
        url_uuid: Uuid,
        order: &str,
    ) -> Result<Option<ContentVersion>, TrawlerError> {
        let sql = format!(
            "SELECT id, url_uuid, data, cache_path, retrieved_at
             FROM content WHERE url_uuid = ?1
             ORDER BY retrieved_at {}, id {} LIMIT 1",
            order, order
        );

        let row = self
            .conn()
            .query_row(&sql, params![url_uuid.to_string()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .optional()?;

        match row {
            None => Ok(None),
            Some((id, uuid, data, cache_path, retrieved_at)) => Ok(Some(ContentVersion {
                id,
                url_uuid: parse_uuid(&uuid)?,
                data,
                cache_path,
                retrieved_at,
            })),
        }
    }

    /// Persists a new content version for a URL
    pub fn insert_content(
        &mut self,
        url_uuid: Uuid,
        data: Option<&str>,
        cache_path: Option<&str>,
    ) -> Result<i64, TrawlerError> {
        self.conn().execute(
            "INSERT INTO content (url_uuid, data, cache_path, retrieved_at) VALUES (?1, ?2, ?3, ?4)",
            params![url_uuid.to_string(), data, cache_path, now_ts()],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Overwrites the most recent content version, or inserts one if the
    /// URL has no versions yet (force-mode refetch)
    pub fn overwrite_latest_content(
        &mut self,
        url_uuid: Uuid,
        data: Option<&str>,
        cache_path: Option<&str>,
    ) -> Result<(), TrawlerError> {
        match self.latest_content(url_uuid)? {
            Some(version) => {
                self.conn().execute(
                    "UPDATE content SET data = ?1, cache_path = ?2, retrieved_at = ?3 WHERE id = ?4",
                    params![data, cache_path, now_ts(), version.id],
                )?;
            }
            None => {
                self.insert_content(url_uuid, data, cache_path)?;
            }
        }
        Ok(())
    }

    /// Saves a media item discovered on a page: url record, referer edge,
    /// and a cache-path content version if none exists
    pub fn save_media(
        &mut self,
        media_url: &str,
        parent_uuid: Uuid,
        cache_path: &str,
    ) -> Result<Uuid, TrawlerError> {
        let media_uuid = self.create_url_record(media_url)?;
        self.insert_referer(media_uuid, parent_uuid)?;

        if self.current_content(media_uuid)?.is_none() {
            self.insert_content(media_uuid, None, Some(cache_path))?;
        }
        Ok(media_uuid)
    }

    /// Registers an in-flight fetch for control-plane introspection
    pub fn start_active_download(
        &mut self,
        url_uuid: Uuid,
        url: &str,
        agent_id: &str,
    ) -> Result<(), TrawlerError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO active_dl (url_uuid, url, started_by, started_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![url_uuid.to_string(), url, agent_id, now_ts()],
        )?;
        Ok(())
    }

    /// Removes the in-flight marker; called unconditionally when the
    /// fetch ends, whatever the outcome
    pub fn finish_active_download(&mut self, url_uuid: Uuid) -> Result<(), TrawlerError> {
        self.conn().execute(
            "DELETE FROM active_dl WHERE url_uuid = ?1",
            params![url_uuid.to_string()],
        )?;
        Ok(())
    }

    /// All fetches currently in flight, across every agent
    pub fn active_downloads(&self) -> Result<Vec<ActiveDownload>, TrawlerError> {
        let mut stmt = self.conn().prepare(
            "SELECT url_uuid, url, started_by, started_at FROM active_dl ORDER BY started_at",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(uuid, url, started_by, started_at)| {
                Ok(ActiveDownload {
                    url_uuid: parse_uuid(&uuid)?,
                    url,
                    started_by,
                    started_at,
                })
            })
            .collect()
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, TrawlerError> {
    Uuid::parse_str(value)
        .map_err(|e| TrawlerError::Storage(format!("bad uuid in store: {}: {}", value, e)))
}
