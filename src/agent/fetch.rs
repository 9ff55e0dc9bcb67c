//! Dedup-aware fetching
//!
//! `get_url` is the single entry point the crawl loop uses to turn a URL
//! into content: it consults the store first, only touches the network
//! when the store has nothing (or `force` demands it), and persists what
//! it fetched unless `no_cache` is set.

use crate::config::{AgentConfig, SharedConfig, StopSignal};
use crate::context::Context;
use crate::store::Store;
use crate::{Result, TrawlerError};
use futures_util::StreamExt;
use rand::Rng;
use reqwest::{Client, Response};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use url::Url;
use uuid::Uuid;

/// What a fetch produced
#[derive(Debug)]
pub struct FetchOutcome {
    /// The URL's identity; absent only under `no_cache`
    pub url_uuid: Option<Uuid>,

    /// The text body, when one was retrieved or cached
    pub content: Option<String>,
}

/// Fetches a URL, deduplicating against the store
///
/// A URL that already has stored content is served from the store with
/// no network traffic unless `force` is set. A forced refetch appends a
/// new content version, or replaces the latest one when `overwrite` is
/// set. First-seen URLs get the random politeness wait when
/// `random_wait` is on; cache hits never wait. With `save_path` set, the
/// body is streamed to disk and progress is published through the
/// context.
///
/// # Arguments
///
/// * `referer` - Page the URL was discovered on; sent as the Referer
///   header and recorded as a provenance edge
pub async fn get_url(
    client: &Client,
    store: &mut Store,
    context: &Context,
    shared: &SharedConfig,
    url: &str,
    referer: Option<(Uuid, &str)>,
) -> Result<FetchOutcome> {
    let config = shared.snapshot();

    if config.no_cache {
        let response = request(client, &config, url, referer.map(|r| r.1)).await?;
        log_headers(&config, &response);
        let content = response.text().await?;
        politeness_wait(&config).await;
        return Ok(FetchOutcome {
            url_uuid: None,
            content: Some(content),
        });
    }

    let (url_uuid, existed) = store.get_or_create_url_record(url)?;
    if let Some((referer_uuid, _)) = referer {
        store.insert_referer(url_uuid, referer_uuid)?;
    }

    let cached = store.current_content(url_uuid)?;
    if let Some(version) = cached {
        if !config.force {
            tracing::debug!("serving {} from the store", url);
            return Ok(FetchOutcome {
                url_uuid: Some(url_uuid),
                content: version.data,
            });
        }
    }

    store.start_active_download(url_uuid, url, &config.id)?;
    let fetched = fetch_body(client, context, shared, &config, url, referer.map(|r| r.1)).await;
    store.finish_active_download(url_uuid)?;
    let fetched = fetched?;

    if fetched.interrupted {
        // The loop decides whether to re-enqueue; nothing is persisted
        return Ok(FetchOutcome {
            url_uuid: Some(url_uuid),
            content: None,
        });
    }

    let data = fetched.content.as_deref();
    let cache_path = fetched.cache_path.as_deref();
    if data.is_some() || cache_path.is_some() {
        if config.overwrite {
            store.overwrite_latest_content(url_uuid, data, cache_path)?;
        } else {
            store.insert_content(url_uuid, data, cache_path)?;
        }
    }
    store.touch_url_retrieved(url_uuid)?;

    if !existed {
        politeness_wait(&config).await;
    }

    Ok(FetchOutcome {
        url_uuid: Some(url_uuid),
        content: fetched.content,
    })
}

/// Stores content supplied by a pre-flight plugin without fetching
pub fn store_supplied(
    store: &mut Store,
    config: &AgentConfig,
    url: &str,
    content: &str,
) -> Result<Option<Uuid>> {
    if config.no_cache {
        return Ok(None);
    }
    let (url_uuid, _) = store.get_or_create_url_record(url)?;
    if store.current_content(url_uuid)?.is_none() {
        store.insert_content(url_uuid, Some(content), None)?;
    }
    store.touch_url_retrieved(url_uuid)?;
    Ok(Some(url_uuid))
}

struct FetchedBody {
    content: Option<String>,
    cache_path: Option<String>,
    interrupted: bool,
}

async fn fetch_body(
    client: &Client,
    context: &Context,
    shared: &SharedConfig,
    config: &AgentConfig,
    url: &str,
    referer: Option<&str>,
) -> Result<FetchedBody> {
    let response = request(client, config, url, referer).await?;
    log_headers(config, &response);

    if let Some(save_path) = &config.save_path {
        save_streaming(context, shared, config, url, save_path, response).await
    } else {
        let content = response.text().await?;
        Ok(FetchedBody {
            content: Some(content),
            cache_path: None,
            interrupted: false,
        })
    }
}

async fn request(
    client: &Client,
    config: &AgentConfig,
    url: &str,
    referer: Option<&str>,
) -> Result<Response> {
    let mut builder = match &config.data {
        Some(data) => client.post(url).body(data.clone()),
        None => client.get(url),
    };
    if let Some(referer) = referer {
        builder = builder.header(reqwest::header::REFERER, referer);
    }
    match builder.send().await {
        Ok(response) => Ok(response),
        Err(e) if certificate_error(&e) => Err(TrawlerError::TlsVerification {
            url: url.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Whether an error chain points at a TLS certificate failure
///
/// reqwest wraps the rustls verification error several layers deep, so
/// the chain is walked looking for a certificate complaint.
fn certificate_error(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if e.to_string().to_ascii_lowercase().contains("certificate") {
            return true;
        }
        current = e.source();
    }
    false
}

fn log_headers(config: &AgentConfig, response: &Response) {
    if config.include_headers {
        for (name, value) in response.headers() {
            tracing::info!("{}: {}", name, String::from_utf8_lossy(value.as_bytes()));
        }
    }
}

/// Streams a response body to disk, publishing progress
///
/// Text bodies are kept in memory for parsing and routing, and written
/// to disk only when `save_html` allows. A stop signal raised while
/// streaming deletes the partial file and marks the fetch interrupted.
async fn save_streaming(
    context: &Context,
    shared: &SharedConfig,
    config: &AgentConfig,
    url: &str,
    save_path: &Path,
    response: Response,
) -> Result<FetchedBody> {
    let is_text = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("text"))
        .unwrap_or(false);

    let file_name = target_file(config, save_path, url)?;
    let write_file = !is_text || config.save_html;

    if write_file && file_name.exists() {
        tracing::warn!("{} exists, skipping", file_name.display());
        return Ok(FetchedBody {
            content: None,
            cache_path: Some(file_name.display().to_string()),
            interrupted: false,
        });
    }

    let total = response.content_length().unwrap_or(0);
    tracing::info!("downloading {} to {}", url, file_name.display());
    context.start_download(url, Some(file_name.display().to_string()), total);

    let mut file = if write_file {
        if let Some(parent) = file_name.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Some(tokio::fs::File::create(&file_name).await?)
    } else {
        None
    };

    let mut content = if is_text { Some(Vec::new()) } else { None };
    let mut interrupted = false;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        match shared.stop_signal() {
            Some(StopSignal::HardStop) | Some(StopSignal::Abort) => {
                interrupted = true;
                break;
            }
            _ => {}
        }
        let chunk = chunk?;
        if let Some(buffer) = content.as_mut() {
            buffer.extend_from_slice(&chunk);
        }
        if let Some(file) = file.as_mut() {
            file.write_all(&chunk).await?;
        }
        context.record_bytes(chunk.len() as u64);
    }

    if let Some(mut file) = file.take() {
        file.flush().await?;
    }
    context.finish_download();

    if interrupted {
        if write_file {
            if let Err(e) = tokio::fs::remove_file(&file_name).await {
                tracing::warn!("could not remove partial {}: {}", file_name.display(), e);
            }
        }
        return Ok(FetchedBody {
            content: None,
            cache_path: None,
            interrupted: true,
        });
    }

    Ok(FetchedBody {
        content: content.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
        cache_path: write_file.then(|| file_name.display().to_string()),
        interrupted: false,
    })
}

/// Maps a URL onto a path under the download root
///
/// With `force_directories` the host and full path are mirrored; without
/// it only the last path segment is used.
fn target_file(config: &AgentConfig, save_path: &Path, url: &str) -> Result<PathBuf> {
    let parsed = Url::parse(url)?;
    let path = parsed.path().trim_start_matches('/');

    if config.force_directories {
        let host = parsed.host_str().unwrap_or("unknown-host");
        Ok(save_path.join(host).join(path))
    } else {
        let name = path.rsplit('/').next().filter(|s| !s.is_empty());
        Ok(save_path.join(name.unwrap_or("index")))
    }
}

async fn politeness_wait(config: &AgentConfig) {
    if !config.random_wait {
        return;
    }
    let ceiling = if config.wait > 1 { config.wait } else { 10 };
    let seconds = rand::thread_rng().gen_range(1..ceiling);
    tracing::debug!("politeness wait of {}s", seconds);
    tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;
}
