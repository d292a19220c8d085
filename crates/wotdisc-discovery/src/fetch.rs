//! Direct Thing Description fetch
//!
//! Retrieves the TD at a known `coap://` URL, optionally caching it per URL
//! for a configured time.

use crate::target::parse_coap_url;
use crate::transport::CoapTransport;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tracing::{debug, info};
use wotdisc_core::config::AppConfig;
use wotdisc_core::error::{DiscoveryError, Result, TransportError};
use wotdisc_core::types::ThingDescription;

#[derive(Debug, Clone)]
struct CachedTd {
    td: ThingDescription,
    fetched_at: Instant,
}

/// Fetches Thing Descriptions by URL.
#[derive(Debug)]
pub struct TdFetcher<T: CoapTransport> {
    transport: T,
    cache: DashMap<String, CachedTd>,
    cache_ttl: Option<Duration>,
    block2_szx: Option<u8>,
    timeout_ms: u64,
}

impl<T: CoapTransport> TdFetcher<T> {
    pub fn new(config: &AppConfig, transport: T) -> Self {
        Self {
            transport,
            cache: DashMap::new(),
            cache_ttl: config.fetch.cache_ttl(),
            block2_szx: config.transport.block2_szx,
            timeout_ms: config.transport.response_timeout_ms,
        }
    }

    /// Returns the TD at `url`, from the cache while it is fresh.
    pub async fn fetch(&self, url: &str) -> Result<ThingDescription> {
        if let Some(td) = self.cached(url) {
            debug!(url = %url, "Using cached Thing Description");
            return Ok(td);
        }

        let target = parse_coap_url(url)?;
        let request = target.request().with_block2(self.block2_szx);
        let uri = request.uri();

        let mut responses = self.transport.get(request).await?;
        let response = match responses.next().await {
            Some(response) => response?,
            None => return Err(TransportError::timeout(uri, self.timeout_ms).into()),
        };

        if !response.is_success() {
            return Err(DiscoveryError::unexpected_response(
                uri,
                format!("response code {}", response.code_string()),
            ));
        }
        if let Some(format) = response.content_format {
            if !format.is_thing_description() {
                return Err(DiscoveryError::unexpected_response(
                    uri,
                    format!("content format {}", format),
                ));
            }
        }

        let td = ThingDescription::from_slice(&response.payload)?;
        info!(
            url = %url,
            identity = td.identity().unwrap_or("<none>"),
            "Fetched Thing Description"
        );

        if self.cache_ttl.is_some() {
            self.cache.insert(
                url.to_string(),
                CachedTd {
                    td: td.clone(),
                    fetched_at: Instant::now(),
                },
            );
        }

        Ok(td)
    }

    /// Drops all cached entries.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_urls(&self) -> usize {
        self.cache.len()
    }

    fn cached(&self, url: &str) -> Option<ThingDescription> {
        let ttl = self.cache_ttl?;
        let fresh = self
            .cache
            .get(url)
            .filter(|entry| entry.fetched_at.elapsed() < ttl)
            .map(|entry| entry.td.clone());

        if fresh.is_none() {
            self.cache.remove(url);
        }
        fresh
    }
}
