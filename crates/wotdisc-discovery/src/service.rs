//! Discovery orchestration
//!
//! A trigger starts one run. The run fans out into the enabled branches
//! for every target, and every response is routed by content format:
//! TD bodies are ingested, link-format bodies are parsed and filtered and
//! their matches produce follow-up requests within the same run. A run is
//! finished when all of its request tasks are, so runs started by
//! overlapping triggers proceed independently.

use crate::address::AddressResolver;
use crate::context::ContextStores;
use crate::ingest::{DiscoveryEvent, Origin, TdIngestor};
use crate::metrics::DiscoveryMetrics;
use crate::store::TdStore;
use crate::target::resolve_link_target;
use crate::transport::{CoapRequest, CoapResponse, CoapTransport};
use async_channel::Receiver;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;
use wotdisc_core::config::AppConfig;
use wotdisc_core::error::{DiscoveryError, Result};
use wotdisc_core::types::DiscoveryTarget;
use wotdisc_link::{parse, LinkFilter};

/// Maximum number of events to buffer in the channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Path probed for a directly served Thing Description
pub const WELL_KNOWN_TD_PATH: &str = "/.well-known/wot-thing-description";

/// CoRE resource discovery path (RFC 6690)
pub const WELL_KNOWN_CORE_PATH: &str = "/.well-known/core";

/// What a response is expected to contain, which decides how a
/// link-format body is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Links to Thing Descriptions
    ThingLinks,
    /// Links to Resource Directory lookup endpoints
    LookupEndpoints,
    /// A Thing Description; link-format bodies are not followed
    ThingDescription,
}

impl Phase {
    fn filter(self) -> Option<LinkFilter> {
        match self {
            Phase::ThingLinks => Some(LinkFilter::THING_RESOURCE),
            Phase::LookupEndpoints => Some(LinkFilter::RD_LOOKUP_ENDPOINT),
            Phase::ThingDescription => None,
        }
    }

    /// Phase of the request issued for a matching link.
    fn follow_up(self) -> Phase {
        match self {
            Phase::LookupEndpoints => Phase::ThingLinks,
            _ => Phase::ThingDescription,
        }
    }
}

/// Handle to one discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryRun {
    id: Uuid,
    started_at: DateTime<Utc>,
    tracker: TaskTracker,
}

impl DiscoveryRun {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Waits until every request of the run, follow-ups included, is done.
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }

    pub fn is_finished(&self) -> bool {
        self.tracker.is_closed() && self.tracker.is_empty()
    }

    /// Number of request tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}

struct Inner<T> {
    transport: T,
    ingestor: TdIngestor,
    metrics: Arc<DiscoveryMetrics>,
    coap_targets: Vec<DiscoveryTarget>,
    rd_targets: Vec<DiscoveryTarget>,
    td_uri: bool,
    core_uri: bool,
    block2_szx: Option<u8>,
}

/// Discovers Thing Descriptions over CoAP.
pub struct DiscoveryService<T: CoapTransport> {
    inner: Arc<Inner<T>>,

    /// Event channel receiver (for external consumers)
    event_rx: Receiver<DiscoveryEvent>,
}

impl<T: CoapTransport> DiscoveryService<T> {
    /// Creates a service with its own context stores.
    pub fn new(config: &AppConfig, transport: T) -> Result<Self> {
        Self::with_context_stores(config, transport, &ContextStores::new())
    }

    /// Creates a service whose keyed store lives in the host's context slots.
    pub fn with_context_stores(
        config: &AppConfig,
        transport: T,
        contexts: &ContextStores,
    ) -> Result<Self> {
        config.validate()?;

        let (event_tx, event_rx) = async_channel::bounded(EVENT_CHANNEL_CAPACITY);
        let metrics = Arc::new(DiscoveryMetrics::new());

        let store = config
            .output
            .msg_or_context
            .uses_context()
            .then(|| contexts.for_output(&config.output));
        let ingestor = TdIngestor::new(config, store, event_tx, metrics.clone());

        let discovery = &config.discovery;
        let resolver = AddressResolver::new(discovery.coap_port);
        let mut coap_targets = resolver.coap_targets(discovery);
        if discovery.use_coap {
            for addr in &discovery.static_targets {
                let target = DiscoveryTarget::with_port(addr.ip(), addr.port());
                if !coap_targets.contains(&target) {
                    coap_targets.push(target);
                }
            }
        }
        let rd_targets = resolver.resource_directory_targets(discovery);

        if !discovery.any_mode_enabled() {
            warn!("No discovery mode is enabled; runs will issue no requests");
        }

        info!(
            coap_targets = coap_targets.len(),
            rd_targets = rd_targets.len(),
            td_uri = discovery.td_uri,
            core_uri = discovery.core_uri,
            use_core_rd = discovery.use_core_rd,
            output = ?config.output.msg_or_context,
            "Discovery service created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                ingestor,
                metrics,
                coap_targets,
                rd_targets,
                td_uri: discovery.td_uri,
                core_uri: discovery.core_uri,
                block2_szx: config.transport.block2_szx,
            }),
            event_rx,
        })
    }

    /// Starts a discovery run. Must be called within a Tokio runtime.
    pub fn trigger(&self) -> DiscoveryRun {
        let run = DiscoveryRun {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            tracker: TaskTracker::new(),
        };

        let inner = &self.inner;
        inner.metrics.record_run_started();
        inner.ingestor.begin_run(run.id);

        let context = RunContext {
            inner: inner.clone(),
            tracker: run.tracker.clone(),
            run_id: run.id,
        };

        for target in &inner.coap_targets {
            if inner.td_uri {
                let request = CoapRequest::get(target.endpoint(), WELL_KNOWN_TD_PATH)
                    .with_block2(inner.block2_szx);
                context.spawn_request(request, Phase::ThingDescription);
            }
            if inner.core_uri {
                let request = CoapRequest::get(target.endpoint(), WELL_KNOWN_CORE_PATH)
                    .with_query(&LinkFilter::THING_RESOURCE.query());
                context.spawn_request(request, Phase::ThingLinks);
            }
        }

        for target in &inner.rd_targets {
            let request = CoapRequest::get(target.endpoint(), WELL_KNOWN_CORE_PATH)
                .with_query(&LinkFilter::RD_LOOKUP_ENDPOINT.query())
                .with_query(&format!("ct={}", LinkFilter::RD_LOOKUP_ENDPOINT.content_format));
            context.spawn_request(request, Phase::LookupEndpoints);
        }

        // Follow-ups are spawned from tasks of this run, which keep the
        // tracker non-empty until they are registered.
        run.tracker.close();

        info!(
            run_id = %run.id,
            requests = run.tracker.len(),
            "Discovery run started"
        );

        run
    }

    /// Triggers a run and waits for it to finish.
    pub async fn discover(&self) -> DiscoveryRun {
        let run = self.trigger();
        run.wait().await;
        info!(run_id = %run.id, "Discovery run finished");
        run
    }

    /// Returns the event receiver for external consumers
    pub fn event_receiver(&self) -> Receiver<DiscoveryEvent> {
        self.event_rx.clone()
    }

    /// Keyed store, when the output mode writes to context.
    pub fn store(&self) -> Option<Arc<TdStore>> {
        self.inner.ingestor.store().cloned()
    }

    pub fn metrics(&self) -> Arc<DiscoveryMetrics> {
        self.inner.metrics.clone()
    }

    /// Targets queried by the TD probe and core link-format branches.
    pub fn coap_targets(&self) -> &[DiscoveryTarget] {
        &self.inner.coap_targets
    }

    /// Targets queried by the Resource Directory branch.
    pub fn resource_directory_targets(&self) -> &[DiscoveryTarget] {
        &self.inner.rd_targets
    }
}

/// State shared by the tasks of one run.
struct RunContext<T> {
    inner: Arc<Inner<T>>,
    tracker: TaskTracker,
    run_id: Uuid,
}

impl<T> Clone for RunContext<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            tracker: self.tracker.clone(),
            run_id: self.run_id,
        }
    }
}

impl<T: CoapTransport> RunContext<T> {
    fn spawn_request(&self, request: CoapRequest, phase: Phase) {
        let context = self.clone();
        let span = tracing::debug_span!("request", run_id = %self.run_id, uri = %request.uri());
        self.tracker
            .spawn(async move { context.execute(request, phase).await }.instrument(span));
    }

    async fn execute(self, request: CoapRequest, phase: Phase) {
        let uri = request.uri();
        let multicast = request.multicast;
        self.inner.metrics.record_request_sent();
        debug!(multicast, ?phase, "Sending CoAP GET");

        let mut responses = match self.inner.transport.get(request).await {
            Ok(responses) => responses,
            Err(e) => {
                self.inner.metrics.record_transport_error();
                warn!(uri = %uri, error = %e, "CoAP request failed");
                return;
            }
        };

        while let Some(item) = responses.next().await {
            match item {
                Ok(response) => self.route(response, phase),
                Err(e) if e.is_timeout() => {
                    self.inner.metrics.record_transport_error();
                    debug!(uri = %uri, "No response before timeout");
                }
                Err(e) => {
                    self.inner.metrics.record_transport_error();
                    warn!(uri = %uri, error = %e, "CoAP response error");
                }
            }
        }
    }

    fn route(&self, response: CoapResponse, phase: Phase) {
        self.inner.metrics.record_response_received();

        if !response.is_success() {
            self.inner.metrics.record_response_ignored();
            debug!(
                source = %response.source,
                code = %response.code_string(),
                "Ignoring unsuccessful response"
            );
            return;
        }

        match response.content_format {
            Some(format) if format.is_thing_description() => {
                let origin = Origin::run(self.run_id, response.source);
                // Parse failures are published as events by the ingestor
                let _ = self.inner.ingestor.ingest(&response.payload, origin);
            }
            Some(format) if format.is_link_format() => match phase.filter() {
                Some(filter) => self.follow_links(&response, filter, phase.follow_up()),
                None => {
                    self.inner.metrics.record_response_ignored();
                    debug!(source = %response.source, "Ignoring link-format body from TD resource");
                }
            },
            other => {
                self.inner.metrics.record_response_ignored();
                debug!(
                    source = %response.source,
                    content_format = ?other.map(|f| f.code()),
                    "Ignoring response with unexpected content format"
                );
            }
        }
    }

    fn follow_links(&self, response: &CoapResponse, filter: LinkFilter, next: Phase) {
        let body = String::from_utf8_lossy(&response.payload);
        let links = parse(&body);
        self.inner.metrics.record_links_parsed(links.len());

        let matching = links.iter().filter(|link| filter.evaluate(link));
        for link in matching {
            match resolve_link_target(&link.uri, response.source) {
                Ok(target) => {
                    let mut request = target.request();
                    match next {
                        Phase::ThingLinks => {
                            request.query.push(LinkFilter::THING_RESOURCE.query());
                        }
                        _ => request.block2_szx = self.inner.block2_szx,
                    }

                    self.inner.metrics.record_link_followed();
                    debug!(link = %link.uri, target = %request.uri(), "Following link");
                    self.spawn_request(request, next);
                }
                Err(DiscoveryError::UnsupportedScheme { scheme, uri }) => {
                    self.inner.metrics.record_link_skipped();
                    debug!(scheme = %scheme, link = %uri, "Skipping link with unsupported scheme");
                }
                Err(e) => {
                    self.inner.metrics.record_link_skipped();
                    warn!(link = %link.uri, error = %e, "Skipping link with invalid target");
                }
            }
        }
    }
}

impl<T: CoapTransport> std::fmt::Debug for DiscoveryService<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryService")
            .field("coap_targets", &self.inner.coap_targets)
            .field("rd_targets", &self.inner.rd_targets)
            .field("td_uri", &self.inner.td_uri)
            .field("core_uri", &self.inner.core_uri)
            .finish()
    }
}
