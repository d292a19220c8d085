//! Discovery metrics
//!
//! Counters are kept in atomics for in-process inspection and mirrored to
//! the `metrics` facade for whatever recorder the host installs.

use metrics::{counter, describe_counter};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Discovery metrics collector
#[derive(Debug)]
pub struct DiscoveryMetrics {
    runs_started: AtomicU64,
    requests_sent: AtomicU64,
    responses_received: AtomicU64,
    responses_ignored: AtomicU64,
    transport_errors: AtomicU64,
    links_parsed: AtomicU64,
    links_followed: AtomicU64,
    links_skipped: AtomicU64,
    tds_ingested: AtomicU64,
    td_parse_errors: AtomicU64,
    events_dropped: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub runs_started: u64,
    pub requests_sent: u64,
    pub responses_received: u64,
    pub responses_ignored: u64,
    pub transport_errors: u64,
    pub links_parsed: u64,
    pub links_followed: u64,
    pub links_skipped: u64,
    pub tds_ingested: u64,
    pub td_parse_errors: u64,
    pub events_dropped: u64,
}

impl DiscoveryMetrics {
    pub fn new() -> Self {
        describe_counter!("wotdisc_runs_started_total", "Total discovery runs triggered");
        describe_counter!("wotdisc_requests_sent_total", "Total CoAP requests issued");
        describe_counter!(
            "wotdisc_responses_received_total",
            "Total CoAP responses received"
        );
        describe_counter!(
            "wotdisc_responses_ignored_total",
            "Responses dropped for status or content format"
        );
        describe_counter!(
            "wotdisc_transport_errors_total",
            "Requests that failed or timed out"
        );
        describe_counter!("wotdisc_links_parsed_total", "Link-values parsed");
        describe_counter!(
            "wotdisc_links_followed_total",
            "Matching links that produced a follow-up request"
        );
        describe_counter!(
            "wotdisc_links_skipped_total",
            "Matching links with an unusable target"
        );
        describe_counter!("wotdisc_tds_ingested_total", "Thing Descriptions ingested");
        describe_counter!(
            "wotdisc_td_parse_errors_total",
            "Response bodies that were not valid JSON"
        );
        describe_counter!(
            "wotdisc_events_dropped_total",
            "Events dropped because the event channel was full"
        );

        Self {
            runs_started: AtomicU64::new(0),
            requests_sent: AtomicU64::new(0),
            responses_received: AtomicU64::new(0),
            responses_ignored: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            links_parsed: AtomicU64::new(0),
            links_followed: AtomicU64::new(0),
            links_skipped: AtomicU64::new(0),
            tds_ingested: AtomicU64::new(0),
            td_parse_errors: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
        }
    }

    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        counter!("wotdisc_runs_started_total").increment(1);
    }

    pub fn record_request_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        counter!("wotdisc_requests_sent_total").increment(1);
    }

    pub fn record_response_received(&self) {
        self.responses_received.fetch_add(1, Ordering::Relaxed);
        counter!("wotdisc_responses_received_total").increment(1);
    }

    pub fn record_response_ignored(&self) {
        self.responses_ignored.fetch_add(1, Ordering::Relaxed);
        counter!("wotdisc_responses_ignored_total").increment(1);
    }

    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
        counter!("wotdisc_transport_errors_total").increment(1);
    }

    pub fn record_links_parsed(&self, count: usize) {
        self.links_parsed.fetch_add(count as u64, Ordering::Relaxed);
        counter!("wotdisc_links_parsed_total").increment(count as u64);
    }

    pub fn record_link_followed(&self) {
        self.links_followed.fetch_add(1, Ordering::Relaxed);
        counter!("wotdisc_links_followed_total").increment(1);
    }

    pub fn record_link_skipped(&self) {
        self.links_skipped.fetch_add(1, Ordering::Relaxed);
        counter!("wotdisc_links_skipped_total").increment(1);
    }

    pub fn record_td_ingested(&self) {
        self.tds_ingested.fetch_add(1, Ordering::Relaxed);
        counter!("wotdisc_tds_ingested_total").increment(1);
    }

    pub fn record_td_parse_error(&self) {
        self.td_parse_errors.fetch_add(1, Ordering::Relaxed);
        counter!("wotdisc_td_parse_errors_total").increment(1);
    }

    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
        counter!("wotdisc_events_dropped_total").increment(1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            responses_ignored: self.responses_ignored.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            links_parsed: self.links_parsed.load(Ordering::Relaxed),
            links_followed: self.links_followed.load(Ordering::Relaxed),
            links_skipped: self.links_skipped.load(Ordering::Relaxed),
            tds_ingested: self.tds_ingested.load(Ordering::Relaxed),
            td_parse_errors: self.td_parse_errors.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for DiscoveryMetrics {
    fn default() -> Self {
        Self::new()
    }
}
