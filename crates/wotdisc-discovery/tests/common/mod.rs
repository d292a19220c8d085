//! Common test utilities: a scripted in-memory CoAP transport

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use wotdisc_core::error::TransportError;
use wotdisc_core::types::ContentFormat;
use wotdisc_discovery::{CoapRequest, CoapResponse, CoapTransport, DiscoveryEvent, ResponseStream};

/// Default device answering multicast requests
pub fn device() -> SocketAddr {
    SocketAddr::from(([192, 168, 1, 10], 5683))
}

enum Reply {
    Response(CoapResponse),
    Error(TransportError),
}

struct Route {
    path: String,
    query: Option<Vec<String>>,
    /// Only answer requests whose endpoint is this address
    endpoint: Option<SocketAddr>,
    replies: Vec<(Option<SocketAddr>, ReplyTemplate)>,
    refuse: Option<TransportError>,
}

#[derive(Clone)]
enum ReplyTemplate {
    Content {
        code: u8,
        format: Option<ContentFormat>,
        body: Vec<u8>,
    },
    Error(TransportError),
}

/// Answers requests from a fixed script, keyed by path and query.
///
/// Multicast requests are answered from the route's responders (the default
/// device unless set); unicast requests are answered from their endpoint.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<CoapRequest>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every reply, to keep runs in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replies to `path` (any query) with a 2.05 Content response.
    pub fn respond(self, path: &str, format: ContentFormat, body: &str) -> Self {
        self.route(path, None, None, None, ReplyTemplate::Content {
            code: 0x45,
            format: Some(format),
            body: body.as_bytes().to_vec(),
        })
    }

    /// Replies to `path` with `query` exactly.
    pub fn respond_query(self, path: &str, query: &[&str], format: ContentFormat, body: &str) -> Self {
        self.route(
            path,
            Some(query.iter().map(|q| q.to_string()).collect()),
            None,
            None,
            ReplyTemplate::Content {
                code: 0x45,
                format: Some(format),
                body: body.as_bytes().to_vec(),
            },
        )
    }

    /// Replies to `path` from a specific responder address.
    pub fn respond_from(self, path: &str, responder: SocketAddr, format: ContentFormat, body: &str) -> Self {
        self.route(path, None, None, Some(responder), ReplyTemplate::Content {
            code: 0x45,
            format: Some(format),
            body: body.as_bytes().to_vec(),
        })
    }

    /// Replies to `path` only when sent to `endpoint`.
    pub fn respond_at(self, endpoint: SocketAddr, path: &str, format: ContentFormat, body: &str) -> Self {
        self.route(path, None, Some(endpoint), Some(endpoint), ReplyTemplate::Content {
            code: 0x45,
            format: Some(format),
            body: body.as_bytes().to_vec(),
        })
    }

    /// Replies with an arbitrary response code and no content format.
    pub fn respond_code(self, path: &str, code: u8) -> Self {
        self.route(path, None, None, None, ReplyTemplate::Content {
            code,
            format: None,
            body: Vec::new(),
        })
    }

    /// Replies with a raw content format and body.
    pub fn respond_raw(self, path: &str, format: Option<ContentFormat>, body: &[u8]) -> Self {
        self.route(path, None, None, None, ReplyTemplate::Content {
            code: 0x45,
            format,
            body: body.to_vec(),
        })
    }

    /// Streams an error for `path`.
    pub fn respond_error(self, path: &str, error: TransportError) -> Self {
        self.route(path, None, None, None, ReplyTemplate::Error(error))
    }

    /// Fails to send any request to `endpoint`.
    pub fn refuse(self, endpoint: SocketAddr, error: TransportError) -> Self {
        self.routes.lock().push(Route {
            path: String::new(),
            query: None,
            endpoint: Some(endpoint),
            replies: Vec::new(),
            refuse: Some(error),
        });
        self
    }

    fn route(
        self,
        path: &str,
        query: Option<Vec<String>>,
        endpoint: Option<SocketAddr>,
        responder: Option<SocketAddr>,
        reply: ReplyTemplate,
    ) -> Self {
        {
            let mut routes = self.routes.lock();
            let existing = routes
                .iter_mut()
                .find(|r| r.refuse.is_none() && r.path == path && r.query == query && r.endpoint == endpoint);
            match existing {
                Some(route) => route.replies.push((responder, reply)),
                None => routes.push(Route {
                    path: path.to_string(),
                    query,
                    endpoint,
                    replies: vec![(responder, reply)],
                    refuse: None,
                }),
            }
        }
        self
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<CoapRequest> {
        self.requests.lock().clone()
    }

    /// Requests sent to `path`.
    pub fn requests_to(&self, path: &str) -> Vec<CoapRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    fn replies_for(&self, request: &CoapRequest) -> Result<Vec<Reply>, TransportError> {
        let routes = self.routes.lock();
        let endpoint = request.endpoint.socket_addr();

        if let Some(error) = routes
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .find_map(|r| r.refuse.clone())
        {
            return Err(error);
        }

        let matching = routes.iter().filter(|r| {
            r.refuse.is_none()
                && r.path == request.path
                && r.query.as_ref().map_or(true, |q| *q == request.query)
                && r.endpoint.map_or(true, |e| Some(e) == endpoint)
        });

        let mut replies = Vec::new();
        for route in matching {
            for (responder, template) in &route.replies {
                let source = if request.multicast {
                    responder.unwrap_or_else(device)
                } else {
                    endpoint.unwrap_or_else(device)
                };
                replies.push(match template {
                    ReplyTemplate::Content { code, format, body } => Reply::Response(
                        CoapResponse::content(source, *format, body.clone()).with_code(*code),
                    ),
                    ReplyTemplate::Error(e) => Reply::Error(e.clone()),
                });
            }
        }
        Ok(replies)
    }
}

#[async_trait]
impl CoapTransport for ScriptedTransport {
    async fn get(&self, request: CoapRequest) -> Result<ResponseStream, TransportError> {
        self.requests.lock().push(request.clone());
        let replies = self.replies_for(&request)?;

        let (tx, rx) = mpsc::channel(replies.len().max(1));
        let delay = self.delay;
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            for reply in replies {
                let item = match reply {
                    Reply::Response(response) => Ok(response),
                    Reply::Error(e) => Err(e),
                };
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}

/// Drains all pending events.
pub fn drain_events(rx: &async_channel::Receiver<DiscoveryEvent>) -> Vec<DiscoveryEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Thing Descriptions among drained events, as JSON values.
pub fn thing_descriptions(events: &[DiscoveryEvent]) -> Vec<serde_json::Value> {
    events
        .iter()
        .filter_map(|event| match event {
            DiscoveryEvent::ThingDescription(message) => {
                Some(message.thing_description.as_value().clone())
            }
            _ => None,
        })
        .collect()
}
