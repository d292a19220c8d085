//! UDP CoAP transport
//!
//! Every request gets its own ephemeral socket, so responses are
//! demultiplexed by socket and checked against the request token. A
//! multicast request collects responses until the listen window closes; a
//! unicast request finishes with its first complete response or a timeout.
//! Block-wise transfers are continued per responder and delivered as one
//! reassembled payload.

use crate::message::{self, Block2};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use coap_lite::{MessageClass, MessageType, Packet};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV6};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, Sender};
use tokio::time::{timeout_at, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, instrument, trace, warn};
use wotdisc_core::config::TransportConfig;
use wotdisc_core::error::TransportError;
use wotdisc_discovery::{CoapRequest, CoapResponse, CoapTransport, ResponseStream};

/// Responses buffered per request before the receive task waits
const RESPONSE_CHANNEL_CAPACITY: usize = 64;

/// Token length in bytes
const TOKEN_LENGTH: usize = 4;

/// CoAP over UDP.
#[derive(Debug)]
pub struct UdpCoapTransport {
    config: TransportConfig,
    message_id: AtomicU16,
}

impl UdpCoapTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            message_id: AtomicU16::new(rand::random()),
        }
    }

    fn next_message_id(&self) -> u16 {
        self.message_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Resolves the request endpoint to a socket address.
    async fn destination(&self, request: &CoapRequest) -> Result<SocketAddr, TransportError> {
        let endpoint = &request.endpoint;
        let addr = match endpoint.socket_addr() {
            Some(addr) => addr,
            None => {
                let host = endpoint.host.to_string();
                let resolved = tokio::net::lookup_host((host.as_str(), endpoint.port))
                    .await
                    .map_err(|e| TransportError::AddressResolution {
                        host: host.clone(),
                        reason: e.to_string(),
                    })?
                    .next()
                    .ok_or_else(|| TransportError::AddressResolution {
                        host: host.clone(),
                        reason: "no addresses".to_string(),
                    })?;
                resolved
            }
        };

        Ok(self.with_scope(addr))
    }

    /// Link-local IPv6 destinations need an interface to be routable; the
    /// configured interface is used when the endpoint carries no scope.
    fn with_scope(&self, addr: SocketAddr) -> SocketAddr {
        match addr {
            SocketAddr::V6(v6) if v6.scope_id() == 0 && is_link_scoped(v6.ip()) => SocketAddr::V6(
                SocketAddrV6::new(*v6.ip(), v6.port(), 0, self.config.ipv6_interface),
            ),
            other => other,
        }
    }

    /// Creates a non-blocking socket for the destination's family.
    fn bind_socket(&self, destination: &SocketAddr) -> Result<UdpSocket, TransportError> {
        let local_addr = if destination.is_ipv4() {
            self.config.bind_ipv4
        } else {
            self.config.bind_ipv6
        };

        let socket = socket2::Socket::new(
            if local_addr.is_ipv4() {
                socket2::Domain::IPV4
            } else {
                socket2::Domain::IPV6
            },
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )?;

        if local_addr.is_ipv6() {
            socket.set_only_v6(true)?;
        }
        socket.set_nonblocking(true)?;
        socket.bind(&local_addr.into())?;

        if destination.ip().is_multicast() {
            match destination.ip() {
                IpAddr::V4(_) => {
                    socket.set_multicast_ttl_v4(self.config.multicast_ttl)?;
                    let interface = match self.config.bind_ipv4.ip() {
                        IpAddr::V4(v4) => v4,
                        IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
                    };
                    if !interface.is_unspecified() {
                        socket.set_multicast_if_v4(&interface)?;
                    }
                }
                IpAddr::V6(_) => {
                    socket.set_multicast_hops_v6(self.config.multicast_ttl)?;
                    if self.config.ipv6_interface != 0 {
                        socket.set_multicast_if_v6(self.config.ipv6_interface)?;
                    }
                }
            }
        }

        Ok(UdpSocket::from_std(socket.into())?)
    }
}

impl Default for UdpCoapTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

#[async_trait]
impl CoapTransport for UdpCoapTransport {
    #[instrument(skip(self, request), fields(uri = %request.uri()))]
    async fn get(&self, request: CoapRequest) -> Result<ResponseStream, TransportError> {
        let uri = request.uri();
        let destination = self.destination(&request).await?;
        let socket = self.bind_socket(&destination)?;

        let token: [u8; TOKEN_LENGTH] = rand::random();
        let block = request.block2_szx.map(Block2::first);
        let packet = message::build_get(&request, self.next_message_id(), &token, block);
        let bytes = packet
            .to_bytes()
            .map_err(|e| TransportError::Encode {
                reason: format!("{:?}", e),
            })?;

        socket
            .send_to(&bytes, destination)
            .await
            .map_err(|e| TransportError::send_failed(&uri, e.to_string()))?;

        debug!(
            destination = %destination,
            multicast = request.multicast,
            bytes = bytes.len(),
            "Sent CoAP request"
        );

        let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        let exchange = Exchange {
            socket: Arc::new(socket),
            request,
            token: token.to_vec(),
            uri,
            config: self.config.clone(),
            first_message_id: self.next_message_id(),
        };
        tokio::spawn(exchange.run(tx));

        Ok(ReceiverStream::new(rx))
    }
}

/// Receive side of one request.
struct Exchange {
    socket: Arc<UdpSocket>,
    request: CoapRequest,
    token: Vec<u8>,
    uri: String,
    config: TransportConfig,
    /// Message ids for block continuations count up from here
    first_message_id: u16,
}

impl Exchange {
    async fn run(self, tx: Sender<Result<CoapResponse, TransportError>>) {
        let window = self.config.response_timeout();
        let mut deadline = Instant::now() + window;
        let mut buffer = vec![0u8; self.config.max_datagram_size];
        let mut transfers = Transfers::default();
        let mut message_id = self.first_message_id;
        let mut delivered = 0usize;

        loop {
            let (size, source) = match timeout_at(deadline, self.socket.recv_from(&mut buffer)).await {
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    let _ = tx.send(Err(e.into())).await;
                    break;
                }
                Err(_) => {
                    if !self.request.multicast && delivered == 0 {
                        let _ = tx
                            .send(Err(TransportError::timeout(
                                &self.uri,
                                self.config.response_timeout_ms,
                            )))
                            .await;
                    }
                    break;
                }
            };

            let packet = match Packet::from_bytes(&buffer[..size]) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!(source = %source, error = ?e, "Dropping malformed CoAP datagram");
                    if tx
                        .send(Err(TransportError::malformed(source.to_string(), format!("{:?}", e))))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    continue;
                }
            };

            if packet.header.get_type() == MessageType::Confirmable {
                self.acknowledge(&packet, source).await;
            }

            if packet.header.code == MessageClass::Empty {
                trace!(source = %source, "Empty acknowledgement, response follows separately");
                continue;
            }

            if packet.get_token() != self.token.as_slice() {
                trace!(source = %source, "Ignoring response with foreign token");
                continue;
            }

            let payload = match message::block2(&packet) {
                None => {
                    transfers.remove(&source);
                    Bytes::copy_from_slice(&packet.payload)
                }
                Some(block) => match transfers.accept(source, block, &packet.payload) {
                    BlockOutcome::Complete(body) => body,
                    BlockOutcome::Continue => {
                        message_id = message_id.wrapping_add(1);
                        if let Err(e) = self.request_next_block(block, source, message_id).await {
                            warn!(source = %source, error = %e, "Failed to request next block");
                            transfers.remove(&source);
                            continue;
                        }
                        // Keep listening while a transfer is in progress
                        deadline = deadline.max(Instant::now() + window);
                        continue;
                    }
                    BlockOutcome::Ignored => continue,
                },
            };

            let response = CoapResponse {
                source,
                code: message::response_code(&packet),
                content_format: message::content_format(&packet),
                payload,
            };

            debug!(
                source = %source,
                code = %response.code_string(),
                bytes = response.payload.len(),
                "Received CoAP response"
            );

            delivered += 1;
            if tx.send(Ok(response)).await.is_err() {
                break;
            }
            if !self.request.multicast {
                break;
            }
        }
    }

    async fn acknowledge(&self, packet: &Packet, source: SocketAddr) {
        let ack = message::empty_ack(packet.header.message_id);
        match ack.to_bytes() {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, source).await {
                    debug!(source = %source, error = %e, "Failed to acknowledge response");
                }
            }
            Err(e) => debug!(error = ?e, "Failed to encode acknowledgement"),
        }
    }

    /// Asks a responder for the block after `block`, unicast.
    async fn request_next_block(
        &self,
        block: Block2,
        source: SocketAddr,
        message_id: u16,
    ) -> Result<(), TransportError> {
        let mut request = self.request.clone();
        request.multicast = false;

        let packet = message::build_get(&request, message_id, &self.token, Some(block.next()));
        let bytes = packet.to_bytes().map_err(|e| TransportError::Encode {
            reason: format!("{:?}", e),
        })?;
        self.socket.send_to(&bytes, source).await?;

        trace!(source = %source, num = block.num + 1, size = block.size(), "Requested next block");
        Ok(())
    }
}

/// What to do after a Block2 response was offered to [`Transfers`].
#[derive(Debug, PartialEq, Eq)]
enum BlockOutcome {
    /// The last block arrived; the reassembled body
    Complete(Bytes),
    /// The block was appended; ask for the next one
    Continue,
    /// Duplicate, stale or out-of-sequence block
    Ignored,
}

/// Block-wise transfers in progress, one per responder.
#[derive(Debug, Default)]
struct Transfers {
    partial: HashMap<SocketAddr, BytesMut>,
    /// Responders whose transfer already completed in this exchange
    completed: HashSet<SocketAddr>,
}

impl Transfers {
    /// Appends `payload` if `block` starts exactly where the collected body
    /// ends. A block behind that offset is a duplicate and is dropped; a
    /// block beyond it abandons the transfer.
    fn accept(&mut self, source: SocketAddr, block: Block2, payload: &[u8]) -> BlockOutcome {
        if self.completed.contains(&source) {
            trace!(source = %source, num = block.num, "Ignoring block of a completed transfer");
            return BlockOutcome::Ignored;
        }

        let offset = block.num as usize * block.size();
        let collected = match self.partial.get(&source) {
            Some(body) => body.len(),
            None if block.num == 0 => 0,
            None => {
                trace!(source = %source, num = block.num, "Ignoring block without a transfer");
                return BlockOutcome::Ignored;
            }
        };

        if offset < collected {
            trace!(source = %source, num = block.num, "Dropping duplicate block");
            return BlockOutcome::Ignored;
        }
        if offset > collected {
            debug!(
                source = %source,
                num = block.num,
                expected_offset = collected,
                "Block out of sequence, abandoning transfer"
            );
            self.partial.remove(&source);
            return BlockOutcome::Ignored;
        }

        let body = self.partial.entry(source).or_default();
        body.extend_from_slice(payload);
        if block.more {
            return BlockOutcome::Continue;
        }

        self.completed.insert(source);
        BlockOutcome::Complete(
            self.partial
                .remove(&source)
                .map(BytesMut::freeze)
                .unwrap_or_default(),
        )
    }

    fn remove(&mut self, source: &SocketAddr) {
        self.partial.remove(source);
    }
}

fn is_link_scoped(ip: &std::net::Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    (first & 0xffc0) == 0xfe80 || (ip.is_multicast() && (first & 0x000f) == 0x2)
}
