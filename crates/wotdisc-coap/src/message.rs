//! CoAP message encoding on top of `coap-lite`
//!
//! Builds GET requests with Uri-Path, Uri-Query and Block2 options and
//! reads the options discovery cares about from responses.

use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType};
use wotdisc_core::types::ContentFormat;
use wotdisc_discovery::CoapRequest;

/// Largest block size exponent (1024 bytes); 7 is reserved
pub const MAX_SZX: u8 = 6;

/// Block2 option value (RFC 7959).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block2 {
    pub num: u32,
    pub more: bool,
    pub szx: u8,
}

impl Block2 {
    /// The first block, as requested for early size negotiation.
    pub fn first(szx: u8) -> Self {
        Self {
            num: 0,
            more: false,
            szx: szx.min(MAX_SZX),
        }
    }

    /// Request for the block after this one, keeping the size.
    pub fn next(&self) -> Self {
        Self {
            num: self.num + 1,
            more: false,
            szx: self.szx,
        }
    }

    /// Block size in bytes.
    pub fn size(&self) -> usize {
        1 << (self.szx + 4)
    }

    pub fn encode(&self) -> Vec<u8> {
        let value = (self.num << 4) | (u32::from(self.more) << 3) | u32::from(self.szx);
        encode_uint(value)
    }

    /// Decodes an option value; `None` for oversized or reserved values.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > 3 {
            return None;
        }
        let value = decode_uint(bytes)?;
        let szx = (value & 0x7) as u8;
        if szx > MAX_SZX {
            return None;
        }
        Some(Self {
            num: value >> 4,
            more: value & 0x8 != 0,
            szx,
        })
    }
}

/// Minimal big-endian encoding of an option uint.
pub fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

pub fn decode_uint(bytes: &[u8]) -> Option<u32> {
    if bytes.len() > 4 {
        return None;
    }
    Some(bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

/// Builds a GET request packet. Multicast requests are non-confirmable.
pub fn build_get(
    request: &CoapRequest,
    message_id: u16,
    token: &[u8],
    block2: Option<Block2>,
) -> Packet {
    let mut packet = Packet::new();
    packet.header.message_id = message_id;
    packet.header.code = MessageClass::Request(RequestType::Get);
    packet.header.set_type(if request.multicast {
        MessageType::NonConfirmable
    } else {
        MessageType::Confirmable
    });
    packet.set_token(token.to_vec());

    for segment in request.path_segments() {
        packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
    }
    for query in &request.query {
        packet.add_option(CoapOption::UriQuery, query.as_bytes().to_vec());
    }
    if let Some(block) = block2 {
        packet.add_option(CoapOption::Block2, block.encode());
    }

    packet
}

/// Empty acknowledgement for a confirmable response.
pub fn empty_ack(message_id: u16) -> Packet {
    let mut packet = Packet::new();
    packet.header.message_id = message_id;
    packet.header.code = MessageClass::Empty;
    packet.header.set_type(MessageType::Acknowledgement);
    packet
}

fn first_option(packet: &Packet, option: CoapOption) -> Option<&Vec<u8>> {
    packet.get_option(option).and_then(|values| values.front())
}

/// Content-Format option of a response.
pub fn content_format(packet: &Packet) -> Option<ContentFormat> {
    first_option(packet, CoapOption::ContentFormat)
        .and_then(|value| decode_uint(value))
        .and_then(|code| u16::try_from(code).ok())
        .map(ContentFormat::from_code)
}

/// Block2 option of a response.
pub fn block2(packet: &Packet) -> Option<Block2> {
    first_option(packet, CoapOption::Block2).and_then(|value| Block2::decode(value))
}

/// Raw response code (class << 5 | detail).
pub fn response_code(packet: &Packet) -> u8 {
    u8::from(packet.header.code)
}
