//! Minimal DNS message handling.
//!
//! Only the first question of a query is parsed. Responses are either relayed
//! verbatim from upstream or synthesized failures built from the query.

use std::net::IpAddr;
use std::sync::Arc;

const HEADER_LEN: usize = 12;
const MAX_LABEL_LEN: usize = 63;
const QR_BIT: u8 = 0x80;
const RA_BIT: u8 = 0x80;
/// Opcode and RD bits of the second header byte, echoed in responses.
const ECHOED_FLAGS: u8 = 0x79;
const TC_BIT: u8 = 0x02;

/// Record type A.
pub const TYPE_A: u16 = 1;
/// Class IN.
pub const CLASS_IN: u16 = 1;

/// Response codes used for synthesized failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    ServFail = 2,
    NxDomain = 3,
}

/// A parsed DNS query together with where it came from.
#[derive(Debug, Clone)]
pub struct Query {
    pub id: u16,
    /// Dotted query name as sent, without the root dot.
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
    /// Address of the client that sent the query.
    pub client: IpAddr,
    /// The query exactly as received, for forwarding.
    pub packet: Arc<[u8]>,
    question_end: usize,
}

impl Query {
    /// Parse a DNS query from raw bytes.
    ///
    /// Returns `None` for responses, packets without a question, or malformed
    /// names. Label bytes that are not UTF-8 are replaced rather than refused,
    /// so such queries still get an answer.
    pub fn parse(data: &[u8], client: IpAddr) -> Option<Self> {
        if data.len() < HEADER_LEN + 1 {
            return None;
        }
        if data[2] & QR_BIT != 0 {
            return None;
        }
        let qdcount = u16::from_be_bytes([data[4], data[5]]);
        if qdcount == 0 {
            return None;
        }

        let id = u16::from_be_bytes([data[0], data[1]]);

        // Parse domain name
        let mut pos = HEADER_LEN;
        let mut labels = Vec::new();

        loop {
            let label_len = *data.get(pos)? as usize;
            pos += 1;
            if label_len == 0 {
                break;
            }
            // Compression pointers never appear in a query's first question.
            if label_len & 0xC0 != 0 {
                return None;
            }
            if pos + label_len > data.len() {
                return None;
            }
            labels.push(String::from_utf8_lossy(&data[pos..pos + label_len]));
            pos += label_len;
        }

        // Parse QTYPE and QCLASS
        if pos + 4 > data.len() {
            return None;
        }
        let qtype = u16::from_be_bytes([data[pos], data[pos + 1]]);
        let qclass = u16::from_be_bytes([data[pos + 2], data[pos + 3]]);

        Some(Self {
            id,
            name: labels.join("."),
            qtype,
            qclass,
            client,
            packet: Arc::from(data),
            question_end: pos + 4,
        })
    }

    /// Build a standard recursive query for `name`.
    ///
    /// Returns `None` if a label is longer than 63 bytes.
    pub fn build(id: u16, name: &str, qtype: u16, client: IpAddr) -> Option<Self> {
        let name = name.trim_end_matches('.');
        let labels: Vec<&str> = name.split('.').filter(|l| !l.is_empty()).collect();
        if labels.iter().any(|l| l.len() > MAX_LABEL_LEN) {
            return None;
        }

        let mut packet = Vec::with_capacity(HEADER_LEN + name.len() + 6);

        packet.extend_from_slice(&id.to_be_bytes());
        packet.extend_from_slice(&[0x01, 0x00]); // Flags: standard query, RD
        packet.extend_from_slice(&[0x00, 0x01]); // QDCOUNT
        packet.extend_from_slice(&[0x00; 6]); // ANCOUNT, NSCOUNT, ARCOUNT

        for label in labels {
            packet.push(label.len() as u8);
            packet.extend_from_slice(label.as_bytes());
        }
        packet.push(0);

        packet.extend_from_slice(&qtype.to_be_bytes());
        packet.extend_from_slice(&CLASS_IN.to_be_bytes());

        let question_end = packet.len();
        Some(Self {
            id,
            name: name.to_string(),
            qtype,
            qclass: CLASS_IN,
            client,
            packet: Arc::from(packet),
            question_end,
        })
    }

    /// Key under which the originating device is stored.
    pub fn device_addr(&self) -> String {
        self.client.to_string()
    }

    /// A response carrying `rcode` and the first question, with no records.
    pub fn failure_response(&self, rcode: ResponseCode) -> Vec<u8> {
        let mut response = self.packet[..self.question_end].to_vec();

        response[2] = QR_BIT | (self.packet[2] & ECHOED_FLAGS);
        response[3] = RA_BIT | rcode as u8;
        response[4..6].copy_from_slice(&1u16.to_be_bytes());
        response[6..HEADER_LEN].fill(0);

        response
    }
}

/// Transaction id of a raw message, if it has a header.
pub fn message_id(data: &[u8]) -> Option<u16> {
    (data.len() >= HEADER_LEN).then(|| u16::from_be_bytes([data[0], data[1]]))
}

/// Response code of a raw response, if it has a header.
pub fn response_code(data: &[u8]) -> Option<u8> {
    (data.len() >= HEADER_LEN).then(|| data[3] & 0x0F)
}

/// Whether a raw response has the truncation bit set.
pub fn is_truncated(data: &[u8]) -> bool {
    data.len() >= HEADER_LEN && data[2] & TC_BIT != 0
}
