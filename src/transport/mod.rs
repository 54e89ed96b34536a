//! Transport layer for the DNS proxy.
//!
//! Provides UDP and TCP listeners that parse client queries, pass them to a
//! [`Resolver`](crate::resolver::Resolver) and write back whatever it answers.

pub mod tcp;
pub mod udp;

use std::time::Duration;

use crate::dns::{Query, ResponseCode};
use crate::error::ResolveError;
use crate::resolver::Answer;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;

/// Transport protocol identifier for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

/// Settings shared by both listeners.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportOptions {
    /// Passed verbatim to the resolver with every query.
    pub timeout: Option<Duration>,
}

/// Turn a resolver outcome into the bytes sent back to the client.
///
/// Rejections become NXDOMAIN; every other failure becomes SERVFAIL.
pub fn response_for(query: &Query, result: Result<Answer, ResolveError>) -> Vec<u8> {
    match result {
        Ok(answer) => answer,
        Err(e) if e.is_rejection() => query.failure_response(ResponseCode::NxDomain),
        Err(_) => query.failure_response(ResponseCode::ServFail),
    }
}
