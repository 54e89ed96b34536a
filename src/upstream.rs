//! Forwarding to an upstream DNS server.
//!
//! Both forwarders relay the client's packet byte for byte and return the
//! server's reply untouched.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, warn};

use crate::dns::{self, Query};
use crate::error::ResolveError;
use crate::resolver::{Answer, Resolver};
use crate::transport::tcp::{read_message, write_message};
use crate::transport::MAX_DNS_PACKET_SIZE;

/// Used when the caller passes no timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Forwards queries over UDP, retrying over TCP when the reply is truncated.
pub struct UdpUpstream {
    addr: SocketAddr,
}

impl UdpUpstream {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    async fn exchange(&self, query: &Query) -> io::Result<Answer> {
        let local: SocketAddr = match self.addr {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.addr).await?;
        socket.send(&query.packet).await?;

        let mut buf = [0u8; MAX_DNS_PACKET_SIZE];
        loop {
            let len = socket.recv(&mut buf).await?;
            let reply = &buf[..len];

            // Stray or late datagrams for other ids are dropped.
            if dns::message_id(reply) != Some(query.id) {
                debug!(upstream = %self.addr, "ignoring reply with unexpected id");
                continue;
            }

            if dns::is_truncated(reply) {
                debug!(name = %query.name, upstream = %self.addr, "truncated reply, retrying over TCP");
                return tcp_exchange(self.addr, query).await;
            }

            return Ok(reply.to_vec());
        }
    }
}

#[async_trait]
impl Resolver for UdpUpstream {
    async fn query(
        &self,
        query: &Query,
        timeout: Option<Duration>,
    ) -> Result<Answer, ResolveError> {
        with_timeout(self.addr, timeout, self.exchange(query)).await
    }
}

/// Forwards queries over a fresh TCP connection each time.
pub struct TcpUpstream {
    addr: SocketAddr,
}

impl TcpUpstream {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

#[async_trait]
impl Resolver for TcpUpstream {
    async fn query(
        &self,
        query: &Query,
        timeout: Option<Duration>,
    ) -> Result<Answer, ResolveError> {
        with_timeout(self.addr, timeout, tcp_exchange(self.addr, query)).await
    }
}

async fn tcp_exchange(addr: SocketAddr, query: &Query) -> io::Result<Answer> {
    let mut stream = TcpStream::connect(addr).await?;
    write_message(&mut stream, &query.packet).await?;

    match read_message(&mut stream).await? {
        Some(reply) => Ok(reply),
        None => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "upstream closed connection without a reply",
        )),
    }
}

async fn with_timeout<F>(
    addr: SocketAddr,
    timeout: Option<Duration>,
    exchange: F,
) -> Result<Answer, ResolveError>
where
    F: Future<Output = io::Result<Answer>>,
{
    let limit = timeout.unwrap_or(DEFAULT_TIMEOUT);

    match tokio::time::timeout(limit, exchange).await {
        Ok(Ok(answer)) => Ok(answer),
        Ok(Err(e)) => {
            warn!(upstream = %addr, error = %e, "upstream query failed");
            Err(ResolveError::Upstream(e))
        }
        Err(_) => {
            warn!(upstream = %addr, timeout = ?limit, "upstream query timed out");
            Err(ResolveError::Timeout(limit))
        }
    }
}
