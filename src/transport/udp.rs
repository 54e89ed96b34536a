//! UDP transport for DNS queries.
//!
//! Every datagram is resolved in its own local task so a slow upstream or
//! store never holds up other clients.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::UdpSocket;
use tracing::{debug, error, info};

use super::{MAX_DNS_PACKET_SIZE, Protocol, TransportOptions, response_for};
use crate::dns::Query;
use crate::resolver::Resolver;

/// UDP transport for DNS proxy.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Start the receive loop.
    pub fn start(self, resolver: Arc<dyn Resolver>, options: TransportOptions) {
        tokio::task::spawn_local(run(self.socket, resolver, options));
    }
}

async fn run(socket: Arc<UdpSocket>, resolver: Arc<dyn Resolver>, options: TransportOptions) {
    if let Ok(addr) = socket.local_addr() {
        info!(%addr, protocol = Protocol::Udp.as_str(), "listening");
    }

    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "UDP recv error");
                continue;
            }
        };

        let Some(query) = Query::parse(&buf[..len], src.ip()) else {
            debug!(%src, len, "dropping malformed UDP query");
            continue;
        };

        tokio::task::spawn_local(handle_query(
            socket.clone(),
            src,
            query,
            resolver.clone(),
            options,
        ));
    }
}

async fn handle_query(
    socket: Arc<UdpSocket>,
    src: SocketAddr,
    query: Query,
    resolver: Arc<dyn Resolver>,
    options: TransportOptions,
) {
    let start = Instant::now();

    let result = resolver.query(&query, options.timeout).await;
    let outcome = if result.is_ok() { "answered" } else { "failed" };
    let response = response_for(&query, result);

    if let Err(e) = socket.send_to(&response, src).await {
        error!(%src, error = %e, "UDP response error");
        return;
    }

    debug!(
        protocol = Protocol::Udp.as_str(),
        name = %query.name,
        peer = %src,
        outcome,
        total_ms = start.elapsed().as_secs_f64() * 1000.0,
        "query"
    );
}
