//! TCP transport for DNS queries.
//!
//! Each client connection is handled independently. A connection may carry
//! several queries; each is answered in order. TCP DNS messages are prefixed
//! with a 2-byte length.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use super::{Protocol, TransportOptions, response_for};
use crate::dns::Query;
use crate::resolver::Resolver;

/// TCP transport for DNS proxy.
///
/// Binds to a local address and accepts connections from clients.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start the accept loop; each connection runs in its own local task.
    pub fn start(self, resolver: Arc<dyn Resolver>, options: TransportOptions) {
        tokio::task::spawn_local(run_accept_loop(self.listener, resolver, options));
    }
}

async fn run_accept_loop(
    listener: TcpListener,
    resolver: Arc<dyn Resolver>,
    options: TransportOptions,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, protocol = Protocol::Tcp.as_str(), "listening");
    }

    loop {
        match listener.accept().await {
            Ok((client, peer)) => {
                tokio::task::spawn_local(handle_connection(
                    client,
                    peer,
                    resolver.clone(),
                    options,
                ));
            }
            Err(e) => {
                error!(error = %e, "TCP accept error");
            }
        }
    }
}

async fn handle_connection(
    mut client: TcpStream,
    peer: SocketAddr,
    resolver: Arc<dyn Resolver>,
    options: TransportOptions,
) {
    loop {
        let packet = match read_message(&mut client).await {
            Ok(Some(packet)) => packet,
            Ok(None) => return,
            Err(e) => {
                debug!(%peer, error = %e, "TCP read error");
                return;
            }
        };

        let start = Instant::now();
        let Some(query) = Query::parse(&packet, peer.ip()) else {
            debug!(%peer, "dropping malformed TCP query");
            return;
        };

        let result = resolver.query(&query, options.timeout).await;
        let outcome = if result.is_ok() { "answered" } else { "failed" };
        let response = response_for(&query, result);

        if let Err(e) = write_message(&mut client, &response).await {
            debug!(%peer, error = %e, "TCP write error");
            return;
        }
        debug!(
            protocol = Protocol::Tcp.as_str(),
            name = %query.name,
            %peer,
            outcome,
            total_ms = start.elapsed().as_secs_f64() * 1000.0,
            "query"
        );
    }
}

/// Read one length-prefixed DNS message, without its prefix.
///
/// Returns `Ok(None)` when the peer closes the stream between messages.
pub(crate) async fn read_message<S>(stream: &mut S) -> io::Result<Option<Vec<u8>>>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u16::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;

    Ok(Some(buf))
}

/// Write one DNS message with its 2-byte length prefix.
pub(crate) async fn write_message<S>(stream: &mut S, message: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let len = u16::try_from(message.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "DNS message too large"))?;

    let mut framed = Vec::with_capacity(message.len() + 2);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(message);
    stream.write_all(&framed).await?;
    stream.flush().await
}
