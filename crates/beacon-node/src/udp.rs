//! UDP transport to the collector.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use beacon_core::DatagramChannel;
use tokio::net::UdpSocket;
use tracing::info;

/// A UDP socket connected to the collector. Only datagrams from the
/// collector's address are received.
#[derive(Debug)]
pub struct UdpChannel {
    socket: UdpSocket,
    collector: SocketAddr,
}

impl UdpChannel {
    /// Bind a local port (0 for ephemeral) and connect it to `collector`
    /// (`host:port`).
    ///
    /// # Errors
    ///
    /// Returns an error if the collector name does not resolve or the
    /// socket cannot be bound or connected.
    pub async fn connect(collector: &str, bind_port: u16) -> io::Result<Self> {
        let collector = tokio::net::lookup_host(collector).await?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("collector address {collector} did not resolve"),
            )
        })?;

        let local: SocketAddr = if collector.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, bind_port).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, bind_port).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(collector).await?;

        info!(
            local = %socket.local_addr()?,
            collector = %collector,
            "Uplink socket ready"
        );
        Ok(Self { socket, collector })
    }

    /// Resolved collector address.
    #[must_use]
    pub const fn collector(&self) -> SocketAddr {
        self.collector
    }

    /// Local socket address.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be queried.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl DatagramChannel for UdpChannel {
    async fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send(payload).await
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.socket.try_recv(buf) {
            Ok(len) => Ok(Some(len)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }
}
