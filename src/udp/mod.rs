//! UDP punching.
//!
//! use [`punch`] to find the peer sharing your slot pair and open the path to it.
//!
//! use [`serve`] to run the rendezvous server.

#[cfg(feature = "client")]
mod client;
#[cfg(feature = "client")]
pub use client::{punch, Handshake, Mode, Outgoing, Policy};

#[cfg(feature = "server")]
mod server;
#[cfg(feature = "server")]
pub use server::{serve, Server};

use crate::cancel::Cancel;
use crate::conn::Transport;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::{lookup_host, UdpSocket};

/// Plain udp socket as a [`Transport`]. `close` wakes up a blocked receive.
pub struct UdpTransport {
    socket: UdpSocket,
    closed: Cancel,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;

        Ok(Self {
            socket,
            closed: Cancel::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        tokio::select! {
            _ = self.closed.cancelled() => Err(Error::Closed),
            r = self.socket.recv_from(buf) => Ok(r?),
        }
    }

    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        if self.closed.is_cancelled() {
            return Err(Error::Closed);
        }
        Ok(self.socket.send_to(buf, addr).await?)
    }

    fn close(&self) -> Result<()> {
        self.closed.cancel();
        Ok(())
    }
}

/// resolve `host:port`, a bare `:port` means every ipv4 interface.
pub async fn resolve(addr: &str) -> Result<SocketAddr> {
    let full = match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => addr.to_string(),
    };

    lookup_host(full)
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| Error::Resolve(addr.to_string()))
}
