use super::{resolve, UdpTransport};
use crate::cancel::Cancel;
use crate::conn::{Builder, Connection};
use crate::error::{Error, Result};
use crate::listener::{Datagram, Listener};
use crate::proto::{Message, Slot, SLOTS};
use std::net::SocketAddr;
use std::sync::Arc;

/// Udp rendezvous server
///
/// remembers the last address every slot announced from, and answers an announce
/// with what it knows about the paired slot.
pub struct Server {
    conn: Connection,
    local_addr: SocketAddr,
    /// encoded peer info, by slot index
    peers: [Option<Vec<u8>>; SLOTS],
}

impl Server {
    pub fn new(conn: Connection, local_addr: SocketAddr) -> Self {
        Self {
            conn,
            local_addr,
            peers: Default::default(),
        }
    }

    /// bind `listen_addr` and wrap the socket with `chain`.
    pub async fn bind(listen_addr: &str, chain: &Builder) -> Result<Self> {
        let raw = UdpTransport::bind(resolve(listen_addr).await?).await?;
        let local_addr = raw.local_addr()?;

        Ok(Self::new(chain.build(Arc::new(raw)), local_addr))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// slots we have an address for
    pub fn slots(&self) -> Vec<Slot> {
        self.peers
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_some())
            .filter_map(|(i, _)| Slot::from_index(i))
            .collect()
    }

    /// serve until cancelled or the transport fails to receive.
    pub async fn run(&mut self, cancel: &Cancel) -> Result<()> {
        let stop = Cancel::new();
        let mut listener = Listener::spawn(self.conn.transport(), stop.clone());

        let r = loop {
            let d = tokio::select! {
                _ = cancel.cancelled() => break Err(Error::Cancelled),
                r = listener.next() => match r {
                    Ok(d) => d,
                    Err(e) => break Err(e),
                },
            };

            self.handle(d).await;
        };

        stop.cancel();
        listener.join().await;
        r
    }

    pub fn close(self) -> Result<()> {
        self.conn.close()
    }

    async fn handle(&mut self, d: Datagram) {
        let slot = match Message::parse(&d.payload) {
            Some(Message::Announce(slot)) => slot,
            _ => {
                log::trace!("dropped \"{}\" from {}", d.payload.escape_ascii(), d.from);
                return;
            }
        };

        let info = Message::PeerInfo {
            slot,
            addr: d.from,
        }
        .to_bytes();

        let entry = &mut self.peers[slot.index()];
        if entry.as_ref() != Some(&info) {
            log::debug!("slot {} at {}", slot, d.from);
        }
        *entry = Some(info);

        let pair = match self.peers[slot.pair().index()] {
            Some(ref p) => p.clone(),
            None => return,
        };

        log::trace!("introduce {} to {}", slot.pair(), slot);
        if let Err(e) = self.conn.transport().send_to(&pair, d.from).await {
            log::debug!("relay to {} failed: {}", d.from, e);
        }
    }
}

/// Run a rendezvous server on `listen_addr` until `cancel` fires.
///
/// Only returns with an error, [`Error::Cancelled`] after a clean shutdown.
pub async fn serve(cancel: &Cancel, listen_addr: &str, chain: &Builder) -> Result<()> {
    let mut s = Server::bind(listen_addr, chain).await?;
    log::debug!("rendezvous on {}", s.local_addr());

    let r = s.run(cancel).await;
    let closed = s.close();

    r.and(closed)
}
