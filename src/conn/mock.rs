//! In-memory transport for tests.

use super::Transport;
use crate::cancel::Cancel;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    Mutex,
};
use tokio::time::Instant;

#[derive(Debug)]
pub(crate) struct Sent {
    pub payload: Vec<u8>,
    pub addr: SocketAddr,
    pub at: Instant,
}

/// test side of a [`MockTransport`]
pub(crate) struct Remote {
    pub inject: UnboundedSender<(Vec<u8>, SocketAddr)>,
    pub sent: UnboundedReceiver<Sent>,
}

impl Remote {
    pub fn inject(&self, payload: &[u8], from: SocketAddr) {
        let _ = self.inject.send((payload.to_vec(), from));
    }
}

pub(crate) struct MockTransport {
    inbound: Mutex<UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
    sent: UnboundedSender<Sent>,
    closed: Cancel,
    fail_sends: bool,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, Remote) {
        Self::build(false)
    }

    /// every send fails with an i/o error
    pub fn failing() -> (Arc<Self>, Remote) {
        Self::build(true)
    }

    fn build(fail_sends: bool) -> (Arc<Self>, Remote) {
        let (inject, inbound) = unbounded_channel();
        let (sent_tx, sent) = unbounded_channel();
        let t = Self {
            inbound: Mutex::new(inbound),
            sent: sent_tx,
            closed: Cancel::new(),
            fail_sends,
        };
        (Arc::new(t), Remote { inject, sent })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let mut inbound = self.inbound.lock().await;
        // queued datagrams are delivered before the close is noticed
        let (payload, from) = tokio::select! {
            biased;
            m = inbound.recv() => m.ok_or(Error::Closed)?,
            _ = self.closed.cancelled() => return Err(Error::Closed),
        };
        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        Ok((n, from))
    }

    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        if self.fail_sends {
            return Err(io::Error::new(io::ErrorKind::Other, "network unreachable").into());
        }
        if self.closed.is_cancelled() {
            return Err(Error::Closed);
        }
        let _ = self.sent.send(Sent {
            payload: buf.to_vec(),
            addr,
            at: Instant::now(),
        });
        Ok(buf.len())
    }

    fn close(&self) -> Result<()> {
        self.closed.cancel();
        Ok(())
    }
}
