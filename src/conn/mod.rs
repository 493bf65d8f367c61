//! Datagram transport and the middleware that wraps it.
//!
//! Server and client only talk to a [`Transport`]. A [`Builder`] stacks layers
//! (signing, logging) on top of the raw socket in the order they were added:
//!
//! ```no_run
//! use netpunch::conn::{logging, signing, Builder, LogSink};
//! use std::sync::Arc;
//!
//! // verified cleartext in the log
//! let chain = Builder::new()
//!     .with(signing("secret"))
//!     .with(logging(Arc::new(LogSink::new("[a] "))));
//!
//! // wire frames, signatures included, in the log
//! let raw = Builder::new()
//!     .with(logging(Arc::new(LogSink::new("[a] "))))
//!     .with(signing("secret"));
//! ```

mod logger;
#[cfg(test)]
pub(crate) mod mock;
mod sign;

pub use logger::{logging, LogSink, Sink};
pub use sign::{signing, BAD_SIGNATURE, TAG_WIDTH, TOO_SHORT};

use crate::error::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;

#[async_trait]
pub trait Transport: Send + Sync {
    /// receive one datagram, returns its length and sender
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;

    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize>;

    /// must unblock a pending `recv_from`
    fn close(&self) -> Result<()>;
}

pub type Middleware = Box<dyn Fn(Arc<dyn Transport>) -> Arc<dyn Transport> + Send + Sync>;

/// Ordered list of middleware, applied first to last.
#[derive(Default)]
pub struct Builder {
    layers: Vec<Middleware>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, mw: Middleware) -> Self {
        self.layers.push(mw);
        self
    }

    /// wrap `raw` with every layer, each one around the result of the previous.
    pub fn build(&self, raw: Arc<dyn Transport>) -> Connection {
        let transport = self.layers.iter().fold(raw, |t, mw| mw(t));
        Connection {
            transport,
            closed: false,
        }
    }
}

/// Owner of a layered transport, closes it exactly once.
pub struct Connection {
    transport: Arc<dyn Transport>,
    closed: bool,
}

impl Connection {
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.transport.close()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.transport.close();
        }
    }
}
