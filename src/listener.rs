//! Background receive loop.
//!
//! The listener only reads from a transport, it never closes it. Shut it down by
//! cancelling its [`Cancel`] first and closing the transport second, then the receive
//! error caused by the close is swallowed instead of being reported as a failure.
//!
//! The loop task holds a reference to the transport, so a socket is only released
//! after [`Listener::join`] returned.

use crate::cancel::Cancel;
use crate::conn::Transport;
use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::task::JoinHandle;

/// largest datagram we read
pub const MAX_DATAGRAM: usize = 1500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub from: SocketAddr,
}

pub struct Listener {
    messages: Receiver<Datagram>,
    failure: Receiver<Error>,
    task: JoinHandle<()>,
}

impl Listener {
    pub fn spawn(transport: Arc<dyn Transport>, stop: Cancel) -> Self {
        let (tx, messages) = channel(16);
        let (err_tx, failure) = channel(1);

        let task = tokio::spawn(Self::read_loop(transport, stop, tx, err_tx));

        Self {
            messages,
            failure,
            task,
        }
    }

    /// wait for the loop to exit and drop its transport reference.
    ///
    /// The loop's stop signal must have been cancelled, or the transport closed.
    pub async fn join(self) {
        let Listener {
            messages,
            failure,
            task,
        } = self;
        // a loop blocked on a full queue gives up once nobody reads
        drop(messages);
        drop(failure);

        if let Err(e) = task.await {
            log::debug!("listener task failed: {}", e);
        }
    }

    async fn read_loop(
        transport: Arc<dyn Transport>,
        stop: Cancel,
        tx: Sender<Datagram>,
        err_tx: Sender<Error>,
    ) {
        let mut buf = [0u8; MAX_DATAGRAM];

        loop {
            let r = tokio::select! {
                _ = stop.cancelled() => return,
                r = transport.recv_from(&mut buf) => r,
            };

            // we must not report anything once stopped
            if stop.is_cancelled() {
                return;
            }

            match r {
                Ok((n, from)) => {
                    let d = Datagram {
                        payload: buf[..n].to_vec(),
                        from,
                    };
                    if tx.send(d).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    log::debug!("listener stopped: {}", e);
                    let _ = err_tx.send(e).await;
                    return;
                }
            }
        }
    }

    /// next datagram, or the receive error that ended the loop.
    ///
    /// Pending forever once the loop stopped quietly.
    pub async fn next(&mut self) -> Result<Datagram> {
        tokio::select! {
            biased;
            Some(d) = self.messages.recv() => Ok(d),
            Some(e) = self.failure.recv() => Err(e),
            else => std::future::pending().await,
        }
    }
}
