use std::io;
use thiserror::Error;

/// Errors surfaced by transports, the rendezvous server and the punching client.
///
/// Forged or truncated datagrams and malformed protocol messages never show up here,
/// they are dropped by the layer that detects them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("transport: {0}")]
    Io(#[from] io::Error),

    #[error("transport closed")]
    Closed,

    #[error("signing: {0}")]
    Crypto(String),

    #[error("invalid slot {0:?}, expecting a-z")]
    InvalidSlot(char),

    #[error("can not resolve address {0:?}")]
    Resolve(String),

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
