//! Wire messages.
//!
//! Every message starts with a one byte label. A peer announces itself to the rendezvous
//! server with a bare slot byte (`a`..`z`), so labels are picked outside that range.
//!
//! ```text
//! announce  : <slot>
//! peer info : '#' '|' <slot> '|' <ip:port>
//! ping      : '>'
//! pong      : '<'
//! close     : '.'
//! ```

use crate::error::{Error, Result};
use std::fmt;
use std::net::SocketAddr;

pub const LABEL_PEER_INFO: u8 = b'#';
pub const LABEL_PING: u8 = b'>';
pub const LABEL_PONG: u8 = b'<';
pub const LABEL_CLOSE: u8 = b'.';

/// never part of a rendered socket address
pub const SEPARATOR: u8 = b'|';

/// number of slots the server keeps track of
pub const SLOTS: usize = 26;

/// Peer position, `a`..`z`. Slots pair up as a-b, c-d, ... y-z.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(u8);

impl Slot {
    pub fn from_byte(b: u8) -> Option<Self> {
        b.is_ascii_lowercase().then(|| Slot(b - b'a'))
    }

    pub fn from_index(i: usize) -> Option<Self> {
        (i < SLOTS).then(|| Slot(i as u8))
    }

    /// zero based position
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn byte(self) -> u8 {
        b'a' + self.0
    }

    /// the slot this one is introduced to
    pub fn pair(self) -> Self {
        Slot(pair_index(self.index()) as u8)
    }
}

pub fn pair_index(i: usize) -> usize {
    i ^ 1
}

impl TryFrom<char> for Slot {
    type Error = Error;

    fn try_from(c: char) -> Result<Self> {
        u8::try_from(c)
            .ok()
            .and_then(Slot::from_byte)
            .ok_or(Error::InvalidSlot(c))
    }
}

impl std::str::FromStr for Slot {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Slot::try_from(c),
            (Some(c), Some(_)) => Err(Error::InvalidSlot(c)),
            (None, _) => Err(Error::InvalidSlot(' ')),
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.byte() as char)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Announce(Slot),
    PeerInfo { slot: Slot, addr: SocketAddr },
    Ping,
    Pong,
    Close,
}

impl Message {
    /// None for anything we do not understand, including rejected signatures.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let (&label, _) = buf.split_first()?;
        match label {
            LABEL_PEER_INFO => Self::parse_peer_info(buf),
            LABEL_PING => Some(Message::Ping),
            LABEL_PONG => Some(Message::Pong),
            LABEL_CLOSE => Some(Message::Close),
            b if buf.len() == 1 => Slot::from_byte(b).map(Message::Announce),
            _ => None,
        }
    }

    fn parse_peer_info(buf: &[u8]) -> Option<Self> {
        let fields: Vec<&[u8]> = buf.split(|b| *b == SEPARATOR).collect();
        let [_, slot, addr] = fields.as_slice() else {
            return None;
        };
        let slot = match slot {
            [b] => Slot::from_byte(*b)?,
            _ => return None,
        };
        let addr = std::str::from_utf8(addr).ok()?.parse().ok()?;

        Some(Message::PeerInfo { slot, addr })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Message::Announce(slot) => vec![slot.byte()],
            Message::PeerInfo { slot, addr } => {
                let mut b = vec![LABEL_PEER_INFO, SEPARATOR, slot.byte(), SEPARATOR];
                b.extend_from_slice(addr.to_string().as_bytes());
                b
            }
            Message::Ping => vec![LABEL_PING],
            Message::Pong => vec![LABEL_PONG],
            Message::Close => vec![LABEL_CLOSE],
        }
    }
}
