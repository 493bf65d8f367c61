use super::{resolve, UdpTransport};
use crate::cancel::Cancel;
use crate::conn::{Builder, Transport};
use crate::error::{Error, Result};
use crate::listener::{Datagram, Listener};
use crate::proto::{Message, Slot, LABEL_CLOSE, LABEL_PING, LABEL_PONG};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// announce our slot to the server until it tells us where the peer is
    Discovering,
    Pinging,
    Ponging,
    /// peer answered our ping, tell it we are done
    Closing,
    /// back off before announcing again
    Sleeping,
}

/// What a mode sends on every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outgoing {
    /// our slot byte, to the server
    Announce,
    /// a label, to the peer
    Peer(u8),
    Nothing,
}

/// Retry policy of a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub retries: u32,
    pub delay: Duration,
    pub send: Outgoing,
    /// mode to switch to once retries run out, `None` finishes the handshake
    pub exhausted: Option<Mode>,
}

const POLICIES: [Policy; 5] = [
    // Discovering
    Policy {
        retries: 5,
        delay: Duration::from_millis(100),
        send: Outgoing::Announce,
        exhausted: Some(Mode::Sleeping),
    },
    // Pinging
    Policy {
        retries: 10,
        delay: Duration::from_millis(100),
        send: Outgoing::Peer(LABEL_PING),
        exhausted: Some(Mode::Sleeping),
    },
    // Ponging
    Policy {
        retries: 10,
        delay: Duration::from_millis(100),
        send: Outgoing::Peer(LABEL_PONG),
        exhausted: Some(Mode::Sleeping),
    },
    // Closing
    Policy {
        retries: 5,
        delay: Duration::from_millis(20),
        send: Outgoing::Peer(LABEL_CLOSE),
        exhausted: None,
    },
    // Sleeping
    Policy {
        retries: 1,
        delay: Duration::from_secs(30),
        send: Outgoing::Nothing,
        exhausted: Some(Mode::Discovering),
    },
];

impl Mode {
    pub fn policy(self) -> Policy {
        POLICIES[self as usize]
    }
}

/// Client side of the punch.
///
/// Either side may start: whoever learns the peer address first pings, the other
/// answers with pong, and the one receiving pong sends close. Lost packets are covered
/// by retries alone, every transition can be reached by a timeout or by a message.
pub struct Handshake {
    transport: Arc<dyn Transport>,
    slot: Slot,
    server: SocketAddr,
    mode: Mode,
    peer: Option<SocketAddr>,
    attempts: u32,
}

impl Handshake {
    pub fn new(transport: Arc<dyn Transport>, slot: Slot, server: SocketAddr) -> Self {
        Self {
            transport,
            slot,
            server,
            mode: Mode::Discovering,
            peer: None,
            attempts: 0,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// run until the peer is reached, returns its address.
    ///
    /// The transport is left open, closing it is up to the caller.
    pub async fn run(&mut self, cancel: &Cancel) -> Result<SocketAddr> {
        let stop = Cancel::new();
        let mut listener = Listener::spawn(self.transport.clone(), stop.clone());

        let r = self.drive(cancel, &mut listener).await;

        stop.cancel();
        listener.join().await;
        r
    }

    async fn drive(&mut self, cancel: &Cancel, listener: &mut Listener) -> Result<SocketAddr> {
        loop {
            let policy = self.mode.policy();

            if let Some((msg, addr)) = self.outgoing(policy.send) {
                self.transport.send_to(&msg, addr).await?;
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep(policy.delay) => {
                    if let Some(peer) = self.on_timeout() {
                        return Ok(peer);
                    }
                }
                r = listener.next() => {
                    if let Some(peer) = self.on_message(r?) {
                        return Ok(peer);
                    }
                }
            }
        }
    }

    fn outgoing(&self, send: Outgoing) -> Option<(Vec<u8>, SocketAddr)> {
        match send {
            Outgoing::Announce => Some((Message::Announce(self.slot).to_bytes(), self.server)),
            Outgoing::Peer(label) => self.peer.map(|addr| (vec![label], addr)),
            Outgoing::Nothing => None,
        }
    }

    fn on_timeout(&mut self) -> Option<SocketAddr> {
        self.attempts += 1;

        let policy = self.mode.policy();
        if self.attempts < policy.retries {
            return None;
        }

        match (policy.exhausted, self.peer) {
            (Some(next), _) => self.switch(next),
            (None, Some(peer)) => return Some(peer),
            (None, None) => self.switch(Mode::Discovering),
        }
        None
    }

    fn on_message(&mut self, d: Datagram) -> Option<SocketAddr> {
        self.attempts = 0;

        match Message::parse(&d.payload) {
            Some(Message::PeerInfo { slot, addr }) if slot == self.slot.pair() => {
                log::debug!("[{}] peer {} at {}", self.slot, slot, addr);
                self.peer = Some(addr);
                self.switch(Mode::Pinging);
            }
            Some(Message::Ping) => {
                self.peer = Some(d.from);
                self.switch(Mode::Ponging);
            }
            Some(Message::Pong) => {
                self.peer = Some(d.from);
                self.switch(Mode::Closing);
            }
            Some(Message::Close) => return Some(*self.peer.get_or_insert(d.from)),
            _ => {
                log::trace!(
                    "[{}] ignored \"{}\" from {}",
                    self.slot,
                    d.payload.escape_ascii(),
                    d.from
                );
            }
        }
        None
    }

    fn switch(&mut self, mode: Mode) {
        if mode != self.mode {
            log::debug!("[{}] {:?} -> {:?}", self.slot, self.mode, mode);
        }
        self.mode = mode;
        self.attempts = 0;
    }
}

/// Punch a hole to the peer paired with `slot`, introduced by the rendezvous server.
///
/// Returns the local address and the peer address. The socket is closed on return,
/// reuse its port for the real traffic.
///
/// # example
/// ```no_run
/// use netpunch::{punch, signing, Builder, Cancel};
///
/// # async fn run() -> netpunch::Result<()> {
/// let chain = Builder::new().with(signing("secret"));
/// let (local, peer) = punch(&Cancel::new(), 'a', ":1194", "rndz.example:7777", &chain).await?;
/// println!("{} -> {}", local, peer);
/// # Ok(())
/// # }
/// ```
pub async fn punch(
    cancel: &Cancel,
    slot: char,
    local_addr: &str,
    server_addr: &str,
    chain: &Builder,
) -> Result<(SocketAddr, SocketAddr)> {
    let slot = Slot::try_from(slot)?;
    let local_addr = resolve(local_addr).await?;
    let server_addr = resolve(server_addr).await?;

    let raw = UdpTransport::bind(local_addr).await?;
    let local_addr = raw.local_addr()?;
    let conn = chain.build(Arc::new(raw));

    log::debug!("[{}] punching from {} via {}", slot, local_addr, server_addr);

    let r = Handshake::new(conn.transport(), slot, server_addr)
        .run(cancel)
        .await;
    let closed = conn.close();

    let peer = r?;
    closed?;
    Ok((local_addr, peer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::mock::{MockTransport, Remote, Sent};
    use tokio::task::JoinHandle;
    use tokio::time::{timeout, Instant};

    fn server() -> SocketAddr {
        "192.0.2.1:10000".parse().unwrap()
    }

    fn peer() -> SocketAddr {
        "198.51.100.2:10002".parse().unwrap()
    }

    fn start(slot: char) -> (JoinHandle<Result<SocketAddr>>, Remote, Cancel) {
        let (mock, remote) = MockTransport::new();
        let cancel = Cancel::new();
        let h = {
            let cancel = cancel.clone();
            let slot = Slot::try_from(slot).unwrap();
            tokio::spawn(async move {
                let mut h = Handshake::new(mock, slot, server());
                h.run(&cancel).await
            })
        };
        (h, remote, cancel)
    }

    async fn next_sent(remote: &mut Remote) -> Sent {
        remote.sent.recv().await.unwrap()
    }

    #[test]
    fn test_policy_table() {
        let d = Mode::Discovering.policy();
        assert_eq!((d.retries, d.delay), (5, Duration::from_millis(100)));
        assert_eq!(d.send, Outgoing::Announce);

        let p = Mode::Pinging.policy();
        assert_eq!((p.retries, p.delay), (10, Duration::from_millis(100)));
        assert_eq!(p.send, Outgoing::Peer(LABEL_PING));

        let p = Mode::Ponging.policy();
        assert_eq!((p.retries, p.delay), (10, Duration::from_millis(100)));
        assert_eq!(p.send, Outgoing::Peer(LABEL_PONG));

        let c = Mode::Closing.policy();
        assert_eq!((c.retries, c.delay), (5, Duration::from_millis(20)));
        assert_eq!(c.send, Outgoing::Peer(LABEL_CLOSE));
        assert_eq!(c.exhausted, None);

        let s = Mode::Sleeping.policy();
        assert_eq!((s.retries, s.delay), (1, Duration::from_secs(30)));
        assert_eq!(s.send, Outgoing::Nothing);
        assert_eq!(s.exhausted, Some(Mode::Discovering));

        for m in [Mode::Discovering, Mode::Pinging, Mode::Ponging] {
            assert_eq!(m.policy().exhausted, Some(Mode::Sleeping));
        }
    }

    #[tokio::test]
    async fn test_transitions() {
        let (mock, _remote) = MockTransport::new();
        let mut h = Handshake::new(mock, Slot::try_from('a').unwrap(), server());
        let dgram = |payload: &[u8], from| Datagram {
            payload: payload.to_vec(),
            from,
        };

        // info about someone else is not ours
        assert_eq!(h.on_message(dgram(b"#|c|10.0.0.3:1", server())), None);
        assert_eq!(h.mode(), Mode::Discovering);

        h.on_message(dgram(b"#|b|10.0.0.2:1", server()));
        assert_eq!(h.mode(), Mode::Pinging);
        assert_eq!(h.peer(), Some("10.0.0.2:1".parse().unwrap()));

        h.on_message(dgram(b">", peer()));
        assert_eq!(h.mode(), Mode::Ponging);
        assert_eq!(h.peer(), Some(peer()));

        // noise resets the counter and nothing else
        h.on_timeout();
        h.on_timeout();
        let noise: [&[u8]; 5] = [b"", b"~forged", b"~short", b"#|b|garbage", b"zz"];
        for noise in noise {
            assert_eq!(h.on_message(dgram(noise, peer())), None);
        }
        assert_eq!(h.mode(), Mode::Ponging);
        assert_eq!(h.attempts, 0);

        h.on_message(dgram(b"<", peer()));
        assert_eq!(h.mode(), Mode::Closing);

        for _ in 0..4 {
            assert_eq!(h.on_timeout(), None);
        }
        assert_eq!(h.on_timeout(), Some(peer()));
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let (mock, _remote) = MockTransport::new();
        let mut h = Handshake::new(mock, Slot::try_from('a').unwrap(), server());

        for _ in 0..5 {
            assert_eq!(h.mode(), Mode::Discovering);
            h.on_timeout();
        }
        assert_eq!(h.mode(), Mode::Sleeping);
        h.on_timeout();
        assert_eq!(h.mode(), Mode::Discovering);

        h.on_message(Datagram {
            payload: b">".to_vec(),
            from: peer(),
        });
        for _ in 0..10 {
            assert_eq!(h.mode(), Mode::Ponging);
            h.on_timeout();
        }
        assert_eq!(h.mode(), Mode::Sleeping);
        // the peer is kept while backing off
        assert_eq!(h.peer(), Some(peer()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_and_rediscover() {
        let (h, mut remote, cancel) = start('a');

        let mut sent = vec![];
        for _ in 0..6 {
            sent.push(next_sent(&mut remote).await);
        }

        for s in &sent {
            assert_eq!(s.payload, b"a");
            assert_eq!(s.addr, server());
        }
        for w in sent[..5].windows(2) {
            let gap = w[1].at - w[0].at;
            assert!(gap >= Duration::from_millis(100) && gap < Duration::from_millis(110));
        }
        // fifth timeout puts us to sleep, the sixth announce comes after it
        let pause = sent[5].at - sent[4].at;
        assert!(pause >= Duration::from_millis(30_100) && pause < Duration::from_millis(30_200));

        cancel.cancel();
        assert!(matches!(h.await.unwrap(), Err(Error::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_returns_immediately() {
        let (h, mut remote, _cancel) = start('b');

        let announce = next_sent(&mut remote).await;
        assert_eq!(announce.payload, b"b");

        remote.inject(b"<", peer());
        let close = next_sent(&mut remote).await;
        assert_eq!(close.payload, b".");
        assert_eq!(close.addr, peer());

        let started = Instant::now();
        remote.inject(b".", peer());
        let r = timeout(Duration::from_secs(1), h).await.unwrap().unwrap();
        assert_eq!(r.unwrap(), peer());
        assert!(Instant::now() - started < Duration::from_millis(20));

        // only the one close went out
        assert!(remote.sent.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closing_runs_out() {
        let (h, mut remote, _cancel) = start('b');
        next_sent(&mut remote).await;

        remote.inject(b"<", peer());
        let r = timeout(Duration::from_secs(1), h).await.unwrap().unwrap();
        assert_eq!(r.unwrap(), peer());

        let mut closes = 0;
        while let Ok(s) = remote.sent.try_recv() {
            assert_eq!(s.payload, b".");
            closes += 1;
        }
        assert_eq!(closes, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_info_then_ping() {
        let (h, mut remote, cancel) = start('a');
        next_sent(&mut remote).await;

        remote.inject(format!("#|b|{}", peer()).as_bytes(), server());
        let ping = next_sent(&mut remote).await;
        assert_eq!(ping.payload, b">");
        assert_eq!(ping.addr, peer());

        // peer pings from a different port than the server saw
        let other: SocketAddr = "198.51.100.2:20002".parse().unwrap();
        remote.inject(b">", other);
        let pong = next_sent(&mut remote).await;
        assert_eq!(pong.payload, b"<");
        assert_eq!(pong.addr, other);

        cancel.cancel();
        assert!(matches!(h.await.unwrap(), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_send_failure() {
        let (mock, _remote) = MockTransport::failing();
        let mut h = Handshake::new(mock, Slot::try_from('a').unwrap(), server());

        let r = timeout(Duration::from_secs(1), h.run(&Cancel::new()))
            .await
            .unwrap();
        assert!(matches!(r, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_receive_failure() {
        let (mock, remote) = MockTransport::new();
        let mut h = Handshake::new(mock, Slot::try_from('a').unwrap(), server());

        // the listener sees its source gone without being stopped
        drop(remote);
        let r = timeout(Duration::from_secs(1), h.run(&Cancel::new()))
            .await
            .unwrap();
        assert!(matches!(r, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_invalid_slot() {
        let r = punch(
            &Cancel::new(),
            'A',
            "127.0.0.1:0",
            "127.0.0.1:9",
            &Builder::new(),
        )
        .await;
        assert!(matches!(r, Err(Error::InvalidSlot('A'))));
    }
}
