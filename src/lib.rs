//!UDP hole punching through a rendezvous server.
//!
//!Two peers behind NAT can talk directly once each one has sent a packet to the other's
//!public address, so the NAT on both sides holds a mapping for the pair. The trouble is
//!learning that address: a private host does not know how its gateway rewrites it.
//!
//!## How netpunch works
//!Setup a public accessable server as rendezvous point. Every peer takes a slot `a`..`z`,
//!slots pair up as a-b, c-d, ... y-z.
//!
//!A peer keeps announcing its slot to the server. The server remembers the address each
//!announce came from, and answers with the address of the paired slot once it knows it.
//!
//!With the peer address at hand, the peer pings it, the other side answers with pong, and
//!the one that got pong sends close. Every step is retried on a timer, so losing packets
//!only slows things down, and either side can go first.
//!
//!After that, you get the local and remote address back. Close the punching socket and
//!reuse the same local port for real traffic.
//!
//!Messages are signed with a shared secret (HMAC-SHA256). Forged or truncated datagrams are
//!ignored, they never end a handshake.
//!
//!## Feature flags
//!The crate include both client and server code by default.
//!
//!```toml
//!netpunch = { version = "0.2", default-features=false, features=["client"]}
//!```
//!
//!- `client`: [`punch`]
//!- `server`: rendezvous [`serve`]

mod cancel;
pub mod conn;
mod error;
pub mod listener;
pub mod proto;
pub mod udp;

pub use cancel::Cancel;
pub use conn::{logging, signing, Builder, Transport};
pub use error::{Error, Result};

#[cfg(feature = "client")]
pub use udp::punch;
#[cfg(feature = "server")]
pub use udp::serve;
