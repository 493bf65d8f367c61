//! Message authentication.
//!
//! Every datagram goes on the wire as `<tag> <payload>`, where the tag is the Ascii85
//! armored HMAC-SHA256 of the payload keyed by the shared secret.
//!
//! Frames that are too short or carry a wrong tag are not errors: the receiver gets a
//! sentinel payload that no protocol message starts with, and drops it as noise.

use super::{Middleware, Transport};
use crate::error::{Error, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::digest::{typenum::Unsigned, OutputSizeUser};
use sha2::Sha256;
use std::net::SocketAddr;
use std::sync::Arc;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// substituted for frames shorter than a tag, a separator and one payload byte
pub const TOO_SHORT: &[u8] = b"~short";
/// substituted for frames whose tag does not verify
pub const BAD_SIGNATURE: &[u8] = b"~forged";

/// armored tag length in bytes
pub const TAG_WIDTH: usize = armored_len(<<Sha256 as OutputSizeUser>::OutputSize as Unsigned>::USIZE);

const SEPARATOR: u8 = b' ';

const fn armored_len(raw: usize) -> usize {
    (raw + 3) / 4 * 5
}

/// Ascii85 without the `z` shorthand, so the output width only depends on the input length.
fn armor(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(armored_len(raw.len()));
    for chunk in raw.chunks(4) {
        let mut group = [0u8; 4];
        group[..chunk.len()].copy_from_slice(chunk);
        let mut v = u32::from_be_bytes(group);

        let mut enc = [0u8; 5];
        for c in enc.iter_mut().rev() {
            *c = b'!' + (v % 85) as u8;
            v /= 85;
        }
        out.extend_from_slice(&enc[..chunk.len() + 1]);
    }
    out
}

struct Signing {
    next: Arc<dyn Transport>,
    secret: Vec<u8>,
}

pub fn signing<S: AsRef<[u8]>>(secret: S) -> Middleware {
    let secret = secret.as_ref().to_vec();
    Box::new(move |next: Arc<dyn Transport>| -> Arc<dyn Transport> {
        Arc::new(Signing {
            next,
            secret: secret.clone(),
        })
    })
}

impl Signing {
    fn tag(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|e| Error::Crypto(e.to_string()))?;
        mac.update(payload);
        let tag = armor(&mac.finalize().into_bytes());

        if tag.len() != TAG_WIDTH {
            return Err(Error::Crypto(format!(
                "armored tag is {} bytes, expecting {}",
                tag.len(),
                TAG_WIDTH
            )));
        }
        Ok(tag)
    }

    /// verified payload, or the sentinel to deliver instead
    fn verify<'a>(&self, frame: &'a [u8]) -> Result<&'a [u8]> {
        if frame.len() < TAG_WIDTH + 2 {
            return Ok(TOO_SHORT);
        }

        let (tag, rest) = frame.split_at(TAG_WIDTH);
        let payload = &rest[1..];
        let expected = self.tag(payload)?;

        let ok = expected.ct_eq(tag) & rest[0].ct_eq(&SEPARATOR);
        if bool::from(ok) {
            Ok(payload)
        } else {
            Ok(BAD_SIGNATURE)
        }
    }
}

#[async_trait]
impl Transport for Signing {
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let mut frame = vec![0u8; buf.len() + TAG_WIDTH + 1];
        let (n, addr) = self.next.recv_from(&mut frame).await?;

        let payload = self.verify(&frame[..n])?;
        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);

        Ok((n, addr))
    }

    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        let mut frame = self.tag(buf)?;
        frame.push(SEPARATOR);
        frame.extend_from_slice(buf);

        let n = self.next.send_to(&frame, addr).await?;
        Ok(n.saturating_sub(TAG_WIDTH + 1))
    }

    fn close(&self) -> Result<()> {
        self.next.close()
    }
}
