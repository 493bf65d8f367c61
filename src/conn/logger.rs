use super::{Middleware, Transport};
use crate::error::Result;
use async_trait::async_trait;
use log::Level;
use std::net::SocketAddr;
use std::sync::Arc;

/// Where the logging layer writes its lines.
pub trait Sink: Send + Sync {
    fn print(&self, level: Level, line: &str);
}

/// Forwards lines to the `log` facade.
pub struct LogSink {
    prefix: String,
}

impl LogSink {
    pub fn new<A: AsRef<str>>(prefix: A) -> Self {
        Self {
            prefix: prefix.as_ref().to_string(),
        }
    }
}

impl Sink for LogSink {
    fn print(&self, level: Level, line: &str) {
        log::log!(level, "{}{}", self.prefix, line);
    }
}

struct Logging {
    next: Arc<dyn Transport>,
    sink: Arc<dyn Sink>,
}

/// Log every read, write and close of the wrapped transport.
pub fn logging(sink: Arc<dyn Sink>) -> Middleware {
    Box::new(move |next: Arc<dyn Transport>| -> Arc<dyn Transport> {
        Arc::new(Logging {
            next,
            sink: sink.clone(),
        })
    })
}

impl Logging {
    fn info(&self, area: &str, msg: &str) {
        self.sink.print(Level::Info, &format!("[info] {}: {}", area, msg));
    }

    fn err(&self, area: &str, err: &dyn std::fmt::Display) {
        self.sink.print(Level::Error, &format!("[error] {}: {}", area, err));
    }
}

#[async_trait]
impl Transport for Logging {
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        match self.next.recv_from(buf).await {
            Ok((n, addr)) => {
                self.info("read", &format!("\"{}\" <- {}", buf[..n].escape_ascii(), addr));
                Ok((n, addr))
            }
            Err(e) => {
                self.err("read", &e);
                Err(e)
            }
        }
    }

    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        match self.next.send_to(buf, addr).await {
            Ok(n) => {
                let n = n.min(buf.len());
                self.info("write", &format!("\"{}\" -> {}", buf[..n].escape_ascii(), addr));
                Ok(n)
            }
            Err(e) => {
                self.err("write", &e);
                Err(e)
            }
        }
    }

    fn close(&self) -> Result<()> {
        match self.next.close() {
            Ok(()) => {
                self.info("close", "ok");
                Ok(())
            }
            Err(e) => {
                self.err("close", &e);
                Err(e)
            }
        }
    }
}
