//! Prompt-driven vty session over any byte stream.

use std::time::Duration;

use async_trait::async_trait;
use l3gw_common::{L3Error, L3Result};
use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::telnet::TelnetDecoder;

/// Service name reported in contact errors.
pub const SERVICE: &str = "zebra";

/// Most text buffered while waiting for one prompt.
pub const MAX_BUFFERED: usize = 1024 * 1024;

/// Transport a vty session runs on.
pub trait VtyStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> VtyStream for T {}

/// Opens transports to the daemon.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> L3Result<Box<dyn VtyStream>>;

    /// Human readable endpoint for logs.
    fn endpoint(&self) -> String;
}

/// Connects to the daemon's vty port over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> L3Result<Box<dyn VtyStream>> {
        match tokio::time::timeout(
            self.timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            Ok(Err(e)) => Err(L3Error::service_contact(
                SERVICE,
                format!("connect to {} failed: {}", self.endpoint(), e),
            )),
            Err(_) => Err(L3Error::service_contact(
                SERVICE,
                format!("connect to {} timed out", self.endpoint()),
            )),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Connector built from a closure, for in-process transports.
pub struct FnConnector<F> {
    open: F,
}

impl<F> FnConnector<F>
where
    F: Fn() -> L3Result<Box<dyn VtyStream>> + Send + Sync,
{
    pub fn new(open: F) -> Self {
        Self { open }
    }
}

#[async_trait]
impl<F> Connector for FnConnector<F>
where
    F: Fn() -> L3Result<Box<dyn VtyStream>> + Send + Sync,
{
    async fn connect(&self) -> L3Result<Box<dyn VtyStream>> {
        (self.open)()
    }

    fn endpoint(&self) -> String {
        "in-process".to_string()
    }
}

/// An open vty connection.
///
/// Each wait for a prompt is bounded by `timeout` as a whole, and by
/// [`MAX_BUFFERED`]; a stalled or babbling daemon surfaces as a contact
/// error instead of hanging the caller.
pub struct VtySession {
    stream: Box<dyn VtyStream>,
    decoder: TelnetDecoder,
    buffer: String,
    timeout: Duration,
}

impl VtySession {
    pub fn new(stream: Box<dyn VtyStream>, timeout: Duration) -> Self {
        Self {
            stream,
            decoder: TelnetDecoder::new(),
            buffer: String::new(),
            timeout,
        }
    }

    /// Reads until `pattern` matches the buffered text and returns
    /// everything up to the end of the match.
    pub async fn read_until(&mut self, pattern: &Regex) -> L3Result<String> {
        let deadline = Instant::now() + self.timeout;
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(m) = pattern.find(&self.buffer) {
                let end = m.end();
                let text: String = self.buffer.drain(..end).collect();
                trace!(text = %text, "vty read");
                return Ok(text);
            }

            if self.buffer.len() > MAX_BUFFERED {
                let buffered = self.buffer.len();
                self.buffer.clear();
                return Err(L3Error::service_contact(
                    SERVICE,
                    format!("{} bytes without '{}'", buffered, pattern),
                ));
            }

            let n = match tokio::time::timeout_at(deadline, self.stream.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    return Err(L3Error::service_contact(
                        SERVICE,
                        format!("connection closed while waiting for '{}'", pattern),
                    ))
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    return Err(L3Error::service_contact(SERVICE, format!("read failed: {}", e)))
                }
                Err(_) => {
                    return Err(L3Error::service_contact(
                        SERVICE,
                        format!(
                            "timed out after {:?} waiting for '{}', got {:?}",
                            self.timeout, pattern, self.buffer
                        ),
                    ))
                }
            };

            let decoded = self.decoder.feed(&chunk[..n]);
            if !decoded.replies.is_empty() {
                debug!(bytes = decoded.replies.len(), "Refusing telnet options");
                self.write_raw(&decoded.replies).await?;
            }
            self.buffer.push_str(&String::from_utf8_lossy(&decoded.data));
        }
    }

    /// Sends one line.
    pub async fn write_line(&mut self, line: &str) -> L3Result<()> {
        self.write_raw(format!("{}\n", line).as_bytes()).await
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> L3Result<()> {
        let write = async {
            self.stream.write_all(bytes).await?;
            self.stream.flush().await
        };
        match tokio::time::timeout(self.timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(L3Error::service_contact(SERVICE, format!("write failed: {}", e))),
            Err(_) => Err(L3Error::service_contact(SERVICE, "write timed out")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telnet::{DONT, IAC, WILL};

    #[tokio::test]
    async fn test_read_until_strips_options_and_replies() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut session = VtySession::new(Box::new(client), Duration::from_secs(1));

        server.write_all(&[IAC, WILL, 1]).await.unwrap();
        server.write_all(b"banner\r\nPassword: ").await.unwrap();

        let re = Regex::new(r"Password:\s*\z").unwrap();
        let text = session.read_until(&re).await.unwrap();
        assert_eq!(text, "banner\r\nPassword: ");

        let mut reply = [0u8; 3];
        server.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [IAC, DONT, 1]);
    }

    #[tokio::test]
    async fn test_read_until_times_out() {
        let (client, _server) = tokio::io::duplex(1024);
        let mut session = VtySession::new(Box::new(client), Duration::from_millis(50));

        let err = session
            .read_until(&Regex::new("never").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, L3Error::ServiceContact { .. }));
    }

    #[tokio::test]
    async fn test_trickling_daemon_hits_deadline() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut session = VtySession::new(Box::new(client), Duration::from_millis(300));
        let feeder = tokio::spawn(async move {
            loop {
                if server.write_all(b".").await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });

        let result = tokio::time::timeout(
            Duration::from_secs(3),
            session.read_until(&Regex::new("never").unwrap()),
        )
        .await
        .expect("read_until ignored its deadline");
        assert!(matches!(result, Err(L3Error::ServiceContact { .. })));
        feeder.abort();
    }

    #[tokio::test]
    async fn test_oversized_output_rejected() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let mut session = VtySession::new(Box::new(client), Duration::from_secs(10));
        let feeder = tokio::spawn(async move {
            let block = vec![b'x'; 64 * 1024];
            for _ in 0..(MAX_BUFFERED / block.len() + 2) {
                if server.write_all(&block).await.is_err() {
                    break;
                }
            }
            server
        });

        let err = session
            .read_until(&Regex::new("never").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, L3Error::ServiceContact { .. }));
        feeder.abort();
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let (client, server) = tokio::io::duplex(1024);
        drop(server);
        let mut session = VtySession::new(Box::new(client), Duration::from_secs(1));
        assert!(session
            .read_until(&Regex::new("x").unwrap())
            .await
            .is_err());
    }
}
