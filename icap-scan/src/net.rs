//! Connection seam and the retrying request/response exchange.
//!
//! [`Connector`] hides how a byte stream to the ICAP server is obtained;
//! [`TcpConnector`] is the plain TCP implementation used in production.
//! [`Transport`] runs one logical exchange over fresh connections:
//!
//! - write the whole request, then read until EOF, until the accumulated
//!   bytes contain `\r\n\r\n`, or until the peer resets/aborts the connection
//!   (a soft end that keeps what was read);
//! - retry up to [`RetryPolicy::max_attempts`] times, without delay, on
//!   connection-level errors and on empty responses;
//! - return the first non-empty response.
//!
//! The double-CRLF stop ends the read at the end of the ICAP head. A
//! `200 OK` RESPMOD answer whose chunked body arrives in a later segment is
//! therefore returned without that body; verdict extraction only needs the
//! head.

use crate::endpoint::Endpoint;
use crate::error::{IcapError, IcapResult};
use crate::response::RawIcapResponse;
use crate::{DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT, MAX_RESPONSE_BYTES};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

const READ_BUF_SIZE: usize = 8192;

/// Opens byte streams to an ICAP server.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    async fn connect(&self, host: &str, port: u16) -> io::Result<Self::Stream>;
}

/// Plain TCP, one new socket per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Retry and resource limits of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Connection attempts per exchange.
    pub max_attempts: usize,
    /// Bound on connect, on the whole write, and on each read.
    pub timeout: Duration,
    /// Largest response accepted before failing with
    /// [`IcapError::ResponseTooLarge`].
    pub max_response_bytes: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: DEFAULT_TIMEOUT,
            max_response_bytes: MAX_RESPONSE_BYTES,
        }
    }
}

/// Why a single attempt ended without a response.
#[derive(Debug)]
enum AttemptError {
    /// Worth another attempt.
    Connection(io::Error),
    /// Not retried.
    TooLarge,
}

/// Sends encoded requests with the configured [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct Transport<C = TcpConnector> {
    connector: C,
    policy: RetryPolicy,
}

impl<C: Connector> Transport<C> {
    pub fn new(connector: C, policy: RetryPolicy) -> Self {
        Self { connector, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Run one exchange. The same `request` buffer is written on every attempt.
    pub async fn send(&self, endpoint: &Endpoint, request: &[u8]) -> IcapResult<RawIcapResponse> {
        let mut last_err: Option<io::Error> = None;

        for attempt in 1..=self.policy.max_attempts {
            match self.attempt(endpoint, request).await {
                Ok(response) if !response.is_empty() => {
                    debug!(
                        "send: {} answered with {} bytes on attempt {}",
                        endpoint,
                        response.len(),
                        attempt
                    );
                    return Ok(RawIcapResponse::new(response));
                }
                Ok(_) => {
                    debug!("send: attempt {} to {} got an empty response", attempt, endpoint);
                }
                Err(AttemptError::Connection(e)) => {
                    warn!("send: attempt {} to {} failed: {}", attempt, endpoint, e);
                    last_err = Some(e);
                }
                Err(AttemptError::TooLarge) => {
                    return Err(IcapError::ResponseTooLarge {
                        limit: self.policy.max_response_bytes,
                    });
                }
            }
        }

        match last_err {
            Some(source) => Err(IcapError::ConnectionFailure {
                attempts: self.policy.max_attempts,
                source,
            }),
            None => Err(IcapError::EmptyResponse),
        }
    }

    async fn attempt(&self, endpoint: &Endpoint, request: &[u8]) -> Result<Vec<u8>, AttemptError> {
        let limit = self.policy.timeout;

        let mut stream = bounded(
            limit,
            "connect",
            self.connector.connect(endpoint.connect_host(), endpoint.port()),
        )
        .await
        .map_err(AttemptError::Connection)?;

        bounded(limit, "write", async {
            stream.write_all(request).await?;
            stream.flush().await
        })
        .await
        .map_err(AttemptError::Connection)?;
        trace!("attempt: wrote {} bytes", request.len());

        let mut response = Vec::new();
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            let n = match bounded(limit, "read", stream.read(&mut buf)).await {
                Ok(n) => n,
                Err(e) if is_soft_end(&e) => {
                    debug!("attempt: peer ended the connection: {}", e);
                    break;
                }
                Err(e) => return Err(AttemptError::Connection(e)),
            };
            if n == 0 {
                break;
            }
            response.extend_from_slice(&buf[..n]);
            trace!("attempt: read {} bytes, total={}", n, response.len());

            if response.len() > self.policy.max_response_bytes {
                return Err(AttemptError::TooLarge);
            }
            if find_double_crlf(&response).is_some() {
                break;
            }
        }
        Ok(response)
    }
}

/// Position right after the first `\r\n\r\n`.
#[inline]
pub(crate) fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    memchr::memmem::find(buf, b"\r\n\r\n").map(|i| i + 4)
}

fn is_soft_end(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{what} timed out after {limit:?}"),
        )),
    }
}
