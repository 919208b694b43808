use crate::{
  constants::{TCP_PROTOCOL_DETECTION_BUFFER_SIZE, TCP_PROTOCOL_DETECTION_MAX_BUFFER_SIZE, TCP_PROTOCOL_DETECTION_TIMEOUT_MSEC},
  error::ProxyError,
  http::{extract_host_lossy, probe_http_host},
  tls::{looks_like_tls_handshake, probe_tls_client_hello},
  trace::*,
};
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Clone, Debug, PartialEq, Eq)]
/// Probe result
pub(crate) enum ProbeResult<T> {
  /// Success to probe protocol
  Success(T),
  /// Not enough buffer to probe
  PollNext,
  /// Failed to probe
  Failure,
}

/* ---------------------------------------------------------- */
#[derive(Debug, Clone, PartialEq, Eq)]
/// Verdict on the first bytes of a connection, with the hostname the client asked for
pub(crate) enum SniffResult {
  /// TLS ClientHello, with the SNI host_name if present
  Tls(Option<String>),
  /// Plaintext HTTP request, with the Host header if present
  Http(Option<String>),
  /// Neither TLS nor HTTP
  Unknown,
}

impl SniffResult {
  /// Hostname used for routing
  pub(crate) fn hostname(&self) -> Option<&str> {
    match self {
      Self::Tls(host) | Self::Http(host) => host.as_deref(),
      Self::Unknown => None,
    }
  }

  /// Whether the client is talking TLS, so that no plaintext response can be written back
  pub(crate) fn is_tls(&self) -> bool {
    matches!(self, Self::Tls(_))
  }
}

impl std::fmt::Display for SniffResult {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Tls(_) => write!(f, "tcp:TLS"),
      Self::Http(_) => write!(f, "tcp:HTTP"),
      Self::Unknown => write!(f, "tcp"),
    }
  }
}

/* ---------------------------------------------------------- */
/// Classify the bytes received so far. TLS is tried first, then HTTP.
pub(crate) fn sniff(buf: &[u8]) -> ProbeResult<SniffResult> {
  // At least a whole TLS record header before any verdict
  if buf.len() < 5 {
    return ProbeResult::PollNext;
  }

  match probe_tls_client_hello(buf) {
    ProbeResult::Success(host) => return ProbeResult::Success(SniffResult::Tls(host)),
    ProbeResult::PollNext => return ProbeResult::PollNext,
    ProbeResult::Failure => {}
  }

  match probe_http_host(buf) {
    ProbeResult::Success(host) => ProbeResult::Success(SniffResult::Http(host)),
    ProbeResult::PollNext => ProbeResult::PollNext,
    ProbeResult::Failure => {
      debug!("Neither TLS nor HTTP");
      ProbeResult::Success(SniffResult::Unknown)
    }
  }
}

/// Verdict from an incomplete buffer, when no more bytes are coming in time
pub(crate) fn finalize(buf: &[u8]) -> SniffResult {
  if looks_like_tls_handshake(buf) {
    return SniffResult::Tls(None);
  }
  match extract_host_lossy(buf) {
    Some(host) => SniffResult::Http(Some(host)),
    None => SniffResult::Unknown,
  }
}

impl SniffResult {
  /// Read the incoming stream into `buf` until a verdict is reached.
  /// The bytes are kept in `buf` to be replayed to the backend.
  pub(crate) async fn detect<S>(incoming_stream: &mut S, buf: &mut BytesMut) -> Result<Self, ProxyError>
  where
    S: AsyncRead + Unpin,
  {
    // The first read waits as long as the client needs
    buf.reserve(TCP_PROTOCOL_DETECTION_BUFFER_SIZE);
    if incoming_stream.read_buf(buf).await? == 0 {
      debug!("No data received");
      return Err(ProxyError::NoDataReceivedTcpStream);
    }

    loop {
      if let ProbeResult::Success(res) = sniff(buf) {
        return Ok(res);
      }
      if buf.len() >= TCP_PROTOCOL_DETECTION_MAX_BUFFER_SIZE {
        debug!("Sniff buffer is full ({} bytes)", buf.len());
        return Ok(finalize(buf));
      }

      buf.reserve(TCP_PROTOCOL_DETECTION_BUFFER_SIZE);
      let deadline = Duration::from_millis(TCP_PROTOCOL_DETECTION_TIMEOUT_MSEC);
      match tokio::time::timeout(deadline, incoming_stream.read_buf(buf)).await {
        Ok(Ok(0)) => {
          debug!("EOF before the protocol was determined");
          return Ok(finalize(buf));
        }
        Ok(Ok(_)) => continue,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
          debug!("No more bytes in {TCP_PROTOCOL_DETECTION_TIMEOUT_MSEC}ms");
          return Ok(finalize(buf));
        }
      }
    }
  }
}
