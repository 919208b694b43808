use crate::{probe::ProbeResult, trace::*};

/// Find the end of the request head, `\r\n\r\n` (or bare `\n\n`)
fn head_complete(text: &str) -> bool {
  text.contains("\r\n\r\n") || text.contains("\n\n")
}

/// Strip the port suffix from a Host header value, keeping bracketed IPv6 literals intact
fn strip_port(value: &str) -> &str {
  let value = value.trim();
  if let Some(rest) = value.strip_prefix('[') {
    return rest.split(']').next().unwrap_or_default();
  }
  value.split(':').next().unwrap_or_default().trim()
}

/// Search complete lines for a `Host:` header, case-insensitively
fn find_host_header(text: &str) -> Option<String> {
  // The last element is either empty or an unterminated line
  let mut lines = text.split('\n').collect::<Vec<_>>();
  lines.pop();
  lines.into_iter().skip(1).find_map(|line| {
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("host") {
      return None;
    }
    let host = strip_port(value.trim_end_matches('\r'));
    (!host.is_empty()).then(|| host.to_string())
  })
}

/// Check if the buffer is a plaintext HTTP request head and extract the hostname of its Host header.
///
/// - `Success(Some(host))`: Host header found, port suffix stripped
/// - `Success(None)`: complete request head without Host header
/// - `PollNext`: request line or headers are not complete yet
/// - `Failure`: the first line is not an HTTP request line
pub(crate) fn probe_http_host(buf: &[u8]) -> ProbeResult<Option<String>> {
  let text = String::from_utf8_lossy(buf);

  if let Some(first_line_end) = text.find('\n') {
    if !text[..first_line_end].contains(" HTTP/") {
      return ProbeResult::Failure;
    }
  } else {
    return ProbeResult::PollNext;
  }

  if let Some(host) = find_host_header(&text) {
    debug!("HTTP request with Host: {host}");
    return ProbeResult::Success(Some(host));
  }
  if head_complete(&text) {
    debug!("HTTP request without Host header");
    return ProbeResult::Success(None);
  }
  ProbeResult::PollNext
}

/// Extract a hostname from whatever was received, for the final verdict on a truncated stream
pub(crate) fn extract_host_lossy(buf: &[u8]) -> Option<String> {
  let text = String::from_utf8_lossy(buf);
  let mut terminated = text.to_string();
  terminated.push('\n');
  find_host_header(&terminated)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_host_with_port() {
    let buf = b"GET / HTTP/1.1\r\nHost: bar.multipass:8080\r\nAccept: */*\r\n\r\n";
    assert_eq!(probe_http_host(buf), ProbeResult::Success(Some("bar.multipass".to_string())));
  }

  #[test]
  fn test_host_case_insensitive() {
    let buf = b"POST /api HTTP/1.1\r\nuser-agent: curl\r\nHOST:   dev.multipass  \r\n";
    assert_eq!(probe_http_host(buf), ProbeResult::Success(Some("dev.multipass".to_string())));
  }

  #[test]
  fn test_host_ipv6_literal() {
    let buf = b"GET / HTTP/1.1\r\nHost: [::1]:8080\r\n\r\n";
    assert_eq!(probe_http_host(buf), ProbeResult::Success(Some("::1".to_string())));
  }

  #[test]
  fn test_no_host() {
    let buf = b"GET / HTTP/1.0\r\nAccept: */*\r\n\r\n";
    assert_eq!(probe_http_host(buf), ProbeResult::Success(None));
  }

  #[test]
  fn test_incomplete() {
    assert_eq!(probe_http_host(b"GET / HT"), ProbeResult::PollNext);
    assert_eq!(probe_http_host(b"GET / HTTP/1.1\r\nAccept: */*\r\n"), ProbeResult::PollNext);
    // Header line not terminated yet
    assert_eq!(probe_http_host(b"GET / HTTP/1.1\r\nHost: dev.mul"), ProbeResult::PollNext);
  }

  #[test]
  fn test_not_http() {
    assert_eq!(probe_http_host(b"SSH-2.0-OpenSSH_9.6\r\n"), ProbeResult::Failure);
  }

  #[test]
  fn test_extract_host_lossy() {
    assert_eq!(
      extract_host_lossy(b"GET / HTTP/1.1\r\nHost: dev.multipass"),
      Some("dev.multipass".to_string())
    );
    assert_eq!(extract_host_lossy(b"\x00\x01binary"), None);
  }
}
