use crate::{probe::ProbeResult, trace::*};

const TLS_RECORD_HEADER_LEN: usize = 5;
const TLS_HANDSHAKE_MESSAGE_HEADER_LEN: usize = 4;
const TLS_HANDSHAKE_CONTENT_TYPE: u8 = 0x16;
const TLS_HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;
const TLS_EXTENSION_SERVER_NAME: u16 = 0x0000;
const SNI_NAME_TYPE_HOST_NAME: u8 = 0x00;

/* ---------------------------------------------------------- */
/// Read a big-endian length field of `len` bytes at `pos`, or `None` if the buffer is too short
#[inline]
fn read_be(buf: &[u8], pos: usize, len: usize) -> Option<usize> {
  let field = buf.get(pos..pos.checked_add(len)?)?;
  Some(field.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize))
}

/// Check if the buffer starts with a TLS ClientHello and extract the SNI host_name.
///
/// - `Success(Some(host))`: ClientHello with SNI
/// - `Success(None)`: ClientHello without SNI extension (or without a host_name entry)
/// - `PollNext`: looks like a TLS handshake so far, but more bytes are needed
/// - `Failure`: not a TLS handshake
///
/// Inspired by https://github.com/yrutschle/sslh/blob/master/tls.c
pub(crate) fn probe_tls_client_hello(buf: &[u8]) -> ProbeResult<Option<String>> {
  // TLS record header: https://datatracker.ietf.org/doc/html/rfc8446#section-5.1
  // - content type: 1 byte, 0x16 (handshake)
  // - version: 2 bytes
  // - length: 2 bytes
  if buf.len() < TLS_RECORD_HEADER_LEN {
    return ProbeResult::PollNext;
  }
  if buf[0] != TLS_HANDSHAKE_CONTENT_TYPE {
    return ProbeResult::Failure;
  }
  // Initial client hello possibly has the legacy versions for interoperability, like 0x03 0x01 = TLS 1.0
  // Omit the legacy SSL
  if buf[1] != 0x03 {
    return ProbeResult::Failure;
  }
  let record_end = TLS_RECORD_HEADER_LEN + (((buf[3] as usize) << 8) | buf[4] as usize);
  let mut pos = TLS_RECORD_HEADER_LEN;

  // Handshake message header: https://datatracker.ietf.org/doc/html/rfc8446#section-4
  //  - 1 Handshake Type msg_type
  //  - 3 Length
  if buf.len() < pos + TLS_HANDSHAKE_MESSAGE_HEADER_LEN {
    return ProbeResult::PollNext;
  }
  if buf[pos] != TLS_HANDSHAKE_TYPE_CLIENT_HELLO {
    return ProbeResult::Failure;
  }
  pos += TLS_HANDSHAKE_MESSAGE_HEADER_LEN;

  // - 2 legacy_version
  // - 32 random
  pos += 2 + 32;

  // legacy_session_id<0..32>
  let Some(session_id_len) = read_be(buf, pos, 1) else {
    return ProbeResult::PollNext;
  };
  pos += 1 + session_id_len;

  // cipher_suites<2..2^16-2>
  let Some(cipher_suites_len) = read_be(buf, pos, 2) else {
    return ProbeResult::PollNext;
  };
  pos += 2 + cipher_suites_len;

  // legacy_compression_methods<1..2^8-1>
  let Some(compression_methods_len) = read_be(buf, pos, 1) else {
    return ProbeResult::PollNext;
  };
  pos += 1 + compression_methods_len;

  // A ClientHello may end here without any extension (TLS 1.0/1.1)
  if pos == record_end && buf.len() >= record_end {
    debug!("TLS ClientHello without extensions");
    return ProbeResult::Success(None);
  }

  // extensions<8..2^16-1>
  let Some(extensions_len) = read_be(buf, pos, 2) else {
    return ProbeResult::PollNext;
  };
  pos += 2;
  let extensions_end = pos + extensions_len;

  while pos + 4 <= extensions_end {
    let (Some(extension_type), Some(extension_len)) = (read_be(buf, pos, 2), read_be(buf, pos + 2, 2)) else {
      return ProbeResult::PollNext;
    };
    pos += 4;

    if extension_type as u16 != TLS_EXTENSION_SERVER_NAME {
      pos += extension_len;
      continue;
    }

    // server_name_list<1..2^16-1>
    let Some(server_name_list_len) = read_be(buf, pos, 2) else {
      return ProbeResult::PollNext;
    };
    pos += 2;
    let server_name_list_end = pos + server_name_list_len;
    while pos + 3 <= server_name_list_end {
      let (Some(name_type), Some(name_len)) = (read_be(buf, pos, 1), read_be(buf, pos + 1, 2)) else {
        return ProbeResult::PollNext;
      };
      pos += 3;
      if name_type as u8 == SNI_NAME_TYPE_HOST_NAME {
        let Some(name) = buf.get(pos..pos + name_len) else {
          return ProbeResult::PollNext;
        };
        let server_name = String::from_utf8_lossy(name).to_string();
        debug!("TLS ClientHello with SNI: {server_name}");
        return ProbeResult::Success(Some(server_name));
      }
      pos += name_len;
    }
    debug!("SNI extension without host_name");
    return ProbeResult::Success(None);
  }

  debug!("TLS ClientHello without SNI");
  ProbeResult::Success(None)
}

/// Check only the TLS record and handshake headers, for the final verdict on a truncated stream
pub(crate) fn looks_like_tls_handshake(buf: &[u8]) -> bool {
  buf.first() == Some(&TLS_HANDSHAKE_CONTENT_TYPE) && buf.get(1).is_none_or(|v| *v == 0x03)
}

/* ---------------------------------------------------------- */
#[cfg(test)]
pub(crate) mod tests {
  use super::*;

  /// Compose a TLS 1.3-like ClientHello record, optionally with the SNI extension
  pub(crate) fn client_hello(server_name: Option<&str>) -> Vec<u8> {
    let mut extensions = Vec::new();
    // supported_versions: TLS 1.3
    extensions.extend_from_slice(&[0x00, 0x2b, 0x00, 0x03, 0x02, 0x03, 0x04]);
    if let Some(name) = server_name {
      let name = name.as_bytes();
      let list_len = 3 + name.len();
      extensions.extend_from_slice(&[0x00, 0x00]);
      extensions.extend_from_slice(&((list_len + 2) as u16).to_be_bytes());
      extensions.extend_from_slice(&(list_len as u16).to_be_bytes());
      extensions.push(0x00);
      extensions.extend_from_slice(&(name.len() as u16).to_be_bytes());
      extensions.extend_from_slice(name);
    }
    // ec_point_formats
    extensions.extend_from_slice(&[0x00, 0x0b, 0x00, 0x02, 0x01, 0x00]);

    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(&[0x42; 32]);
    body.push(32);
    body.extend_from_slice(&[0x24; 32]);
    body.extend_from_slice(&[0x00, 0x04, 0x13, 0x01, 0x13, 0x02]);
    body.extend_from_slice(&[0x01, 0x00]);
    body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    body.extend_from_slice(&extensions);

    let mut handshake = vec![TLS_HANDSHAKE_TYPE_CLIENT_HELLO];
    handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&body);

    let mut record = vec![TLS_HANDSHAKE_CONTENT_TYPE, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
  }

  #[test]
  fn test_sni_extraction() {
    let buf = client_hello(Some("foo.multipass"));
    assert_eq!(
      probe_tls_client_hello(&buf),
      ProbeResult::Success(Some("foo.multipass".to_string()))
    );
  }

  #[test]
  fn test_no_sni() {
    let buf = client_hello(None);
    assert_eq!(probe_tls_client_hello(&buf), ProbeResult::Success(None));
  }

  #[test]
  fn test_truncated_client_hello() {
    let buf = client_hello(Some("foo.multipass"));
    // The host_name ends right before the trailing 6-byte ec_point_formats extension
    let host_name_end = buf.len() - 6;
    for len in 0..host_name_end {
      assert_eq!(
        probe_tls_client_hello(&buf[..len]),
        ProbeResult::PollNext,
        "prefix of {len} bytes"
      );
    }
  }

  #[test]
  fn test_not_tls() {
    assert_eq!(
      probe_tls_client_hello(b"GET / HTTP/1.1\r\nHost: a\r\n"),
      ProbeResult::Failure
    );
    // Handshake record but ServerHello
    let mut buf = client_hello(Some("foo.multipass"));
    buf[5] = 0x02;
    assert_eq!(probe_tls_client_hello(&buf), ProbeResult::Failure);
    // Legacy SSL
    let mut buf = client_hello(None);
    buf[1] = 0x02;
    assert_eq!(probe_tls_client_hello(&buf), ProbeResult::Failure);
  }

  #[test]
  fn test_without_extensions() {
    let mut body = vec![0x03, 0x01];
    body.extend_from_slice(&[0u8; 32]);
    body.push(0);
    body.extend_from_slice(&[0x00, 0x02, 0x00, 0x2f, 0x01, 0x00]);
    let mut handshake = vec![0x01, 0x00, 0x00, body.len() as u8];
    handshake.extend_from_slice(&body);
    let mut record = vec![0x16, 0x03, 0x01, 0x00, handshake.len() as u8];
    record.extend_from_slice(&handshake);
    assert_eq!(probe_tls_client_hello(&record), ProbeResult::Success(None));
  }

  #[test]
  fn test_looks_like_tls() {
    assert!(looks_like_tls_handshake(&[0x16]));
    assert!(looks_like_tls_handshake(&[0x16, 0x03, 0x01]));
    assert!(!looks_like_tls_handshake(b"GET"));
    assert!(!looks_like_tls_handshake(&[]));
  }
}
