use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// TCP backlog size
pub const TCP_BACKLOG: u32 = 1024;

/// Max TCP concurrent connections in total of all spawned TCP proxies
pub const MAX_TCP_CONCURRENT_CONNECTIONS: usize = 1024;

/// Ports that are always listened on, in addition to the configured ones
pub const STANDARD_PORTS: [u16; 2] = [80, 443];

/// TCP buffer size for protocol detection
/// The maximum size of the TLS record is 16KB = 2^14 bytes.
/// Considering the hybrid post-quantum key exchange (key_share extension is > 1KB in X25519MLKEM768),
/// a single read of 4KB is usually enough for a ClientHello, but it can be split into multiple segments.
pub const TCP_PROTOCOL_DETECTION_BUFFER_SIZE: usize = 4096;

/// Upper bound of bytes accumulated while sniffing. Reaching it forces a verdict.
pub const TCP_PROTOCOL_DETECTION_MAX_BUFFER_SIZE: usize = 16384;

/// Deadline in milliseconds for follow-up reads once some bytes have been received
pub const TCP_PROTOCOL_DETECTION_TIMEOUT_MSEC: u64 = 100;

/// Relay buffer size
pub const TCP_RELAY_BUFFER_SIZE: usize = 65536;

/// Validity window of a cached instance resolution, in seconds
pub const INSTANCE_CACHE_TTL_SEC: u64 = 30;

/// Global dial timeout in milliseconds used unless configured
pub const DEFAULT_TIMEOUT_MSEC: u64 = 5000;

/// Default DNS port. Not privileged, so the responder can run as a regular user.
pub const DEFAULT_DNS_PORT: u16 = 5355;

/// Default domain suffix
pub const DEFAULT_DOMAIN: &str = "multipass";

/// Default path of the OS resolver directory, only used by the host setup step
pub const DEFAULT_RESOLVER_DIR: &str = "/etc/resolver";

/// Default virtualization tool command
pub const DEFAULT_MULTIPASS_BIN: &str = "multipass";

/// TTL of locally synthesized A records
pub const DNS_ANSWER_TTL: u32 = 300;

/// UDP buffer size for DNS messages
pub const DNS_UDP_BUFFER_SIZE: usize = 4096;

/// Deadline for a forwarded query in milliseconds
pub const DNS_FORWARD_TIMEOUT_MSEC: u64 = 2000;

/// Upstream used when neither the configuration nor the system resolver provide one
pub const DNS_FALLBACK_UPSTREAM: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 53);

/// Instance name used when no hostname could be sniffed. It never resolves.
pub const UNKNOWN_INSTANCE: &str = "Unknown";

pub mod log_event_names {
  /// access log
  pub const ACCESS_LOG: &str = "vmpass::access";
}
