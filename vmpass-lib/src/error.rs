use std::net::SocketAddr;

/// Errors that happens during the proxy operation
#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
  /* --------------------------------------- */
  #[error("IO error: {0}")]
  IoError(#[from] std::io::Error),

  #[error("No data received from TCP stream")]
  NoDataReceivedTcpStream,

  /* --------------------------------------- */
  /// Neither a per-instance, global nor standard port matched
  #[error("No target instance for port {0}")]
  NoRoute(u16),

  /// Instance directory returned nothing for the instance
  #[error("Failed to resolve instance: {0}")]
  ResolutionFailed(String),

  /* --------------------------------------- */
  #[error("Connection refused by backend {0}")]
  BackendRefused(SocketAddr),

  #[error("Timeout connecting to backend {0} after {1}ms")]
  BackendTimeout(SocketAddr, u64),

  #[error("Failed to connect to backend {0}: {1}")]
  BackendOtherError(SocketAddr, std::io::Error),

  /* --------------------------------------- */
  #[error("Failed to bind listener on {0}: {1}")]
  ListenerBindFailed(SocketAddr, std::io::Error),

  /* --------------------------------------- */
  #[error("DNS forward failed: {0}")]
  DnsForwardFailed(String),

  #[error("DNS message error: {0}")]
  DnsMessageError(#[from] hickory_proto::error::ProtoError),

  #[error("Port {0} is privileged: the DNS responder must be started as root")]
  PrivilegeRequired(u16),
}

/// Errors that happens during building the proxy
#[derive(thiserror::Error, Debug)]
pub enum ProxyBuildError {
  /// Configuration error
  #[error("Invalid configuration: {0}")]
  ConfigError(#[from] crate::config::ConfigValidationError),

  /// TCP proxy builder error
  #[error("TCP proxy builder error: {0}")]
  TcpProxyBuilderError(#[from] crate::tcp_proxy::TcpProxyBuilderError),

  /// DNS server builder error
  #[error("DNS server builder error: {0}")]
  DnsServerBuilderError(#[from] crate::dns::DnsServerBuilderError),
}
