use crate::{
  access_log::access_log,
  cache::InstanceResolver,
  config::Config,
  constants::{TCP_PROTOCOL_DETECTION_BUFFER_SIZE, TCP_RELAY_BUFFER_SIZE, UNKNOWN_INSTANCE},
  count::ConnectionCount,
  error::ProxyError,
  pages,
  probe::SniffResult,
  route::{RouteDecision, route},
  socket::bind_tcp_socket,
  trace::*,
};
use bytes::BytesMut;
use std::{
  io::ErrorKind,
  net::{IpAddr, SocketAddr},
  sync::Arc,
};
use tokio::{
  io::{AsyncWriteExt, BufReader, copy_buf},
  net::TcpStream,
  time::{Duration, timeout},
};
use tokio_util::sync::CancellationToken;

/* ---------------------------------------------------------- */
#[derive(Clone)]
/// Per-connection handling shared by all TCP proxies: sniff, route, resolve, dial, then relay
pub struct ConnectionRouter {
  config: Arc<Config>,
  resolver: InstanceResolver,
}

impl ConnectionRouter {
  pub fn new(config: Arc<Config>, resolver: InstanceResolver) -> Self {
    Self { config, resolver }
  }

  /// Serve a single accepted connection until either side closes.
  /// `listen_port` is the port the client connected to, which is also the backend port.
  pub(crate) async fn handle(
    &self,
    mut incoming_stream: TcpStream,
    src_addr: SocketAddr,
    listen_port: u16,
  ) -> Result<(), ProxyError> {
    // Sniffing
    let mut buf = BytesMut::with_capacity(TCP_PROTOCOL_DETECTION_BUFFER_SIZE);
    let sniffed = SniffResult::detect(&mut incoming_stream, &mut buf).await?;
    debug!(%src_addr, listen_port, "Sniffed {sniffed} with hostname {:?}", sniffed.hostname());

    // Routing
    let Some(RouteDecision { instance, port }) = route(listen_port, sniffed.hostname(), &self.config) else {
      debug!(listen_port, "No route for hostname {:?}", sniffed.hostname());
      self.respond_not_found(&mut incoming_stream, &sniffed, UNKNOWN_INSTANCE).await;
      return Err(ProxyError::NoRoute(listen_port));
    };

    // Resolving
    let Some(ip) = self.resolver.resolve(&instance).await else {
      self.respond_not_found(&mut incoming_stream, &sniffed, &instance).await;
      return Err(ProxyError::ResolutionFailed(instance));
    };

    // Piping
    let dst_addr = SocketAddr::new(IpAddr::V4(ip), port);
    let timeout_ms = self.config.timeout_for(&instance);
    let mut outgoing_stream = match connect_backend(dst_addr, timeout_ms).await {
      Ok(stream) => stream,
      Err(e) => {
        if !sniffed.is_tls() {
          let response = match &e {
            ProxyError::BackendRefused(_) => pages::refused_page(&dst_addr.to_string()),
            ProxyError::BackendTimeout(_, ms) => pages::timeout_page(&dst_addr.to_string(), *ms),
            _ => pages::bad_gateway(),
          };
          write_and_close(&mut incoming_stream, &response).await;
        }
        return Err(e);
      }
    };

    // Replay the sniffed bytes before relaying anything else
    outgoing_stream.write_all(&buf).await?;
    drop(buf);
    access_log(&sniffed, &src_addr, &instance, &dst_addr);

    if let Err(e) = relay(incoming_stream, outgoing_stream).await {
      warn!("Failed to relay TCP stream (maybe the timing on disconnect): {e}");
    }
    Ok(())
  }

  /// 404 page for plaintext clients, bare close for TLS ones
  async fn respond_not_found(&self, incoming_stream: &mut TcpStream, sniffed: &SniffResult, instance: &str) {
    warn!(instance, "No matching instance");
    if sniffed.is_tls() {
      return;
    }
    let running = self.resolver.running_instances().await;
    let response = pages::not_found_page(instance, &running, &self.config.normalized_domain());
    write_and_close(incoming_stream, &response).await;
  }
}

/// Dial the backend, classifying the failure
async fn connect_backend(dst_addr: SocketAddr, timeout_ms: u64) -> Result<TcpStream, ProxyError> {
  match timeout(Duration::from_millis(timeout_ms), TcpStream::connect(dst_addr)).await {
    Ok(Ok(stream)) => Ok(stream),
    Ok(Err(e)) => Err(connect_error(dst_addr, timeout_ms, e)),
    Err(_) => Err(ProxyError::BackendTimeout(dst_addr, timeout_ms)),
  }
}

fn connect_error(dst_addr: SocketAddr, timeout_ms: u64, e: std::io::Error) -> ProxyError {
  match e.kind() {
    ErrorKind::ConnectionRefused => ProxyError::BackendRefused(dst_addr),
    ErrorKind::TimedOut => ProxyError::BackendTimeout(dst_addr, timeout_ms),
    _ => ProxyError::BackendOtherError(dst_addr, e),
  }
}

/// Copy both directions until one of them ends, then close both legs
async fn relay(mut incoming_stream: TcpStream, mut outgoing_stream: TcpStream) -> std::io::Result<()> {
  let (client_read, mut client_write) = incoming_stream.split();
  let (backend_read, mut backend_write) = outgoing_stream.split();
  let mut client_read = BufReader::with_capacity(TCP_RELAY_BUFFER_SIZE, client_read);
  let mut backend_read = BufReader::with_capacity(TCP_RELAY_BUFFER_SIZE, backend_read);

  let res = tokio::select! {
    res = copy_buf(&mut client_read, &mut backend_write) => res,
    res = copy_buf(&mut backend_read, &mut client_write) => res,
  };
  let _ = backend_write.shutdown().await;
  let _ = client_write.shutdown().await;
  res.map(|_| ())
}

async fn write_and_close(stream: &mut TcpStream, response: &[u8]) {
  if let Err(e) = stream.write_all(response).await {
    debug!("Failed to write error response: {e}");
    return;
  }
  let _ = stream.shutdown().await;
}

/* ---------------------------------------------------------- */
#[derive(Clone, derive_builder::Builder)]
/// Single TCP proxy struct, listening on one port
pub struct TcpProxy {
  /// Bound socket address to listen on, exposed to the client
  listen_on: SocketAddr,

  /// Connection handling shared with the other TCP proxies
  router: Arc<ConnectionRouter>,

  #[builder(default = "crate::constants::TCP_BACKLOG")]
  /// TCP backlog size
  backlog: u32,

  #[builder(default = "ConnectionCount::default()")]
  /// Connection counter, set shared counter if #connections of all TCP proxies are needed
  connection_count: ConnectionCount,

  #[builder(default = "crate::constants::MAX_TCP_CONCURRENT_CONNECTIONS")]
  /// Maximum number of concurrent connections
  /// If `connection_count` is shared with other spawned TCP proxies, this value is evaluated for the total number of connections
  max_connections: usize,

  /// Tokio runtime handle
  runtime_handle: tokio::runtime::Handle,
}

impl TcpProxy {
  /// Start the TCP proxy
  pub async fn start(&self, cancel_token: CancellationToken) -> Result<(), ProxyError> {
    let tcp_listener = bind_tcp_socket(&self.listen_on)
      .and_then(|socket| socket.listen(self.backlog))
      .map_err(|e| ProxyError::ListenerBindFailed(self.listen_on, e))?;
    info!("Starting TCP proxy on {}", self.listen_on);

    let listener_service = async {
      loop {
        let (incoming_stream, src_addr) = match tcp_listener.accept().await {
          Err(e) => {
            error!("Error in TCP listener: {e}");
            continue;
          }
          Ok(res) => res,
        };
        // Connection limit
        let Some(guard) = self.connection_count.try_acquire(self.max_connections) else {
          warn!("TCP connection limit reached: {}", self.max_connections);
          continue;
        };
        let listen_port = match incoming_stream.local_addr() {
          Ok(addr) => addr.port(),
          Err(e) => {
            error!("Failed to get local address of accepted connection: {e}");
            continue;
          }
        };
        debug!(
          "Accepted TCP connection from: {src_addr} on port {listen_port} (total: {})",
          self.connection_count.current()
        );

        self.runtime_handle.spawn({
          let router = Arc::clone(&self.router);
          let connection_count = self.connection_count.clone();
          async move {
            match router.handle(incoming_stream, src_addr, listen_port).await {
              Ok(()) => {}
              Err(ProxyError::NoDataReceivedTcpStream) => debug!(%src_addr, "Closed before sending data"),
              Err(e) => error!(%src_addr, listen_port, "{e}"),
            }
            drop(guard);
            debug!("TCP proxy connection closed (total: {})", connection_count.current());
          }
        });
      }
    };
    tokio::select! {
      _ = listener_service => {
        error!("TCP proxy stopped");
      }
      _ = cancel_token.cancelled() => {
        warn!("TCP proxy on {} cancelled", self.listen_on);
      }
    }
    Ok(())
  }
}
