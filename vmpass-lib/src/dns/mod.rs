//! DNS responder answering `A` queries under the domain suffix locally and forwarding the rest

mod upstream;

pub use upstream::{DnsUpstream, UdpUpstream};

use crate::{
  config::Config,
  constants::{DNS_ANSWER_TTL, DNS_UDP_BUFFER_SIZE},
  error::{ProxyBuildError, ProxyError},
  socket::{bind_tcp_socket, bind_udp_socket},
  trace::*,
};
use hickory_proto::{
  op::{Message, MessageType, ResponseCode},
  rr::{Name, RData, Record, RecordType, rdata::A},
};
use std::{
  net::{IpAddr, Ipv4Addr, SocketAddr},
  sync::Arc,
};
use tokio::{
  io::{AsyncReadExt, AsyncWriteExt},
  net::{TcpStream, UdpSocket},
};
use tokio_util::sync::CancellationToken;

#[derive(Clone, derive_builder::Builder)]
/// DNS responder over UDP and TCP on the same address
pub struct DnsServer {
  /// Bound socket address to listen on, loopback only
  listen_on: SocketAddr,

  #[builder(setter(into))]
  /// Domain suffix, lowercased and without surrounding dots
  domain: String,

  #[builder(default = "Ipv4Addr::LOCALHOST")]
  /// Address answered for names under the domain suffix
  answer_ip: Ipv4Addr,

  /// Resolver for everything else
  upstream: Arc<dyn DnsUpstream>,

  /// Tokio runtime handle
  runtime_handle: tokio::runtime::Handle,
}

impl DnsServer {
  /// DNS responder on `127.0.0.1:<dns_port>` forwarding to the configured or system upstream
  pub fn try_new(config: &Config, runtime_handle: tokio::runtime::Handle) -> Result<Self, ProxyBuildError> {
    config.validate()?;
    let listen_on = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), config.dns_port);
    let upstream = UdpUpstream::select(config.dns_upstream, listen_on);
    let server = DnsServerBuilder::default()
      .listen_on(listen_on)
      .domain(config.normalized_domain())
      .answer_ip(config.answer_ip())
      .upstream(Arc::new(upstream))
      .runtime_handle(runtime_handle)
      .build()?;
    Ok(server)
  }

  /// Whether the name is strictly under the domain suffix, case-insensitively
  fn is_local(&self, name: &Name) -> bool {
    let name = name.to_string().to_ascii_lowercase();
    let name = name.trim_end_matches('.');
    name
      .strip_suffix(self.domain.as_str())
      .is_some_and(|prefix| prefix.len() > 1 && prefix.ends_with('.'))
  }

  /// Answer a single encoded query. A query that cannot be decoded is an error and gets no response.
  pub(crate) async fn handle_query(&self, request: &[u8], src_addr: SocketAddr) -> Result<Vec<u8>, ProxyError> {
    let request = Message::from_vec(request)?;

    let mut response = Message::new();
    response
      .set_id(request.id())
      .set_message_type(MessageType::Response)
      .set_op_code(request.op_code())
      .set_recursion_desired(request.recursion_desired())
      .set_recursion_available(true)
      .add_queries(request.queries().to_vec());

    let Some(query) = request.queries().first() else {
      debug!(%src_addr, "DNS query without question");
      response.set_response_code(ResponseCode::FormErr);
      return Ok(response.to_vec()?);
    };
    let name = query.name();

    if self.is_local(name) {
      debug!(%src_addr, %name, "local {}", query.query_type());
      if query.query_type() == RecordType::A {
        response.add_answer(Record::from_rdata(
          name.clone(),
          DNS_ANSWER_TTL,
          RData::A(A(self.answer_ip)),
        ));
      }
    } else {
      debug!(%src_addr, %name, "forward {}", query.query_type());
      match self.upstream.forward(request.id(), query).await {
        Ok(upstream_response) => {
          response
            .add_answers(upstream_response.answers().to_vec())
            .set_truncated(upstream_response.truncated());
        }
        Err(e) => warn!(%name, "Failed to forward DNS query: {e}"),
      }
    }
    Ok(response.to_vec()?)
  }

  /// Start the DNS responder
  pub async fn start(&self, cancel_token: CancellationToken) -> Result<(), ProxyError> {
    check_privilege(self.listen_on.port())?;

    let udp_socket = bind_udp_socket(&self.listen_on)
      .and_then(UdpSocket::from_std)
      .map_err(|e| ProxyError::ListenerBindFailed(self.listen_on, e))?;
    let tcp_listener = bind_tcp_socket(&self.listen_on)
      .and_then(|socket| socket.listen(crate::constants::TCP_BACKLOG))
      .map_err(|e| ProxyError::ListenerBindFailed(self.listen_on, e))?;
    info!("Starting DNS responder on {} (udp/tcp) for .{}", self.listen_on, self.domain);

    let udp_socket = Arc::new(udp_socket);
    let udp_service = async {
      loop {
        let mut buf = vec![0u8; DNS_UDP_BUFFER_SIZE];
        let (len, src_addr) = match udp_socket.recv_from(&mut buf).await {
          Err(e) => {
            error!("Error in DNS UDP listener: {e}");
            continue;
          }
          Ok(res) => res,
        };
        buf.truncate(len);
        self.runtime_handle.spawn({
          let server = self.clone();
          let udp_socket = udp_socket.clone();
          async move {
            match server.handle_query(&buf, src_addr).await {
              Ok(response) => {
                if let Err(e) = udp_socket.send_to(&response, src_addr).await {
                  warn!(%src_addr, "Failed to send DNS response: {e}");
                }
              }
              Err(e) => debug!(%src_addr, "Dropped DNS query: {e}"),
            }
          }
        });
      }
    };

    let tcp_service = async {
      loop {
        let (stream, src_addr) = match tcp_listener.accept().await {
          Err(e) => {
            error!("Error in DNS TCP listener: {e}");
            continue;
          }
          Ok(res) => res,
        };
        self.runtime_handle.spawn({
          let server = self.clone();
          async move {
            if let Err(e) = server.serve_tcp(stream, src_addr).await {
              debug!(%src_addr, "DNS TCP session ended: {e}");
            }
          }
        });
      }
    };

    tokio::select! {
      _ = udp_service => {
        error!("DNS UDP responder stopped");
      }
      _ = tcp_service => {
        error!("DNS TCP responder stopped");
      }
      _ = cancel_token.cancelled() => {
        warn!("DNS responder cancelled");
      }
    }
    Ok(())
  }

  /// Serve length-prefixed queries until the client closes
  async fn serve_tcp(&self, mut stream: TcpStream, src_addr: SocketAddr) -> Result<(), ProxyError> {
    loop {
      let len = match stream.read_u16().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
        Err(e) => return Err(e.into()),
      };
      let mut request = vec![0u8; len];
      stream.read_exact(&mut request).await?;

      let response = self.handle_query(&request, src_addr).await?;
      let Ok(response_len) = u16::try_from(response.len()) else {
        return Err(ProxyError::DnsForwardFailed(format!("response too large: {} bytes", response.len())));
      };
      stream.write_u16(response_len).await?;
      stream.write_all(&response).await?;
    }
  }
}

/// Binding a privileged port requires root. The responder never elevates by itself.
#[cfg(unix)]
fn check_privilege(port: u16) -> Result<(), ProxyError> {
  if port < 1024 && !nix::unistd::Uid::effective().is_root() {
    return Err(ProxyError::PrivilegeRequired(port));
  }
  Ok(())
}

#[cfg(not(unix))]
fn check_privilege(_port: u16) -> Result<(), ProxyError> {
  Ok(())
}
