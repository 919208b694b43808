use crate::{
  constants::{DNS_FALLBACK_UPSTREAM, DNS_FORWARD_TIMEOUT_MSEC, DNS_UDP_BUFFER_SIZE},
  error::ProxyError,
  trace::*,
};
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use std::{
  net::{Ipv4Addr, Ipv6Addr, SocketAddr},
  time::Duration,
};
use tokio::{
  io::{AsyncReadExt, AsyncWriteExt},
  net::{TcpStream, UdpSocket},
};

/// Resolver the queries outside the domain suffix are forwarded to
#[async_trait::async_trait]
pub trait DnsUpstream: Send + Sync {
  /// Ask the same question upstream and return its response.
  /// The response is still truncated only if the upstream could not send it whole.
  async fn forward(&self, id: u16, query: &Query) -> Result<Message, ProxyError>;
}

#[derive(Debug, Clone)]
/// Plain DNS to a single name server, over UDP and over TCP when the UDP answer is truncated
pub struct UdpUpstream {
  addr: SocketAddr,
  timeout: Duration,
}

impl UdpUpstream {
  pub fn new(addr: SocketAddr) -> Self {
    Self {
      addr,
      timeout: Duration::from_millis(DNS_FORWARD_TIMEOUT_MSEC),
    }
  }

  /// Configured upstream, else the first system name server that is not ourselves, else the public fallback
  pub fn select(configured: Option<SocketAddr>, own_addr: SocketAddr) -> Self {
    let addr = configured
      .or_else(|| system_name_server(own_addr))
      .unwrap_or(DNS_FALLBACK_UPSTREAM);
    info!("DNS upstream: {addr}");
    Self::new(addr)
  }

  pub fn addr(&self) -> SocketAddr {
    self.addr
  }

  async fn exchange_udp(&self, request: &[u8], id: u16) -> Result<Message, ProxyError> {
    let bind_addr: SocketAddr = if self.addr.is_ipv4() {
      (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
      (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(self.addr).await?;
    socket.send(request).await?;

    let mut buf = vec![0u8; DNS_UDP_BUFFER_SIZE];
    loop {
      let len = socket.recv(&mut buf).await?;
      let response = Message::from_vec(&buf[..len])?;
      // Stray datagrams are skipped
      if response.id() == id && response.message_type() == MessageType::Response {
        return Ok(response);
      }
    }
  }

  async fn exchange_tcp(&self, request: &[u8], id: u16) -> Result<Message, ProxyError> {
    let request_len = u16::try_from(request.len())
      .map_err(|_| ProxyError::DnsForwardFailed(format!("request too large: {} bytes", request.len())))?;
    let mut stream = TcpStream::connect(self.addr).await?;
    stream.write_u16(request_len).await?;
    stream.write_all(request).await?;

    let len = stream.read_u16().await?;
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    let response = Message::from_vec(&buf)?;
    if response.id() != id {
      return Err(ProxyError::DnsForwardFailed(format!(
        "{} answered id {} over tcp, expected {id}",
        self.addr,
        response.id()
      )));
    }
    Ok(response)
  }
}

/// First name server of the host resolver configuration, skipping our own listening address
fn system_name_server(own_addr: SocketAddr) -> Option<SocketAddr> {
  match hickory_resolver::system_conf::read_system_conf() {
    Ok((config, _)) => config
      .name_servers()
      .iter()
      .map(|ns| ns.socket_addr)
      .find(|addr| *addr != own_addr),
    Err(e) => {
      warn!("Failed to read the system resolver configuration: {e}");
      None
    }
  }
}

#[async_trait::async_trait]
impl DnsUpstream for UdpUpstream {
  async fn forward(&self, id: u16, query: &Query) -> Result<Message, ProxyError> {
    let mut request = Message::new();
    request
      .set_id(id)
      .set_message_type(MessageType::Query)
      .set_op_code(OpCode::Query)
      .set_recursion_desired(true)
      .add_query(query.clone());
    let request = request.to_vec()?;

    let response = tokio::time::timeout(self.timeout, self.exchange_udp(&request, id))
      .await
      .map_err(|_| ProxyError::DnsForwardFailed(format!("{} did not answer in {}ms", self.addr, self.timeout.as_millis())))??;

    // Truncated over UDP, ask again over TCP and keep the partial answer if that fails
    let response = if response.truncated() {
      match tokio::time::timeout(self.timeout, self.exchange_tcp(&request, id)).await {
        Ok(Ok(full)) => full,
        Ok(Err(e)) => {
          warn!("Failed to retry {} over tcp with {}: {e}", query.name(), self.addr);
          response
        }
        Err(_) => {
          warn!("Retry of {} over tcp with {} timed out", query.name(), self.addr);
          response
        }
      }
    } else {
      response
    };
    debug!(
      "Upstream {} answered {} with {} records ({})",
      self.addr,
      query.name(),
      response.answers().len(),
      response.response_code()
    );
    Ok(response)
  }
}
