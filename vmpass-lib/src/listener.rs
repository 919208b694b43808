use crate::{
  cache::InstanceResolver,
  config::Config,
  count::ConnectionCount,
  directory::InstanceDirectory,
  error::{ProxyBuildError, ProxyError},
  tcp_proxy::{ConnectionRouter, TcpProxy, TcpProxyBuilder},
  trace::*,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// One TCP proxy per listening port, all sharing the connection router, the resolution cache and the connection count
pub struct MultiPortProxy {
  proxies: Vec<TcpProxy>,
}

impl MultiPortProxy {
  /// Validate the configuration and prepare a proxy for each of the de-duplicated listening ports
  pub fn try_new(
    config: Arc<Config>,
    directory: Arc<dyn InstanceDirectory>,
    runtime_handle: tokio::runtime::Handle,
  ) -> Result<Self, ProxyBuildError> {
    config.validate()?;
    let ports = config.listen_ports();
    Self::with_ports(config, directory, &ports, runtime_handle)
  }

  fn with_ports(
    config: Arc<Config>,
    directory: Arc<dyn InstanceDirectory>,
    ports: &[u16],
    runtime_handle: tokio::runtime::Handle,
  ) -> Result<Self, ProxyBuildError> {
    let router = Arc::new(ConnectionRouter::new(config.clone(), InstanceResolver::new(directory)));
    // connection count will be shared among all TCP proxies
    let connection_count = ConnectionCount::default();

    let proxies = ports
      .iter()
      .map(|port| {
        TcpProxyBuilder::default()
          .listen_on(SocketAddr::new(config.listen_ip, *port))
          .router(router.clone())
          .backlog(config.tcp_backlog)
          .connection_count(connection_count.clone())
          .max_connections(config.tcp_max_connections)
          .runtime_handle(runtime_handle.clone())
          .build()
      })
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self { proxies })
  }

  /// Run all proxies until cancelled.
  /// A port that cannot be bound is logged and skipped. Fails only if no port could be bound at all.
  pub async fn start(&self, cancel_token: CancellationToken) -> Result<(), ProxyError> {
    let mut join_set = JoinSet::new();
    for proxy in &self.proxies {
      let proxy = proxy.clone();
      let cancel_token = cancel_token.child_token();
      join_set.spawn(async move { proxy.start(cancel_token).await });
    }

    let total = self.proxies.len();
    let mut failed = 0;
    let mut last_error = None;
    while let Some(res) = join_set.join_next().await {
      match res {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
          error!("{e}. The port is skipped.");
          failed += 1;
          last_error = Some(e);
        }
        Err(e) => error!("TCP proxy task failed: {e}"),
      }
    }

    match last_error {
      Some(e) if failed == total => Err(e),
      _ => Ok(()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::tests::FakeDirectory;
  use std::time::Duration;
  use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
  };

  async fn connect_with_retry(addr: SocketAddr) -> TcpStream {
    for _ in 0..50 {
      if let Ok(stream) = TcpStream::connect(addr).await {
        return stream;
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("proxy on {addr} never came up");
  }

  #[tokio::test]
  async fn test_one_proxy_per_listen_port() {
    let config = Config {
      global_ports: vec![8010, 443],
      ..Default::default()
    };
    let proxy = MultiPortProxy::try_new(
      Arc::new(config),
      Arc::new(FakeDirectory::default()),
      tokio::runtime::Handle::current(),
    )
    .unwrap();
    assert_eq!(proxy.proxies.len(), 3);
  }

  #[tokio::test]
  async fn test_invalid_config_is_rejected() {
    let config = Config {
      timeout_ms: 0,
      ..Default::default()
    };
    let res = MultiPortProxy::try_new(
      Arc::new(config),
      Arc::new(FakeDirectory::default()),
      tokio::runtime::Handle::current(),
    );
    assert!(matches!(res, Err(ProxyBuildError::ConfigError(_))));
  }

  #[tokio::test]
  async fn test_bind_failure_skips_port() {
    // Occupied without SO_REUSEPORT, so binding it again fails
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let occupied_port = occupied.local_addr().unwrap().port();
    let free_port = {
      let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
      listener.local_addr().unwrap().port()
    };

    let config = Config {
      listen_ip: "127.0.0.1".parse().unwrap(),
      global_ports: vec![occupied_port, free_port],
      ..Default::default()
    };
    let proxy = MultiPortProxy::with_ports(
      Arc::new(config),
      Arc::new(FakeDirectory::default()),
      &[occupied_port, free_port],
      tokio::runtime::Handle::current(),
    )
    .unwrap();

    let cancel_token = CancellationToken::new();
    let service = tokio::spawn({
      let cancel_token = cancel_token.clone();
      async move { proxy.start(cancel_token).await }
    });

    let mut client = connect_with_retry(SocketAddr::new("127.0.0.1".parse().unwrap(), free_port)).await;
    client
      .write_all(b"GET / HTTP/1.1\r\nHost: ghost.multipass\r\n\r\n")
      .await
      .unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));

    cancel_token.cancel();
    assert!(service.await.unwrap().is_ok());
    drop(occupied);
  }
}
