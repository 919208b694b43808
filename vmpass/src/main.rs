mod config;
mod log;

use crate::{
  config::{Service, build_config, parse_opts},
  log::*,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vmpass_lib::*;

fn main() -> Result<(), anyhow::Error> {
  init_logger();

  let opts = parse_opts()?;
  let config = build_config(&opts)?;

  let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
  runtime_builder.enable_all();
  runtime_builder.thread_name("vmpass");
  let runtime = runtime_builder.build()?;

  let handle = runtime.handle().clone();
  runtime.block_on(run(config, opts.service, handle))
}

/// Run the selected services until Ctrl-C or until one of them stops
async fn run(config: Config, service: Service, runtime_handle: tokio::runtime::Handle) -> Result<(), anyhow::Error> {
  info!("Starting vmpass for .{} ({service:?})", config.normalized_domain());
  if config.daemon {
    info!("Running in foreground: daemon mode is up to the process manager");
  }
  debug!("Resolver directory: {}", config.resolver_dir.display());

  let config = Arc::new(config);
  let cancel_token = CancellationToken::new();

  let proxy = if service.runs_proxy() {
    let directory = Arc::new(MultipassDirectory::new(&config.multipass_bin));
    info!("Listening ports: {:?}", config.listen_ports());
    Some(MultiPortProxy::try_new(config.clone(), directory, runtime_handle.clone())?)
  } else {
    None
  };
  let dns = if service.runs_dns() {
    Some(DnsServer::try_new(&config, runtime_handle.clone())?)
  } else {
    None
  };

  let proxy_service = async {
    match &proxy {
      Some(proxy) => proxy.start(cancel_token.child_token()).await,
      None => std::future::pending().await,
    }
  };
  let dns_service = async {
    match &dns {
      Some(dns) => dns.start(cancel_token.child_token()).await,
      None => std::future::pending().await,
    }
  };

  tokio::select! {
    res = proxy_service => {
      if let Err(e) = res {
        error!("TCP proxy stopped: {e}");
        return Err(e.into());
      }
    }
    res = dns_service => {
      if let Err(e) = res {
        error!("DNS responder stopped: {e}");
        return Err(e.into());
      }
    }
    _ = tokio::signal::ctrl_c() => {
      info!("Received Ctrl-C, shutting down");
      cancel_token.cancel();
    }
  }
  Ok(())
}
