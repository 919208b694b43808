mod access_log;
mod cache;
mod config;
mod constants;
mod count;
mod directory;
mod dns;
mod error;
mod http;
mod listener;
mod pages;
mod probe;
mod route;
mod socket;
mod tcp_proxy;
mod tls;

pub(crate) mod trace {
  pub(crate) use tracing::{debug, error, info, warn};
}

pub use cache::InstanceResolver;
pub use config::{Config, ConfigValidationError, InstanceConfig};
pub use count::ConnectionCount as TcpConnectionCount;
pub use directory::{DirectoryError, InstanceDirectory, MultipassDirectory, RunningInstance};
pub use dns::{DnsServer, DnsServerBuilder, DnsUpstream, UdpUpstream};
pub use error::{ProxyBuildError, ProxyError};
pub use listener::MultiPortProxy;
pub use tcp_proxy::{ConnectionRouter, TcpProxy, TcpProxyBuilder};
