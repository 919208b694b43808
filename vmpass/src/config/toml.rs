use crate::log::warn;
use anyhow::anyhow;
use serde::Deserialize;
use std::{
  collections::{BTreeMap, HashSet},
  fs,
  net::{IpAddr, Ipv4Addr, SocketAddr},
  path::PathBuf,
};
use vmpass_lib::{Config, InstanceConfig};

#[derive(Deserialize, Debug, Default, PartialEq, Eq, Clone)]
pub struct ConfigToml {
  pub domain: Option<String>,
  pub dns_port: Option<u16>,
  /// Upstream DNS server like "192.168.1.1:53", the system resolver if not set
  pub dns_upstream: Option<String>,
  /// Global backend connection timeout in milliseconds
  pub timeout: Option<u64>,
  pub resolver_dir: Option<String>,
  pub local_ip: Option<String>,
  pub global_ports: Option<Vec<u16>>,
  pub daemon: Option<bool>,
  pub multipass_bin: Option<String>,
  pub listen_ip: Option<String>,
  pub tcp_backlog: Option<u32>,
  pub tcp_max_connections: Option<u32>,
  pub instances: Option<BTreeMap<String, InstanceToml>>,
}

#[derive(Deserialize, Debug, Default, PartialEq, Eq, Clone)]
pub struct InstanceToml {
  /// Ports bound to this instance regardless of the requested hostname
  pub ports: Option<Vec<u16>>,
  /// Backend connection timeout in milliseconds
  pub timeout: Option<u64>,
}

impl ConfigToml {
  pub fn new(config_file: &str) -> Result<Self, anyhow::Error> {
    let config_str = fs::read_to_string(config_file)?;
    Self::parse(&config_str)
  }

  fn parse(config_str: &str) -> Result<Self, anyhow::Error> {
    // Check unused fields during deserialization
    let t = toml::de::Deserializer::new(config_str);
    let mut unused = HashSet::new();

    let res = serde_ignored::deserialize(t, |path| {
      unused.insert(path.to_string());
    })
    .map_err(|e| anyhow::anyhow!(e));

    if !unused.is_empty() {
      let str = unused.iter().fold(String::new(), |acc, x| acc + x + "\n");
      warn!("Configuration file contains unsupported fields. Check typos:\n{}", str);
    }

    res
  }
}

/// Keep the first occurrence of each port
fn dedup_ports(ports: Vec<u16>) -> Vec<u16> {
  let mut seen = HashSet::new();
  ports.into_iter().filter(|port| seen.insert(*port)).collect()
}

impl TryFrom<ConfigToml> for Config {
  type Error = anyhow::Error;

  fn try_from(config_toml: ConfigToml) -> Result<Self, Self::Error> {
    let mut config = Config::default();

    if let Some(domain) = config_toml.domain {
      config.domain = domain;
    }
    if let Some(dns_port) = config_toml.dns_port {
      config.dns_port = dns_port;
    }
    if let Some(upstream) = config_toml.dns_upstream {
      // A bare address means port 53
      let upstream = upstream
        .parse::<SocketAddr>()
        .or_else(|_| upstream.parse::<IpAddr>().map(|ip| SocketAddr::new(ip, 53)))
        .map_err(|e| anyhow!("Invalid dns_upstream {upstream}: {e}"))?;
      config.dns_upstream = Some(upstream);
    }
    if let Some(timeout) = config_toml.timeout {
      config.timeout_ms = timeout;
    }
    if let Some(resolver_dir) = config_toml.resolver_dir {
      config.resolver_dir = PathBuf::from(resolver_dir);
    }
    if let Some(local_ip) = config_toml.local_ip {
      let local_ip = local_ip
        .parse::<Ipv4Addr>()
        .map_err(|e| anyhow!("Invalid local_ip {local_ip}: {e}"))?;
      config.local_ip = Some(local_ip);
    }
    if let Some(global_ports) = config_toml.global_ports {
      config.global_ports = dedup_ports(global_ports);
    }
    if let Some(daemon) = config_toml.daemon {
      config.daemon = daemon;
    }
    if let Some(multipass_bin) = config_toml.multipass_bin {
      config.multipass_bin = PathBuf::from(multipass_bin);
    }
    if let Some(listen_ip) = config_toml.listen_ip {
      config.listen_ip = listen_ip
        .parse::<IpAddr>()
        .map_err(|e| anyhow!("Invalid listen_ip {listen_ip}: {e}"))?;
    }
    if let Some(backlog) = config_toml.tcp_backlog {
      config.tcp_backlog = backlog;
    }
    if let Some(max_conn) = config_toml.tcp_max_connections {
      config.tcp_max_connections = max_conn as usize;
    }

    config.instances = config_toml
      .instances
      .unwrap_or_default()
      .into_iter()
      .map(|(name, instance)| {
        let instance = InstanceConfig {
          ports: dedup_ports(instance.ports.unwrap_or_default()),
          timeout_ms: instance.timeout,
        };
        (name, instance)
      })
      .collect();

    Ok(config)
  }
}
