use crate::constants::*;
use std::{
  collections::HashMap,
  net::{IpAddr, Ipv4Addr, SocketAddr},
  path::PathBuf,
};

/// Validation errors specific to configuration
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigValidationError {
  #[error("Invalid value for field {field}: {value}. {reason}")]
  InvalidFieldValue { field: String, value: String, reason: String },

  #[error("Conflicting configuration: port {port} is listed by both instance '{first}' and instance '{second}'")]
  ConflictingInstancePort { port: u16, first: String, second: String },
}

/// Per-instance configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceConfig {
  /// Ports bound exclusively to this instance, regardless of the sniffed hostname
  pub ports: Vec<u16>,
  /// Dial timeout overriding the global one
  pub timeout_ms: Option<u64>,
}

/// Configuration shared read-only by the proxy and the DNS responder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  /// Domain suffix, like `multipass` for `<instance>.multipass`
  pub domain: String,
  /// DNS responder port, bound on loopback
  pub dns_port: u16,
  /// Upstream for queries outside the domain suffix. The system resolver is used if `None`.
  pub dns_upstream: Option<SocketAddr>,
  /// Global dial timeout in milliseconds
  pub timeout_ms: u64,
  /// OS resolver directory. Only consumed by the host setup step.
  pub resolver_dir: PathBuf,
  /// Address returned for names under the domain suffix. `127.0.0.1` if `None`.
  pub local_ip: Option<Ipv4Addr>,
  /// Ports forwarded to the instance named by the sniffed hostname
  pub global_ports: Vec<u16>,
  /// Per-instance configurations, in configuration order
  pub instances: Vec<(String, InstanceConfig)>,
  /// Whether the process is run in background. Consumed by the process manager.
  pub daemon: bool,
  /// Virtualization tool command
  pub multipass_bin: PathBuf,
  /// Address the TCP proxies listen on
  pub listen_ip: IpAddr,
  /// TCP backlog size
  pub tcp_backlog: u32,
  /// Max TCP concurrent connections in total of all spawned TCP proxies
  pub tcp_max_connections: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      domain: DEFAULT_DOMAIN.to_string(),
      dns_port: DEFAULT_DNS_PORT,
      dns_upstream: None,
      timeout_ms: DEFAULT_TIMEOUT_MSEC,
      resolver_dir: PathBuf::from(DEFAULT_RESOLVER_DIR),
      local_ip: None,
      global_ports: STANDARD_PORTS.to_vec(),
      instances: Vec::new(),
      daemon: false,
      multipass_bin: PathBuf::from(DEFAULT_MULTIPASS_BIN),
      listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
      tcp_backlog: TCP_BACKLOG,
      tcp_max_connections: MAX_TCP_CONCURRENT_CONNECTIONS,
    }
  }
}

impl Config {
  /// Check the invariants the proxy relies on
  pub fn validate(&self) -> Result<(), ConfigValidationError> {
    let domain = self.domain.trim_matches('.');
    if domain.is_empty() || domain.contains("..") {
      return Err(ConfigValidationError::InvalidFieldValue {
        field: "domain".to_string(),
        value: self.domain.clone(),
        reason: "Domain suffix must be a non-empty DNS name".to_string(),
      });
    }
    validate_port("dns_port", self.dns_port)?;
    validate_timeout("timeout", self.timeout_ms)?;
    if self.tcp_backlog == 0 {
      return Err(ConfigValidationError::InvalidFieldValue {
        field: "tcp_backlog".to_string(),
        value: "0".to_string(),
        reason: "TCP backlog cannot be 0".to_string(),
      });
    }
    if self.tcp_max_connections == 0 {
      return Err(ConfigValidationError::InvalidFieldValue {
        field: "tcp_max_connections".to_string(),
        value: "0".to_string(),
        reason: "Max connections cannot be 0".to_string(),
      });
    }
    for port in &self.global_ports {
      validate_port("global_ports", *port)?;
    }

    // A port owned by two instances has no defined winner
    let mut owners: HashMap<u16, &str> = HashMap::new();
    for (name, instance) in &self.instances {
      if let Some(timeout) = instance.timeout_ms {
        validate_timeout(&format!("instances.{name}.timeout"), timeout)?;
      }
      for port in &instance.ports {
        validate_port(&format!("instances.{name}.ports"), *port)?;
        match owners.get(port) {
          Some(first) if *first != name.as_str() => {
            return Err(ConfigValidationError::ConflictingInstancePort {
              port: *port,
              first: first.to_string(),
              second: name.clone(),
            });
          }
          _ => {
            owners.insert(*port, name.as_str());
          }
        }
      }
    }
    Ok(())
  }

  /// De-duplicated ports to listen on: standard ports, then global ports, then per-instance ports
  pub fn listen_ports(&self) -> Vec<u16> {
    let mut ports = Vec::new();
    let all = STANDARD_PORTS
      .iter()
      .chain(self.global_ports.iter())
      .chain(self.instances.iter().flat_map(|(_, i)| i.ports.iter()));
    for port in all {
      if !ports.contains(port) {
        ports.push(*port);
      }
    }
    ports
  }

  /// Dial timeout for the instance: its own if configured, else the global one
  pub fn timeout_for(&self, instance: &str) -> u64 {
    self
      .instances
      .iter()
      .find(|(name, _)| name == instance)
      .and_then(|(_, i)| i.timeout_ms)
      .unwrap_or(self.timeout_ms)
  }

  /// Address answered for names under the domain suffix
  pub fn answer_ip(&self) -> Ipv4Addr {
    self.local_ip.unwrap_or(Ipv4Addr::LOCALHOST)
  }

  /// Domain suffix without surrounding dots, lowercased
  pub fn normalized_domain(&self) -> String {
    self.domain.trim_matches('.').to_ascii_lowercase()
  }
}

fn validate_port(field: &str, port: u16) -> Result<(), ConfigValidationError> {
  if port == 0 {
    return Err(ConfigValidationError::InvalidFieldValue {
      field: field.to_string(),
      value: port.to_string(),
      reason: "Port cannot be 0".to_string(),
    });
  }
  Ok(())
}

fn validate_timeout(field: &str, timeout: u64) -> Result<(), ConfigValidationError> {
  if timeout == 0 {
    return Err(ConfigValidationError::InvalidFieldValue {
      field: field.to_string(),
      value: timeout.to_string(),
      reason: "Timeout must be at least 1ms".to_string(),
    });
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn instance(ports: &[u16], timeout_ms: Option<u64>) -> InstanceConfig {
    InstanceConfig {
      ports: ports.to_vec(),
      timeout_ms,
    }
  }

  #[test]
  fn test_default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.dns_port, 5355);
    assert_eq!(config.domain, "multipass");
    assert_eq!(config.answer_ip(), Ipv4Addr::LOCALHOST);
  }

  #[test]
  fn test_listen_ports_dedup() {
    let config = Config {
      global_ports: vec![8010, 443, 8010],
      instances: vec![
        ("x".to_string(), instance(&[9000, 8010], None)),
        ("y".to_string(), instance(&[3000, 80], None)),
      ],
      ..Default::default()
    };
    assert_eq!(config.listen_ports(), vec![80, 443, 8010, 9000, 3000]);
  }

  #[test]
  fn test_timeout_for() {
    let config = Config {
      timeout_ms: 5000,
      instances: vec![
        ("slow".to_string(), instance(&[3000], Some(10000))),
        ("plain".to_string(), instance(&[3001], None)),
      ],
      ..Default::default()
    };
    assert_eq!(config.timeout_for("slow"), 10000);
    assert_eq!(config.timeout_for("plain"), 5000);
    assert_eq!(config.timeout_for("absent"), 5000);
  }

  #[test]
  fn test_conflicting_instance_ports() {
    let config = Config {
      instances: vec![
        ("a".to_string(), instance(&[9000], None)),
        ("b".to_string(), instance(&[9001, 9000], None)),
      ],
      ..Default::default()
    };
    assert_eq!(
      config.validate(),
      Err(ConfigValidationError::ConflictingInstancePort {
        port: 9000,
        first: "a".to_string(),
        second: "b".to_string(),
      })
    );

    // Overlap with the global list is allowed
    let config = Config {
      global_ports: vec![9000],
      instances: vec![("a".to_string(), instance(&[9000, 9000], None))],
      ..Default::default()
    };
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_invalid_fields() {
    let config = Config {
      domain: ".".to_string(),
      ..Default::default()
    };
    assert!(config.validate().is_err());

    let config = Config {
      global_ports: vec![0],
      ..Default::default()
    };
    assert!(config.validate().is_err());

    let config = Config {
      instances: vec![("a".to_string(), instance(&[3000], Some(0)))],
      ..Default::default()
    };
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_normalized_domain() {
    let config = Config {
      domain: ".MultiPass.".to_string(),
      ..Default::default()
    };
    assert_eq!(config.normalized_domain(), "multipass");
  }
}
