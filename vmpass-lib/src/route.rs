use crate::{
  config::Config,
  constants::{STANDARD_PORTS, UNKNOWN_INSTANCE},
};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Target of a connection, decided once right after sniffing
pub(crate) struct RouteDecision {
  /// Instance name, safe to pass to the instance directory
  pub(crate) instance: String,
  /// Backend port, always the listening port
  pub(crate) port: u16,
}

/// Keep only `[A-Za-z0-9_-]`
pub(crate) fn sanitize_instance_name(name: &str) -> String {
  name
    .chars()
    .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
    .collect()
}

/// Instance name from the first label of the hostname, or the placeholder that never resolves
fn instance_from_hostname(hostname: Option<&str>) -> String {
  hostname
    .and_then(|host| host.split('.').next())
    .map(sanitize_instance_name)
    .filter(|name| !name.is_empty())
    .unwrap_or_else(|| UNKNOWN_INSTANCE.to_string())
}

/// Decide the target instance and port from the listening port and the sniffed hostname.
///
/// Per-instance ports win over global ports, global ports over the standard ports 80/443.
pub(crate) fn route(listen_port: u16, hostname: Option<&str>, config: &Config) -> Option<RouteDecision> {
  if let Some((name, _)) = config.instances.iter().find(|(_, i)| i.ports.contains(&listen_port)) {
    return Some(RouteDecision {
      instance: sanitize_instance_name(name),
      port: listen_port,
    });
  }
  if config.global_ports.contains(&listen_port) || STANDARD_PORTS.contains(&listen_port) {
    return Some(RouteDecision {
      instance: instance_from_hostname(hostname),
      port: listen_port,
    });
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::InstanceConfig;

  fn config() -> Config {
    Config {
      global_ports: vec![8010, 9000],
      instances: vec![
        (
          "x".to_string(),
          InstanceConfig {
            ports: vec![9000],
            timeout_ms: None,
          },
        ),
        (
          "y".to_string(),
          InstanceConfig {
            ports: vec![3000],
            timeout_ms: None,
          },
        ),
      ],
      ..Default::default()
    }
  }

  #[test]
  fn test_sanitize() {
    assert_eq!(sanitize_instance_name("a!b@c"), "abc");
    assert_eq!(sanitize_instance_name("dev-box_01"), "dev-box_01");
    assert_eq!(sanitize_instance_name("$(rm -rf /)"), "rm-rf");
  }

  #[test]
  fn test_hostname_derived_instance() {
    let config = config();
    let decision = route(8010, Some("a!b@c.multipass"), &config).unwrap();
    assert_eq!(decision.instance, "abc");
    assert_eq!(decision.port, 8010);

    // Bare instance name without the suffix
    let decision = route(443, Some("dev"), &config).unwrap();
    assert_eq!(decision.instance, "dev");
  }

  #[test]
  fn test_per_instance_port_wins() {
    let config = config();
    let decision = route(9000, Some("other.multipass"), &config).unwrap();
    assert_eq!(
      decision,
      RouteDecision {
        instance: "x".to_string(),
        port: 9000
      }
    );
    assert_eq!(route(3000, None, &config).unwrap().instance, "y");
  }

  #[test]
  fn test_standard_ports_without_global() {
    let config = Config {
      global_ports: vec![],
      ..Default::default()
    };
    assert_eq!(route(80, Some("web.multipass"), &config).unwrap().instance, "web");
    assert_eq!(route(443, Some("web.multipass"), &config).unwrap().instance, "web");
  }

  #[test]
  fn test_unknown_placeholder() {
    let config = config();
    assert_eq!(route(80, None, &config).unwrap().instance, UNKNOWN_INSTANCE);
    assert_eq!(route(80, Some("!!!.multipass"), &config).unwrap().instance, UNKNOWN_INSTANCE);
  }

  #[test]
  fn test_no_route() {
    let config = config();
    assert_eq!(route(5000, Some("dev.multipass"), &config), None);
  }
}
