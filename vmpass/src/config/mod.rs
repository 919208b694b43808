mod parse;
mod toml;

pub(crate) use self::{
  parse::{Opts, Service, parse_opts},
  toml::ConfigToml,
};
use vmpass_lib::Config;

/// Configuration from the file if given, else the defaults, then overridden by the command line
pub(crate) fn build_config(opts: &Opts) -> Result<Config, anyhow::Error> {
  let config_toml = match &opts.config_file_path {
    Some(path) => ConfigToml::new(path)?,
    None => ConfigToml::default(),
  };
  let mut config = Config::try_from(config_toml)?;

  if let Some(dns_port) = opts.dns_port {
    config.dns_port = dns_port;
  }
  if let Some(domain) = &opts.domain {
    config.domain = domain.clone();
  }
  if let Some(local_ip) = opts.local_ip {
    config.local_ip = Some(local_ip);
  }
  if let Some(global_ports) = &opts.global_ports {
    let mut ports = global_ports.clone();
    let mut seen = std::collections::HashSet::new();
    ports.retain(|port| seen.insert(*port));
    config.global_ports = ports;
  }
  if let Some(timeout_ms) = opts.timeout_ms {
    config.timeout_ms = timeout_ms;
  }

  config.validate()?;
  Ok(config)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cli_overrides_defaults() {
    let opts = Opts {
      config_file_path: None,
      dns_port: Some(53),
      domain: Some("vm".to_string()),
      local_ip: None,
      global_ports: Some(vec![8080, 8080, 9000]),
      timeout_ms: Some(2000),
      service: Service::All,
    };
    let config = build_config(&opts).unwrap();
    assert_eq!(config.dns_port, 53);
    assert_eq!(config.domain, "vm");
    assert_eq!(config.global_ports, vec![8080, 9000]);
    assert_eq!(config.timeout_ms, 2000);
    assert_eq!(config.listen_ports(), vec![80, 443, 8080, 9000]);
  }

  #[test]
  fn test_cli_fixes_invalid_file_value() {
    let path = std::env::temp_dir().join(format!("vmpass-timeout-{}.toml", std::process::id()));
    std::fs::write(&path, "timeout = 0\n").unwrap();
    let mut opts = Opts {
      config_file_path: Some(path.to_string_lossy().into_owned()),
      dns_port: None,
      domain: None,
      local_ip: None,
      global_ports: None,
      timeout_ms: None,
      service: Service::All,
    };
    assert!(build_config(&opts).is_err());

    opts.timeout_ms = Some(3000);
    let config = build_config(&opts).unwrap();
    assert_eq!(config.timeout_ms, 3000);
    let _ = std::fs::remove_file(&path);
  }

  #[test]
  fn test_missing_file() {
    let opts = Opts {
      config_file_path: Some("/nonexistent/vmpass.toml".to_string()),
      dns_port: None,
      domain: None,
      local_ip: None,
      global_ports: None,
      timeout_ms: None,
      service: Service::Proxy,
    };
    assert!(build_config(&opts).is_err());
  }
}
