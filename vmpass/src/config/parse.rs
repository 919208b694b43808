use anyhow::anyhow;
use clap::{Arg, ArgAction, ArgMatches, value_parser};
use std::net::Ipv4Addr;

/// Services run by this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
  /// TCP proxy and DNS responder
  All,
  /// TCP proxy only
  Proxy,
  /// DNS responder only
  Dns,
}

impl Service {
  pub fn runs_proxy(&self) -> bool {
    matches!(self, Self::All | Self::Proxy)
  }

  pub fn runs_dns(&self) -> bool {
    matches!(self, Self::All | Self::Dns)
  }
}

/// Parsed options. Values given here override the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opts {
  /// Configuration file path
  pub config_file_path: Option<String>,
  pub dns_port: Option<u16>,
  pub domain: Option<String>,
  pub local_ip: Option<Ipv4Addr>,
  pub global_ports: Option<Vec<u16>>,
  pub timeout_ms: Option<u64>,
  pub service: Service,
}

fn command() -> clap::Command {
  let _ = include_str!("../../Cargo.toml");
  clap::command!()
    .arg(
      Arg::new("config_file")
        .long("config")
        .short('c')
        .value_name("FILE")
        .help("Configuration file path like ./config.toml. Defaults are used if not specified."),
    )
    .arg(
      Arg::new("dns_port")
        .long("dns-port")
        .value_name("PORT")
        .value_parser(value_parser!(u16).range(1..))
        .help("Port of the DNS responder, bound on 127.0.0.1"),
    )
    .arg(
      Arg::new("domain")
        .long("domain")
        .short('D')
        .value_name("DOMAIN")
        .help("Domain suffix resolved to the local machine, like 'multipass' for <instance>.multipass"),
    )
    .arg(
      Arg::new("ip")
        .long("ip")
        .short('i')
        .value_name("IPV4")
        .value_parser(value_parser!(Ipv4Addr))
        .help("Address answered for names under the domain suffix instead of 127.0.0.1"),
    )
    .arg(
      Arg::new("ports")
        .long("ports")
        .value_name("PORTS")
        .value_delimiter(',')
        .value_parser(value_parser!(u16).range(1..))
        .action(ArgAction::Append)
        .help("Comma-separated global ports, replacing the configured ones"),
    )
    .arg(
      Arg::new("timeout")
        .long("timeout")
        .value_name("MSEC")
        .value_parser(value_parser!(u64).range(1..))
        .help("Backend connection timeout in milliseconds"),
    )
    .arg(
      Arg::new("service")
        .long("service")
        .value_name("SERVICE")
        .value_parser(["all", "proxy", "dns"])
        .default_value("all")
        .help("Services to run in this process"),
    )
}

fn opts_from_matches(matches: &ArgMatches) -> Result<Opts, anyhow::Error> {
  let service = match matches.get_one::<String>("service").map(String::as_str) {
    Some("all") | None => Service::All,
    Some("proxy") => Service::Proxy,
    Some("dns") => Service::Dns,
    Some(other) => return Err(anyhow!("Unknown service: {other}")),
  };

  Ok(Opts {
    config_file_path: matches.get_one::<String>("config_file").cloned(),
    dns_port: matches.get_one::<u16>("dns_port").copied(),
    domain: matches.get_one::<String>("domain").cloned(),
    local_ip: matches.get_one::<Ipv4Addr>("ip").copied(),
    global_ports: matches.get_many::<u16>("ports").map(|ports| ports.copied().collect()),
    timeout_ms: matches.get_one::<u64>("timeout").copied(),
    service,
  })
}

/// Parse arg values passed from cli
pub fn parse_opts() -> Result<Opts, anyhow::Error> {
  let matches = command().get_matches();
  opts_from_matches(&matches)
}
