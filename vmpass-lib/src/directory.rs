//! Instance directory: names and IPv4 addresses of the VM instances managed by the virtualization tool

use crate::trace::*;
use serde::Deserialize;
use std::{collections::HashMap, net::Ipv4Addr, path::PathBuf, process::Output};
use tokio::process::Command;

/// Errors from the instance directory. They all end up as a failed lookup.
#[derive(thiserror::Error, Debug)]
pub enum DirectoryError {
  #[error("Failed to run {0}: {1}")]
  SpawnFailed(String, std::io::Error),

  #[error("{command} exited with {status}: {stderr}")]
  CommandFailed { command: String, status: String, stderr: String },

  #[error("Malformed output: {0}")]
  MalformedOutput(#[from] serde_json::Error),

  #[error("Instance {0} not found or without IPv4 address")]
  NoAddress(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Running instance as listed by the directory
pub struct RunningInstance {
  pub name: String,
  pub ip: Ipv4Addr,
}

/// Source of instance names and addresses
#[async_trait::async_trait]
pub trait InstanceDirectory: Send + Sync {
  /// List running instances having an IPv4 address
  async fn list(&self) -> Result<Vec<RunningInstance>, DirectoryError>;

  /// First IPv4 address of the named instance
  async fn info(&self, name: &str) -> Result<Ipv4Addr, DirectoryError>;
}

/* ---------------------------------------------------------- */
#[derive(Deserialize, Debug)]
struct InfoOutput {
  info: HashMap<String, InstanceEntry>,
}

#[derive(Deserialize, Debug)]
struct InstanceEntry {
  #[serde(default)]
  name: Option<String>,
  #[serde(default)]
  ipv4: Vec<String>,
}

impl InstanceEntry {
  fn first_ipv4(&self) -> Option<Ipv4Addr> {
    self.ipv4.iter().find_map(|ip| ip.parse().ok())
  }
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
/// `list` is an array of entries, but a name-keyed object is accepted as well
enum ListEntries {
  Array(Vec<InstanceEntry>),
  Map(HashMap<String, InstanceEntry>),
}

#[derive(Deserialize, Debug)]
struct ListOutput {
  list: ListEntries,
}

/// Parse the JSON output of `multipass info <name> --format json`
pub(crate) fn parse_info(name: &str, json: &[u8]) -> Result<Ipv4Addr, DirectoryError> {
  let output: InfoOutput = serde_json::from_slice(json)?;
  output
    .info
    .get(name)
    .and_then(InstanceEntry::first_ipv4)
    .ok_or_else(|| DirectoryError::NoAddress(name.to_string()))
}

/// Parse the JSON output of `multipass list --format json`, skipping instances without IPv4 address
pub(crate) fn parse_list(json: &[u8]) -> Result<Vec<RunningInstance>, DirectoryError> {
  let output: ListOutput = serde_json::from_slice(json)?;
  let entries: Vec<(String, InstanceEntry)> = match output.list {
    ListEntries::Array(entries) => entries
      .into_iter()
      .filter_map(|e| e.name.clone().map(|name| (name, e)))
      .collect(),
    ListEntries::Map(entries) => {
      let mut entries = entries.into_iter().collect::<Vec<_>>();
      entries.sort_by(|a, b| a.0.cmp(&b.0));
      entries
    }
  };
  Ok(
    entries
      .into_iter()
      .filter_map(|(name, entry)| entry.first_ipv4().map(|ip| RunningInstance { name, ip }))
      .collect(),
  )
}

/* ---------------------------------------------------------- */
#[derive(Debug, Clone)]
/// Instance directory backed by the `multipass` command
pub struct MultipassDirectory {
  bin: PathBuf,
}

impl MultipassDirectory {
  pub fn new(bin: impl Into<PathBuf>) -> Self {
    Self { bin: bin.into() }
  }

  /// Run the command with the arguments passed as-is, never through a shell
  async fn run(&self, args: &[&str]) -> Result<Vec<u8>, DirectoryError> {
    let command = format!("{} {}", self.bin.display(), args.join(" "));
    debug!("Running {command}");
    let Output { status, stdout, stderr } = Command::new(&self.bin)
      .args(args)
      .kill_on_drop(true)
      .output()
      .await
      .map_err(|e| DirectoryError::SpawnFailed(command.clone(), e))?;
    if !status.success() {
      return Err(DirectoryError::CommandFailed {
        command,
        status: status.to_string(),
        stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
      });
    }
    Ok(stdout)
  }
}

#[async_trait::async_trait]
impl InstanceDirectory for MultipassDirectory {
  async fn list(&self) -> Result<Vec<RunningInstance>, DirectoryError> {
    let stdout = self.run(&["list", "--format", "json"]).await?;
    parse_list(&stdout)
  }

  async fn info(&self, name: &str) -> Result<Ipv4Addr, DirectoryError> {
    let stdout = self.run(&["info", name, "--format", "json"]).await?;
    parse_info(name, &stdout)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_info() {
    let json = br#"{
      "errors": [],
      "info": {
        "dev": {
          "cpu_count": "2",
          "ipv4": ["10.0.0.5", "172.17.0.1"],
          "release": "Ubuntu 24.04 LTS",
          "state": "Running"
        }
      }
    }"#;
    assert_eq!(parse_info("dev", json).unwrap(), Ipv4Addr::new(10, 0, 0, 5));
    assert!(matches!(parse_info("other", json), Err(DirectoryError::NoAddress(_))));
  }

  #[test]
  fn test_parse_info_stopped() {
    let json = br#"{"errors": [], "info": {"dev": {"ipv4": [], "state": "Stopped"}}}"#;
    assert!(matches!(parse_info("dev", json), Err(DirectoryError::NoAddress(_))));
  }

  #[test]
  fn test_parse_malformed() {
    assert!(matches!(parse_info("dev", b"oops"), Err(DirectoryError::MalformedOutput(_))));
    assert!(matches!(parse_list(b"{}"), Err(DirectoryError::MalformedOutput(_))));
  }

  #[test]
  fn test_parse_list() {
    let json = br#"{
      "list": [
        {"ipv4": ["10.0.0.5"], "name": "dev", "release": "24.04 LTS", "state": "Running"},
        {"ipv4": [], "name": "old", "release": "22.04 LTS", "state": "Stopped"},
        {"ipv4": ["10.0.0.7"], "name": "web", "release": "24.04 LTS", "state": "Running"}
      ]
    }"#;
    let list = parse_list(json).unwrap();
    assert_eq!(
      list,
      vec![
        RunningInstance {
          name: "dev".to_string(),
          ip: Ipv4Addr::new(10, 0, 0, 5)
        },
        RunningInstance {
          name: "web".to_string(),
          ip: Ipv4Addr::new(10, 0, 0, 7)
        },
      ]
    );
  }

  #[test]
  fn test_parse_list_keyed_by_name() {
    let json = br#"{"list": {"web": {"ipv4": ["10.0.0.7"]}, "dev": {"ipv4": ["10.0.0.5"]}}}"#;
    let names = parse_list(json).unwrap().into_iter().map(|i| i.name).collect::<Vec<_>>();
    assert_eq!(names, vec!["dev", "web"]);
  }

  #[tokio::test]
  async fn test_missing_binary() {
    let directory = MultipassDirectory::new("/nonexistent/multipass");
    assert!(matches!(directory.info("dev").await, Err(DirectoryError::SpawnFailed(..))));
  }
}
