use crate::{probe::SniffResult, trace::info};
use std::net::SocketAddr;

/// Handle log for probed protocol, source, routed instance and backend sockets
pub(crate) fn access_log(proto: &SniffResult, src_addr: &SocketAddr, instance: &str, dst_addr: &SocketAddr) {
  info!(name: crate::constants::log_event_names::ACCESS_LOG, "{}: {} -> {} ({})", proto, src_addr, instance, dst_addr);
}
