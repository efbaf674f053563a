// SPDX-License-Identifier: Apache-2.0

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use tower::BoxError;

// Connecting a UDP socket sends nothing; it only makes the kernel pick the
// outbound interface.
const ROUTE_PROBE: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 9);

/// The host's outbound IPv4 address, used as the `instance` label.
pub fn host_ipv4() -> Result<Ipv4Addr, BoxError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket
        .connect(ROUTE_PROBE)
        .map_err(|e| format!("unable to determine host address: {}", e))?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(ip) if usable(ip) => Ok(ip),
        ip => Err(format!("no usable IPv4 address found, got {}", ip).into()),
    }
}

fn usable(ip: Ipv4Addr) -> bool {
    !(ip.is_loopback() || ip.is_unspecified() || ip.is_link_local())
}

/// Resolve the `instance` label: the configured override, else the host address.
pub fn instance_label(configured: Option<&str>) -> Result<String, BoxError> {
    match configured.map(str::trim) {
        Some(instance) if !instance.is_empty() => Ok(instance.to_string()),
        _ => Ok(host_ipv4()?.to_string()),
    }
}
