//! Interface-scoped sockets.
//!
//! AirDrop addresses are IPv6 link-local and travel over a single named
//! interface (Apple's AWDL virtual interface on real devices, any IPv6
//! capable interface for interop testing). Connecting to a link-local
//! address without a zone id is meaningless to the kernel, so every
//! socket built here is explicitly scoped to `interface_name`.

use crate::error::{AirDropError, AirDropResult};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{Ipv6Addr, SocketAddrV6};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

/// Darwin's AWDL peer-to-peer socket option: SOL_SOCKET / SO_RECV_ANYIF-ish
/// knob that permits traffic over the `awdl0` interface. Reverse engineered
/// from macOS `sharingd`; a no-op (and harmless) on platforms other than
/// the one it targets.
const SO_AWDL_UNRESTRICTED: libc::c_int = 0x1104;

fn is_link_local_v6(addr: &Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}

/// Resolve the IPv6 address of a named interface, preferring a link-local
/// address (the kind AWDL and similar peer-to-peer interfaces carry).
pub fn ipv6_address_of(interface_name: &str) -> AirDropResult<Ipv6Addr> {
    let interfaces = if_addrs::get_if_addrs().map_err(AirDropError::Io)?;

    let mut candidate = None;
    for iface in interfaces.iter().filter(|i| i.name == interface_name) {
        if let std::net::IpAddr::V6(addr) = iface.addr.ip() {
            if is_link_local_v6(&addr) {
                return Ok(addr);
            }
            candidate.get_or_insert(addr);
        }
    }

    candidate.ok_or_else(|| {
        if interface_name == "awdl0" {
            AirDropError::InterfaceUnavailable(format!(
                "{interface_name} has no IPv6 address; make sure an AWDL-compatible link (e.g. owl) is running"
            ))
        } else {
            AirDropError::InterfaceUnavailable(interface_name.to_string())
        }
    })
}

fn scope_id_of(interface_name: &str) -> AirDropResult<u32> {
    let c_name = std::ffi::CString::new(interface_name)
        .map_err(|e| AirDropError::ProtocolViolation(e.to_string()))?;
    let idx = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if idx == 0 {
        return Err(AirDropError::InterfaceUnavailable(interface_name.to_string()));
    }
    Ok(idx)
}

/// Append the interface as an IPv6 zone id (`%iface`) the way Python's
/// `HTTPSConnectionAWDL` does: only if `host` parses as an IPv6 literal and
/// doesn't already carry a zone id.
pub fn append_zone_id(host: &str, interface_name: &str) -> String {
    if host.contains('%') {
        return host.to_string();
    }
    match host.parse::<Ipv6Addr>() {
        Ok(_) => format!("{host}%{interface_name}"),
        Err(_) => host.to_string(),
    }
}

fn apply_awdl_option(socket: &Socket, interface_name: &str) {
    use std::os::unix::io::AsRawFd;

    if interface_name != "awdl0" {
        return;
    }
    let value: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            SO_AWDL_UNRESTRICTED,
            &value as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        warn!(
            "failed to set AWDL socket option on {}: {}",
            interface_name,
            std::io::Error::last_os_error()
        );
    }
}

/// Connect a TCP stream to `host:port`, scoped to `interface_name`.
///
/// `host` may be a bare link-local literal (zone id is appended) or already
/// carry one. Candidate addresses are tried in order; the first successful
/// connect wins, mirroring `getaddrinfo`-iterate-and-try semantics.
pub async fn connect(host: &str, port: u16, interface_name: &str) -> AirDropResult<TcpStream> {
    let scoped_host = append_zone_id(host, interface_name);
    let addr: Ipv6Addr = scoped_host
        .split('%')
        .next()
        .unwrap_or(&scoped_host)
        .parse()
        .map_err(|_| AirDropError::PeerUnreachable(format!("invalid address {scoped_host}")))?;
    let scope_id = scope_id_of(interface_name)?;
    let sockaddr = SocketAddrV6::new(addr, port, 0, scope_id);

    debug!("connecting to {} via {}", sockaddr, interface_name);

    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))
        .map_err(AirDropError::Io)?;
    apply_awdl_option(&socket, interface_name);
    socket.set_nonblocking(true).map_err(AirDropError::Io)?;

    match socket.connect(&SockAddr::from(std::net::SocketAddr::V6(sockaddr))) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) => return Err(AirDropError::PeerUnreachable(e.to_string())),
    }

    let std_stream: std::net::TcpStream = socket.into();
    let stream = TcpStream::from_std(std_stream).map_err(AirDropError::Io)?;
    stream.writable().await.map_err(AirDropError::Io)?;
    if let Some(err) = stream.take_error().map_err(AirDropError::Io)? {
        return Err(AirDropError::PeerUnreachable(err.to_string()));
    }
    Ok(stream)
}

/// Bind a listening socket on `port` scoped to `interface_name`, retrying on
/// successive ports if the requested one is already bound (bounded window).
pub async fn listen(port: u16, interface_name: &str) -> AirDropResult<(TcpListener, u16)> {
    let scope_id = scope_id_of(interface_name).unwrap_or(0);
    const MAX_RETRIES: u16 = 10;

    let mut last_err = None;
    for attempt in 0..MAX_RETRIES {
        let candidate_port = port + attempt;
        let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))
            .map_err(AirDropError::Io)?;
        socket.set_reuse_address(true).map_err(AirDropError::Io)?;
        apply_awdl_option(&socket, interface_name);

        let addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, candidate_port, 0, scope_id);
        match socket.bind(&SockAddr::from(std::net::SocketAddr::V6(addr))) {
            Ok(()) => {
                socket.listen(128).map_err(AirDropError::Io)?;
                socket.set_nonblocking(true).map_err(AirDropError::Io)?;
                let std_listener: std::net::TcpListener = socket.into();
                let listener = TcpListener::from_std(std_listener).map_err(AirDropError::Io)?;
                debug!("listening on port {} ({})", candidate_port, interface_name);
                return Ok((listener, candidate_port));
            }
            Err(e) => {
                warn!("port {} unavailable: {}", candidate_port, e);
                last_err = Some(e);
            }
        }
    }

    Err(AirDropError::Io(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::AddrInUse, "no free port found")
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_id_is_appended_only_to_bare_ipv6_literals() {
        assert_eq!(append_zone_id("fe80::1", "awdl0"), "fe80::1%awdl0");
        assert_eq!(append_zone_id("fe80::1%en0", "awdl0"), "fe80::1%en0");
        assert_eq!(append_zone_id("somehost.local", "awdl0"), "somehost.local");
    }

    #[test]
    fn link_local_detection() {
        assert!(is_link_local_v6(&"fe80::1".parse().unwrap()));
        assert!(!is_link_local_v6(&"2001:db8::1".parse().unwrap()));
    }
}
