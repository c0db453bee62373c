//! UDP socket plumbing: binding, name resolution, and the socket options
//! the transport cares about (DF bit, kernel receive buffer).
//!
//! The option setters are best-effort: they return whether the option
//! took, and callers degrade gracefully (MTU discovery is skipped when the
//! DF bit cannot be set).

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use tracing::debug;

/// Bind a UDP socket for the chosen address family, requesting the given
/// kernel receive buffer. `port` 0 binds an ephemeral port.
pub fn bind_udp(support_ipv6: bool, port: u16, recv_buffer_bytes: usize) -> io::Result<UdpSocket> {
    let addr: SocketAddr = if support_ipv6 {
        (Ipv6Addr::UNSPECIFIED, port).into()
    } else {
        (Ipv4Addr::UNSPECIFIED, port).into()
    };
    let socket = UdpSocket::bind(addr)?;
    if !set_recv_buffer(&socket, recv_buffer_bytes) {
        debug!(recv_buffer_bytes, "kernel receive buffer request ignored");
    }
    Ok(socket)
}

/// Resolve `hostname:port`, keeping only addresses the socket family can
/// reach.
pub fn resolve(hostname: &str, port: u16, support_ipv6: bool) -> Vec<SocketAddr> {
    match (hostname, port).to_socket_addrs() {
        Ok(addrs) => addrs
            .filter(|addr| if support_ipv6 { addr.is_ipv6() } else { addr.is_ipv4() })
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Set or clear the don't-fragment bit. Returns false where unsupported.
#[cfg(target_os = "linux")]
pub fn set_dont_fragment(socket: &UdpSocket, on: bool) -> bool {
    use std::os::unix::io::AsRawFd;
    let value: libc::c_int = if on {
        libc::IP_PMTUDISC_DO
    } else {
        libc::IP_PMTUDISC_DONT
    };
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_MTU_DISCOVER,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    rc == 0
}

/// Set or clear the don't-fragment bit. Returns false where unsupported.
#[cfg(not(target_os = "linux"))]
pub fn set_dont_fragment(_socket: &UdpSocket, _on: bool) -> bool {
    false
}

/// Request a kernel receive buffer size. Returns false where unsupported.
#[cfg(unix)]
pub fn set_recv_buffer(socket: &UdpSocket, bytes: usize) -> bool {
    use std::os::unix::io::AsRawFd;
    let value = bytes as libc::c_int;
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    rc == 0
}

/// Request a kernel receive buffer size. Returns false where unsupported.
#[cfg(not(unix))]
pub fn set_recv_buffer(_socket: &UdpSocket, _bytes: usize) -> bool {
    false
}
