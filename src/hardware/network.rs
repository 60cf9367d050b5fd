//! Local TCP port availability.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

/// Whether something is already listening on `port`.
///
/// Tries to bind first. Unprivileged processes cannot bind ports below 1024,
/// so a permission error falls back to a connect probe on loopback.
pub fn is_port_in_use(port: u16) -> bool {
    match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)) {
        Ok(_listener) => false,
        Err(e) if e.kind() == ErrorKind::AddrInUse => true,
        Err(_) => {
            let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
            TcpStream::connect_timeout(&addr, Duration::from_millis(500)).is_ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_port_is_in_use() {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_port_in_use(port));
    }

    #[test]
    fn test_released_port_is_free() {
        let port = {
            let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(!is_port_in_use(port));
    }
}
