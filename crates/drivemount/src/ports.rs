//! Loopback port allocation
//!
//! Ports for the file-serving endpoint and the engine's remote-control
//! listener are harvested by binding `127.0.0.1:0` and reading back the
//! assigned port. The first listener is held open while the second binds so
//! the pair is guaranteed distinct.

use std::io;
use std::net::TcpListener;

/// The two loopback ports owned by one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    /// File-serving (WebDAV) endpoint port
    pub dav: u16,
    /// Engine remote-control port
    pub rc: u16,
}

/// Allocate a free loopback port.
pub fn free_port() -> io::Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Allocate two distinct free loopback ports.
pub fn allocate_pair() -> io::Result<PortPair> {
    let first = TcpListener::bind(("127.0.0.1", 0))?;
    let second = TcpListener::bind(("127.0.0.1", 0))?;
    let pair = PortPair {
        dav: first.local_addr()?.port(),
        rc: second.local_addr()?.port(),
    };
    Ok(pair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_ports_are_distinct() {
        let pair = allocate_pair().unwrap();
        assert_ne!(pair.dav, pair.rc);
    }

    #[test]
    fn allocated_ports_are_bindable() {
        let pair = allocate_pair().unwrap();
        TcpListener::bind(("127.0.0.1", pair.dav)).unwrap();
        TcpListener::bind(("127.0.0.1", pair.rc)).unwrap();
    }
}
