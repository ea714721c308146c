//! Readiness-based I/O helpers for shared `TcpStream`s.
//!
//! Data and RC sockets are held as `Arc<TcpStream>` so relays, watchers
//! and bundles can read them without transferring ownership. These
//! helpers drive `readable()`/`try_read` and `writable()`/`try_write`
//! so they work through a shared reference.

use std::io;

use tokio::net::TcpStream;

/// Read chunk size used by relays and stream readers.
pub const CHUNK_SIZE: usize = 1024;

/// Read one chunk of available bytes into `buf`.
///
/// Returns `Ok(0)` when the peer has closed the connection.
pub async fn read_chunk(sock: &TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        sock.readable().await?;
        match sock.try_read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Write all of `data`, waiting for writability as needed.
pub async fn write_all(sock: &TcpStream, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        sock.writable().await?;
        match sock.try_write(data) {
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
