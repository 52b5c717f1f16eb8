// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Listening endpoints: TCP or UNIX domain sockets, with the stale-socket cleanup ported from
//! `server-generic.c`'s `is_unix_socket_already_used`/`unix_server_start`.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;

use mio::event::Source;
use mio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use mio::{Interest, Registry, Token};
use tracing::info;

/// The peer address of an accepted connection.
#[derive(Debug, Clone)]
pub enum PeerAddr {
    /// A TCP peer.
    Tcp(SocketAddr),
    /// A UNIX domain socket peer (often unnamed).
    Unix,
}

/// A listening socket, TCP or UNIX domain.
pub enum ListenEndpoint {
    /// Listening for TCP connections.
    Tcp(TcpListener),
    /// Listening for UNIX domain connections.
    Unix(UnixListener),
}

/// A stream accepted from a [`ListenEndpoint`].
pub enum AcceptedStream {
    /// A TCP stream.
    Tcp(TcpStream),
    /// A UNIX domain stream.
    Unix(UnixStream),
}

impl fmt::Debug for AcceptedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceptedStream::Tcp(_) => f.write_str("AcceptedStream::Tcp"),
            AcceptedStream::Unix(_) => f.write_str("AcceptedStream::Unix"),
        }
    }
}

impl Read for AcceptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            AcceptedStream::Tcp(s) => s.read(buf),
            AcceptedStream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for AcceptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            AcceptedStream::Tcp(s) => s.write(buf),
            AcceptedStream::Unix(s) => s.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            AcceptedStream::Tcp(s) => s.flush(),
            AcceptedStream::Unix(s) => s.flush(),
        }
    }
}

impl Source for AcceptedStream {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            AcceptedStream::Tcp(s) => s.register(registry, token, interests),
            AcceptedStream::Unix(s) => s.register(registry, token, interests),
        }
    }
    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            AcceptedStream::Tcp(s) => s.reregister(registry, token, interests),
            AcceptedStream::Unix(s) => s.reregister(registry, token, interests),
        }
    }
    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            AcceptedStream::Tcp(s) => s.deregister(registry),
            AcceptedStream::Unix(s) => s.deregister(registry),
        }
    }
}

impl ListenEndpoint {
    /// Binds a TCP listener.
    pub fn bind_tcp(addr: SocketAddr) -> io::Result<Self> {
        Ok(ListenEndpoint::Tcp(TcpListener::bind(addr)?))
    }

    /// Binds a UNIX domain socket listener at `path`, removing a stale socket file left behind by
    /// a manager that didn't shut down cleanly.
    ///
    /// Ported from `is_unix_socket_already_used`: attempt to connect to `path` first. If that
    /// succeeds, another process is already listening there and we must not steal the socket. If
    /// it fails, the file (if any) is a stale leftover; unlink it and bind fresh.
    pub fn bind_unix(path: &Path) -> io::Result<Self> {
        if StdUnixStream::connect(path).is_ok() {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{} is already in use by another process", path.display()),
            ));
        }

        if path.exists() {
            info!(path = %path.display(), "removing stale UNIX socket");
            std::fs::remove_file(path)?;
        }

        Ok(ListenEndpoint::Unix(UnixListener::bind(path)?))
    }

    /// Accepts one pending connection, if any.
    pub fn accept(&mut self) -> io::Result<(AcceptedStream, PeerAddr)> {
        match self {
            ListenEndpoint::Tcp(l) => {
                let (stream, addr) = l.accept()?;
                Ok((AcceptedStream::Tcp(stream), PeerAddr::Tcp(addr)))
            }
            ListenEndpoint::Unix(l) => {
                let (stream, _addr) = l.accept()?;
                Ok((AcceptedStream::Unix(stream), PeerAddr::Unix))
            }
        }
    }
}

impl Source for ListenEndpoint {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            ListenEndpoint::Tcp(l) => l.register(registry, token, interests),
            ListenEndpoint::Unix(l) => l.register(registry, token, interests),
        }
    }
    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            ListenEndpoint::Tcp(l) => l.reregister(registry, token, interests),
            ListenEndpoint::Unix(l) => l.reregister(registry, token, interests),
        }
    }
    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            ListenEndpoint::Tcp(l) => l.deregister(registry),
            ListenEndpoint::Unix(l) => l.deregister(registry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_unix_removes_stale_socket_file() {
        let dir = std::env::temp_dir().join(format!("relay-core-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("stale.sock");
        std::fs::write(&path, b"not a socket").unwrap();

        let endpoint = ListenEndpoint::bind_unix(&path);
        assert!(endpoint.is_ok());

        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(&dir).ok();
    }
}
