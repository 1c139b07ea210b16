//! RAII wrapper over a connected or listening socket descriptor.

use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;

use super::sys;

/// Owns the descriptor: dropping the socket closes it.
pub(crate) struct Socket {
    fd: RawFd,
}

impl Socket {
    pub(crate) fn from_fd(fd: RawFd) -> Socket {
        Socket { fd }
    }

    /// Fresh non-blocking TCP socket for `addr`'s family.
    pub(crate) fn for_addr(addr: &SocketAddr) -> io::Result<Socket> {
        Ok(Socket {
            fd: sys::socket(sys::family_of(addr))?,
        })
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    /// Releases ownership of the descriptor without closing it.
    pub(crate) fn into_fd(self) -> RawFd {
        let fd = self.fd;
        std::mem::forget(self);
        fd
    }

    pub(crate) fn bind(&self, addr: &SocketAddr) -> io::Result<()> {
        sys::bind(self.fd, addr)
    }

    pub(crate) fn listen(&self) -> io::Result<()> {
        sys::listen(self.fd)
    }

    pub(crate) fn accept(&self) -> io::Result<(Socket, SocketAddr)> {
        let (fd, peer) = sys::accept(self.fd)?;
        Ok((Socket::from_fd(fd), peer))
    }

    pub(crate) fn shutdown_write(&self) {
        if let Err(e) = sys::shutdown_write(self.fd) {
            crate::error!("Socket::shutdown_write fd {}: {e}", self.fd);
        }
    }

    pub(crate) fn set_reuse_addr(&self, on: bool) {
        if let Err(e) = sys::set_reuse_addr(self.fd, on) {
            crate::error!("SO_REUSEADDR fd {}: {e}", self.fd);
        }
    }

    pub(crate) fn set_reuse_port(&self, on: bool) {
        if let Err(e) = sys::set_reuse_port(self.fd, on) {
            crate::error!("SO_REUSEPORT fd {}: {e}", self.fd);
        }
    }

    pub(crate) fn set_keep_alive(&self, on: bool) {
        if let Err(e) = sys::set_keep_alive(self.fd, on) {
            crate::error!("SO_KEEPALIVE fd {}: {e}", self.fd);
        }
    }

    pub(crate) fn set_tcp_no_delay(&self, on: bool) {
        if let Err(e) = sys::set_tcp_no_delay(self.fd, on) {
            crate::error!("TCP_NODELAY fd {}: {e}", self.fd);
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        sys::close(self.fd);
    }
}
