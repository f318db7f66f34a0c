// src/conn.rs
use std::fmt;
use std::io::{self, Read, Write};
use std::ops::{Deref, DerefMut};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{PoolError, PoolResult};
use crate::pool::Shared;

/// A connection checked out of a [`Pool`](crate::Pool).
///
/// Dropping it, or calling [`release`](PooledConn::release), hands it back to
/// the pool. The pool decides whether it is parked idle or closed: it is
/// closed when it was marked unusable, when the idle store is full, or when
/// the pool has been torn down.
///
/// Derefs to the raw connection and forwards `Read`/`Write`.
pub struct PooledConn<C: AsRawFd + Send + 'static> {
    conn: Option<C>,
    fd: RawFd,
    pool: Weak<Shared<C>>,
    unusable: AtomicBool,
}

impl<C: AsRawFd + Send + 'static> PooledConn<C> {
    pub(crate) fn new(fd: RawFd, conn: C, pool: Weak<Shared<C>>) -> Self {
        Self {
            conn: Some(conn),
            fd,
            pool,
            unusable: AtomicBool::new(false),
        }
    }

    /// Descriptor captured when the connection was created.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Keep this connection out of the pool. Takes effect on release.
    pub fn mark_unusable(&self) {
        self.unusable.store(true, Ordering::Release);
    }

    pub fn is_unusable(&self) -> bool {
        self.unusable.load(Ordering::Acquire)
    }

    /// Return the connection to the pool, or close it.
    ///
    /// Fails with `Closed` when the pool is gone (the connection is closed
    /// anyway) and with `Io` when the liveness monitor refused it. A
    /// connection marked unusable is closed and always releases cleanly.
    pub fn release(mut self) -> PoolResult<()> {
        self.finish()
    }

    fn finish(&mut self) -> PoolResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };

        let pool = self.pool.upgrade();

        if self.is_unusable() {
            match pool {
                Some(pool) => pool.destroy(self.fd, conn),
                None => drop(conn),
            }
            return Ok(());
        }

        match pool {
            Some(pool) => pool.put(self.fd, conn),
            None => {
                drop(conn);
                Err(PoolError::Closed)
            }
        }
    }

    fn raw(&self) -> &C {
        self.conn
            .as_ref()
            .expect("pooled connection accessed after release")
    }

    fn raw_mut(&mut self) -> &mut C {
        self.conn
            .as_mut()
            .expect("pooled connection accessed after release")
    }
}

impl<C: AsRawFd + Send + 'static> Drop for PooledConn<C> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::debug!(fd = self.fd, error = %e, "connection closed on release");
        }
    }
}

impl<C: AsRawFd + Send + 'static> Deref for PooledConn<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.raw()
    }
}

impl<C: AsRawFd + Send + 'static> DerefMut for PooledConn<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.raw_mut()
    }
}

impl<C: AsRawFd + Send + 'static> AsRawFd for PooledConn<C> {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl<C: AsRawFd + Read + Send + 'static> Read for PooledConn<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.raw_mut().read(buf)
    }
}

impl<C: AsRawFd + Write + Send + 'static> Write for PooledConn<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.raw_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.raw_mut().flush()
    }
}

impl<C: AsRawFd + Send + 'static> fmt::Debug for PooledConn<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConn")
            .field("fd", &self.fd)
            .field("unusable", &self.is_unusable())
            .field("released", &self.conn.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_orphaned_connection_closes_on_release() {
        let (local, mut peer) = UnixStream::pair().unwrap();
        let fd = local.as_raw_fd();
        let conn = PooledConn::new(fd, local, Weak::new());

        assert!(matches!(conn.release(), Err(PoolError::Closed)));

        let mut buf = [0u8; 1];
        assert_eq!(peer.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_unusable_orphan_releases_cleanly() {
        let (local, mut peer) = UnixStream::pair().unwrap();
        let fd = local.as_raw_fd();
        let conn = PooledConn::new(fd, local, Weak::new());
        conn.mark_unusable();

        assert!(conn.release().is_ok());

        let mut buf = [0u8; 1];
        assert_eq!(peer.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_io_passes_through() {
        let (local, mut peer) = UnixStream::pair().unwrap();
        let fd = local.as_raw_fd();
        let mut conn = PooledConn::new(fd, local, Weak::new());

        conn.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        peer.write_all(b"pong").unwrap();
        conn.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
        assert_eq!(conn.as_raw_fd(), fd);
    }

    #[test]
    fn test_mark_unusable_only_sets_flag() {
        let (local, _peer) = UnixStream::pair().unwrap();
        let fd = local.as_raw_fd();
        let conn = PooledConn::new(fd, local, Weak::new());
        assert!(!conn.is_unusable());
        conn.mark_unusable();
        assert!(conn.is_unusable());
        // Still usable as a stream until released.
        assert!(conn.peer_addr().is_ok());
        assert!(format!("{conn:?}").contains("unusable: true"));
    }
}
