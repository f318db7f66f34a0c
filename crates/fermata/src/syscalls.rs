// src/syscalls.rs
use libc::{c_int, c_void};
use std::io;

/// Token reserved for the poller's internal wake pipe.
pub const WAKE_TOKEN: u64 = u64::MAX;

// ---- Wake Pipe ----

/// Create a Unix pipe with a non-blocking read end. Returns (read_fd, write_fd).
pub fn create_pipe() -> io::Result<(c_int, c_int)> {
    let mut fds = [0 as c_int; 2];
    unsafe {
        if libc::pipe(fds.as_mut_ptr()) < 0 {
            return Err(io::Error::last_os_error());
        }
        for fd in fds {
            if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
                let err = io::Error::last_os_error();
                libc::close(fds[0]);
                libc::close(fds[1]);
                return Err(err);
            }
        }
        let flags = libc::fcntl(fds[0], libc::F_GETFL, 0);
        if flags < 0 || libc::fcntl(fds[0], libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fds[0]);
            libc::close(fds[1]);
            return Err(err);
        }
    }
    Ok((fds[0], fds[1]))
}

/// Write a single byte into the wake pipe. A full pipe already guarantees a wakeup.
fn signal_pipe(write_fd: c_int) -> io::Result<()> {
    let byte = 1u8;
    unsafe {
        let n = libc::write(write_fd, &byte as *const u8 as *const c_void, 1);
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }
    }
    Ok(())
}

/// Point `target` at the read end of a fresh pipe. Polling calls on it fail afterwards.
#[cfg(test)]
fn clobber_with_pipe(target: c_int) -> io::Result<()> {
    let (read_fd, write_fd) = create_pipe()?;
    unsafe {
        let res = libc::dup2(read_fd, target);
        let err = io::Error::last_os_error();
        libc::close(read_fd);
        libc::close(write_fd);
        if res < 0 {
            return Err(err);
        }
    }
    Ok(())
}

// ---- Epoll Operations (Linux) ----

#[cfg(target_os = "linux")]
pub use linux_epoll::*;

#[cfg(target_os = "linux")]
mod linux_epoll {
    use super::*;
    use libc::{EPOLLET, EPOLLIN};
    use std::ptr;

    pub use libc::{EPOLLERR, EPOLLHUP, EPOLLRDHUP};

    pub type Event = libc::epoll_event;

    pub const EMPTY_EVENT: Event = libc::epoll_event { events: 0, u64: 0 };

    /// Hangup, error and peer half-close. No read or write interest.
    pub const LIVENESS_INTERESTS: i32 = EPOLLRDHUP;

    pub struct Poller {
        fd: c_int,
        wake_read: c_int,
        wake_write: c_int,
    }

    impl Poller {
        pub fn new() -> io::Result<Self> {
            let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            let (wake_read, wake_write) = match create_pipe() {
                Ok(pipe) => pipe,
                Err(err) => {
                    unsafe { libc::close(fd) };
                    return Err(err);
                }
            };
            let poller = Self {
                fd,
                wake_read,
                wake_write,
            };
            poller.add(wake_read, WAKE_TOKEN, EPOLLIN)?;
            Ok(poller)
        }

        /// Add a file descriptor to epoll. Always Edge Triggered (EPOLLET).
        /// EPOLLHUP and EPOLLERR are reported by the kernel without being requested.
        pub fn add(&self, fd: c_int, token: u64, interests: i32) -> io::Result<()> {
            let mut event = libc::epoll_event {
                events: (interests | EPOLLET) as u32,
                u64: token,
            };

            unsafe {
                if libc::epoll_ctl(self.fd, libc::EPOLL_CTL_ADD, fd, &mut event) < 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            Ok(())
        }

        /// Remove a file descriptor. Removing one that is not registered is not an error.
        pub fn delete(&self, fd: c_int) -> io::Result<()> {
            unsafe {
                if libc::epoll_ctl(self.fd, libc::EPOLL_CTL_DEL, fd, ptr::null_mut()) < 0 {
                    let err = io::Error::last_os_error();
                    if err.raw_os_error() != Some(libc::ENOENT) {
                        return Err(err);
                    }
                }
            }
            Ok(())
        }

        pub fn wait(&self, events: &mut [Event], timeout_ms: i32) -> io::Result<usize> {
            unsafe {
                let res = libc::epoll_wait(
                    self.fd,
                    events.as_mut_ptr(),
                    events.len() as c_int,
                    timeout_ms,
                );

                if res < 0 {
                    let err = io::Error::last_os_error();
                    if err.raw_os_error() == Some(libc::EINTR) {
                        return Ok(0);
                    }
                    return Err(err);
                }

                Ok(res as usize)
            }
        }

        /// Interrupt a blocked `wait` from another thread.
        pub fn wake(&self) -> io::Result<()> {
            signal_pipe(self.wake_write)
        }

        /// Make every later `wait` fail.
        #[cfg(test)]
        pub fn break_wait(&self) -> io::Result<()> {
            clobber_with_pipe(self.fd)
        }
    }

    impl Drop for Poller {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.fd);
                libc::close(self.wake_read);
                libc::close(self.wake_write);
            }
        }
    }
}

// ---- Kqueue Fallback (macOS) ----

#[cfg(target_os = "macos")]
pub use macos_kqueue::*;

#[cfg(target_os = "macos")]
mod macos_kqueue {
    use super::*;
    use libc::{EV_ADD, EV_CLEAR, EV_DELETE, EV_ENABLE, EV_EOF, EV_ERROR, EVFILT_READ, kevent, kqueue};
    use std::ptr;

    /// Kqueue events translated into epoll-style bits.
    #[derive(Clone, Copy)]
    pub struct Event {
        pub events: u32,
        pub u64: u64,
    }

    pub const EMPTY_EVENT: Event = Event { events: 0, u64: 0 };

    pub const EPOLLIN: i32 = 0x001;
    pub const EPOLLERR: i32 = 0x008;
    pub const EPOLLHUP: i32 = 0x010;
    pub const EPOLLRDHUP: i32 = 0x2000;

    /// Kqueue has no hangup-only filter: watch reads and report only EOF/ERROR.
    pub const LIVENESS_INTERESTS: i32 = EPOLLRDHUP;

    pub struct Poller {
        fd: c_int,
        wake_read: c_int,
        wake_write: c_int,
    }

    impl Poller {
        pub fn new() -> io::Result<Self> {
            let fd = unsafe { kqueue() };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            unsafe {
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
            }
            let (wake_read, wake_write) = match create_pipe() {
                Ok(pipe) => pipe,
                Err(err) => {
                    unsafe { libc::close(fd) };
                    return Err(err);
                }
            };
            let poller = Self {
                fd,
                wake_read,
                wake_write,
            };
            poller.add(wake_read, WAKE_TOKEN, EPOLLIN)?;
            Ok(poller)
        }

        pub fn add(&self, fd: c_int, token: u64, _interests: i32) -> io::Result<()> {
            self.change(fd, token, EV_ADD | EV_ENABLE | EV_CLEAR)
        }

        pub fn delete(&self, fd: c_int) -> io::Result<()> {
            match self.change(fd, 0, EV_DELETE) {
                Err(err) if err.raw_os_error() == Some(libc::ENOENT) => Ok(()),
                other => other,
            }
        }

        fn change(&self, fd: c_int, token: u64, action: u16) -> io::Result<()> {
            let change = kevent {
                ident: fd as usize,
                filter: EVFILT_READ,
                flags: action,
                fflags: 0,
                data: 0,
                udata: token as *mut c_void,
            };

            unsafe {
                let res = libc::kevent(self.fd, &change, 1, ptr::null_mut(), 0, ptr::null());
                if res < 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            Ok(())
        }

        pub fn wait(&self, events: &mut [Event], timeout_ms: i32) -> io::Result<usize> {
            const MAX_BATCH: usize = 128;
            let mut kevents = [unsafe { std::mem::zeroed::<kevent>() }; MAX_BATCH];
            let batch_size = events.len().min(MAX_BATCH);

            let ts = if timeout_ms >= 0 {
                Some(libc::timespec {
                    tv_sec: (timeout_ms / 1000) as libc::time_t,
                    tv_nsec: ((timeout_ms % 1000) * 1_000_000) as libc::c_long,
                })
            } else {
                None
            };
            let ts_ptr = match &ts {
                Some(t) => t as *const libc::timespec,
                None => ptr::null(),
            };

            unsafe {
                let res = libc::kevent(
                    self.fd,
                    ptr::null(),
                    0,
                    kevents.as_mut_ptr(),
                    batch_size as c_int,
                    ts_ptr,
                );

                if res < 0 {
                    let err = io::Error::last_os_error();
                    if err.raw_os_error() == Some(libc::EINTR) {
                        return Ok(0);
                    }
                    return Err(err);
                }

                let n = res as usize;
                for i in 0..n {
                    let mut ep_ev = 0;
                    if kevents[i].filter == EVFILT_READ {
                        ep_ev |= EPOLLIN;
                    }
                    if kevents[i].flags & EV_EOF != 0 {
                        ep_ev |= EPOLLRDHUP;
                    }
                    if kevents[i].flags & EV_ERROR != 0 {
                        ep_ev |= EPOLLERR;
                    }
                    events[i] = Event {
                        events: ep_ev as u32,
                        u64: kevents[i].udata as u64,
                    };
                }

                Ok(n)
            }
        }

        pub fn wake(&self) -> io::Result<()> {
            signal_pipe(self.wake_write)
        }

        /// Make every later `wait` fail.
        #[cfg(test)]
        pub fn break_wait(&self) -> io::Result<()> {
            clobber_with_pipe(self.fd)
        }
    }

    impl Drop for Poller {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.fd);
                libc::close(self.wake_read);
                libc::close(self.wake_write);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_pipe_read_end_is_nonblocking() {
        let (read_fd, write_fd) = create_pipe().unwrap();
        let mut buf = [0u8; 1];
        let n = unsafe { libc::read(read_fd, buf.as_mut_ptr() as *mut c_void, 1) };
        assert!(n < 0);
        assert_eq!(
            io::Error::last_os_error().kind(),
            io::ErrorKind::WouldBlock
        );
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }

    #[test]
    fn test_wake_interrupts_wait() {
        let poller = Poller::new().unwrap();
        poller.wake().unwrap();
        let mut events = [EMPTY_EVENT; 4];
        let n = poller.wait(&mut events, 1000).unwrap();
        assert_eq!(n, 1);
        let token = events[0].u64;
        assert_eq!(token, WAKE_TOKEN);
    }

    #[test]
    fn test_peer_close_reports_hangup() {
        let poller = Poller::new().unwrap();
        let (local, peer) = UnixStream::pair().unwrap();
        let fd = local.as_raw_fd();
        poller.add(fd, fd as u64, LIVENESS_INTERESTS).unwrap();

        let mut events = [EMPTY_EVENT; 4];
        assert_eq!(poller.wait(&mut events, 0).unwrap(), 0);

        drop(peer);
        let n = poller.wait(&mut events, 1000).unwrap();
        assert_eq!(n, 1);
        let token = events[0].u64;
        assert_eq!(token, fd as u64);
        let flags = events[0].events as i32;
        assert_ne!(flags & (EPOLLRDHUP | EPOLLHUP | EPOLLERR), 0);
    }

    #[test]
    fn test_data_alone_is_not_reported() {
        use std::io::Write;

        let poller = Poller::new().unwrap();
        let (local, mut peer) = UnixStream::pair().unwrap();
        let fd = local.as_raw_fd();
        poller.add(fd, fd as u64, LIVENESS_INTERESTS).unwrap();
        peer.write_all(b"ping").unwrap();

        let mut events = [EMPTY_EVENT; 4];
        let n = poller.wait(&mut events, 50).unwrap();
        for i in 0..n {
            let flags = events[i].events as i32;
            assert_eq!(flags & (EPOLLRDHUP | EPOLLHUP | EPOLLERR), 0);
        }
    }

    #[test]
    fn test_wait_fails_once_broken() {
        let poller = Poller::new().unwrap();
        poller.break_wait().unwrap();
        let mut events = [EMPTY_EVENT; 4];
        assert!(poller.wait(&mut events, 0).is_err());
    }

    #[test]
    fn test_delete_unregistered_is_ok() {
        let poller = Poller::new().unwrap();
        let (local, _peer) = UnixStream::pair().unwrap();
        poller.delete(local.as_raw_fd()).unwrap();
        poller.delete(local.as_raw_fd()).unwrap();
    }
}
