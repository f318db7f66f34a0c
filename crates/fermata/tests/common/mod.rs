#![allow(dead_code)]

use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Remote ends of every connection a [`Harness`] factory created, in creation order.
#[derive(Clone, Default)]
pub struct Harness {
    peers: Arc<Mutex<Vec<(RawFd, Option<UnixStream>)>>>,
    fail: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory producing one end of a fresh socket pair per call.
    pub fn factory(&self) -> impl Fn() -> io::Result<UnixStream> + Send + Sync + 'static {
        let harness = self.clone();
        move || {
            harness.calls.fetch_add(1, Ordering::SeqCst);
            if harness.fail.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "dial refused"));
            }
            let (local, peer) = UnixStream::pair()?;
            peer.set_nonblocking(true)?;
            harness.peers.lock().unwrap().push((local.as_raw_fd(), Some(peer)));
            Ok(local)
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    /// Position of the most recent connection whose pooled end is `fd`.
    pub fn index_of(&self, fd: RawFd) -> usize {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .rposition(|(local, _)| *local == fd)
            .expect("fd was not created by this harness")
    }

    /// True once the pooled end of connection `idx` has been closed.
    pub fn is_closed(&self, idx: usize) -> bool {
        let mut peers = self.peers.lock().unwrap();
        let peer = peers[idx].1.as_mut().expect("peer already hung up");
        let mut buf = [0u8; 1];
        matches!(peer.read(&mut buf), Ok(0))
    }

    /// Simulate the server hanging up connection `idx`.
    pub fn hang_up(&self, idx: usize) {
        self.peers.lock().unwrap()[idx].1.take();
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub fn wait_until<F: FnMut() -> bool>(mut cond: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
