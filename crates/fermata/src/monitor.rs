//! Liveness monitor for idle connections.
//!
//! Idle descriptors are registered edge-triggered for hangup, error and peer
//! half-close only, so an idle connection costs no thread and no reads. One
//! dedicated thread blocks in the kernel wait call and reports every dead
//! descriptor through a callback.
//!
//! Each registration carries a generation next to the descriptor. A
//! descriptor number can be closed and handed to a new connection while an
//! event for the old one is still in flight; the generation tells them apart.

#[cfg(test)]
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::error::{PoolError, PoolResult};
use crate::syscalls::{
    EMPTY_EVENT, EPOLLERR, EPOLLHUP, EPOLLRDHUP, LIVENESS_INTERESTS, Poller, WAKE_TOKEN,
};

const DEAD_MASK: u32 = (EPOLLHUP | EPOLLERR | EPOLLRDHUP) as u32;

#[inline(always)]
fn token(fd: RawFd, generation: u32) -> u64 {
    ((generation as u64) << 32) | fd as u32 as u64
}

#[inline(always)]
fn split(token: u64) -> (RawFd, u32) {
    (token as u32 as RawFd, (token >> 32) as u32)
}

pub struct Monitor {
    poller: Poller,
    batch: usize,
    stopping: AtomicBool,
    running: AtomicBool,
    failed: AtomicBool,
}

impl Monitor {
    /// Create the kernel readiness instance. `batch` bounds the events drained per wakeup.
    pub fn new(batch: usize) -> PoolResult<Self> {
        Ok(Self {
            poller: Poller::new()?,
            batch: batch.max(1),
            stopping: AtomicBool::new(false),
            running: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        })
    }

    /// Start watching `fd` for peer termination. `generation` is reported
    /// back with the descriptor.
    pub fn register(&self, fd: RawFd, generation: u32) -> PoolResult<()> {
        self.poller.add(fd, token(fd, generation), LIVENESS_INTERESTS)?;
        Ok(())
    }

    /// Stop watching `fd`. Unknown descriptors are ignored.
    pub fn deregister(&self, fd: RawFd) -> PoolResult<()> {
        self.poller.delete(fd)?;
        Ok(())
    }

    /// Block the calling thread, invoking `on_dead` with the descriptor and
    /// registration generation of every connection whose peer hung up,
    /// errored or shut down its write half.
    ///
    /// Returns `Ok(())` once [`Monitor::shutdown`] is called and
    /// `MonitorFailure` if the kernel wait call itself fails.
    pub fn run<F: FnMut(RawFd, u32)>(&self, mut on_dead: F) -> PoolResult<()> {
        let mut events = vec![EMPTY_EVENT; self.batch];

        loop {
            if self.stopping.load(Ordering::Acquire) {
                return Ok(());
            }

            let n = self
                .poller
                .wait(&mut events, -1)
                .map_err(PoolError::MonitorFailure)?;

            for i in 0..n {
                let token = events[i].u64;
                let flags = events[i].events;

                if token == WAKE_TOKEN {
                    continue;
                }
                if flags & DEAD_MASK != 0 {
                    let (fd, generation) = split(token);
                    on_dead(fd, generation);
                }
            }
        }
    }

    /// Run the wait loop on a dedicated, named thread.
    pub fn spawn<F>(self: &Arc<Self>, name: &str, on_dead: F) -> PoolResult<JoinHandle<()>>
    where
        F: FnMut(RawFd, u32) + Send + 'static,
    {
        let monitor = Arc::clone(self);
        self.running.store(true, Ordering::Release);

        let spawned = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                match monitor.run(on_dead) {
                    Ok(()) => tracing::debug!("liveness monitor stopped"),
                    Err(e) => {
                        monitor.failed.store(true, Ordering::Release);
                        tracing::error!(
                            error = %e,
                            "liveness monitor failed; idle connections are no longer watched"
                        );
                    }
                }
                monitor.running.store(false, Ordering::Release);
            });

        spawned.map_err(|e| {
            self.running.store(false, Ordering::Release);
            PoolError::Io(e)
        })
    }

    /// Whether a spawned wait loop is still alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether the wait loop ended with `MonitorFailure`. Registrations made
    /// afterwards would never be reported.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Ask the wait loop to return. Does not wait for it.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        if let Err(e) = self.poller.wake() {
            tracing::warn!(error = %e, "failed to wake liveness monitor");
        }
    }

    /// Make the wait loop fail on its next call.
    #[cfg(test)]
    pub(crate) fn break_wait(&self) -> io::Result<()> {
        self.poller.break_wait()?;
        self.poller.wake()
    }
}
